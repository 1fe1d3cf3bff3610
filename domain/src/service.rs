use std::sync::Mutex;

use crate::{Collection, CoreError, Fields, Product, ProductId, ProductStore};

/// Application service running every request as a read-modify-write cycle
/// against the whole stored collection.
///
/// Nothing is cached between calls: each operation loads the collection
/// fresh and mutating operations save it back in full. Mutations hold a
/// service-wide write lock from load to save, so two in-flight mutations in
/// the same process cannot overwrite each other's changes.
pub struct ProductService<S: ProductStore> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: ProductStore> ProductService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the whole collection.
    pub fn list(&self) -> Result<Collection, CoreError> {
        self.store.load()
    }

    /// Return the first product whose id matches.
    pub fn get(&self, id: &ProductId) -> Result<Product, CoreError> {
        self.store
            .load()?
            .into_iter()
            .find(|p| p.matches(id))
            .ok_or(CoreError::NotFound)
    }

    /// Append a new product with `id = count + 1`.
    ///
    /// The id is not unique after a deletion: deleting id 1 from `[1, 2]`
    /// and creating again assigns 2 a second time.
    pub fn create(&self, fields: Fields) -> Result<Product, CoreError> {
        self.mutate(|products| {
            let mut product = Product::from_fields(fields);
            product.set_id(products.len() as i64 + 1);
            products.push(product.clone());
            Ok(product)
        })
    }

    /// Replace a product entirely; the id from the path always wins.
    pub fn replace(&self, id: &ProductId, fields: Fields) -> Result<Product, CoreError> {
        self.mutate(|products| {
            let slot = find_mut(products, id)?;
            let value = id.value().ok_or(CoreError::NotFound)?;
            let mut product = Product::from_fields(fields);
            product.set_id(value);
            *slot = product.clone();
            Ok(product)
        })
    }

    /// Shallow-merge the supplied fields over an existing product.
    pub fn patch(&self, id: &ProductId, fields: Fields) -> Result<Product, CoreError> {
        self.mutate(|products| {
            let slot = find_mut(products, id)?;
            slot.merge(fields);
            Ok(slot.clone())
        })
    }

    /// Remove a product, returning it.
    pub fn delete(&self, id: &ProductId) -> Result<Product, CoreError> {
        self.mutate(|products| {
            let index = products
                .iter()
                .position(|p| p.matches(id))
                .ok_or(CoreError::NotFound)?;
            Ok(products.remove(index))
        })
    }

    // Load, apply `f`, and save only if `f` succeeded.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Collection) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CoreError::Storage("write lock poisoned".into()))?;
        let mut products = self.store.load()?;
        let out = f(&mut products)?;
        self.store.save(&products)?;
        Ok(out)
    }
}

fn find_mut<'a>(
    products: &'a mut Collection,
    id: &ProductId,
) -> Result<&'a mut Product, CoreError> {
    products
        .iter_mut()
        .find(|p| p.matches(id))
        .ok_or(CoreError::NotFound)
}
