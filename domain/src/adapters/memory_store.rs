use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{Collection, CoreError, ProductStore};

/// In-memory product store. Holds one collection behind a mutex and hands out
/// clones, so callers see the same whole-collection semantics as the file
/// store.
pub struct InMemoryStore {
    inner: Mutex<Collection>,
    saves: AtomicUsize,
    failing: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_products(Vec::new())
    }

    pub fn with_products(products: Collection) -> Self {
        Self {
            inner: Mutex::new(products),
            saves: AtomicUsize::new(0),
            failing: false,
        }
    }

    /// A store whose every load and save fails, for exercising error paths.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), CoreError> {
        if self.failing {
            return Err(CoreError::Storage("store unavailable".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductStore for InMemoryStore {
    fn load(&self) -> Result<Collection, CoreError> {
        self.check()?;
        let products = self
            .inner
            .lock()
            .map_err(|_| CoreError::Storage("mutex poisoned".into()))?;
        Ok(products.clone())
    }

    fn save(&self, products: &Collection) -> Result<(), CoreError> {
        self.check()?;
        let mut stored = self
            .inner
            .lock()
            .map_err(|_| CoreError::Storage("mutex poisoned".into()))?;
        *stored = products.clone();
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
