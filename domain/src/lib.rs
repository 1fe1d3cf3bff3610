//! Domain library for the products service.
//!
//! Holds the product types, the storage port and the error definitions. Keep
//! HTTP and filesystem concerns out of this crate; the only external
//! dependencies are serde and serde_json, because products are schema-loose
//! JSON records.

use std::error::Error;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Open set of product attributes, in insertion order.
pub type Fields = Map<String, Value>;

/// A catalog item: minimally `{id, name, price}`, plus whatever else the
/// client sent. Only `id` is interpreted; every other field passes through.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Product(Fields);

impl Product {
    pub fn from_fields(fields: Fields) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &Fields {
        &self.0
    }

    pub fn into_fields(self) -> Fields {
        self.0
    }

    pub fn id(&self) -> Option<&Value> {
        self.0.get("id")
    }

    /// Whether this record's `id` is numerically equal to `id`.
    pub fn matches(&self, id: &ProductId) -> bool {
        let (Some(wanted), Some(Value::Number(n))) = (id.value(), self.id()) else {
            return false;
        };
        match n.as_i64() {
            Some(v) => v == wanted,
            None => n.as_f64() == Some(wanted as f64),
        }
    }

    /// Set `id`. An existing key keeps its position.
    pub fn set_id(&mut self, id: i64) {
        self.0.insert("id".to_string(), Value::from(id));
    }

    /// Shallow merge: supplied keys overwrite, unknown keys are appended.
    pub fn merge(&mut self, fields: Fields) {
        for (key, value) in fields {
            self.0.insert(key, value);
        }
    }
}

/// The full ordered set of products, persisted as one unit.
pub type Collection = Vec<Product>;

/// Parse a request body into product fields. Only JSON objects are accepted.
pub fn parse_fields(body: &[u8]) -> Result<Fields, CoreError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(CoreError::InvalidBody("expected a JSON object".into())),
        Err(e) => Err(CoreError::InvalidBody(e.to_string())),
    }
}

/// Storage port: whole-collection load and save. No partial reads or writes.
pub trait ProductStore: Send + Sync {
    fn load(&self) -> Result<Collection, CoreError>;
    fn save(&self, products: &Collection) -> Result<(), CoreError>;
}

/// Core domain errors (no external error crates to keep deps small).
#[derive(Debug)]
pub enum CoreError {
    InvalidBody(String),
    NotFound,
    Storage(String),
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidBody(msg) => write!(f, "invalid body: {}", msg),
            CoreError::NotFound => write!(f, "not found"),
            CoreError::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl Error for CoreError {}

pub mod adapters;
pub mod id;
pub mod service;

pub use id::ProductId;
