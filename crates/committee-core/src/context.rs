//! Shared run context
//!
//! The `Context` carries JSON settings and typed handles to external data
//! providers. It is built once by the caller and shared read-only with every
//! worker invocation.

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Well-known context keys
pub mod keys {
    /// Language preference for worker output (e.g. "en", "zh")
    pub const LANGUAGE: &str = "language";
    /// Current market price of the subject
    pub const CURRENT_PRICE: &str = "current_price";
}

/// Context shared with workers during a run
///
/// # Example
///
/// ```
/// use committee_core::Context;
/// use std::sync::Arc;
///
/// struct PriceFeed;
///
/// let ctx = Context::new()
///     .with_language("en")
///     .with_handle(Arc::new(PriceFeed));
///
/// assert_eq!(ctx.language(), Some("en"));
/// assert!(ctx.handle::<PriceFeed>().is_some());
/// ```
#[derive(Clone, Default)]
pub struct Context {
    data: HashMap<String, serde_json::Value>,
    handles: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("data", &self.data)
            .field("handles", &self.handles.len())
            .finish()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.insert(keys::LANGUAGE, serde_json::json!(lang.into()));
        self
    }

    pub fn with_current_price(mut self, price: f64) -> Self {
        self.insert(keys::CURRENT_PRICE, serde_json::json!(price));
        self
    }

    /// Attach a typed handle, replacing any handle of the same type
    pub fn with_handle<T: Any + Send + Sync>(mut self, handle: Arc<T>) -> Self {
        self.insert_handle(handle);
        self
    }

    pub fn language(&self) -> Option<&str> {
        self.get(keys::LANGUAGE).and_then(|v| v.as_str())
    }

    pub fn current_price(&self) -> Option<f64> {
        self.get(keys::CURRENT_PRICE).and_then(serde_json::Value::as_f64)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Insert a typed value, serialized to JSON
    pub fn insert_typed<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> crate::Result<()> {
        let json_value = serde_json::to_value(value)?;
        self.data.insert(key.into(), json_value);
        Ok(())
    }

    /// Read a JSON value back as `T`
    pub fn get_typed<T: for<'de> Deserialize<'de>>(&self, key: &str) -> crate::Result<Option<T>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    pub fn insert_handle<T: Any + Send + Sync>(&mut self, handle: Arc<T>) {
        self.handles.insert(TypeId::of::<T>(), handle);
    }

    /// Typed handle previously attached with [`Context::insert_handle`]
    pub fn handle<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.handles
            .get(&TypeId::of::<T>())
            .and_then(|h| Arc::clone(h).downcast::<T>().ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.handles.is_empty()
    }

    /// Merge another context into this one (other values override)
    pub fn merge(&mut self, other: Context) {
        self.data.extend(other.data);
        self.handles.extend(other.handles);
    }
}
