use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// The variable environment of one top-level render.
///
/// Cloning a `Variables` yields another handle to the same environment:
/// every helper and nested function invocation of a render tree sees the
/// writes of the others. Use [`Variables::fork`] for an independent copy.
/// An environment must not be shared by concurrent top-level renders.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    inner: Arc<Mutex<Map<String, Value>>>,
}

impl Variables {
    /// Creates an empty environment.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning `self` for chaining.
    #[inline]
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts or overwrites a value, returning the previous one.
    pub fn insert(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.lock().insert(name.into(), value.into())
    }

    /// Serializes the value as JSON and inserts it.
    pub fn insert_serialized<T: Serialize + ?Sized>(
        &self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Option<Value>, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(self.insert(name, value))
    }

    /// Returns a copy of the value.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.lock().get(name).cloned()
    }

    /// Returns `true` if the variable is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().contains_key(name)
    }

    /// Removes a variable, returning its value.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.inner.lock().remove(name)
    }

    /// Returns the number of bound variables.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns a copy of all bindings.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.lock().clone()
    }

    /// Creates an independent environment with a copy of the bindings.
    pub fn fork(&self) -> Self {
        Self::from(self.snapshot())
    }

    /// Returns `true` if both handles refer to the same environment.
    #[inline]
    pub fn ptr_eq(&self, other: &Variables) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<Map<String, Value>> for Variables {
    #[inline]
    fn from(map: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = iter
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect::<Map<_, _>>();
        Self::from(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::ChatTurn;
    use serde_json::json;

    #[test]
    fn test_clones_share_bindings() {
        let variables = Variables::new().with("name", "Ada");
        let handle = variables.clone();
        handle.insert("name", "Grace");
        assert_eq!(variables.get("name"), Some(json!("Grace")));
        assert!(variables.ptr_eq(&handle));
    }

    #[test]
    fn test_fork_is_independent() {
        let variables = Variables::from_iter([("count", 1)]);
        let forked = variables.fork();
        forked.insert("count", 2);
        assert_eq!(variables.get("count"), Some(json!(1)));
        assert!(!variables.ptr_eq(&forked));
    }

    #[test]
    fn test_insert_serialized_history() {
        let variables = Variables::new();
        let history = vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")];
        variables.insert_serialized("messages", &history).unwrap();
        assert_eq!(
            variables.get("messages"),
            Some(json!([
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ]))
        );
        assert_eq!(variables.len(), 1);
        assert_eq!(variables.remove("messages").map(|v| v.is_array()), Some(true));
        assert!(variables.is_empty());
    }
}
