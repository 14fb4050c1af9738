use std::fmt;
use std::sync::Arc;

use libloading::Library;
use serde::{Deserialize, Serialize};

/// One pair emitted by a map function.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Turns one input (name, contents) into an unordered list of pairs.
pub type MapFn = fn(&str, &str) -> Vec<KeyValue>;

/// Folds every value seen for one key into a single output value.
pub type ReduceFn = fn(&str, &[String]) -> String;

/// A map/reduce application. Both functions must be free of side effects:
/// a job may run more than once.
#[derive(Clone)]
pub struct Application {
    pub map: MapFn,
    pub reduce: ReduceFn,

    // keeps a dynamically loaded application's code mapped while the
    // function pointers above are alive
    plugin: Option<Arc<Library>>,
}

impl Application {
    pub fn new(map: MapFn, reduce: ReduceFn) -> Self {
        Application {
            map,
            reduce,
            plugin: None,
        }
    }

    pub(crate) fn from_plugin(map: MapFn, reduce: ReduceFn, lib: Library) -> Self {
        Application {
            map,
            reduce,
            plugin: Some(Arc::new(lib)),
        }
    }

    pub fn is_plugin(&self) -> bool {
        self.plugin.is_some()
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("plugin", &self.is_plugin())
            .finish()
    }
}
