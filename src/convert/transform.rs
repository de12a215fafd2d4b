// src/convert/transform.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type TransformFn = dyn Fn(&str) -> String + Send + Sync;

/// Named value transforms for categorical columns.
///
/// Schema documents reference transforms by name only; the closed built-in
/// set plus `register` replaces the embedded per-column scripting of older
/// converters, so no arbitrary code runs at conversion time.
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<TransformFn>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            transforms: HashMap::new(),
        };
        registry.register("lowercase", |v| v.to_lowercase());
        registry.register("uppercase", |v| v.to_uppercase());
        registry.register("trim", |v| v.trim().to_string());
        registry.register("collapse-whitespace", |v| {
            v.split_whitespace().collect::<Vec<_>>().join(" ")
        });
        registry
    }

    /// Extension point: add or replace a transform under `name`.
    pub fn register<F>(&mut self, name: &str, transform: F)
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.transforms.insert(name.to_string(), Arc::new(transform));
    }

    pub fn get(&self, name: &str) -> Option<&TransformFn> {
        self.transforms.get(name).map(Arc::as_ref)
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.transforms.keys().collect();
        names.sort();
        f.debug_struct("TransformRegistry")
            .field("transforms", &names)
            .finish()
    }
}
