//! Layered name resolution for factor evaluation
//!
//! A [`LayeredContext`] is a stack of read-only [`ContextSource`] layers
//! under one private mutable layer. Lookups scan the private layer first and
//! then each named layer in order; writes and deletes only ever touch the
//! private layer, so evaluating a factor can never modify the data it reads.

use indexmap::IndexMap;

use dm_core::data::{DataFrame, DataView};

use super::values::Value;

/// A read-only source of named values
pub trait ContextSource {
    /// Resolve `name`, or `None` if this source does not define it
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Names defined by this source
    fn names(&self) -> Vec<&str>;

    /// Number of rows, for row-aligned sources
    fn nrows(&self) -> Option<usize> {
        None
    }
}

impl ContextSource for DataFrame {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get_column(name).map(Value::from)
    }

    fn names(&self) -> Vec<&str> {
        self.column_names()
    }

    fn nrows(&self) -> Option<usize> {
        Some(DataFrame::nrows(self))
    }
}

impl ContextSource for IndexMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn names(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

/// Adapter exposing any [`DataView`] as a context layer
pub struct DataLayer<'a>(pub &'a dyn DataView);

impl ContextSource for DataLayer<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.0.get_column(name).map(Value::from)
    }

    fn names(&self) -> Vec<&str> {
        self.0.column_names()
    }

    fn nrows(&self) -> Option<usize> {
        Some(self.0.nrows())
    }
}

/// Named read-only layers under a private mutable layer
#[derive(Default)]
pub struct LayeredContext<'a> {
    local: IndexMap<String, Value>,
    layers: Vec<(String, &'a dyn ContextSource)>,
}

impl<'a> LayeredContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer below the existing ones
    pub fn push_layer(mut self, name: impl Into<String>, source: &'a dyn ContextSource) -> Self {
        self.layers.push((name.into(), source));
        self
    }

    /// A new context with `front` searched before and `back` after the
    /// existing layers; the private layer is carried over
    pub fn with_layers(
        &self,
        front: Vec<(String, &'a dyn ContextSource)>,
        back: Vec<(String, &'a dyn ContextSource)>,
    ) -> Self {
        let mut layers = front;
        layers.extend(self.layers.iter().cloned());
        layers.extend(back);
        Self {
            local: self.local.clone(),
            layers,
        }
    }

    /// A named layer from the registry
    pub fn layer(&self, name: &str) -> Option<&'a dyn ContextSource> {
        self.layers
            .iter()
            .find(|(layer, _)| layer == name)
            .map(|(_, source)| *source)
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// First match scanning the private layer, then each layer in order
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.local.get(name) {
            return Some(value.clone());
        }
        self.layers
            .iter()
            .find_map(|(_, source)| source.lookup(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind `name` in the private layer, shadowing every other layer
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.local.insert(name.into(), value)
    }

    /// Remove a binding from the private layer
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.local.shift_remove(name)
    }

    /// Every visible name, without duplicates
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.local.keys().map(String::as_str).collect();
        for (_, source) in &self.layers {
            for name in source.names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Row count of the first row-aligned layer
    pub fn nrows(&self) -> Option<usize> {
        self.layers.iter().find_map(|(_, source)| source.nrows())
    }
}
