//! Node type factory registry (§4.8 `register_node_type`).

use std::{collections::HashMap, sync::Arc};

use crate::{
    catalog,
    node::{GraphNode, NodeFactory},
};

pub struct Registry {
    factories: HashMap<String, NodeFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            factories: HashMap::new(),
        }
    }

    /// Register a node type under `name`. Returns `false` without replacing
    /// anything if the name is already registered (§6 `NodeTypeAlreadyExists`).
    pub fn register(&mut self, name: impl Into<String>, factory: NodeFactory) -> bool {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return false;
        }
        self.factories.insert(name, factory);
        true
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn create(&self, type_name: &str) -> Option<Arc<dyn GraphNode>> {
        self.factories.get(type_name).map(|factory| factory())
    }

    /// The small demonstration catalog (§2.9), registered by default so the
    /// acceptance scenarios in §8 have node types to create against.
    pub fn with_default_catalog(block_size: usize) -> Self {
        let mut registry = Registry::new();
        registry.register(
            catalog::Root::TYPE_NAME,
            Box::new(|| Arc::new(catalog::Root::new())),
        );
        registry.register(
            catalog::Constant::TYPE_NAME,
            Box::new(|| Arc::new(catalog::Constant::new())),
        );
        registry.register(
            catalog::TapOut::TYPE_NAME,
            Box::new(move || Arc::new(catalog::TapOut::new(block_size))),
        );
        registry.register(
            catalog::TapIn::TYPE_NAME,
            Box::new(|| Arc::new(catalog::TapIn::new())),
        );
        registry.register(
            catalog::SDelay::TYPE_NAME,
            Box::new(|| Arc::new(catalog::SDelay::new())),
        );
        registry.register(
            catalog::Sample::TYPE_NAME,
            Box::new(|| Arc::new(catalog::Sample::new())),
        );
        registry.register(
            catalog::Scope::TYPE_NAME,
            Box::new(|| Arc::new(catalog::Scope::new())),
        );
        registry.register(
            catalog::Meter::TYPE_NAME,
            Box::new(|| Arc::new(catalog::Meter::new())),
        );
        registry
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_the_same_name_twice_fails() {
        let mut registry = Registry::new();
        assert!(registry.register(
            "const",
            Box::new(|| Arc::new(catalog::Constant::new()))
        ));
        assert!(!registry.register(
            "const",
            Box::new(|| Arc::new(catalog::Constant::new()))
        ));
    }

    #[test]
    fn default_catalog_can_create_every_listed_type() {
        let registry = Registry::with_default_catalog(256);
        for type_name in ["root", "const", "tap_out", "tap_in", "sdelay", "sample", "scope", "meter"] {
            assert!(registry.create(type_name).is_some(), "{type_name} should be creatable");
        }
        assert!(registry.create("nonexistent").is_none());
    }
}
