use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use gatekeeper_core::errors::ConfigError;
use gatekeeper_core::traits::ValidationHandler;

use crate::catalog::GateCatalog;

/// Validation name → handler. Read-only once handed to an orchestrator.
#[derive(Clone, Default)]
pub struct ValidationRegistry {
    handlers: BTreeMap<String, Arc<dyn ValidationHandler>>,
}

impl ValidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later registration under the same name replaces it.
    pub fn register(&mut self, name: &str, handler: impl ValidationHandler + 'static) -> &mut Self {
        self.handlers.insert(name.to_string(), Arc::new(handler));
        self
    }

    pub fn register_arc(&mut self, name: &str, handler: Arc<dyn ValidationHandler>) -> &mut Self {
        self.handlers.insert(name.to_string(), handler);
        self
    }

    pub fn with(mut self, name: &str, handler: impl ValidationHandler + 'static) -> Self {
        self.register(name, handler);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ValidationHandler>, ConfigError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownValidation(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Fail fast: every validation named by the catalog must resolve.
    pub fn ensure_covers(&self, catalog: &GateCatalog) -> Result<(), ConfigError> {
        for gate in catalog.gates() {
            for name in &gate.validation_names {
                if !self.contains(name) {
                    return Err(ConfigError::UnknownValidation(name.clone()));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ValidationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_core::errors::ValidationDefect;
    use gatekeeper_core::spec::criteria::CriteriaTable;
    use gatekeeper_core::spec::gates::GateDefinition;
    use gatekeeper_core::traits::{RunContext, ValidationReport};
    use gatekeeper_core::types::Priority;
    use serde_json::json;

    fn ok(_: &RunContext) -> Result<ValidationReport, ValidationDefect> {
        Ok(ValidationReport::pass(json!(null)))
    }

    #[test]
    fn resolve_known_and_unknown() {
        let registry = ValidationRegistry::new().with("tls", ok);
        assert!(registry.resolve("tls").is_ok());
        match registry.resolve("dns") {
            Err(ConfigError::UnknownValidation(name)) => assert_eq!(name, "dns"),
            other => panic!("expected UnknownValidation, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn ensure_covers_reports_first_missing_handler() {
        let catalog = GateCatalog::new(
            vec![GateDefinition::new("g", Priority::High, &["tls", "hsts"])],
            &Default::default(),
            CriteriaTable::default(),
        )
        .unwrap();
        let registry = ValidationRegistry::new().with("tls", ok);
        assert_eq!(
            registry.ensure_covers(&catalog),
            Err(ConfigError::UnknownValidation("hsts".into()))
        );
        let registry = registry.with("hsts", ok);
        assert!(registry.ensure_covers(&catalog).is_ok());
    }

    #[test]
    fn debug_lists_names_only() {
        let registry = ValidationRegistry::new().with("b", ok).with("a", ok);
        assert_eq!(
            format!("{registry:?}"),
            r#"ValidationRegistry { handlers: ["a", "b"] }"#
        );
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
