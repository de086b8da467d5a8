#![no_main]
use libfuzzer_sys::fuzz_target;

use gatekeeper_core::spec::PipelineConfig;
use gatekeeper_engine::catalog::{self, GateCatalog};

// A clean audit and catalog construction must agree.
fuzz_target!(|data: &[u8]| {
    if let Ok(config) = serde_json::from_slice::<PipelineConfig>(data) {
        let issues = catalog::audit(&config.gates, &config.ordering, &config.criteria);
        let built = GateCatalog::from_config(&config);
        assert_eq!(issues.is_empty(), built.is_ok());
        if let Ok(catalog) = built {
            let planned: usize = catalog.plan().iter().map(|t| t.gates.len()).sum();
            assert_eq!(planned, catalog.gates().len());
        }
    }
});
