#![no_main]
use libfuzzer_sys::fuzz_target;

use gatekeeper_core::record::ExecutionRecord;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = serde_json::from_slice::<ExecutionRecord>(data) {
        let summary = record.summary();
        assert_eq!(summary.gates_run, record.gate_results.len());
        let _ = serde_json::to_string(&record);
    }
});
