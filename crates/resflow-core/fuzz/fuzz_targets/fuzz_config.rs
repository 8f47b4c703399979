#![no_main]
use resflow_core::config::EngineConfig;
use resflow_core::engine::FlowEngine;
use libfuzzer_sys::fuzz_target;

// Arbitrary config JSON either fails to parse, fails validation, or yields
// an engine that can run a pass.
fuzz_target!(|data: &[u8]| {
    let Ok(config) = serde_json::from_slice::<EngineConfig>(data) else {
        return;
    };
    if let Ok(mut engine) = FlowEngine::new(config) {
        engine.optimize_flows();
    }
});
