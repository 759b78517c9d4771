#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parsing or validation may fail; neither may panic.
    if let Ok(cfg) = aps_config::load_toml(data) {
        let _ = cfg.validate();
    }
});
