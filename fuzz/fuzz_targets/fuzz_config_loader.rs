#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Config and persisted-state parsing must reject malformed input without panicking.
    if let Ok(cfg) = toml::from_str::<micrologger_config::Config>(data) {
        let _ = cfg.validate();
    }
    let _ = toml::from_str::<micrologger_config::PersistedState>(data);
});
