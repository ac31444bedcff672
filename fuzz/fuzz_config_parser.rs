//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary UTF-8 to `AppConfig::parse()`, covering the `[control]`
//! and `[logging]` tables and their validation.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(config) = warden_config::AppConfig::parse(s)
    {
        // A config that parsed must also resolve a socket path.
        assert!(!config.socket_path().as_os_str().is_empty());
    }
});
