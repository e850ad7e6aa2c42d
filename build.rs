use std::env;

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF; host builds (tests, sim) skip the toolchain probe
    if env::var_os("CARGO_FEATURE_ESP32").is_some() {
        embuild::espidf::sysenv::output();
    }

    Ok(())
}
