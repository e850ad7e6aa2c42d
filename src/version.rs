// Centralized version information

// Firmware version reported on the status page and over AT+GMR
pub const FIRMWARE_VERSION: &str = "v1.4-rust";

// Cargo package version from Cargo.toml
pub const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

// Full version string including Cargo version
pub fn full_version() -> String {
    format!("{} ({})", FIRMWARE_VERSION, CARGO_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_version_carries_both_parts() {
        let v = full_version();
        assert!(v.starts_with(FIRMWARE_VERSION));
        assert!(v.contains(CARGO_VERSION));
    }
}
