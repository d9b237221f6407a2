//! tracing-subscriber setup.
//!
//! Logs go to stderr so command output on stdout stays machine readable.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "studysync=info,studysync_core=info";

/// `--log-level` wins over `RUST_LOG`, which wins over the default.
pub fn filter(level: Option<&str>) -> EnvFilter {
    if let Some(level) = level {
        return EnvFilter::new(format!("studysync={level},studysync_core={level}"));
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init(level: Option<&str>) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_level_is_used_for_both_crates() {
        let rendered = filter(Some("debug")).to_string();
        assert!(rendered.contains("studysync=debug"));
        assert!(rendered.contains("studysync_core=debug"));
    }
}
