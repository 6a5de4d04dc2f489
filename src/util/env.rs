//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in the binary (or rely on lazy Once).
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Once;
use tracing::debug;

static INIT: Once = Once::new();

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        if dotenv::dotenv().is_err() {
            // Fallback to the crate root so `cargo run` from elsewhere still finds it.
            let candidate = format!("{}/.env", env!("CARGO_MANIFEST_DIR"));
            let _ = dotenv::from_filename(candidate);
        }
    });
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}

/// Resolve the config file path: explicit CLI value, then MIGRATE_CONFIG, then ./config.json.
pub fn config_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(p) = cli_value {
        return p;
    }
    if let Some(p) = env_opt("MIGRATE_CONFIG") {
        debug!(target = "env", path = %p, "config path from MIGRATE_CONFIG");
        return PathBuf::from(p.trim());
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_value_wins_over_env() {
        let p = config_path(Some(PathBuf::from("/tmp/other.json")));
        assert_eq!(p, PathBuf::from("/tmp/other.json"));
    }

    #[test]
    fn parse_falls_back_on_garbage() {
        std::env::set_var("MAGE_MIGRATE_TEST_TIMEOUT", "abc");
        assert_eq!(env_parse("MAGE_MIGRATE_TEST_TIMEOUT", 30u64), 30);
        std::env::set_var("MAGE_MIGRATE_TEST_TIMEOUT", " 45 ");
        assert_eq!(env_parse("MAGE_MIGRATE_TEST_TIMEOUT", 30u64), 45);
        assert!(!env_flag("MAGE_MIGRATE_TEST_UNSET_FLAG", false));
    }
}
