//! Environment-driven settings for the `ratrace-server` binary.

use std::path::PathBuf;
use std::time::Duration;

use ratrace_room::EngineConfig;

use crate::RatraceError;

/// Settings read from `RATRACE_*` environment variables.
///
/// | variable | default |
/// |---|---|
/// | `RATRACE_BIND` | `0.0.0.0:8080` |
/// | `RATRACE_DATA_DIR` | `./data` |
/// | `RATRACE_SWEEP_SECS` | engine default (60) |
/// | `RATRACE_SEED` | unset (OS entropy) |
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind: String,
    pub data_dir: PathBuf,
    pub sweep_interval: Option<Duration>,
    pub seed: Option<u64>,
}

impl ServerSettings {
    /// # Errors
    /// Returns [`RatraceError::Settings`] if a numeric variable does not
    /// parse.
    pub fn from_env() -> Result<Self, RatraceError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RatraceError> {
        let sweep_interval = parse_u64(&lookup, "RATRACE_SWEEP_SECS")?.map(Duration::from_secs);
        if sweep_interval == Some(Duration::ZERO) {
            return Err(RatraceError::Settings {
                name: "RATRACE_SWEEP_SECS",
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            bind: lookup("RATRACE_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            data_dir: lookup("RATRACE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            sweep_interval,
            seed: parse_u64(&lookup, "RATRACE_SEED")?,
        })
    }

    /// Engine configuration with these overrides applied.
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            sweep_interval: self.sweep_interval.unwrap_or(defaults.sweep_interval),
            seed: self.seed,
            ..defaults
        }
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, RatraceError> {
    lookup(name)
        .map(|raw| {
            raw.trim().parse().map_err(|e| RatraceError::Settings {
                name,
                reason: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let settings = ServerSettings::from_lookup(lookup(&[])).unwrap();

        assert_eq!(settings.bind, "0.0.0.0:8080");
        assert_eq!(settings.data_dir, PathBuf::from("./data"));
        assert_eq!(settings.seed, None);
        assert_eq!(settings.engine_config().sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_from_lookup_overrides_apply_to_engine_config() {
        let settings = ServerSettings::from_lookup(lookup(&[
            ("RATRACE_BIND", "127.0.0.1:9000"),
            ("RATRACE_DATA_DIR", "/var/lib/ratrace"),
            ("RATRACE_SWEEP_SECS", "15"),
            ("RATRACE_SEED", "42"),
        ]))
        .unwrap();

        assert_eq!(settings.bind, "127.0.0.1:9000");
        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/ratrace"));
        let config = settings.engine_config();
        assert_eq!(config.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn test_from_lookup_bad_seed_names_variable() {
        let err = ServerSettings::from_lookup(lookup(&[("RATRACE_SEED", "lucky")])).unwrap_err();
        assert!(matches!(err, RatraceError::Settings { name: "RATRACE_SEED", .. }));
    }

    #[test]
    fn test_from_lookup_zero_sweep_rejected() {
        let err =
            ServerSettings::from_lookup(lookup(&[("RATRACE_SWEEP_SECS", "0")])).unwrap_err();
        assert!(matches!(err, RatraceError::Settings { name: "RATRACE_SWEEP_SECS", .. }));
    }
}
