//! Coordinator configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::CatalogSource;
use crate::error::CoreError;
use crate::network::SessionCode;

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default catalog refresh interval
pub const DEFAULT_CATALOG_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How often the full evaluated state is broadcast
    pub heartbeat_interval: Duration,
    /// How often the catalog is reloaded from its source
    pub catalog_refresh_interval: Duration,
    /// Where tracks come from
    pub catalog: CatalogSource,
    /// Session clients join
    pub session_code: SessionCode,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            catalog_refresh_interval: DEFAULT_CATALOG_REFRESH_INTERVAL,
            catalog: CatalogSource::Directory {
                path: PathBuf::from("music"),
                media_base_url: "/music".to_string(),
            },
            session_code: SessionCode::random(),
        }
    }
}

impl CoordinatorConfig {
    /// Build from `PLAYSYNC_*` environment variables
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();

        let heartbeat_interval = lookup("PLAYSYNC_HEARTBEAT_MS")
            .and_then(|v| v.parse().ok())
            .filter(|ms: &u64| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.heartbeat_interval);

        let catalog_refresh_interval = lookup("PLAYSYNC_CATALOG_REFRESH_SECS")
            .and_then(|v| v.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.catalog_refresh_interval);

        // A remote listing wins over the local directory
        let catalog = match lookup("PLAYSYNC_CATALOG_URL") {
            Some(url) => CatalogSource::Http { url },
            None => CatalogSource::Directory {
                path: lookup("PLAYSYNC_MUSIC_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("music")),
                media_base_url: lookup("PLAYSYNC_MEDIA_BASE_URL")
                    .unwrap_or_else(|| "/music".to_string()),
            },
        };

        let session_code = match lookup("PLAYSYNC_SESSION_CODE") {
            Some(code) => code.parse()?,
            None => defaults.session_code,
        };

        Ok(Self {
            heartbeat_interval,
            catalog_refresh_interval,
            catalog,
            session_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.catalog_refresh_interval, Duration::from_secs(30));
        assert_eq!(
            config.catalog,
            CatalogSource::Directory {
                path: PathBuf::from("music"),
                media_base_url: "/music".to_string(),
            }
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            ("PLAYSYNC_HEARTBEAT_MS", "250"),
            ("PLAYSYNC_CATALOG_URL", "http://host:3000/tracks"),
            ("PLAYSYNC_MUSIC_DIR", "/ignored"),
            ("PLAYSYNC_SESSION_CODE", "abcd-efgh"),
        ]))
        .unwrap();

        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(
            config.catalog,
            CatalogSource::Http {
                url: "http://host:3000/tracks".to_string()
            }
        );
        assert_eq!(config.session_code.as_str(), "ABCDEFGH");
    }

    #[test]
    fn test_zero_heartbeat_falls_back_to_default() {
        let config =
            CoordinatorConfig::from_lookup(lookup(&[("PLAYSYNC_HEARTBEAT_MS", "0")])).unwrap();
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn test_bad_session_code_is_an_error() {
        let result = CoordinatorConfig::from_lookup(lookup(&[("PLAYSYNC_SESSION_CODE", "x")]));
        assert!(matches!(result, Err(CoreError::InvalidSessionCode(_))));
    }
}
