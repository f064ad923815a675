use std::time::Duration;

use tacmap_core::entity::EntityKind;
use tacmap_core::map::{BaseLayer, DEFAULT_TILE_ATTRIBUTION, DEFAULT_TILE_URL_TEMPLATE};
use tacmap_sync::api::ApiEndpoints;
use tacmap_sync::backoff::BackoffConfig;
use tacmap_sync::poller::{PollerConfig, DEFAULT_MAX_IN_FLIGHT};

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Anything other than `json` means text.
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the targets host (targets and points of interest).
    pub targets_api_url: String,
    /// Base URL of the flights host.
    pub flights_api_url: String,
    pub targets_poll: Duration,
    pub flights_poll: Duration,
    pub places_poll: Duration,
    pub request_timeout: Duration,
    /// Upper bound on the backoff delay after repeated failures.
    pub backoff_max: Duration,
    pub max_in_flight: usize,
    pub base_layer: BaseLayer,
    pub log_format: LogFormat,
}

impl AgentConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                   |
    /// |------------------------|---------------------------|
    /// | `TARGETS_API_URL`      | `http://localhost:5213`   |
    /// | `FLIGHTS_API_URL`      | `http://localhost:5219`   |
    /// | `TARGETS_POLL_MS`      | `5000`                    |
    /// | `FLIGHTS_POLL_MS`      | `5000`                    |
    /// | `PLACES_POLL_MS`       | `5000`                    |
    /// | `REQUEST_TIMEOUT_SECS` | `10`                      |
    /// | `BACKOFF_MAX_SECS`     | `60`                      |
    /// | `MAX_IN_FLIGHT`        | `2`                       |
    /// | `TILE_URL_TEMPLATE`    | OpenStreetMap tiles       |
    /// | `TILE_ATTRIBUTION`     | OpenStreetMap attribution |
    /// | `LOG_FORMAT`           | `text`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading values via `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            targets_api_url: string("TARGETS_API_URL", "http://localhost:5213"),
            flights_api_url: string("FLIGHTS_API_URL", "http://localhost:5219"),
            targets_poll: Duration::from_millis(positive(&lookup, "TARGETS_POLL_MS", 5000)?),
            flights_poll: Duration::from_millis(positive(&lookup, "FLIGHTS_POLL_MS", 5000)?),
            places_poll: Duration::from_millis(positive(&lookup, "PLACES_POLL_MS", 5000)?),
            request_timeout: Duration::from_secs(positive(&lookup, "REQUEST_TIMEOUT_SECS", 10)?),
            backoff_max: Duration::from_secs(positive(&lookup, "BACKOFF_MAX_SECS", 60)?),
            max_in_flight: positive(&lookup, "MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT as u64)?
                as usize,
            base_layer: BaseLayer {
                tile_url_template: string("TILE_URL_TEMPLATE", DEFAULT_TILE_URL_TEMPLATE),
                attribution: string("TILE_ATTRIBUTION", DEFAULT_TILE_ATTRIBUTION),
            },
            log_format: LogFormat::parse(lookup("LOG_FORMAT").as_deref()),
        })
    }

    pub fn endpoints(&self) -> ApiEndpoints {
        ApiEndpoints::new(&self.targets_api_url, &self.flights_api_url)
    }

    pub fn poll_interval(&self, kind: EntityKind) -> Duration {
        match kind {
            EntityKind::Target => self.targets_poll,
            EntityKind::AirbornePlatform => self.flights_poll,
            EntityKind::PointOfInterest => self.places_poll,
        }
    }

    /// Poller settings for `kind`.
    pub fn poller_config(&self, kind: EntityKind) -> PollerConfig {
        let backoff = BackoffConfig {
            max_delay: self.backoff_max,
            ..Default::default()
        };
        PollerConfig::new(self.endpoints().snapshot_url(kind), self.poll_interval(kind))
            .with_backoff(backoff)
            .with_max_in_flight(self.max_in_flight)
    }
}

/// Parse a strictly positive integer, falling back to `default` when unset.
fn positive<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero",
        }),
        Ok(n) => Ok(n),
        Err(_) => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be a positive integer",
        }),
    }
}

/// Errors raised while reading the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}
