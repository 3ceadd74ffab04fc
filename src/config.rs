//! Configuration management

use anyhow::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::pubsub::BusConfig;
use crate::workflow::WorkflowConfig;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis URL for the external transport (optional, log-only when unset)
    pub redis_url: Option<String>,

    /// SQLite article store (optional, in-memory when unset)
    pub db_path: Option<PathBuf>,

    /// Soft-wait poll interval in seconds
    pub reflection_poll_secs: u64,

    /// Soft-wait cap for the reflection phase in seconds
    pub reflection_wait_secs: u64,

    /// Hard end-to-end deadline per article in seconds
    pub generation_timeout_secs: u64,

    /// Capacity of the outbound transport queue
    pub outbound_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            db_path: None,
            reflection_poll_secs: 5,
            reflection_wait_secs: 300,
            generation_timeout_secs: 300,
            outbound_queue: 1024,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let redis_url = std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty());

        let db_path = std::env::var("FOGLIO_DB_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let reflection_poll_secs = parse_or(
            std::env::var("FOGLIO_REFLECTION_POLL_SECS").ok(),
            defaults.reflection_poll_secs,
        );

        let reflection_wait_secs = parse_or(
            std::env::var("FOGLIO_REFLECTION_WAIT_SECS").ok(),
            defaults.reflection_wait_secs,
        );

        let generation_timeout_secs = parse_or(
            std::env::var("FOGLIO_GENERATION_TIMEOUT_SECS").ok(),
            defaults.generation_timeout_secs,
        );

        let outbound_queue = parse_or(
            std::env::var("FOGLIO_OUTBOUND_QUEUE").ok(),
            defaults.outbound_queue,
        );

        Ok(Self {
            redis_url,
            db_path,
            reflection_poll_secs,
            reflection_wait_secs,
            generation_timeout_secs,
            outbound_queue,
        })
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            poll_interval: Duration::from_secs(self.reflection_poll_secs),
            reflection_wait: Duration::from_secs(self.reflection_wait_secs),
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
            ..WorkflowConfig::default()
        }
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            outbound_capacity: self.outbound_queue,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or() {
        assert_eq!(parse_or(Some(" 12 ".into()), 5u64), 12);
        assert_eq!(parse_or(Some("soon".into()), 5u64), 5);
        assert_eq!(parse_or(None, 1024usize), 1024);
    }

    #[test]
    fn test_derived_configs() {
        let config = Config {
            reflection_poll_secs: 1,
            reflection_wait_secs: 10,
            generation_timeout_secs: 60,
            outbound_queue: 8,
            ..Config::default()
        };

        let workflow = config.workflow_config();
        assert_eq!(workflow.poll_interval, Duration::from_secs(1));
        assert_eq!(workflow.reflection_wait, Duration::from_secs(10));
        assert_eq!(workflow.generation_timeout, Duration::from_secs(60));
        assert_eq!(workflow.required_agents.len(), 6);
        assert_eq!(config.bus_config().outbound_capacity, 8);
    }
}
