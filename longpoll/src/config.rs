use crate::payload::CompressionType;
use crate::types::{ApplicationId, Generation, PlatformVersion};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Worker queue size must be at least 1")]
    EmptyQueue,

    #[error("Checksum cache capacity must be at least 1")]
    EmptyChecksumCache,

    #[error("Duplicate application: {0}")]
    DuplicateApplication(ApplicationId),

    #[error("Host {host} is claimed by more than one application")]
    DuplicateHost { host: String },
}

/// Long-poll server configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener serving config requests
    pub listener: Listener,
    /// Listener for health and status endpoints
    pub admin_listener: Listener,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    #[serde(default)]
    pub long_poll: LongPollConfig,
    /// How payloads are stored on the wire
    #[serde(default)]
    pub compression: CompressionType,
    /// Config definitions (`namespace.name`) served by the aggregate model
    /// to hosts outside any application
    #[serde(default)]
    pub aggregate_config_names: Vec<String>,
    #[serde(default)]
    pub checksum_cache: ChecksumCacheConfig,
    /// Config content served from memory
    #[serde(default)]
    pub applications: Vec<StaticApplication>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.worker_pool.workers == 0 {
            return Err(ValidationError::NoWorkers);
        }
        if self.worker_pool.queue_size == 0 {
            return Err(ValidationError::EmptyQueue);
        }
        if self.checksum_cache.max_capacity == 0 {
            return Err(ValidationError::EmptyChecksumCache);
        }

        let mut ids = HashSet::new();
        let mut hosts = HashSet::new();
        for app in &self.applications {
            if !ids.insert(&app.id) {
                return Err(ValidationError::DuplicateApplication(app.id.clone()));
            }
            for host in &app.hosts {
                if !hosts.insert(host) {
                    return Err(ValidationError::DuplicateHost { host: host.clone() });
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    /// Requests waiting for a worker beyond this are rejected as overload
    pub queue_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig {
            workers: 8,
            queue_size: 1024,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LongPollConfig {
    /// Cap on the timeout clients may request
    pub max_timeout_ms: u64,
}

impl LongPollConfig {
    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }
}

impl Default for LongPollConfig {
    fn default() -> Self {
        LongPollConfig {
            max_timeout_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChecksumCacheConfig {
    pub max_capacity: u64,
    pub ttl_secs: u64,
}

impl ChecksumCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for ChecksumCacheConfig {
    fn default() -> Self {
        ChecksumCacheConfig {
            max_capacity: 10_000,
            ttl_secs: 600,
        }
    }
}

/// An application whose configs are given inline.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StaticApplication {
    pub id: ApplicationId,
    pub generation: Generation,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub version: Option<PlatformVersion>,
    #[serde(default)]
    pub configs: Vec<StaticConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StaticConfig {
    pub namespace: String,
    pub name: String,
    pub config_id: String,
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
listener:
    host: "0.0.0.0"
    port: 19071
admin_listener:
    host: "127.0.0.1"
    port: 19072
worker_pool:
    workers: 4
    queue_size: 256
long_poll:
    max_timeout_ms: 30000
compression: zstd
aggregate_config_names:
    - cloud.config.lb-services
applications:
    - id: "tenant:app1:default"
      generation: 5
      version: "8.1.0"
      hosts:
        - node1.example.com
        - node2.example.com
      configs:
        - namespace: cloud.config
          name: sentinel
          config_id: hosts/node1.example.com/sentinel
          payload: '{"service":[]}'
"#;

    #[test]
    fn test_parse_valid_config() {
        let config: Config = serde_yaml::from_str(VALID).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 19071);
        assert_eq!(config.worker_pool.workers, 4);
        assert_eq!(config.long_poll.max_timeout(), Duration::from_secs(30));
        assert_eq!(config.compression, CompressionType::Zstd);
        // Not set, falls back to defaults
        assert_eq!(config.checksum_cache, ChecksumCacheConfig::default());

        let app = &config.applications[0];
        assert_eq!(app.id, ApplicationId::new("tenant", "app1", "default"));
        assert_eq!(app.version, Some(PlatformVersion::new(8, 1, 0)));
        assert_eq!(app.configs[0].name, "sentinel");
    }

    #[test]
    fn test_minimal_config() {
        let yaml = r#"
listener: {host: "0.0.0.0", port: 19071}
admin_listener: {host: "127.0.0.1", port: 19072}
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.compression, CompressionType::None);
        assert_eq!(config.worker_pool, WorkerPoolConfig::default());
        assert!(config.applications.is_empty());
    }

    #[test]
    fn test_validation_errors() {
        let base_config: Config = serde_yaml::from_str(VALID).unwrap();

        let mut config = base_config.clone();
        config.admin_listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = base_config.clone();
        config.worker_pool.workers = 0;
        assert_eq!(config.validate(), Err(ValidationError::NoWorkers));

        let mut config = base_config.clone();
        config.worker_pool.queue_size = 0;
        assert_eq!(config.validate(), Err(ValidationError::EmptyQueue));

        let mut config = base_config.clone();
        config.applications.push(config.applications[0].clone());
        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateApplication(_))
        ));

        let mut config = base_config;
        let mut other = config.applications[0].clone();
        other.id = ApplicationId::new("tenant", "app2", "default");
        config.applications.push(other);
        assert_eq!(
            config.validate(),
            Err(ValidationError::DuplicateHost {
                host: "node1.example.com".into()
            })
        );
    }

    #[test]
    fn test_deserialization_errors() {
        assert!(serde_yaml::from_str::<CompressionType>("lz4").is_err());
        assert!(serde_yaml::from_str::<StaticApplication>("id: not-an-id\ngeneration: 1").is_err());
        assert!(
            serde_yaml::from_str::<StaticApplication>("id: t:a:i\ngeneration: 1\nversion: x.y")
                .is_err()
        );
    }
}
