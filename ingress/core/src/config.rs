use crate::actions::ActionSettings;
use crate::auth::AuthSettings;
use crate::limiter::RateLimiter;
use serde_derive::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 27_500;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct NetConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl Default for NetConfig {
    fn default() -> NetConfig {
        NetConfig {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            workers: 4,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub token_cache_ttl_ms: u64,
    pub source_cache_ttl_ms: u64,
    pub last_used_debounce_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> AuthConfig {
        AuthConfig {
            token_cache_ttl_ms: 60_000,
            source_cache_ttl_ms: 300_000,
            last_used_debounce_ms: 300_000,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LimiterConfig {
    pub max_attempts: usize,
    pub window_ms: u64,
    pub block_duration_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> LimiterConfig {
        LimiterConfig {
            max_attempts: 10,
            window_ms: 60_000,
            block_duration_ms: 60_000,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> WorkerConfig {
        WorkerConfig { grace_ms: 5_000 }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub cooldown_ms: u64,
}

impl Default for LogConfig {
    fn default() -> LogConfig {
        LogConfig {
            cooldown_ms: 300_000,
        }
    }
}

/// Daemon configuration, loaded from TOML. Every section and key falls back
/// to its default, so a partial file is enough.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct IngressConfig {
    pub ingress: NetConfig,
    pub auth: AuthConfig,
    pub limiter: LimiterConfig,
    pub worker: WorkerConfig,
    pub log: LogConfig,
}

impl IngressConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> IngressConfig {
        serdeconv::from_toml_file(path).expect("Error loading ingress configuration file")
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ::std::net::AddrParseError> {
        format!("{}:{}", self.ingress.host, self.ingress.port).parse()
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            token_cache_ttl: Duration::from_millis(self.auth.token_cache_ttl_ms),
            source_cache_ttl: Duration::from_millis(self.auth.source_cache_ttl_ms),
            warn_cooldown: Duration::from_millis(self.log.cooldown_ms),
        }
    }

    pub fn action_settings(&self) -> ActionSettings {
        ActionSettings {
            warn_cooldown: Duration::from_millis(self.log.cooldown_ms),
            ..ActionSettings::default()
        }
    }

    pub fn make_limiter(&self) -> RateLimiter {
        RateLimiter::new(
            self.limiter.max_attempts,
            Duration::from_millis(self.limiter.window_ms),
            Duration::from_millis(self.limiter.block_duration_ms),
        )
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.auth.last_used_debounce_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.worker.grace_ms)
    }

    pub fn warn_cooldown(&self) -> Duration {
        Duration::from_millis(self.log.cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngressConfig::default();

        assert_eq!(config.ingress.host, "0.0.0.0");
        assert_eq!(config.ingress.port, 27_500);
        assert_eq!(config.auth.token_cache_ttl_ms, 60_000);
        assert_eq!(config.auth.source_cache_ttl_ms, 300_000);
        assert_eq!(config.auth.last_used_debounce_ms, 300_000);
        assert_eq!(config.limiter.max_attempts, 10);
        assert_eq!(config.limiter.window_ms, 60_000);
        assert_eq!(config.limiter.block_duration_ms, 60_000);
        assert_eq!(config.worker.grace_ms, 5_000);
        assert_eq!(config.log.cooldown_ms, 300_000);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: IngressConfig = serdeconv::from_toml_str(
            r#"
[ingress]
port = 28500
workers = 8

[limiter]
max_attempts = 3
"#,
        )
        .unwrap();

        assert_eq!(config.ingress.port, 28_500);
        assert_eq!(config.ingress.workers, 8);
        assert_eq!(config.ingress.host, "0.0.0.0");
        assert_eq!(config.limiter.max_attempts, 3);
        assert_eq!(config.limiter.window_ms, 60_000);
        assert_eq!(config.auth, AuthConfig::default());
    }

    #[test]
    fn test_bind_addr() {
        let config = IngressConfig::default();

        assert_eq!(config.bind_addr().unwrap().port(), 27_500);
        assert!(IngressConfig {
            ingress: NetConfig {
                host: "not an ip".into(),
                ..NetConfig::default()
            },
            ..IngressConfig::default()
        }
        .bind_addr()
        .is_err());
    }
}
