//! Environment-driven configuration.
//!
//! Mirrors the recognized keys in the external-interfaces section plus
//! the handful of ambient keys a standalone binary needs (bind address,
//! storage path, log filter). Each accessor has a sane default so the
//! server runs out of the box with in-memory storage and no auth
//! configured beyond the built-in admin account.

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub storage_path: Option<String>,
    pub auth_username: String,
    pub auth_password: String,
    pub identity_location: Option<String>,
    pub identity_api_url: Option<String>,
    pub max_concurrency: usize,
    pub stats_queue_capacity: usize,
    pub cors_origins: Vec<String>,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env_string("CHARMSTORE_HOST", "127.0.0.1"),
            port: env_u16("CHARMSTORE_PORT", 8080),
            storage_path: env_opt_string("CHARMSTORE_STORAGE_PATH"),
            auth_username: env_string("CHARMSTORE_AUTH_USERNAME", "admin"),
            auth_password: env_string("CHARMSTORE_AUTH_PASSWORD", "admin"),
            identity_location: env_opt_string("CHARMSTORE_IDENTITY_LOCATION"),
            identity_api_url: env_opt_string("CHARMSTORE_IDENTITY_API_URL"),
            max_concurrency: env_usize("CHARMSTORE_MAX_CONCURRENCY", 20),
            stats_queue_capacity: env_usize("CHARMSTORE_STATS_QUEUE_CAPACITY", 1024),
            cors_origins: env_string("CHARMSTORE_CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        }
    }

    /// Defaults with no environment lookups, for tests and for embedding
    /// this crate as a library.
    pub fn from_defaults() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            storage_path: None,
            auth_username: "admin".to_string(),
            auth_password: "admin".to_string(),
            identity_location: None,
            identity_api_url: None,
            max_concurrency: 20,
            stats_queue_capacity: 1024,
            cors_origins: vec!["*".to_string()],
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_defaults()
    }
}
