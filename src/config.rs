use std::env;

use serde::Deserialize;

/// Store settings as read from a TOML file, e.g. `ff-store.toml`:
///
/// ```toml
/// project_id = "my-project"
/// collection = "flags"
/// prefix = "checkout"
/// backend = "firestore"
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StoreConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub emulator_host: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_max_transaction_attempts")]
    pub max_transaction_attempts: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_parallel_batches")]
    pub max_parallel_batches: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Firestore,
    Sled,
    Memory,
}

// ── Default value functions ──────────────────────────

fn default_backend() -> StorageBackend {
    StorageBackend::Firestore
}

fn default_database() -> String {
    "(default)".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_max_transaction_attempts() -> u32 {
    5
}

fn default_batch_size() -> usize {
    20
}

fn default_max_parallel_batches() -> usize {
    8
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            collection: String::new(),
            prefix: None,
            backend: default_backend(),
            database: default_database(),
            data_dir: default_data_dir(),
            emulator_host: None,
            access_token: None,
            max_transaction_attempts: default_max_transaction_attempts(),
            batch_size: default_batch_size(),
            max_parallel_batches: default_max_parallel_batches(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from a TOML file, falling back to defaults if the
    /// file doesn't exist. A file that exists but cannot be parsed is an error.
    pub fn load(path: &str) -> Result<Self, String> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map_err(|e| format!("failed to parse {}: {}", path, e)),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) -> Result<(), String> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), String> {
        if let Some(val) = var("FF_STORE_PROJECT_ID") {
            self.project_id = val;
        }
        if let Some(val) = var("FF_STORE_COLLECTION") {
            self.collection = val;
        }
        // An empty FF_STORE_PREFIX clears a prefix set in the file.
        if let Some(val) = var("FF_STORE_PREFIX") {
            self.prefix = Some(val).filter(|p| !p.is_empty());
        }
        if let Some(val) = var("FF_STORE_BACKEND") {
            self.backend = match val.to_lowercase().as_str() {
                "firestore" => StorageBackend::Firestore,
                "sled" => StorageBackend::Sled,
                "memory" => StorageBackend::Memory,
                other => return Err(format!("unknown FF_STORE_BACKEND value: {}", other)),
            };
        }
        if let Some(val) = var("FF_STORE_DATA_DIR") {
            self.data_dir = val;
        }
        if let Some(val) = var("FIRESTORE_EMULATOR_HOST").filter(|h| !h.is_empty()) {
            self.emulator_host = Some(val);
        }
        if let Some(val) = var("FF_STORE_ACCESS_TOKEN") {
            self.access_token = Some(val);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn parses_file_with_defaults() {
        let config = StoreConfig::parse(
            r#"
project_id = "my-project"
collection = "flags"
backend = "sled"
"#,
        )
        .unwrap();
        assert_eq!(config.project_id, "my-project");
        assert_eq!(config.backend, StorageBackend::Sled);
        assert_eq!(config.prefix, None);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_transaction_attempts, 5);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = StoreConfig::load("/nonexistent/ff-store.toml").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(StoreConfig::parse("backend = \"redis\"").is_err());
    }

    #[test]
    fn env_overrides_take_precedence() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FF_STORE_COLLECTION", "other"),
            ("FF_STORE_PREFIX", ""),
            ("FF_STORE_BACKEND", "Memory"),
            ("FIRESTORE_EMULATOR_HOST", "localhost:8080"),
        ]);
        let mut config = StoreConfig {
            collection: "flags".into(),
            prefix: Some("app".into()),
            ..StoreConfig::default()
        };
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.collection, "other");
        assert_eq!(config.prefix, None);
        assert_eq!(config.backend, StorageBackend::Memory);
        assert_eq!(config.emulator_host.as_deref(), Some("localhost:8080"));
    }

    #[test]
    fn bad_backend_override_is_an_error() {
        let mut config = StoreConfig::default();
        let err = config
            .apply_overrides(|name| (name == "FF_STORE_BACKEND").then(|| "redis".to_string()))
            .unwrap_err();
        assert!(err.contains("redis"));
    }
}
