use rand::RngCore;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// Operator secret the AES-256 key is derived from
    #[serde(default)]
    pub encrypt_key: String,
    #[serde(default = "default_file_path")]
    pub file_path: String,
    #[serde(default = "default_max_files_size")]
    pub max_files_size_bytes: i64,
    #[serde(default = "default_allowed_size")]
    pub default_allowed_size_bytes: i64,
    #[serde(default = "default_claim_retry_limit")]
    pub claim_retry_limit: usize,
    #[serde(default = "default_claim_retry_base")]
    pub claim_retry_base_ms: u64,
    #[serde(default = "default_claim_retry_max_delay")]
    pub claim_retry_max_delay_ms: u64,
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_user_id_header")]
    pub user_id_header: String,
    #[serde(default = "default_privileged_header")]
    pub privileged_header: String,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_max_upload_bytes() -> usize {
    128 * 1024 * 1024
}

fn default_db_path() -> String {
    "data/vaultkeeper.db".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_file_path() -> String {
    "data/files".to_string()
}

fn default_max_files_size() -> i64 {
    100_000_000
}

fn default_allowed_size() -> i64 {
    10_000_000
}

fn default_claim_retry_limit() -> usize {
    8
}

fn default_claim_retry_base() -> u64 {
    10
}

fn default_claim_retry_max_delay() -> u64 {
    1000
}

fn default_transaction_timeout() -> u64 {
    10_000
}

fn default_user_id_header() -> String {
    "X-Vault-User".to_string()
}

fn default_privileged_header() -> String {
    "X-Vault-Privileged".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            encrypt_key: String::new(),
            file_path: default_file_path(),
            max_files_size_bytes: default_max_files_size(),
            default_allowed_size_bytes: default_allowed_size(),
            claim_retry_limit: default_claim_retry_limit(),
            claim_retry_base_ms: default_claim_retry_base(),
            claim_retry_max_delay_ms: default_claim_retry_max_delay(),
            transaction_timeout_ms: default_transaction_timeout(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            user_id_header: default_user_id_header(),
            privileged_header: default_privileged_header(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.validate()?;
        config.ensure_directories()?;
        config.ensure_encrypt_key(Path::new("data/.vault_key"))?;
        tracing::info!(
            "Vault config: file_path={}, quota={} bytes, default type ceiling={} bytes",
            config.vault.file_path,
            config.vault.max_files_size_bytes,
            config.vault.default_allowed_size_bytes
        );
        Ok(config)
    }

    /// Load configuration from config.toml or conf.ini
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "conf.ini", "data/config.toml", "data/conf.ini"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config = Self::from_toml(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    /// Format: VK_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("VK_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("VK_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = env::var("VK_CONF_SERVER_MAX_UPLOAD_BYTES") {
            if let Ok(bytes) = val.parse() {
                self.server.max_upload_bytes = bytes;
            }
        }

        // Database overrides
        if let Ok(val) = env::var("VK_CONF_DATABASE_PATH") {
            self.database.path = val;
        }
        if let Ok(val) = env::var("VK_CONF_DATABASE_BUSY_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.database.busy_timeout_ms = ms;
            }
        }

        // Vault overrides
        if let Ok(val) = env::var("VK_CONF_VAULT_ENCRYPT_KEY") {
            self.vault.encrypt_key = val;
        }
        if let Ok(val) = env::var("VK_CONF_VAULT_FILE_PATH") {
            self.vault.file_path = val;
        }
        if let Ok(val) = env::var("VK_CONF_VAULT_MAX_FILES_SIZE_BYTES") {
            if let Ok(bytes) = val.parse() {
                self.vault.max_files_size_bytes = bytes;
            }
        }
        if let Ok(val) = env::var("VK_CONF_VAULT_DEFAULT_ALLOWED_SIZE_BYTES") {
            if let Ok(bytes) = val.parse() {
                self.vault.default_allowed_size_bytes = bytes;
            }
        }
        if let Ok(val) = env::var("VK_CONF_VAULT_CLAIM_RETRY_LIMIT") {
            if let Ok(limit) = val.parse() {
                self.vault.claim_retry_limit = limit;
            }
        }
        if let Ok(val) = env::var("VK_CONF_VAULT_TRANSACTION_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.vault.transaction_timeout_ms = ms;
            }
        }

        // Gateway overrides
        if let Ok(val) = env::var("VK_CONF_GATEWAY_USER_ID_HEADER") {
            if !val.trim().is_empty() {
                self.gateway.user_id_header = val;
            }
        }
        if let Ok(val) = env::var("VK_CONF_GATEWAY_PRIVILEGED_HEADER") {
            if !val.trim().is_empty() {
                self.gateway.privileged_header = val;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.vault.max_files_size_bytes <= 0 {
            anyhow::bail!("vault.max_files_size_bytes must be positive");
        }
        if self.vault.default_allowed_size_bytes <= 0 {
            anyhow::bail!("vault.default_allowed_size_bytes must be positive");
        }
        if self.vault.claim_retry_limit == 0 {
            anyhow::bail!("vault.claim_retry_limit must be at least 1");
        }
        Ok(())
    }

    /// Use the configured encryption secret, or load/generate a persisted one
    fn ensure_encrypt_key(&mut self, key_path: &Path) -> anyhow::Result<()> {
        if !self.vault.encrypt_key.trim().is_empty() {
            return Ok(());
        }

        if key_path.exists() {
            let key = fs::read_to_string(key_path)?;
            self.vault.encrypt_key = key.trim().to_string();
            tracing::info!("Loaded persisted vault key from {:?}", key_path);
        } else {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            let key = hex::encode(bytes);

            if let Some(parent) = key_path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(key_path, &key)?;
            self.vault.encrypt_key = key;
            tracing::warn!("Generated and persisted new vault key to {:?}", key_path);
        }
        Ok(())
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        fs::create_dir_all(&self.vault.file_path)?;

        Ok(())
    }
}
