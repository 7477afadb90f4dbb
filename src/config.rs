use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config/intake";
const ENV_PREFIX: &str = "INTAKE";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/nfe_intake".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

/// 匹配与定价参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 导入时自动关联的置信度下限
    pub auto_link_threshold: u8,
    /// 模糊匹配候选的最低分
    pub fuzzy_floor: u8,
    /// 每行从商品目录取出的模糊候选数上限
    pub candidate_limit: usize,
    /// 商品无原售价时使用的毛利 (%)
    pub default_margin: BigDecimal,
    /// 应付账期 (天)
    pub payable_term_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_link_threshold: 90,
            fuzzy_floor: 40,
            candidate_limit: 50,
            default_margin: BigDecimal::from(30),
            payable_term_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
        }
    }
}

impl AppConfig {
    /// 默认值 -> config/intake.toml (可选) -> INTAKE__SECTION__KEY 环境变量 -> 旧环境变量
    pub fn load() -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&AppConfig::default())?;
        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut loaded: AppConfig = settings.try_deserialize()?;
        loaded.apply_legacy_env();
        Ok(loaded)
    }

    /// 旧式环境变量覆盖 (DATABASE_URL / SERVER_HOST / SERVER_PORT)
    fn apply_legacy_env(&mut self) {
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.server.port = port;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
    }
}
