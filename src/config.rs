//! 解包引擎配置
//!
//! 所有阈值都带默认值，可从 TOML/JSON 文件加载，并可通过 `UNPACK__` 前缀的
//! 环境变量覆盖（例如 `UNPACK__GUARD__MAX_DEPTH=6`）。

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// 解包引擎配置根结构
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UnpackConfig {
    #[validate(nested)]
    pub guard: GuardConfig,

    #[validate(nested)]
    pub disk: DiskConfig,

    #[validate(nested)]
    pub task_executor: TaskExecutorConfig,

    #[validate(nested)]
    pub charset: CharsetConfig,

    #[validate(nested)]
    pub catalog: CatalogConfig,

    #[validate(nested)]
    pub service: ServiceConfig,
}

/// 压缩炸弹与嵌套深度阈值
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GuardConfig {
    /// Archives whose tracked depth reaches this value are treated as bombs
    #[validate(range(min = 1, max = 32))]
    pub max_depth: u32,

    /// Entries smaller than this are never ratio-checked
    #[validate(range(min = 1))]
    pub ratio_check_min_size: u64,

    #[validate(range(min = 1.0))]
    pub max_compression_ratio: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            ratio_check_min_size: 500 * MIB,
            max_compression_ratio: 600.0,
        }
    }
}

/// 磁盘空间保护
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DiskConfig {
    /// Free space that must remain after every admitted entry
    pub min_free_space: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            min_free_space: GIB,
        }
    }
}

/// 文件系统任务重试配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TaskExecutorConfig {
    /// Delay before each attempt; the first entry is normally zero
    #[validate(length(min = 1, max = 16))]
    pub attempt_delays_ms: Vec<u64>,

    #[validate(range(min = 1))]
    pub attempt_timeout_ms: u64,

    #[validate(range(min = 4, max = 256))]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    num_cpus::get().clamp(4, 256)
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            attempt_delays_ms: vec![0, 5_000, 10_000, 15_000],
            attempt_timeout_ms: 60_000,
            pool_size: default_pool_size(),
        }
    }
}

impl TaskExecutorConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// 文件名字符集推断
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CharsetConfig {
    #[validate(range(min = 16, max = 1_048_576))]
    pub sample_bytes: usize,

    #[validate(range(min = 0.5, max = 1.0))]
    pub min_confidence: f64,
}

impl Default for CharsetConfig {
    fn default() -> Self {
        Self {
            sample_bytes: 1000,
            min_confidence: 0.9,
        }
    }
}

/// 目录库（SQLite）配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CatalogConfig {
    /// Writes per transaction before an intermediate commit
    #[validate(range(min = 1, max = 100_000))]
    pub batch_limit: usize,

    #[validate(range(min = 1, max = 64))]
    pub max_connections: u32,

    #[validate(range(min = 1))]
    pub busy_timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            batch_limit: 1000,
            max_connections: 5,
            busy_timeout_ms: 30_000,
        }
    }
}

/// 作业调度配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServiceConfig {
    #[validate(range(min = 1, max = 256))]
    pub max_concurrent_items: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_items: num_cpus::get().clamp(1, 8),
        }
    }
}

impl UnpackConfig {
    /// 从 TOML 文件加载配置
    ///
    /// # Errors
    /// 如果文件不存在、格式错误或取值越界，返回错误
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse TOML config: {}", path.display()))?;
        config.check()?;

        tracing::info!("Loaded unpack configuration from: {}", path.display());
        Ok(config)
    }

    /// 从 JSON 文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse JSON config: {}", path.display()))?;
        config.check()?;

        tracing::info!("Loaded unpack configuration from: {}", path.display());
        Ok(config)
    }

    /// 分层加载：默认值 < 配置文件 < `UNPACK__*` 环境变量
    pub fn load_layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("UNPACK")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .wrap_err("Failed to build layered unpack configuration")?;
        let config: Self = settings
            .try_deserialize()
            .wrap_err("Failed to deserialize unpack configuration")?;
        config.check()?;
        Ok(config)
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).wrap_err("Failed to serialize config to TOML")?;

        std::fs::write(path, content)
            .wrap_err_with(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved unpack configuration to: {}", path.display());
        Ok(())
    }

    /// 字段范围校验加上跨字段约束
    pub fn check(&self) -> Result<()> {
        self.validate()
            .wrap_err("Unpack configuration is out of range")?;

        if self.task_executor.attempt_delays_ms.len() > 1
            && self.task_executor.attempt_delays_ms[0] > self.task_executor.attempt_timeout_ms
        {
            eyre::bail!("First attempt delay must not exceed the attempt timeout");
        }
        if self.disk.min_free_space == 0 {
            eyre::bail!("Disk margin must be greater than 0");
        }
        Ok(())
    }
}
