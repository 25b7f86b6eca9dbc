use std::path::Path;

use serde::Deserialize;

use crate::error::{AppResult, ConfigError};
use crate::services::identifier_resolver::{is_valid_invoice_prefix, INVOICE_PREFIX_MAX_LEN, INVOICE_PREFIX_MIN_LEN};

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 同时处理的发票包数量（全局工作池大小）
    pub max_concurrent_packages: usize,
    /// 每个批次最多包含的发票包数量
    pub batch_package_cap: usize,
    /// 单页文本提取超时（秒）
    pub page_extraction_timeout_secs: u64,
    /// 本地存储根目录
    pub job_root: String,
    /// 待处理的批次压缩包目录
    pub input_folder: String,
    /// 汇总压缩包输出目录
    pub output_folder: String,
    /// 等待批次结束时的轮询间隔（毫秒）
    pub status_poll_interval_ms: u64,
    /// 追加的发票号前缀
    pub extra_invoice_prefixes: Vec<String>,
    /// 是否显示详细日志（逐页分类诊断）
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_packages: 4,
            batch_package_cap: 10,
            page_extraction_timeout_secs: 30,
            job_root: "/tmp/tipificador_jobs".to_string(),
            input_folder: "input_batches".to_string(),
            output_folder: "output_batches".to_string(),
            status_poll_interval_ms: 500,
            extra_invoice_prefixes: Vec::new(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// 从环境变量读取（无法解析的值使用默认值）
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 用环境变量覆盖已有配置
    pub fn with_env_overrides(self) -> Self {
        Self {
            max_concurrent_packages: env_parse("MAX_CONCURRENT_PACKAGES").unwrap_or(self.max_concurrent_packages),
            batch_package_cap: env_parse("BATCH_PACKAGE_CAP").unwrap_or(self.batch_package_cap),
            page_extraction_timeout_secs: env_parse("PAGE_EXTRACTION_TIMEOUT_SECS").unwrap_or(self.page_extraction_timeout_secs),
            job_root: std::env::var("TIPIFICADOR_JOB_ROOT").unwrap_or(self.job_root),
            input_folder: std::env::var("INPUT_FOLDER").unwrap_or(self.input_folder),
            output_folder: std::env::var("OUTPUT_FOLDER").unwrap_or(self.output_folder),
            status_poll_interval_ms: env_parse("STATUS_POLL_INTERVAL_MS").unwrap_or(self.status_poll_interval_ms),
            extra_invoice_prefixes: std::env::var("EXTRA_INVOICE_PREFIXES")
                .map(|v| v.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
                .unwrap_or(self.extra_invoice_prefixes),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(self.output_log_file),
        }
    }

    /// 从 TOML 文本解析，缺失的键使用默认值
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件读取
    pub fn from_toml_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// `TIPIFICADOR_CONFIG` 指向的 TOML 文件（若有）+ 环境变量覆盖
    pub fn load() -> AppResult<Self> {
        let base = match std::env::var("TIPIFICADOR_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_toml_file(path.trim())?,
            _ => Self::default(),
        };
        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_packages == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_concurrent_packages".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.batch_package_cap == 0 {
            return Err(ConfigError::InvalidValue {
                name: "batch_package_cap".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if let Some(prefix) = self
            .extra_invoice_prefixes
            .iter()
            .find(|p| !is_valid_invoice_prefix(p))
        {
            return Err(ConfigError::InvalidValue {
                name: "extra_invoice_prefixes".to_string(),
                reason: format!(
                    "前缀 {:?} 必须由 {}-{} 个字母组成",
                    prefix, INVOICE_PREFIX_MIN_LEN, INVOICE_PREFIX_MAX_LEN
                ),
            });
        }
        Ok(())
    }
}
