//! 配置模块
//!
//! 本模块定义了 cbson 编解码器的配置选项:
//! - 编解码配置(键名校验、`_id` 前置、嵌套深度上限)
//! - 日志配置
//!
//! 支持从 TOML 文件加载配置，所有字段均有默认值。

use crate::error::{CommonError, CommonResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// 主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CbsonConfig {
    /// 编解码配置
    #[serde(default)]
    pub codec: CodecConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 编解码配置
///
/// 对应一次编码/解码调用的默认行为。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// 是否拒绝以 `$` 开头或包含 `.` 的键名 (默认: false)
    #[serde(default)]
    pub validate_keys: bool,

    /// 是否把 `_id` 字段移到文档最前 (默认: false)
    #[serde(default)]
    pub promote_id: bool,

    /// 文档/数组最大嵌套层级 (默认: 100)
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
}

fn default_max_nesting_depth() -> usize { 100 }

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            validate_keys: false,
            promote_id: false,
            max_nesting_depth: default_max_nesting_depth(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl CbsonConfig {
    /// # Brief
    /// 从 TOML 文件加载配置
    ///
    /// # Arguments
    /// * `path` - 配置文件路径
    ///
    /// # Returns
    /// 解析后的配置实例
    pub fn from_file(path: &Path) -> CommonResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CommonError::Config(format!("Failed to read config: {}", e)))?;
        debug!("Loaded config file {}", path.display());
        Self::from_toml(&content)
    }

    /// # Brief
    /// 解析 TOML 字符串
    pub fn from_toml(content: &str) -> CommonResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CommonError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// # Brief
    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> CommonResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CommonError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// 校验配置取值
    pub fn validate(&self) -> CommonResult<()> {
        if self.codec.max_nesting_depth == 0 {
            return Err(CommonError::Config(
                "codec.max_nesting_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
