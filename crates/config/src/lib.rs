//! svckit-config - 配置加载库
//!
//! 按名称和格式在若干目录中查找配置文件，可叠加带前缀的环境变量。
//! 加载结果放入组合根持有的 [`SingletonSlot`]，只加载一次。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use figment::{
    Figment, Provider,
    providers::{Env, Format, Json, Toml, Yaml},
};
use serde::de::DeserializeOwned;
use svckit_common::SingletonSlot;
use svckit_errors::{AppError, AppResult};
use thiserror::Error;
use tracing::{debug, info};

/// 默认环境变量前缀
pub const DEFAULT_ENV_PREFIX: &str = "APP_";

/// 嵌套键分隔符，`APP_REDIS__ADDRESS` 对应 `redis.address`
const ENV_SPLIT: &str = "__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config name not found")]
    MissingName,

    #[error("config type not found")]
    MissingType,

    #[error("config path not found")]
    MissingPath,

    #[error("unsupported config type: {0}")]
    UnsupportedType(String),

    #[error("error reading config file: {0}")]
    Read(#[source] figment::Error),

    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::configuration_invalid(err.to_string())
    }
}

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// 可接受的文件扩展名
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Toml => &["toml"],
            Self::Json => &["json"],
            Self::Yaml => &["yaml", "yml"],
        }
    }

    fn merge_file(&self, figment: Figment, path: &Path) -> Figment {
        match self {
            Self::Toml => figment.merge(Toml::file(path)),
            Self::Json => figment.merge(Json::file(path)),
            Self::Yaml => figment.merge(Yaml::file(path)),
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Err(ConfigError::MissingType),
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(ConfigError::UnsupportedType(other.to_string())),
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extensions()[0])
    }
}

/// 配置加载参数
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// 配置文件名（不含扩展名）
    pub name: String,
    /// 配置文件格式，如 "yaml"、"json"、"toml"
    pub format: String,
    /// 依次搜索的目录
    pub paths: Vec<PathBuf>,
    /// 环境变量覆盖前缀（可选）
    pub env_prefix: Option<String>,
}

impl ConfigOptions {
    /// 创建新的加载参数
    pub fn new(name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            ..Default::default()
        }
    }

    /// 添加搜索目录
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// 设置环境变量覆盖前缀
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// 校验参数并解析格式
    pub fn validate(&self) -> Result<ConfigFormat, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        let format = self.format.parse::<ConfigFormat>()?;
        if self.paths.is_empty() {
            return Err(ConfigError::MissingPath);
        }
        Ok(format)
    }

    fn find_file(&self, format: ConfigFormat) -> Option<PathBuf> {
        self.paths.iter().find_map(|dir| {
            format
                .extensions()
                .iter()
                .map(|ext| dir.join(format!("{}.{}", self.name, ext)))
                .find(|candidate| candidate.is_file())
        })
    }
}

/// 已解析的配置源
#[derive(Debug, Clone)]
pub struct Settings {
    figment: Figment,
    source_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            figment: Figment::new(),
            source_file: None,
        }
    }
}

impl Settings {
    /// 从配置文件（和可选的环境变量）加载
    ///
    /// 找不到配置文件时使用空配置继续，文件存在但无法解析时返回错误。
    pub fn load(options: &ConfigOptions) -> Result<Self, ConfigError> {
        let format = options.validate()?;
        let mut figment = Figment::new();

        let source_file = options.find_file(format);
        match &source_file {
            Some(path) => {
                debug!(path = %path.display(), format = %format, "Loading config file");
                figment = format.merge_file(figment, path);
            }
            None => {
                info!(name = %options.name, "Config file not found, using default config");
            }
        }

        if let Some(prefix) = &options.env_prefix {
            figment = figment.merge(Env::prefixed(prefix).split(ENV_SPLIT));
        }

        // 立即解析，让文件格式错误在加载时暴露
        figment
            .data()
            .map_err(ConfigError::Read)?;

        Ok(Self {
            figment,
            source_file,
        })
    }

    /// 只从带前缀的环境变量加载
    pub fn from_env(prefix: &str) -> Self {
        Self {
            figment: Figment::from(Env::prefixed(prefix).split(ENV_SPLIT)),
            source_file: None,
        }
    }

    /// 实际加载的配置文件
    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    pub fn figment(&self) -> &Figment {
        &self.figment
    }

    /// 是否包含指定键（支持 `a.b` 路径）
    pub fn contains(&self, key: &str) -> bool {
        self.figment.contains(key)
    }

    /// 反序列化整个配置
    pub fn extract<T: DeserializeOwned>(&self) -> AppResult<T> {
        self.figment
            .extract()
            .map_err(|e| ConfigError::Load(e).into())
    }

    /// 读取指定键的值
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<T> {
        self.figment
            .extract_inner(key)
            .map_err(|e| ConfigError::Load(e).into())
    }

    /// 读取配置段，键不存在时返回 `None`
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        if !self.contains(key) {
            return Ok(None);
        }
        self.get(key).map(Some)
    }

    /// 读取字符串值
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.figment
            .find_value(key)
            .ok()
            .and_then(|value| value.into_string())
    }
}

/// 创建配置槽位，未初始化时只读取 `APP_` 前缀的环境变量
pub fn config_slot() -> SingletonSlot<Settings> {
    SingletonSlot::new("config", || Ok(Settings::from_env(DEFAULT_ENV_PREFIX)))
}

/// 加载配置（只生效一次）
pub fn load_config(
    slot: &SingletonSlot<Settings>,
    options: &ConfigOptions,
) -> AppResult<Arc<Settings>> {
    slot.acquire(|| Settings::load(options).map_err(AppError::from))
}

/// 从环境变量加载配置（只生效一次，与 [`load_config`] 共用同一个槽位）
pub fn load_config_from_env(
    slot: &SingletonSlot<Settings>,
    prefix: &str,
) -> AppResult<Arc<Settings>> {
    slot.acquire(|| Ok(Settings::from_env(prefix)))
}

#[cfg(test)]
mod tests;
