//! 连接配置模块

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use svckit_errors::{AppError, AppResult};

/// 默认地址
pub const DEFAULT_ADDRESS: &str = "redis://localhost:6379";
/// 默认连接池大小
pub const DEFAULT_POOL_SIZE: u32 = 10;
/// 默认最大尝试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 存储连接配置
///
/// 零值字段在使用前由 [`normalized`](Self::normalized) 替换为默认值。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 地址，如 `redis://host:6379`
    pub address: String,
    /// 密码（可为空）
    pub password: Secret<String>,
    /// 逻辑数据库索引
    pub database: i64,
    /// 连接池大小
    pub pool_size: u32,
    /// 最大尝试次数
    pub max_retries: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            password: Secret::new(String::new()),
            database: 0,
            pool_size: 0,
            max_retries: 0,
        }
    }
}

impl ConnectionConfig {
    /// 创建新的配置
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// 设置密码
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Secret::new(password.into());
        self
    }

    /// 设置数据库索引
    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    /// 设置连接池大小
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// 设置最大尝试次数
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 是否设置了密码
    pub fn has_password(&self) -> bool {
        !self.password.expose_secret().is_empty()
    }

    /// 应用默认值
    pub fn normalized(mut self) -> Self {
        let address = self.address.trim();
        self.address = if address.is_empty() {
            DEFAULT_ADDRESS.to_string()
        } else if address.contains("://") {
            address.to_string()
        } else {
            format!("redis://{}", address)
        };

        if self.pool_size == 0 {
            self.pool_size = DEFAULT_POOL_SIZE;
        }
        if self.max_retries == 0 {
            self.max_retries = DEFAULT_MAX_RETRIES;
        }
        self
    }

    /// 校验必需字段
    pub fn validate(&self) -> AppResult<()> {
        if self.address.is_empty() {
            return Err(AppError::configuration_invalid("store address is required"));
        }
        if self.pool_size == 0 {
            return Err(AppError::configuration_invalid("pool size must be positive"));
        }
        if self.max_retries == 0 {
            return Err(AppError::configuration_invalid("max retries must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_applies_defaults() {
        let config = ConnectionConfig::default().normalized();
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.database, 0);
        assert!(!config.has_password());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalized_keeps_explicit_values() {
        let config = ConnectionConfig::new("redis://cache:6380")
            .with_password("secret")
            .with_database(4)
            .with_pool_size(2)
            .with_max_retries(5)
            .normalized();

        assert_eq!(config.address, "redis://cache:6380");
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.database, 4);
        assert!(config.has_password());
    }

    #[test]
    fn test_normalized_adds_scheme() {
        let config = ConnectionConfig::new(" cache:6379 ").normalized();
        assert_eq!(config.address, "redis://cache:6379");
    }

    #[test]
    fn test_validate_rejects_raw_zero_values() {
        let err = ConnectionConfig::default().validate().unwrap_err();
        assert!(matches!(err, AppError::ConfigurationInvalid(_)));
    }

    #[test]
    fn test_password_is_redacted() {
        let config = ConnectionConfig::new("redis://cache:6379").with_password("hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"address": "redis://cache:6379", "max_retries": 5}"#).unwrap();
        assert_eq!(config.address, "redis://cache:6379");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.pool_size, 0);
        assert_eq!(config.normalized().pool_size, DEFAULT_POOL_SIZE);
    }
}
