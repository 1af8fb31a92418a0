//! 存储连接器
//!
//! `StoreConnector` 是引导器与具体存储之间的接缝：构造客户端、健康检查、
//! 释放资源。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, ConnectionInfo, IntoConnectionInfo, RedisResult};
use secrecy::ExposeSecret;
use svckit_common::Attempt;
use svckit_errors::{AppError, AppResult};

use crate::config::ConnectionConfig;
use crate::pool::RedisPool;

/// 存储连接器
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// 客户端句柄，克隆应当是廉价的
    type Client: Clone + Send + Sync + 'static;

    /// 存储名称（用于日志）
    fn name(&self) -> &str {
        "store"
    }

    /// 按配置构造新的客户端
    ///
    /// 地址无效等重试也无法恢复的失败返回 [`Attempt::Terminal`]。
    async fn open(&self, config: &ConnectionConfig) -> Attempt<Self::Client, AppError>;

    /// 健康检查
    async fn ping(&self, client: &Self::Client) -> AppResult<()>;

    /// 释放客户端持有的资源
    async fn release(&self, client: Self::Client) -> AppResult<()>;
}

/// 单个连接的默认建立超时，小于引导器的健康检查超时
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis 连接器
#[derive(Debug, Clone, Copy)]
pub struct RedisConnector {
    connect_timeout: Duration,
}

impl Default for RedisConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl RedisConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置单个连接的建立超时
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

/// 根据配置构建 Redis 连接信息
pub fn connection_info(config: &ConnectionConfig) -> RedisResult<ConnectionInfo> {
    let mut info = config.address.as_str().into_connection_info()?;
    if config.has_password() {
        info.redis.password = Some(config.password.expose_secret().clone());
    }
    // 地址中自带的库索引只在未显式配置时生效
    if config.database != 0 {
        info.redis.db = config.database;
    }
    Ok(info)
}

#[async_trait]
impl StoreConnector for RedisConnector {
    type Client = Arc<RedisPool>;

    fn name(&self) -> &str {
        "redis"
    }

    async fn open(&self, config: &ConnectionConfig) -> Attempt<Self::Client, AppError> {
        let client = match connection_info(config).and_then(Client::open) {
            Ok(client) => client,
            Err(e) => {
                return Attempt::Terminal(AppError::configuration_invalid(format!(
                    "invalid redis address {}: {}",
                    config.address, e
                )));
            }
        };

        Attempt::retryable(
            RedisPool::connect(client, config.pool_size as usize, self.connect_timeout)
                .await
                .map(Arc::new),
        )
    }

    async fn ping(&self, client: &Self::Client) -> AppResult<()> {
        client.ping().await
    }

    async fn release(&self, client: Self::Client) -> AppResult<()> {
        // 最后一个引用释放时连接关闭
        drop(client);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ConnectionAddr;

    #[test]
    fn test_connection_info_from_defaults() {
        let info = connection_info(&ConnectionConfig::default().normalized()).unwrap();
        assert_eq!(info.addr, ConnectionAddr::Tcp("localhost".to_string(), 6379));
        assert_eq!(info.redis.db, 0);
        assert!(info.redis.password.is_none());
    }

    #[test]
    fn test_connection_info_applies_password_and_database() {
        let config = ConnectionConfig::new("redis://cache:6380")
            .with_password("secret")
            .with_database(3)
            .normalized();
        let info = connection_info(&config).unwrap();

        assert_eq!(info.addr, ConnectionAddr::Tcp("cache".to_string(), 6380));
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
        assert_eq!(info.redis.db, 3);
    }

    #[test]
    fn test_connection_info_keeps_database_from_address() {
        let config = ConnectionConfig::new("redis://cache:6379/5").normalized();
        assert_eq!(connection_info(&config).unwrap().redis.db, 5);
    }

    #[tokio::test]
    async fn test_invalid_address_is_terminal() {
        let config = ConnectionConfig::new("ftp://cache:21").normalized();
        let attempt = RedisConnector::new().open(&config).await;
        assert!(matches!(
            attempt,
            Attempt::Terminal(AppError::ConfigurationInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_port_fails_fast() {
        let config = ConnectionConfig::new("redis://127.0.0.1:1")
            .with_pool_size(1)
            .normalized();

        let start = std::time::Instant::now();
        let attempt = tokio::time::timeout(
            Duration::from_secs(30),
            RedisConnector::new().open(&config),
        )
        .await
        .unwrap();

        // 连接被拒绝时不在连接器内部重试
        assert!(matches!(
            attempt,
            Attempt::Retryable(AppError::ExternalService(_))
        ));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 实例
    async fn test_open_and_ping() {
        let connector = RedisConnector::new();
        let config = ConnectionConfig::new("redis://127.0.0.1:6379")
            .with_pool_size(2)
            .normalized();

        let Attempt::Ready(pool) = connector.open(&config).await else {
            panic!("expected a live connection");
        };
        assert_eq!(pool.size(), 2);
        connector.ping(&pool).await.unwrap();
        connector.release(pool).await.unwrap();
    }
}
