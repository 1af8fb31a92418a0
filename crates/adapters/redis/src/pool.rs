//! Redis 连接池
//!
//! 多个多路复用连接按轮询方式分配，连接的复用和重连交给 `ConnectionManager`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use svckit_errors::{AppError, AppResult};
use tracing::debug;

/// Redis 连接池
pub struct RedisPool {
    /// 连接管理器列表
    connections: Vec<ConnectionManager>,
    /// 轮询索引
    round_robin_index: AtomicUsize,
}

impl RedisPool {
    /// 建立 `size` 个连接
    ///
    /// 首次连接失败立即返回，不在内部重试，重试由调用方负责。
    pub async fn connect(
        client: Client,
        size: usize,
        connect_timeout: Duration,
    ) -> AppResult<Self> {
        let size = size.max(1);
        let mut connections = Vec::with_capacity(size);

        for i in 0..size {
            let config = manager_config(connect_timeout);
            let conn = ConnectionManager::new_with_config(client.clone(), config)
                .await
                .map_err(|e| {
                    AppError::external_service(format!(
                        "Failed to create Redis connection {}: {}",
                        i, e
                    ))
                })?;
            connections.push(conn);
        }

        debug!(pool_size = size, "Redis connections created");

        Ok(Self {
            connections,
            round_robin_index: AtomicUsize::new(0),
        })
    }

    /// 获取一个连接（轮询）
    pub fn connection(&self) -> ConnectionManager {
        let index = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[index].clone()
    }

    /// 连接数量
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// 对池中每个连接执行 PING
    pub async fn ping(&self) -> AppResult<()> {
        for conn in &self.connections {
            let mut conn = conn.clone();
            check_connection(&mut conn).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPool")
            .field("size", &self.connections.len())
            .finish()
    }
}

/// 连接管理器配置：首次连接不重试
pub fn manager_config(connect_timeout: Duration) -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_number_of_retries(0)
        .set_connection_timeout(connect_timeout)
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &mut ConnectionManager) -> AppResult<()> {
    redis::cmd("PING")
        .query_async::<String>(conn)
        .await
        .map_err(|e| AppError::external_service(format!("Redis health check failed: {}", e)))?;
    Ok(())
}
