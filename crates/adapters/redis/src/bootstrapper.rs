//! 连接引导器
//!
//! 在调用方自己的任务上建立并校验到远程存储的连接：每次尝试构造新客户端并
//! 做限时健康检查，失败时释放该客户端、按 `2^attempt` 个时间单位退避后重试，
//! 直到达到最大尝试次数。成功后保存客户端及其根上下文。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use svckit_common::{
    Attempt, ExponentialBackoff, RetryError, RetryPolicy, Sleeper, TokioSleeper, with_backoff,
};
use svckit_errors::{AppError, AppResult};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::connector::StoreConnector;

/// 默认健康检查超时
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// 默认退避时间单位
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// 客户端创建时所在的根上下文
///
/// 连接关闭或被替换时取消，派生的子令牌随之取消。
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    token: CancellationToken,
    address: String,
    attempts: u32,
    connected_at: DateTime<Utc>,
}

impl ConnectionContext {
    fn new(address: &str, attempts: u32) -> Self {
        Self {
            token: CancellationToken::new(),
            address: address.to_string(),
            attempts,
            connected_at: Utc::now(),
        }
    }

    /// 目标地址
    pub fn address(&self) -> &str {
        &self.address
    }

    /// 建立连接所用的尝试次数
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// 派生子令牌，连接关闭时被取消
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// 存活的连接：客户端与其根上下文总是同时存在
#[derive(Debug, Clone)]
pub struct ConnectionHandle<T> {
    client: T,
    context: ConnectionContext,
}

impl<T> ConnectionHandle<T> {
    pub fn client(&self) -> &T {
        &self.client
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }
}

/// 连接引导器
///
/// 每个实例同一时刻最多持有一个存活的连接。
pub struct Bootstrapper<C: StoreConnector> {
    connector: C,
    sleeper: Arc<dyn Sleeper>,
    backoff: ExponentialBackoff,
    health_check_timeout: Duration,
    handle: Mutex<Option<ConnectionHandle<C::Client>>>,
}

impl<C: StoreConnector> Bootstrapper<C> {
    /// 创建新的引导器
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            sleeper: Arc::new(TokioSleeper),
            backoff: ExponentialBackoff::new(DEFAULT_BACKOFF_UNIT),
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
            handle: Mutex::new(None),
        }
    }

    /// 设置退避等待的实现
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// 设置退避时间单位
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff = ExponentialBackoff::new(unit);
        self
    }

    /// 设置健康检查超时
    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// 建立连接
    ///
    /// 单次尝试的失败只会触发重试，全部尝试失败后返回
    /// [`AppError::ConnectionExhausted`]。已有连接时，新连接建立成功后释放旧连接。
    ///
    /// 整个重试过程（包括退避等待）都持有连接锁，期间 [`context`](Self::context)、
    /// [`is_connected`](Self::is_connected) 和 [`close`](Self::close) 会等待本次连接结束。
    pub async fn connect(&self, config: ConnectionConfig) -> AppResult<C::Client> {
        let mut handle = self.handle.lock().await;
        self.connect_locked(&mut handle, config).await
    }

    /// 获取客户端，未连接时使用默认配置连接
    ///
    /// 隐式连接失败只记录日志，返回 `None`，调用方需要自行检查。
    pub async fn get_client(&self) -> Option<C::Client> {
        match self.try_get_client().await {
            Ok(client) => Some(client),
            Err(e) => {
                error!(store = self.connector.name(), error = %e, "Error connecting to store");
                None
            }
        }
    }

    /// 获取客户端，未连接时使用默认配置连接并返回连接错误
    pub async fn try_get_client(&self) -> AppResult<C::Client> {
        let mut handle = self.handle.lock().await;
        if let Some(live) = handle.as_ref() {
            return Ok(live.client.clone());
        }

        warn!(store = self.connector.name(), "Store not connected, connecting with defaults");
        self.connect_locked(&mut handle, ConnectionConfig::default())
            .await
    }

    /// 当前连接的上下文
    pub async fn context(&self) -> Option<ConnectionContext> {
        self.handle
            .lock()
            .await
            .as_ref()
            .map(|live| live.context.clone())
    }

    /// 是否持有存活的连接
    pub async fn is_connected(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// 关闭连接
    ///
    /// 没有存活连接时返回 [`AppError::CloseFailed`]。正在进行的连接会先完成，
    /// 随后被关闭。
    pub async fn close(&self) -> AppResult<()> {
        let live = self.handle.lock().await.take();
        let Some(live) = live else {
            warn!(store = self.connector.name(), "Close called without a live connection");
            return Err(AppError::close_failed("no live connection"));
        };

        live.context.token.cancel();
        let address = live.context.address.clone();

        match self.connector.release(live.client).await {
            Ok(()) => {
                info!(store = self.connector.name(), address = %address, "Connection closed");
                Ok(())
            }
            Err(e) => {
                error!(
                    store = self.connector.name(),
                    address = %address,
                    error = %e,
                    "Error closing connection"
                );
                Err(match e {
                    AppError::CloseFailed(_) => e,
                    other => AppError::close_failed(other.to_string()),
                })
            }
        }
    }

    async fn connect_locked(
        &self,
        handle: &mut Option<ConnectionHandle<C::Client>>,
        config: ConnectionConfig,
    ) -> AppResult<C::Client> {
        let config = config.normalized();
        config.validate()?;

        let (client, attempts) = self.establish(&config).await?;

        let previous = handle.replace(ConnectionHandle {
            client: client.clone(),
            context: ConnectionContext::new(&config.address, attempts),
        });

        info!(
            store = self.connector.name(),
            address = %config.address,
            attempts = attempts,
            "Connected to store"
        );

        if let Some(previous) = previous {
            previous.context.token.cancel();
            if let Err(e) = self.connector.release(previous.client).await {
                warn!(
                    store = self.connector.name(),
                    address = %previous.context.address,
                    error = %e,
                    "Failed to release replaced connection"
                );
            }
        }

        Ok(client)
    }

    async fn establish(&self, config: &ConnectionConfig) -> AppResult<(C::Client, u32)> {
        let policy = RetryPolicy::new(config.max_retries, self.backoff);
        let operation = format!("{} connection", self.connector.name());

        with_backoff(&policy, self.sleeper.as_ref(), &operation, |attempt| {
            self.attempt(config, attempt)
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, .. } => {
                error!(
                    store = self.connector.name(),
                    address = %config.address,
                    attempts = attempts,
                    "Unable to connect to store"
                );
                AppError::connection_exhausted(attempts, config.address.clone())
            }
            RetryError::Terminal(e) => e,
        })
    }

    /// 单次尝试：构造客户端并做限时健康检查，失败时释放客户端
    async fn attempt(
        &self,
        config: &ConnectionConfig,
        attempt: u32,
    ) -> Attempt<(C::Client, u32), AppError> {
        debug!(
            store = self.connector.name(),
            address = %config.address,
            attempt = attempt,
            max_attempts = config.max_retries,
            "Connecting to store"
        );

        let opened = tokio::time::timeout(self.health_check_timeout, self.connector.open(config));
        let client = match opened.await {
            Ok(Attempt::Ready(client)) => client,
            Ok(Attempt::Retryable(e)) => return Attempt::Retryable(e),
            Ok(Attempt::Terminal(e)) => return Attempt::Terminal(e),
            Err(_) => {
                return Attempt::Retryable(AppError::external_service(format!(
                    "opening connection timed out after {:?}",
                    self.health_check_timeout
                )));
            }
        };

        let pinged = tokio::time::timeout(self.health_check_timeout, self.connector.ping(&client));
        let error = match pinged.await {
            Ok(Ok(())) => return Attempt::Ready((client, attempt)),
            Ok(Err(e)) => e,
            Err(_) => AppError::external_service(format!(
                "health check timed out after {:?}",
                self.health_check_timeout
            )),
        };

        if let Err(e) = self.connector.release(client).await {
            warn!(
                store = self.connector.name(),
                attempt = attempt,
                error = %e,
                "Failed to release client after failed health check"
            );
        }
        Attempt::Retryable(error)
    }
}
