//! 服务运行时
//!
//! 持有配置、日志器和存储连接三个进程级资源，不依赖全局变量，
//! 多个运行时实例互不影响。

use std::sync::Arc;

use svckit_adapter_redis::{Bootstrapper, ConnectionConfig, RedisConnector, StoreConnector};
use svckit_common::SingletonSlot;
use svckit_config::{
    ConfigOptions, DEFAULT_ENV_PREFIX, Settings, config_slot, load_config, load_config_from_env,
};
use svckit_errors::AppResult;
use svckit_telemetry::{DEVELOPMENT, Logger, init_logger, logger_slot};
use tracing::{debug, error, info};

use crate::shutdown::shutdown_signal;

/// 存储连接配置所在的配置段
pub const REDIS_SECTION: &str = "redis";

/// 运行环境所在的配置键
pub const ENVIRONMENT_KEY: &str = "environment";

/// 启动选项
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// 配置文件选项，为空时只读取环境变量
    pub config: Option<ConfigOptions>,
    /// 只读取环境变量时使用的前缀
    pub env_prefix: String,
    /// 运行环境，为空时读取配置中的 `environment`，再缺省为开发环境
    pub environment: Option<String>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            config: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            environment: None,
        }
    }
}

impl RuntimeOptions {
    pub fn with_config(mut self, config: ConfigOptions) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }
}

/// 服务运行时
pub struct ServiceRuntime<C: StoreConnector = RedisConnector> {
    config: SingletonSlot<Settings>,
    logger: SingletonSlot<Logger>,
    store: Bootstrapper<C>,
}

impl ServiceRuntime<RedisConnector> {
    /// 创建使用 Redis 存储的运行时
    pub fn new() -> Self {
        Self::with_bootstrapper(Bootstrapper::new(RedisConnector::new()))
    }

    /// 加载 `.env` 后按 配置 → 日志 → Redis 连接 的顺序启动
    pub async fn start(options: RuntimeOptions) -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let runtime = Self::new();
        runtime.boot(&options).await?;
        Ok(runtime)
    }
}

impl Default for ServiceRuntime<RedisConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: StoreConnector> ServiceRuntime<C> {
    /// 使用指定的连接引导器创建运行时
    pub fn with_bootstrapper(store: Bootstrapper<C>) -> Self {
        Self {
            config: config_slot(),
            logger: logger_slot(),
            store,
        }
    }

    /// 依次初始化配置、日志器和存储连接，任一步失败即返回
    pub async fn boot(&self, options: &RuntimeOptions) -> AppResult<()> {
        let settings = match &options.config {
            Some(config) => self.init_config(config)?,
            None => self.init_config_from_env(&options.env_prefix)?,
        };

        let environment = options
            .environment
            .clone()
            .or_else(|| settings.get_string(ENVIRONMENT_KEY))
            .unwrap_or_else(|| DEVELOPMENT.to_string());
        self.init_logger(&environment)?;

        self.connect_redis().await?;

        info!(
            environment = %environment,
            config_file = ?settings.source_file(),
            "Runtime initialized"
        );
        Ok(())
    }

    /// 从文件（及可选的环境变量覆盖）加载配置，只生效一次
    pub fn init_config(&self, options: &ConfigOptions) -> AppResult<Arc<Settings>> {
        load_config(&self.config, options)
    }

    /// 只从环境变量加载配置，只生效一次
    pub fn init_config_from_env(&self, prefix: &str) -> AppResult<Arc<Settings>> {
        load_config_from_env(&self.config, prefix)
    }

    /// 获取配置，未初始化时使用默认前缀的环境变量
    pub fn config(&self) -> AppResult<Arc<Settings>> {
        self.config.get()
    }

    /// 初始化日志器，只生效一次
    pub fn init_logger(&self, environment: &str) -> AppResult<Arc<Logger>> {
        init_logger(&self.logger, environment)
    }

    /// 获取日志器，未初始化时使用开发环境
    pub fn logger(&self) -> AppResult<Arc<Logger>> {
        self.logger.get()
    }

    /// 按配置中的 `redis` 段建立连接，配置段缺失时使用默认值
    pub async fn connect_redis(&self) -> AppResult<C::Client> {
        let settings = self.config()?;
        let config = settings
            .section::<ConnectionConfig>(REDIS_SECTION)?
            .unwrap_or_default();
        self.store.connect(config).await
    }

    /// 获取 Redis 客户端，未连接时使用默认配置连接，失败返回 `None`
    pub async fn redis(&self) -> Option<C::Client> {
        self.store.get_client().await
    }

    pub fn store(&self) -> &Bootstrapper<C> {
        &self.store
    }

    /// 关闭存储连接，失败只记录日志
    ///
    /// 存储正在连接（包括退避等待）时，会等到该次连接结束后再关闭。
    pub async fn shutdown(&self) {
        if !self.store.is_connected().await {
            debug!("No store connection to close");
            return;
        }
        if let Err(e) = self.store.close().await {
            error!(error = %e, "Failed to close store connection");
        }
        info!("Runtime shut down");
    }

    /// 等待关闭信号后关闭运行时
    pub async fn run_until_shutdown(&self) {
        shutdown_signal().await;
        self.shutdown().await;
    }
}
