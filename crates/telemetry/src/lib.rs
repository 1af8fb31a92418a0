//! svckit-telemetry - 结构化日志
//!
//! 日志器持有自己的 `Dispatch`，可以安装为全局默认，也可以只在某个作用域内
//! 生效。没有安装任何日志器时 `tracing` 事件会被直接丢弃。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use svckit_common::SingletonSlot;
use svckit_errors::{AppError, AppResult};
use tracing::level_filters::LevelFilter;
use tracing::{Dispatch, Level, info};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 开发环境名称
pub const DEVELOPMENT: &str = "development";

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON（生产环境）
    #[default]
    Json,
    /// 人类可读的文本
    Pretty,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(AppError::configuration_invalid(format!(
                "unknown log format: {}",
                other
            ))),
        }
    }
}

/// 根据运行环境选择日志级别
pub fn level_for(environment: &str) -> Level {
    if environment == DEVELOPMENT {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// 日志器构建器
pub struct LoggerBuilder {
    environment: String,
    format: LogFormat,
    writer: Option<BoxMakeWriter>,
}

impl LoggerBuilder {
    fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            format: LogFormat::default(),
            writer: None,
        }
    }

    /// 设置输出格式
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// 设置输出目标，默认为标准输出
    pub fn writer(mut self, writer: BoxMakeWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn build(self) -> Logger {
        let level = level_for(&self.environment);
        // RUST_LOG 优先
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(level).into())
            .from_env_lossy();
        let writer = self
            .writer
            .unwrap_or_else(|| BoxMakeWriter::new(std::io::stdout));

        let dispatch = match self.format {
            LogFormat::Json => {
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(writer);
                Dispatch::new(tracing_subscriber::registry().with(filter).with(layer))
            }
            LogFormat::Pretty => {
                let layer = tracing_subscriber::fmt::layer()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(writer);
                Dispatch::new(tracing_subscriber::registry().with(filter).with(layer))
            }
        };

        Logger {
            environment: self.environment,
            level,
            format: self.format,
            dispatch,
        }
    }
}

/// 结构化日志器
#[derive(Clone)]
pub struct Logger {
    environment: String,
    level: Level,
    format: LogFormat,
    dispatch: Dispatch,
}

impl Logger {
    /// 使用 JSON 格式和标准输出创建日志器
    pub fn new(environment: &str) -> Self {
        Self::builder(environment).build()
    }

    pub fn builder(environment: impl Into<String>) -> LoggerBuilder {
        LoggerBuilder::new(environment)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// 安装为全局默认日志器
    ///
    /// 返回是否安装成功；进程中已有全局订阅者时不做任何事。
    pub fn install_global(&self) -> bool {
        tracing::dispatcher::set_global_default(self.dispatch.clone()).is_ok()
    }

    /// 在此日志器作用域内执行 `f`
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("environment", &self.environment)
            .field("level", &self.level)
            .field("format", &self.format)
            .finish()
    }
}

/// 创建日志器槽位，未初始化时默认使用开发环境
pub fn logger_slot() -> SingletonSlot<Logger> {
    SingletonSlot::new("logger", || Ok(install(Logger::new(DEVELOPMENT))))
}

/// 初始化日志器（只生效一次）
pub fn init_logger(slot: &SingletonSlot<Logger>, environment: &str) -> AppResult<Arc<Logger>> {
    slot.acquire(|| Ok(install(Logger::new(environment))))
}

/// 初始化指定格式的日志器（只生效一次）
pub fn init_logger_with_format(
    slot: &SingletonSlot<Logger>,
    environment: &str,
    format: LogFormat,
) -> AppResult<Arc<Logger>> {
    slot.acquire(|| Ok(install(Logger::builder(environment).format(format).build())))
}

fn install(logger: Logger) -> Logger {
    let installed = logger.install_global();
    logger.in_scope(|| {
        info!(
            environment = %logger.environment,
            level = %logger.level,
            global = installed,
            "Logger initialized"
        );
    });
    logger
}
