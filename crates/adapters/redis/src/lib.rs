//! svckit-adapter-redis - 存储连接引导
//!
//! 带重试和指数退避的连接建立、健康检查与懒连接。`Bootstrapper` 与具体存储
//! 无关，Redis 通过 [`RedisConnector`] 接入。

mod bootstrapper;
mod config;
mod connector;
mod pool;

pub use bootstrapper::*;
pub use config::*;
pub use connector::*;
pub use pool::*;
