//! svckit-common - 通用基础设施
//!
//! 单例槽位与重试原语，被配置、日志和连接引导复用

pub mod retry;
pub mod singleton;

pub use retry::*;
pub use singleton::*;
