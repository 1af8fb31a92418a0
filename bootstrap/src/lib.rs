//! svckit-bootstrap - 统一服务启动骨架
//!
//! 按 配置 → 日志 → 存储连接 的顺序初始化服务共享资源

mod runtime;
mod shutdown;

pub use runtime::*;
pub use shutdown::*;
