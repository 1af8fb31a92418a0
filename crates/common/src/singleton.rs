//! 单例初始化器
//!
//! `SingletonSlot<T>` 由应用的组合根持有并按引用传递，保证共享资源在并发
//! 首次访问下只被构造一次。构造结果（包括失败）会被永久保存，只有显式
//! `reset()` 才会重新打开闸门。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use svckit_errors::AppResult;
use tracing::{debug, warn};

type Constructor<T> = Box<dyn Fn() -> AppResult<T> + Send + Sync>;

/// 槽位状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// 一次性闸门：保存构造结果，`reset()` 时整体替换
struct Gate<T> {
    value: OnceLock<AppResult<Arc<T>>>,
    initializing: AtomicBool,
}

impl<T> Gate<T> {
    fn new() -> Self {
        Self {
            value: OnceLock::new(),
            initializing: AtomicBool::new(false),
        }
    }
}

/// 构造期间置位 `initializing`，构造函数 panic 时也会复位
struct InitializingGuard<'a>(&'a AtomicBool);

impl<'a> InitializingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 进程级共享资源的懒构造槽位
pub struct SingletonSlot<T> {
    name: &'static str,
    gate: RwLock<Arc<Gate<T>>>,
    default: Constructor<T>,
}

impl<T> SingletonSlot<T> {
    /// 创建新的槽位
    ///
    /// `default` 在 [`get`](Self::get) 发现槽位未初始化时使用。
    pub fn new<F>(name: &'static str, default: F) -> Self
    where
        F: Fn() -> AppResult<T> + Send + Sync + 'static,
    {
        Self {
            name,
            gate: RwLock::new(Arc::new(Gate::new())),
            default: Box::new(default),
        }
    }

    /// 槽位名称（用于日志）
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 获取资源，首次调用时执行 `constructor`
    ///
    /// 并发调用者中只有一个会执行构造，其余调用者等待并观察到同一个结果。
    /// 构造失败同样会被保存，后续调用直接返回该错误而不会重试。
    /// 构造函数内不能再访问同一个槽位。
    pub fn acquire<F>(&self, constructor: F) -> AppResult<Arc<T>>
    where
        F: FnOnce() -> AppResult<T>,
    {
        let gate = self.current();
        gate.value
            .get_or_init(|| {
                let _guard = InitializingGuard::enter(&gate.initializing);
                let result = constructor().map(Arc::new);
                match &result {
                    Ok(_) => debug!(slot = self.name, "Singleton initialized"),
                    Err(e) => {
                        warn!(slot = self.name, error = %e, "Singleton initialization failed")
                    }
                }
                result
            })
            .clone()
    }

    /// 获取资源，未初始化时使用默认参数初始化
    pub fn get(&self) -> AppResult<Arc<T>> {
        self.acquire(|| {
            debug!(slot = self.name, "Singleton not initialized, using defaults");
            (self.default)()
        })
    }

    /// 获取已构造的资源，不触发初始化
    pub fn peek(&self) -> Option<Arc<T>> {
        self.current()
            .value
            .get()
            .and_then(|result| result.as_ref().ok().cloned())
    }

    /// 当前状态
    pub fn state(&self) -> SlotState {
        let gate = self.current();
        match gate.value.get() {
            Some(Ok(_)) => SlotState::Ready,
            Some(Err(_)) => SlotState::Failed,
            None if gate.initializing.load(Ordering::Acquire) => SlotState::Initializing,
            None => SlotState::Uninitialized,
        }
    }

    /// 清空资源并重新打开闸门
    ///
    /// 仅用于测试隔离。闸门整体替换，新的获取要么看到旧闸门，要么看到新闸门。
    pub fn reset(&self) {
        *self.gate.write() = Arc::new(Gate::new());
        debug!(slot = self.name, "Singleton reset");
    }

    fn current(&self) -> Arc<Gate<T>> {
        self.gate.read().clone()
    }
}

impl<T: Default + 'static> SingletonSlot<T> {
    /// 使用 `T::default()` 作为默认构造
    pub fn with_default(name: &'static str) -> Self {
        Self::new(name, || Ok(T::default()))
    }
}

impl<T> fmt::Debug for SingletonSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonSlot")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
