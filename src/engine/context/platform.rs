//! ### English
//! Platform seam that creates pooled contexts and switches the current one.
//!
//! ### 中文
//! 创建池化上下文并切换 current 上下文的平台接口层。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::engine::error::{RenderError, Result};
use crate::engine::gpu::{GpuDevice, HeadlessDevice, HeadlessNamespace};

/// ### English
/// Creates graphics contexts for pool slots and makes them current on the calling thread.
///
/// Slot 0 is the unshared root; every other slot must share objects with it.
///
/// ### 中文
/// 为池槽位创建图形上下文，并在调用线程上将其设为 current。
///
/// 槽位 0 为不共享的根上下文；其它槽位必须与它共享对象。
pub trait ContextPlatform: Send + Sync {
    fn create_context(&self, slot: usize) -> Result<Arc<dyn GpuDevice>>;

    /// ### English
    /// Makes `slot` current on the calling thread, or releases the current context for `None`.
    ///
    /// ### 中文
    /// 将 `slot` 设为调用线程的 current 上下文；`None` 表示解除当前上下文。
    fn make_current(&self, slot: Option<usize>) -> Result<()>;

    fn destroy_context(&self, slot: usize);
}

#[derive(Default)]
struct CurrentMap {
    owner: HashMap<usize, ThreadId>,
    by_thread: HashMap<ThreadId, usize>,
}

/// ### English
/// Context platform over [`HeadlessDevice`]s sharing one namespace.
///
/// It enforces the GL rule that a context is current on at most one thread and counts every
/// violation, so concurrency tests can assert the pool never breaks it.
///
/// ### 中文
/// 基于共享同一命名空间的 [`HeadlessDevice`] 的上下文平台。
///
/// 它强制执行“一个上下文最多在一个线程上为 current”的 GL 规则并统计每次违规，
/// 供并发测试断言上下文池从不违反该规则。
pub struct HeadlessPlatform {
    namespace: Arc<HeadlessNamespace>,
    devices: Mutex<HashMap<usize, Arc<HeadlessDevice>>>,
    current: Mutex<CurrentMap>,
    violations: AtomicUsize,
    switches: AtomicUsize,
    failing_slot: Option<usize>,
}

impl HeadlessPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_failing_slot(None))
    }

    /// ### English
    /// Platform whose context creation fails for `slot` (initialization-failure tests).
    ///
    /// ### 中文
    /// 在创建 `slot` 上下文时失败的平台（用于初始化失败测试）。
    pub fn failing_at(slot: usize) -> Arc<Self> {
        Arc::new(Self::with_failing_slot(Some(slot)))
    }

    fn with_failing_slot(failing_slot: Option<usize>) -> Self {
        Self {
            namespace: HeadlessNamespace::new(),
            devices: Mutex::new(HashMap::new()),
            current: Mutex::new(CurrentMap::default()),
            violations: AtomicUsize::new(0),
            switches: AtomicUsize::new(0),
            failing_slot,
        }
    }

    pub fn namespace(&self) -> &Arc<HeadlessNamespace> {
        &self.namespace
    }

    pub fn device(&self, slot: usize) -> Option<Arc<HeadlessDevice>> {
        self.devices.lock().get(&slot).cloned()
    }

    pub fn live_contexts(&self) -> usize {
        self.devices.lock().len()
    }

    /// ### English
    /// Times a context was made current while already current on another thread.
    ///
    /// ### 中文
    /// 某上下文在其它线程仍为 current 时又被设为 current 的次数。
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::Acquire)
    }

    /// ### English
    /// Number of real make-current switches performed.
    ///
    /// ### 中文
    /// 实际执行的 make-current 切换次数。
    pub fn switches(&self) -> usize {
        self.switches.load(Ordering::Acquire)
    }

    /// ### English
    /// Slot current on the calling thread, as seen by the platform.
    ///
    /// ### 中文
    /// 平台视角下调用线程的 current 槽位。
    pub fn current_on_this_thread(&self) -> Option<usize> {
        self.current
            .lock()
            .by_thread
            .get(&thread::current().id())
            .copied()
    }
}

impl ContextPlatform for HeadlessPlatform {
    fn create_context(&self, slot: usize) -> Result<Arc<dyn GpuDevice>> {
        if self.failing_slot == Some(slot) {
            return Err(RenderError::ContextInit(format!(
                "headless context {slot} refused creation"
            )));
        }
        let device = Arc::new(HeadlessDevice::new(slot, self.namespace.clone()));
        self.devices.lock().insert(slot, device.clone());
        Ok(device)
    }

    fn make_current(&self, slot: Option<usize>) -> Result<()> {
        let me = thread::current().id();
        let mut current = self.current.lock();
        if let Some(slot) = slot
            && let Some(owner) = current.owner.get(&slot)
            && *owner != me
        {
            self.violations.fetch_add(1, Ordering::AcqRel);
            return Err(RenderError::ContextInit(format!(
                "context {slot} is current on another thread"
            )));
        }
        if let Some(previous) = current.by_thread.remove(&me) {
            current.owner.remove(&previous);
        }
        if let Some(slot) = slot {
            current.owner.insert(slot, me);
            current.by_thread.insert(me, slot);
        }
        self.switches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn destroy_context(&self, slot: usize) {
        self.devices.lock().remove(&slot);
        let mut current = self.current.lock();
        if let Some(thread) = current.owner.remove(&slot) {
            current.by_thread.remove(&thread);
        }
    }
}
