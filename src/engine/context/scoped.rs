use std::marker::PhantomData;

use parking_lot::MutexGuard;

use crate::engine::context::{ContextPool, MAIN_CONTEXT, PipelineCache};
use crate::engine::error::Result;
use crate::engine::gpu::GpuDevice;

/// ### English
/// RAII context acquisition.
///
/// Construction claims a context, makes it current and remembers what was current before.
/// Drop restores the previous context and then releases the claim, on every exit path.
/// The guard is tied to the acquiring thread (`!Send`).
///
/// ### 中文
/// RAII 形式的上下文获取。
///
/// 构造时占用上下文、设为 current 并记录之前的 current 上下文。
/// Drop 时在任意退出路径上先恢复之前的上下文，再释放占用。
/// 该守卫绑定在获取它的线程上（`!Send`）。
pub struct ScopedContext<'pool> {
    pool: &'pool ContextPool,
    slot: usize,
    previous: Option<usize>,
    _thread_bound: PhantomData<*const ()>,
}

impl<'pool> ScopedContext<'pool> {
    /// ### English
    /// Acquires `named` (blocking until free) or any unreserved context.
    ///
    /// #### Parameters
    /// - `pool`: Context pool.
    /// - `named`: Specific slot to pin, or `None` for an opportunistic worker context.
    ///
    /// ### 中文
    /// 获取 `named` 指定的槽位（阻塞直到空闲），或任意非保留上下文。
    ///
    /// #### 参数
    /// - `pool`：上下文池。
    /// - `named`：需要固定的槽位；`None` 表示机会性获取工作上下文。
    pub fn acquire(pool: &'pool ContextPool, named: Option<usize>) -> Result<Self> {
        let slot = pool.assign(named)?;
        let previous = match pool.make_current(Some(slot)) {
            Ok(previous) => previous,
            Err(err) => {
                if let Err(release_err) = pool.release(slot) {
                    log::error!("releasing context {slot} after make-current failure: {release_err}");
                }
                return Err(err);
            }
        };
        Ok(Self {
            pool,
            slot,
            previous,
            _thread_bound: PhantomData,
        })
    }

    /// ### English
    /// Acquires the reserved main context used for resource setup and batch flushing.
    ///
    /// ### 中文
    /// 获取用于资源准备与批次刷新的保留主上下文。
    pub fn main(pool: &'pool ContextPool) -> Result<Self> {
        Self::acquire(pool, Some(MAIN_CONTEXT))
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn device(&self) -> &'pool dyn GpuDevice {
        self.pool.device(self.slot)
    }

    /// ### English
    /// Locks this context's cache. Uncontended: only the holding thread touches it, except for
    /// brief retire pushes.
    ///
    /// ### 中文
    /// 锁定该上下文的缓存。基本无争用：除短暂的 retire 入队外只有持有线程访问。
    pub fn caches(&self) -> MutexGuard<'pool, PipelineCache> {
        self.pool.caches(self.slot)
    }
}

impl Drop for ScopedContext<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.pool.make_current(self.previous) {
            log::error!("restoring context {:?}: {err}", self.previous);
        }
        if let Err(err) = self.pool.release(self.slot) {
            log::error!("releasing context {}: {err}", self.slot);
        }
    }
}
