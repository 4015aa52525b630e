//! ### English
//! Context pool: a fixed set of share-group contexts, each held by at most one thread.
//!
//! Slot 0 is the reserved root ("main") context used for resource setup and batch flushing.
//! The remaining slots are unreserved worker contexts claimed opportunistically by render
//! passes. Ownership is a single atomic claim per slot; the pool also keeps an explicit map
//! from thread id to held slots and the slot current on that thread.
//!
//! ### 中文
//! 上下文池：一组固定数量、同属一个共享组的上下文，每个上下文最多由一个线程持有。
//!
//! 槽位 0 是保留的根（“main”）上下文，用于资源准备与批次刷新。其余槽位是非保留的工作
//! 上下文，由渲染 pass 机会性占用。归属由每槽位一个原子 claim 决定；上下文池还维护一张
//! 从线程 id 到所持槽位及其 current 槽位的显式映射。

mod caches;
pub mod platform;
mod scoped;
mod slot;
pub mod surfman_platform;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::engine::error::{RenderError, Result};
use crate::engine::gpu::GpuDevice;
use crate::engine::lockfree::Backoff;
use crate::engine::target::RenderTargetDesc;

pub use caches::{CacheStats, PipelineCache};
pub use platform::{ContextPlatform, HeadlessPlatform};
pub use scoped::ScopedContext;
pub use surfman_platform::SurfmanPlatform;

use slot::ContextSlot;

/// ### English
/// Slot index of the reserved root context.
///
/// ### 中文
/// 保留根上下文的槽位下标。
pub const MAIN_CONTEXT: usize = 0;

/// ### English
/// Upper bound on shared worker contexts (one per stereo half).
///
/// ### 中文
/// 共享工作上下文数量上限（每个立体半幅一个）。
pub const MAX_SHARED_CONTEXTS: usize = 2;

#[derive(Debug, Default)]
struct ThreadBinding {
    /// ### English
    /// Slots this thread holds, most recently claimed last.
    ///
    /// ### 中文
    /// 该线程持有的槽位，最近占用的在末尾。
    held: Vec<usize>,
    current: Option<usize>,
}

impl ThreadBinding {
    fn is_idle(&self) -> bool {
        self.held.is_empty() && self.current.is_none()
    }
}

pub struct ContextPool {
    platform: Arc<dyn ContextPlatform>,
    slots: Box<[ContextSlot]>,
    threads: Mutex<HashMap<ThreadId, ThreadBinding>>,
    acquire_timeout: Duration,
}

impl ContextPool {
    /// ### English
    /// Creates the root context plus `min(size_hint, available_parallelism, 2)` shared contexts
    /// (at least one). Any creation failure destroys what was created and fails the pool.
    ///
    /// #### Parameters
    /// - `platform`: Context factory.
    /// - `size_hint`: Requested number of worker contexts.
    /// - `acquire_timeout`: Spin budget for unnamed acquisition.
    ///
    /// ### 中文
    /// 创建根上下文以及 `min(size_hint, 可用并行度, 2)` 个共享上下文（至少一个）。
    /// 任一创建失败都会销毁已创建的上下文并返回错误。
    ///
    /// #### 参数
    /// - `platform`：上下文工厂。
    /// - `size_hint`：请求的工作上下文数量。
    /// - `acquire_timeout`：非命名获取的自旋时限。
    pub fn create(
        platform: Arc<dyn ContextPlatform>,
        size_hint: usize,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let parallelism = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        let workers = size_hint.min(parallelism).min(MAX_SHARED_CONTEXTS).max(1);

        let mut slots = Vec::with_capacity(workers + 1);
        for index in 0..=workers {
            match platform.create_context(index) {
                Ok(device) => slots.push(ContextSlot::new(device, index == MAIN_CONTEXT)),
                Err(err) => {
                    log::error!("context {index} failed to initialize: {err}");
                    for created in (0..slots.len()).rev() {
                        platform.destroy_context(created);
                    }
                    return Err(err);
                }
            }
        }
        log::info!("context pool ready: root + {workers} shared contexts");

        Ok(Self {
            platform,
            slots: slots.into_boxed_slice(),
            threads: Mutex::new(HashMap::new()),
            acquire_timeout,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn refcount(&self, slot: usize) -> u32 {
        self.slots.get(slot).map_or(0, ContextSlot::refcount)
    }

    pub fn is_claimed(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(ContextSlot::is_claimed)
    }

    /// ### English
    /// Slot the pool has made current on the calling thread.
    ///
    /// ### 中文
    /// 上下文池在调用线程上设为 current 的槽位。
    pub fn current_slot(&self) -> Option<usize> {
        self.threads
            .lock()
            .get(&thread::current().id())
            .and_then(|binding| binding.current)
    }

    pub(crate) fn device(&self, slot: usize) -> &dyn GpuDevice {
        self.slots[slot].device.as_ref()
    }

    pub(crate) fn caches(&self, slot: usize) -> MutexGuard<'_, PipelineCache> {
        self.slots[slot].caches.lock()
    }

    /// ### English
    /// Claims a context for the calling thread and returns its slot.
    ///
    /// - `Some(slot)`: re-entrant if already held; otherwise spins without bound until free.
    /// - `None`: reuses the context this thread claimed most recently; otherwise scans
    ///   unreserved slots until `acquire_timeout`, then fails with `ContextPoolExhausted`.
    ///
    /// Every successful call must be paired with one [`release`](Self::release).
    ///
    /// ### 中文
    /// 为调用线程占用一个上下文并返回其槽位。
    ///
    /// - `Some(slot)`：若已持有则重入；否则无限自旋直到空闲。
    /// - `None`：复用该线程最近占用的上下文；否则在 `acquire_timeout` 内扫描非保留槽位，
    ///   超时返回 `ContextPoolExhausted`。
    ///
    /// 每次成功调用都必须与一次 [`release`](Self::release) 配对。
    pub fn assign(&self, named: Option<usize>) -> Result<usize> {
        let me = thread::current().id();
        let reuse = {
            let threads = self.threads.lock();
            let held = threads.get(&me).map(|binding| binding.held.as_slice());
            match (named, held) {
                (Some(slot), Some(held)) if held.contains(&slot) => Some(slot),
                (None, Some(held)) => held.last().copied(),
                _ => None,
            }
        };
        if let Some(slot) = reuse {
            self.slots[slot].retain();
            self.bind(me, slot);
            return Ok(slot);
        }

        let slot = match named {
            Some(slot) => self.claim_named(slot)?,
            None => self.claim_any()?,
        };
        self.slots[slot].retain();
        self.bind(me, slot);
        log::trace!("context {slot} claimed by {me:?}");
        Ok(slot)
    }

    fn claim_named(&self, slot: usize) -> Result<usize> {
        let context = self.slots.get(slot).ok_or(RenderError::StaleHandle)?;
        let mut backoff = Backoff::new();
        while !context.try_claim() {
            backoff.snooze();
        }
        Ok(slot)
    }

    fn claim_any(&self) -> Result<usize> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut backoff = Backoff::new();
        loop {
            let found = self
                .slots
                .iter()
                .enumerate()
                .find(|(_, context)| !context.reserved && context.try_claim());
            if let Some((slot, _)) = found {
                return Ok(slot);
            }
            if backoff.is_yielding() && Instant::now() >= deadline {
                return Err(RenderError::ContextPoolExhausted {
                    workers: self.worker_count(),
                });
            }
            backoff.snooze();
        }
    }

    fn bind(&self, me: ThreadId, slot: usize) {
        let mut threads = self.threads.lock();
        let held = &mut threads.entry(me).or_default().held;
        held.retain(|held_slot| *held_slot != slot);
        held.push(slot);
    }

    /// ### English
    /// Drops one acquisition of `slot` by the calling thread. At zero the context is released
    /// from the thread (no longer current there) and becomes claimable.
    ///
    /// ### 中文
    /// 释放调用线程对 `slot` 的一次获取。计数归零时上下文从该线程解除（不再为 current），
    /// 并可被再次占用。
    pub fn release(&self, slot: usize) -> Result<()> {
        let me = thread::current().id();
        let mut threads = self.threads.lock();
        let Some(binding) = threads.get_mut(&me).filter(|b| b.held.contains(&slot)) else {
            return Err(RenderError::ContextNotHeld { slot });
        };
        let remaining = self.slots[slot]
            .release_ref()
            .ok_or(RenderError::ContextNotHeld { slot })?;
        if remaining > 0 {
            return Ok(());
        }

        binding.held.retain(|held_slot| *held_slot != slot);
        if binding.current == Some(slot) {
            self.platform.make_current(None)?;
            binding.current = None;
        }
        if binding.is_idle() {
            threads.remove(&me);
        }
        drop(threads);
        self.slots[slot].unclaim();
        log::trace!("context {slot} released by {me:?}");
        Ok(())
    }

    /// ### English
    /// Makes `slot` current on the calling thread (which must hold it) and returns the slot that
    /// was current before. Redundant switches are skipped.
    ///
    /// ### 中文
    /// 在调用线程（必须持有该槽位）上将 `slot` 设为 current，并返回之前的 current 槽位。
    /// 冗余切换会被跳过。
    pub(crate) fn make_current(&self, slot: Option<usize>) -> Result<Option<usize>> {
        let me = thread::current().id();
        let mut threads = self.threads.lock();
        let binding = threads.entry(me).or_default();
        let previous = binding.current;
        if previous != slot {
            if let Some(target) = slot
                && !binding.held.contains(&target)
            {
                return Err(RenderError::ContextNotHeld { slot: target });
            }
            self.platform.make_current(slot)?;
            binding.current = slot;
        }
        if binding.is_idle() {
            threads.remove(&me);
        }
        Ok(previous)
    }

    /// ### English
    /// Queues `desc`'s framebuffer for eviction in every context's cache.
    ///
    /// ### 中文
    /// 在所有上下文的缓存中为 `desc` 对应的 framebuffer 排队淘汰。
    pub fn retire_target(&self, desc: &RenderTargetDesc) {
        for slot in self.slots.iter() {
            slot.caches.lock().retire(desc.clone());
        }
    }
}

impl Drop for ContextPool {
    fn drop(&mut self) {
        for (index, slot) in self.slots.iter().enumerate().rev() {
            if !slot.invalidate() {
                continue;
            }
            if slot.refcount() != 0 {
                log::warn!(
                    "context {index} still held ({} refs) at teardown",
                    slot.refcount()
                );
            }
            match self.platform.make_current(Some(index)) {
                Ok(()) => slot.caches.lock().destroy(slot.device.as_ref()),
                Err(err) => log::error!("context {index} unavailable for cleanup: {err}"),
            }
            if let Err(err) = self.platform.make_current(None) {
                log::error!("releasing context {index} at teardown: {err}");
            }
            self.platform.destroy_context(index);
        }
        self.threads.get_mut().clear();
        log::info!("context pool destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn pool(platform: &Arc<HeadlessPlatform>, hint: usize) -> ContextPool {
        ContextPool::create(platform.clone(), hint, Duration::from_millis(50)).unwrap()
    }

    #[test]
    fn creates_root_plus_bounded_workers() {
        let platform = HeadlessPlatform::new();
        let pool = pool(&platform, 16);
        assert!(pool.worker_count() >= 1);
        assert!(pool.worker_count() <= MAX_SHARED_CONTEXTS);
        assert_eq!(platform.live_contexts(), pool.len());

        let pool = ContextPool::create(HeadlessPlatform::new(), 0, Duration::ZERO).unwrap();
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn failed_context_unwinds_creation() {
        let platform = HeadlessPlatform::failing_at(1);
        let err = ContextPool::create(platform.clone(), 2, Duration::ZERO)
            .err()
            .unwrap();
        assert!(matches!(err, RenderError::ContextInit(_)));
        assert_eq!(platform.live_contexts(), 0);
    }

    #[test]
    fn unnamed_acquisition_is_reentrant_and_skips_reserved() {
        let platform = HeadlessPlatform::new();
        let pool = pool(&platform, 1);
        let first = pool.assign(None).unwrap();
        assert_ne!(first, MAIN_CONTEXT);
        assert_eq!(pool.assign(None).unwrap(), first);
        assert_eq!(pool.refcount(first), 2);

        pool.release(first).unwrap();
        assert!(pool.is_claimed(first));
        pool.release(first).unwrap();
        assert!(!pool.is_claimed(first));
        assert_eq!(pool.refcount(first), 0);
    }

    #[test]
    fn unnamed_acquisition_reuses_a_held_main_context() {
        let platform = HeadlessPlatform::new();
        let pool = pool(&platform, 1);
        let main = pool.assign(Some(MAIN_CONTEXT)).unwrap();
        assert_eq!(pool.assign(None).unwrap(), main);
        assert_eq!(pool.refcount(main), 2);
        pool.release(main).unwrap();
        pool.release(main).unwrap();
    }

    #[test]
    fn over_release_and_foreign_release_are_errors() {
        let platform = HeadlessPlatform::new();
        let pool = pool(&platform, 1);
        assert_eq!(
            pool.release(MAIN_CONTEXT),
            Err(RenderError::ContextNotHeld { slot: MAIN_CONTEXT })
        );
        let slot = pool.assign(None).unwrap();
        pool.release(slot).unwrap();
        assert_eq!(pool.release(slot), Err(RenderError::ContextNotHeld { slot }));
    }

    #[test]
    fn exhausted_pool_times_out() {
        let platform = HeadlessPlatform::new();
        let pool = Arc::new(pool(&platform, 1));
        let held = pool.assign(None).unwrap();

        let other = pool.clone();
        let result = thread::spawn(move || other.assign(None)).join().unwrap();
        assert_eq!(
            result,
            Err(RenderError::ContextPoolExhausted { workers: 1 })
        );
        pool.release(held).unwrap();
    }

    #[test]
    fn named_acquisition_waits_for_the_holder() {
        let platform = HeadlessPlatform::new();
        let pool = Arc::new(pool(&platform, 1));
        let barrier = Arc::new(Barrier::new(2));

        let holder = {
            let pool = pool.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let scope = ScopedContext::main(&pool).unwrap();
                barrier.wait();
                thread::sleep(Duration::from_millis(20));
                drop(scope);
            })
        };
        barrier.wait();
        let scope = ScopedContext::main(&pool).unwrap();
        assert_eq!(scope.slot(), MAIN_CONTEXT);
        drop(scope);
        holder.join().unwrap();
        assert_eq!(platform.violations(), 0);
    }

    #[test]
    fn scoped_context_restores_the_previous_context() {
        let platform = HeadlessPlatform::new();
        let pool = pool(&platform, 1);
        {
            let main = ScopedContext::main(&pool).unwrap();
            assert_eq!(pool.current_slot(), Some(MAIN_CONTEXT));
            {
                let worker = ScopedContext::acquire(&pool, Some(1)).unwrap();
                assert_eq!(worker.slot(), 1);
                assert_eq!(platform.current_on_this_thread(), Some(1));
            }
            assert_eq!(platform.current_on_this_thread(), Some(MAIN_CONTEXT));
            assert_eq!(main.slot(), MAIN_CONTEXT);
        }
        assert_eq!(pool.current_slot(), None);
        assert_eq!(platform.current_on_this_thread(), None);
        assert_eq!(pool.refcount(MAIN_CONTEXT), 0);
        assert_eq!(pool.refcount(1), 0);
    }

    #[test]
    fn redundant_make_current_is_skipped() {
        let platform = HeadlessPlatform::new();
        let pool = pool(&platform, 1);
        let outer = ScopedContext::main(&pool).unwrap();
        let switches = platform.switches();
        for _ in 0..4 {
            let inner = ScopedContext::acquire(&pool, None).unwrap();
            assert_eq!(inner.slot(), MAIN_CONTEXT);
        }
        assert_eq!(platform.switches(), switches);
        drop(outer);
    }

    #[test]
    fn teardown_destroys_every_context_and_cache() {
        let platform = HeadlessPlatform::new();
        let pool = pool(&platform, 1);
        {
            let scope = ScopedContext::acquire(&pool, None).unwrap();
            let format = crate::engine::vertex_format::VertexFormat::default();
            scope.caches().vertex_array(scope.device(), &format).unwrap();
        }
        let worker = platform.device(1).unwrap();
        assert_eq!(worker.live_vertex_arrays(), 1);
        drop(pool);
        assert_eq!(worker.live_vertex_arrays(), 0);
        assert_eq!(platform.live_contexts(), 0);
    }
}
