use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::engine::cache::pad_after2;
use crate::engine::context::PipelineCache;
use crate::engine::gpu::GpuDevice;

/// ### English
/// One pooled context.
///
/// Hot fields:
/// - `refcount`: nested acquisitions by the holding thread.
/// - `claimed`: single test-and-set word deciding ownership.
///
/// They occupy their own cache line so spinning claimers do not disturb neighbouring slots.
///
/// ### 中文
/// 单个池化上下文。
///
/// 热字段：
/// - `refcount`：持有线程的嵌套获取次数。
/// - `claimed`：决定归属的单个 test-and-set 字。
///
/// 二者独占一条 cache line，自旋争抢者不会干扰相邻槽位。
#[repr(C, align(64))]
pub(crate) struct ContextSlot {
    refcount: AtomicU32,
    claimed: AtomicBool,
    _pad: [u8; pad_after2::<AtomicU32, AtomicBool>()],

    pub(crate) reserved: bool,
    valid: AtomicBool,
    pub(crate) device: Arc<dyn GpuDevice>,
    pub(crate) caches: Mutex<PipelineCache>,
}

impl ContextSlot {
    pub(crate) fn new(device: Arc<dyn GpuDevice>, reserved: bool) -> Self {
        Self {
            refcount: AtomicU32::new(0),
            claimed: AtomicBool::new(false),
            _pad: [0; pad_after2::<AtomicU32, AtomicBool>()],
            reserved,
            valid: AtomicBool::new(true),
            device,
            caches: Mutex::new(PipelineCache::default()),
        }
    }

    /// ### English
    /// Attempts the claim. On success the caller owns the slot until [`unclaim`](Self::unclaim).
    ///
    /// ### 中文
    /// 尝试占用。成功后调用方持有该槽位，直到 [`unclaim`](Self::unclaim)。
    #[inline]
    pub(crate) fn try_claim(&self) -> bool {
        if !self.valid.load(Ordering::Acquire) {
            return false;
        }
        self.claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub(crate) fn unclaim(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn retain(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// ### English
    /// Drops one reference. Returns the remaining count, or `None` if it was already zero.
    ///
    /// ### 中文
    /// 释放一个引用。返回剩余计数；若原本已为零则返回 `None`。
    #[inline]
    pub(crate) fn release_ref(&self) -> Option<u32> {
        self.refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    #[inline]
    pub(crate) fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// ### English
    /// Marks the slot unusable. Returns whether it was valid before.
    ///
    /// ### 中文
    /// 将槽位标记为不可用。返回此前是否有效。
    pub(crate) fn invalidate(&self) -> bool {
        self.valid.swap(false, Ordering::AcqRel)
    }
}
