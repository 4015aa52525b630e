//! ### English
//! Spin-then-yield backoff used while a context slot is claimed by another thread.
//!
//! Context hold times are short (one flush or one render pass), so a brief spin usually wins;
//! after the spin budget the thread yields so oversubscribed machines make progress.
//!
//! ### 中文
//! 上下文槽位被其它线程占用时使用的“短自旋 + 让出调度”退避。
//!
//! 上下文持有时间很短（一次 flush 或一个渲染 pass），短自旋通常即可拿到；超过自旋预算后
//! 让出调度，保证 CPU 过载时仍能推进。

use std::thread;

/// ### English
/// Spin budget before switching to `yield_now()`.
///
/// ### 中文
/// 在切换到 `yield_now()` 之前允许的自旋次数预算。
const SPIN_LIMIT: u32 = 64;

pub(crate) struct Backoff {
    spins: u32,
}

impl Backoff {
    #[inline]
    pub(crate) fn new() -> Self {
        Self { spins: 0 }
    }

    /// ### English
    /// Performs one backoff step.
    ///
    /// ### 中文
    /// 执行一次退避步骤。
    #[inline]
    pub(crate) fn snooze(&mut self) {
        if self.spins < SPIN_LIMIT {
            std::hint::spin_loop();
        } else {
            thread::yield_now();
        }
        self.spins = self.spins.saturating_add(1);
    }

    /// ### English
    /// Whether the spin budget is spent (further snoozes yield).
    ///
    /// ### 中文
    /// 自旋预算是否已用完（之后的退避都会让出调度）。
    #[inline]
    pub(crate) fn is_yielding(&self) -> bool {
        self.spins >= SPIN_LIMIT
    }
}
