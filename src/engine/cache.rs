//! ### English
//! Cache-line padding helpers for the context slot atomics.
//!
//! ### 中文
//! 上下文槽位原子字段使用的 cache line padding 工具。

/// ### English
/// The cache line size we optimize for (bytes).
///
/// ### 中文
/// 作为优化目标的 cache line 大小（字节）。
pub(crate) const CACHE_LINE_BYTES: usize = 64;

/// ### English
/// Returns the padding bytes needed to advance to the next cache-line boundary.
///
/// Used with `#[repr(C, align(64))]` structs so the claim/refcount words of one context slot
/// never share a line with the next slot's.
///
/// #### Parameters
/// - `bytes_used`: Number of bytes already occupied by preceding fields.
///
/// ### 中文
/// 返回将偏移推进到下一个 cache line 边界所需的 padding 字节数。
///
/// 配合 `#[repr(C, align(64))]` 结构体使用，使某个上下文槽位的 claim/refcount 字段
/// 不与相邻槽位共享同一 cache line。
///
/// #### 参数
/// - `bytes_used`：前置字段已占用的字节数。
#[inline]
pub(crate) const fn pad_to_cache_line(bytes_used: usize) -> usize {
    let rem = bytes_used % CACHE_LINE_BYTES;
    if rem == 0 { 0 } else { CACHE_LINE_BYTES - rem }
}

/// ### English
/// Padding after two fields (`A` then `B`, with `A` at least as aligned as `B`).
///
/// ### 中文
/// 两个字段（先 `A` 后 `B`，且 `A` 的对齐不小于 `B`）之后所需的 padding。
#[inline]
pub(crate) const fn pad_after2<A, B>() -> usize {
    pad_to_cache_line(std::mem::size_of::<A>() + std::mem::size_of::<B>())
}
