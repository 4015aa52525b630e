//! ### English
//! Persistently-mapped, frame-sliced streaming buffers.
//!
//! Each buffer is `FRAME_RING_DEPTH` equal slices. Frame `f` bump-allocates inside slice
//! `f % FRAME_RING_DEPTH`, so the CPU never writes a slice the GPU may still read for one of the
//! previous `FRAME_RING_DEPTH - 1` frames.
//!
//! ### 中文
//! 持久映射、按帧切片的流式缓冲区。
//!
//! 每个缓冲区分为 `FRAME_RING_DEPTH` 个等长切片。第 `f` 帧在切片 `f % FRAME_RING_DEPTH`
//! 内做 bump 分配，因此 CPU 永远不会写入 GPU 可能仍在为之前 `FRAME_RING_DEPTH - 1`
//! 帧读取的切片。

mod set;

use std::ptr;

use bytemuck::Pod;

use crate::engine::error::{RenderError, Result};
use crate::engine::gpu::{BufferId, BufferTarget, GpuDevice, MappedBuffer};

pub use set::StreamingBuffers;

/// ### English
/// Number of frames in flight (slices per streaming buffer).
///
/// ### 中文
/// 同时在途的帧数（每个流式缓冲区的切片数）。
pub const FRAME_RING_DEPTH: usize = 3;

/// ### English
/// Granularity of slice sizes: the largest [`BufferClass::alignment`].
///
/// ### 中文
/// 切片大小的粒度：所有 [`BufferClass::alignment`] 中的最大值。
pub const SLICE_ALIGNMENT: usize = 256;

/// ### English
/// Kind of data a streaming buffer carries. Each class has its own buffer and binding target.
///
/// ### 中文
/// 流式缓冲区承载的数据类别。每个类别拥有独立的缓冲区与绑定目标。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferClass {
    Vertex,
    Index,
    DrawIndirect,
    DrawInfo,
    Uniform,
    PixelStaging,
}

impl BufferClass {
    pub const COUNT: usize = 6;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Vertex,
        Self::Index,
        Self::DrawIndirect,
        Self::DrawInfo,
        Self::Uniform,
        Self::PixelStaging,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn target(self) -> BufferTarget {
        match self {
            Self::Vertex => BufferTarget::Array,
            Self::Index => BufferTarget::ElementArray,
            Self::DrawIndirect => BufferTarget::DrawIndirect,
            Self::DrawInfo => BufferTarget::ShaderStorage,
            Self::Uniform => BufferTarget::Uniform,
            Self::PixelStaging => BufferTarget::PixelUnpack,
        }
    }

    /// ### English
    /// Default allocation alignment. Uniform ranges use the common 256-byte offset alignment;
    /// indirect and per-instance records are 16 bytes.
    ///
    /// ### 中文
    /// 默认分配对齐。uniform 范围使用常见的 256 字节偏移对齐；间接与每实例记录为 16 字节。
    pub const fn alignment(self) -> usize {
        match self {
            Self::Vertex | Self::Index | Self::PixelStaging => 4,
            Self::DrawIndirect | Self::DrawInfo => 16,
            Self::Uniform => 256,
        }
    }
}

/// ### English
/// A byte range inside one frame's slice.
///
/// `offset` is relative to `slice_base`, which is what indirect `base_instance` and vertex
/// `first` values are computed from.
///
/// ### 中文
/// 某一帧切片内的字节范围。
///
/// `offset` 相对于 `slice_base`，间接绘制的 `base_instance` 与顶点 `first` 均据此计算。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamAllocation {
    pub class: BufferClass,
    pub frame: u64,
    pub slice_base: usize,
    pub offset: usize,
    pub size: usize,
}

impl StreamAllocation {
    /// ### English
    /// Offset from the start of the whole buffer.
    ///
    /// ### 中文
    /// 相对于整个缓冲区起点的偏移。
    pub fn absolute(&self) -> usize {
        self.slice_base + self.offset
    }
}

/// ### English
/// Buffer-relative range used when binding a stream for the GPU.
///
/// ### 中文
/// 为 GPU 绑定流时使用的缓冲区相对范围。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferRange {
    pub buffer: BufferId,
    pub offset: usize,
    pub size: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// ### English
    /// Bytes allocated and not freed in the current frame.
    ///
    /// ### 中文
    /// 当前帧已分配且未释放的字节数。
    pub live_bytes: usize,
    pub peak_bytes: usize,
    /// ### English
    /// Bytes freed that belonged to earlier frames (already reclaimed by the ring).
    ///
    /// ### 中文
    /// 被释放的、属于更早帧的字节数（已由环形切片回收）。
    pub retired_bytes: u64,
    pub allocations: u64,
}

/// ### English
/// One streaming buffer. Storage is created on first use and stays mapped until destroyed.
///
/// ### 中文
/// 单个流式缓冲区。存储在首次使用时创建，并保持映射直到销毁。
pub struct StreamingBuffer {
    class: BufferClass,
    slice_size: usize,
    mapping: Option<MappedBuffer>,
    frame: Option<u64>,
    slice: usize,
    cursor: usize,
    stats: StreamStats,
}

impl StreamingBuffer {
    /// ### English
    /// Creates an unmapped buffer. `slice_size` is rounded up to [`SLICE_ALIGNMENT`] so every
    /// slice base satisfies the strictest class alignment.
    ///
    /// ### 中文
    /// 创建尚未映射的缓冲区。`slice_size` 向上取整到 [`SLICE_ALIGNMENT`]，
    /// 使每个切片基址都满足最严格的类别对齐。
    pub fn new(class: BufferClass, slice_size: usize) -> Self {
        let slice_size = slice_size.next_multiple_of(SLICE_ALIGNMENT);
        Self {
            class,
            slice_size,
            mapping: None,
            frame: None,
            slice: 0,
            cursor: 0,
            stats: StreamStats::default(),
        }
    }

    pub fn class(&self) -> BufferClass {
        self.class
    }

    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    pub fn capacity(&self) -> usize {
        self.slice_size * FRAME_RING_DEPTH
    }

    pub fn buffer_id(&self) -> Option<BufferId> {
        self.mapping.as_ref().map(MappedBuffer::id)
    }

    pub fn current_slice(&self) -> usize {
        self.slice
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// ### English
    /// Moves to `frame`'s slice and resets the bump cursor.
    ///
    /// ### 中文
    /// 切换到 `frame` 对应的切片并重置 bump 游标。
    pub fn advance(&mut self, frame: u64) {
        self.slice = (frame % FRAME_RING_DEPTH as u64) as usize;
        self.cursor = 0;
        self.stats.live_bytes = 0;
        self.frame = Some(frame);
        log::trace!("{:?} stream -> frame {frame}, slice {}", self.class, self.slice);
    }

    fn begin(&mut self, device: &dyn GpuDevice, frame: u64) -> Result<()> {
        if self.mapping.is_none() {
            let mapping = device.create_mapped_buffer(self.class.target(), self.capacity())?;
            log::debug!(
                "{:?} stream mapped: {} x {} bytes",
                self.class,
                FRAME_RING_DEPTH,
                self.slice_size
            );
            self.mapping = Some(mapping);
        }
        if self.frame != Some(frame) {
            self.advance(frame);
        }
        Ok(())
    }

    /// ### English
    /// Allocates `size` bytes in `frame`'s slice at the class alignment.
    ///
    /// ### 中文
    /// 以类别默认对齐在 `frame` 的切片中分配 `size` 字节。
    pub fn allocate(
        &mut self,
        device: &dyn GpuDevice,
        frame: u64,
        size: usize,
    ) -> Result<StreamAllocation> {
        self.allocate_aligned(device, frame, size, self.class.alignment())
    }

    /// ### English
    /// Allocates `size` bytes in `frame`'s slice with the offset rounded up to `align`.
    ///
    /// `align` need not be a power of two (vertex strides such as 12 or 20 are valid), so that
    /// the offset divided by the stride is an exact vertex index.
    ///
    /// #### Parameters
    /// - `device`: Device of the context currently held, used to create storage on first use.
    /// - `frame`: Frame being recorded. A new frame switches slice and resets the cursor.
    /// - `size`: Requested byte count.
    /// - `align`: Offset alignment in bytes (0 is treated as 1).
    ///
    /// ### 中文
    /// 在 `frame` 的切片中分配 `size` 字节，偏移向上取整到 `align`。
    ///
    /// `align` 不要求是 2 的幂（12、20 等顶点步长均合法），从而偏移除以步长即为精确的顶点下标。
    ///
    /// #### 参数
    /// - `device`：当前持有上下文的设备，首次使用时用于创建存储。
    /// - `frame`：正在录制的帧。新帧会切换切片并重置游标。
    /// - `size`：请求的字节数。
    /// - `align`：偏移对齐字节数（0 视为 1）。
    pub fn allocate_aligned(
        &mut self,
        device: &dyn GpuDevice,
        frame: u64,
        size: usize,
        align: usize,
    ) -> Result<StreamAllocation> {
        self.begin(device, frame)?;
        let align = align.max(1);
        let offset = self.cursor.div_ceil(align) * align;
        let end = offset.checked_add(size).filter(|end| *end <= self.slice_size);
        let Some(end) = end else {
            return Err(RenderError::StreamExhausted {
                class: self.class,
                requested: size,
                available: self.slice_size.saturating_sub(offset),
            });
        };
        self.cursor = end;
        self.stats.live_bytes += size;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.stats.live_bytes);
        self.stats.allocations += 1;
        Ok(StreamAllocation {
            class: self.class,
            frame,
            slice_base: self.slice * self.slice_size,
            offset,
            size,
        })
    }

    /// ### English
    /// Returns an allocation. Space is reclaimed when the ring wraps, so this only updates
    /// accounting.
    ///
    /// ### 中文
    /// 归还一段分配。空间在环形切片回绕时回收，因此这里只更新统计。
    pub fn free(&mut self, allocation: &StreamAllocation) {
        debug_assert_eq!(allocation.class, self.class);
        if Some(allocation.frame) == self.frame {
            self.stats.live_bytes = self.stats.live_bytes.saturating_sub(allocation.size);
        } else {
            self.stats.retired_bytes += allocation.size as u64;
        }
    }

    /// ### English
    /// Copies `bytes` into `allocation` starting at byte `at`.
    ///
    /// Only allocations of the current frame are writable; older ones may be in use by the GPU.
    ///
    /// ### 中文
    /// 从字节 `at` 起把 `bytes` 拷贝进 `allocation`。
    ///
    /// 只有当前帧的分配可写；更早的分配可能仍被 GPU 使用。
    pub fn write(&mut self, allocation: &StreamAllocation, at: usize, bytes: &[u8]) -> Result<()> {
        if allocation.class != self.class || Some(allocation.frame) != self.frame {
            return Err(RenderError::StaleHandle);
        }
        let end = at.checked_add(bytes.len()).filter(|end| *end <= allocation.size);
        if end.is_none() {
            return Err(RenderError::StreamExhausted {
                class: self.class,
                requested: at.saturating_add(bytes.len()),
                available: allocation.size,
            });
        }
        let mapping = self.mapping.as_ref().ok_or(RenderError::StaleHandle)?;
        // SAFETY: the allocation lies inside the mapped range and belongs to the slice the GPU
        // is not reading for this frame.
        unsafe {
            ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                mapping.as_ptr().add(allocation.absolute() + at),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// ### English
    /// Writes `value` as element `index` of an array of `T` laid out in `allocation`.
    ///
    /// ### 中文
    /// 把 `value` 写为 `allocation` 中 `T` 数组的第 `index` 个元素。
    pub fn write_pod<T: Pod>(
        &mut self,
        allocation: &StreamAllocation,
        index: usize,
        value: &T,
    ) -> Result<()> {
        self.write(allocation, index * size_of::<T>(), bytemuck::bytes_of(value))
    }

    pub fn write_slice<T: Pod>(&mut self, allocation: &StreamAllocation, values: &[T]) -> Result<()> {
        self.write(allocation, 0, bytemuck::cast_slice(values))
    }

    /// ### English
    /// Whole current slice as a bind range, if this buffer was used in `frame`.
    ///
    /// ### 中文
    /// 若该缓冲区在 `frame` 中被使用，返回当前整段切片作为绑定范围。
    pub fn frame_range(&self, frame: u64) -> Option<BufferRange> {
        if self.frame != Some(frame) {
            return None;
        }
        Some(BufferRange {
            buffer: self.buffer_id()?,
            offset: self.slice * self.slice_size,
            size: self.slice_size,
        })
    }

    /// ### English
    /// Reads back mapped bytes at a buffer-absolute offset.
    ///
    /// ### 中文
    /// 按缓冲区绝对偏移读回映射内存中的字节。
    pub fn read(&self, absolute: usize, len: usize) -> Option<&[u8]> {
        let mapping = self.mapping.as_ref()?;
        if absolute.checked_add(len)? > mapping.len() {
            return None;
        }
        // SAFETY: bounds checked against the mapped length above.
        Some(unsafe { std::slice::from_raw_parts(mapping.as_ptr().add(absolute), len) })
    }

    /// ### English
    /// Deletes the backing buffer. Must run with a context of the share group current.
    ///
    /// ### 中文
    /// 删除底层缓冲区。必须在共享组内某个上下文为 current 时调用。
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        if let Some(mapping) = self.mapping.take() {
            device.delete_buffer(mapping.id());
        }
        self.frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpu::{HeadlessDevice, HeadlessNamespace};

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(0, HeadlessNamespace::new())
    }

    #[test]
    fn storage_is_created_lazily() {
        let device = device();
        let mut stream = StreamingBuffer::new(BufferClass::DrawInfo, 256);
        assert_eq!(stream.buffer_id(), None);
        assert_eq!(device.namespace().live_buffers(), 0);

        stream.allocate(&device, 0, 16).unwrap();
        let id = stream.buffer_id().unwrap();
        assert_eq!(device.namespace().live_buffers(), 1);
        assert_eq!(
            device.namespace().buffer_target(id),
            Some(BufferTarget::ShaderStorage)
        );
    }

    #[test]
    fn frames_rotate_through_slices() {
        let device = device();
        let mut stream = StreamingBuffer::new(BufferClass::DrawIndirect, 256);
        let bases: Vec<usize> = (0..4u64)
            .map(|frame| stream.allocate(&device, frame, 16).unwrap().slice_base)
            .collect();
        assert_eq!(bases, vec![0, 256, 512, 0]);
    }

    #[test]
    fn uneven_slice_sizes_are_rounded_so_every_slice_stays_aligned() {
        let device = device();
        let mut stream = StreamingBuffer::new(BufferClass::Uniform, 1000);
        assert_eq!(stream.slice_size(), 1024);
        assert_eq!(stream.capacity(), 3 * 1024);
        for frame in 0..FRAME_RING_DEPTH as u64 {
            let range = stream.allocate(&device, frame, 64).unwrap();
            assert_eq!(range.absolute() % BufferClass::Uniform.alignment(), 0);
            assert_eq!(stream.frame_range(frame).unwrap().offset % SLICE_ALIGNMENT, 0);
        }
        for class in BufferClass::ALL {
            assert_eq!(SLICE_ALIGNMENT % class.alignment(), 0);
        }
    }

    #[test]
    fn bump_allocation_honours_non_power_of_two_alignment() {
        let device = device();
        let mut stream = StreamingBuffer::new(BufferClass::Vertex, 1024);
        let a = stream.allocate_aligned(&device, 0, 7, 1).unwrap();
        let b = stream.allocate_aligned(&device, 0, 24, 12).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 12);
        assert_eq!(b.offset % 12, 0);
    }

    #[test]
    fn exhausting_a_slice_reports_the_class() {
        let device = device();
        let mut stream = StreamingBuffer::new(BufferClass::Uniform, 512);
        stream.allocate(&device, 0, 300).unwrap();
        let err = stream.allocate(&device, 0, 300).unwrap_err();
        assert_eq!(
            err,
            RenderError::StreamExhausted {
                class: BufferClass::Uniform,
                requested: 300,
                available: 0,
            }
        );
        // The next frame starts from an empty slice.
        assert!(stream.allocate(&device, 1, 300).is_ok());
    }

    #[test]
    fn free_tracks_live_and_retired_bytes() {
        let device = device();
        let mut stream = StreamingBuffer::new(BufferClass::DrawInfo, 256);
        let old = stream.allocate(&device, 0, 64).unwrap();
        let current = stream.allocate(&device, 1, 32).unwrap();
        stream.free(&old);
        assert_eq!(stream.stats().retired_bytes, 64);
        assert_eq!(stream.stats().live_bytes, 32);
        stream.free(&current);
        assert_eq!(stream.stats().live_bytes, 0);
        assert_eq!(stream.stats().peak_bytes, 64);
    }

    #[test]
    fn writes_land_at_the_allocation_and_stale_writes_are_rejected() {
        let device = device();
        let mut stream = StreamingBuffer::new(BufferClass::DrawInfo, 128);
        let first = stream.allocate(&device, 0, 16).unwrap();
        let second = stream.allocate(&device, 0, 16).unwrap();
        stream.write_pod(&second, 1, &0xDEAD_BEEFu32).unwrap();
        assert_eq!(
            stream.read(second.absolute() + 4, 4).unwrap(),
            &0xDEAD_BEEFu32.to_ne_bytes()
        );
        assert!(matches!(
            stream.write(&second, 8, &[0; 16]),
            Err(RenderError::StreamExhausted { .. })
        ));

        stream.allocate(&device, 1, 16).unwrap();
        assert_eq!(stream.write(&first, 0, &[1]), Err(RenderError::StaleHandle));
    }

    #[test]
    fn frame_range_covers_the_current_slice_only_for_that_frame() {
        let device = device();
        let mut stream = StreamingBuffer::new(BufferClass::DrawInfo, 256);
        assert_eq!(stream.frame_range(0), None);
        stream.allocate(&device, 2, 16).unwrap();
        let range = stream.frame_range(2).unwrap();
        assert_eq!((range.offset, range.size), (512, 256));
        assert_eq!(stream.frame_range(3), None);
    }
}
