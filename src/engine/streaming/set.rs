use crate::engine::config::StreamSizes;
use crate::engine::gpu::GpuDevice;
use crate::engine::streaming::{BufferClass, StreamStats, StreamingBuffer};

/// ### English
/// One streaming buffer per [`BufferClass`].
///
/// ### 中文
/// 每个 [`BufferClass`] 对应一个流式缓冲区。
pub struct StreamingBuffers {
    buffers: [StreamingBuffer; BufferClass::COUNT],
}

impl StreamingBuffers {
    pub fn new(sizes: &StreamSizes) -> Self {
        Self {
            buffers: BufferClass::ALL.map(|class| StreamingBuffer::new(class, sizes.slice_size(class))),
        }
    }

    pub fn get(&self, class: BufferClass) -> &StreamingBuffer {
        &self.buffers[class.index()]
    }

    pub fn get_mut(&mut self, class: BufferClass) -> &mut StreamingBuffer {
        &mut self.buffers[class.index()]
    }

    pub fn stats(&self) -> [(BufferClass, StreamStats); BufferClass::COUNT] {
        BufferClass::ALL.map(|class| (class, self.get(class).stats()))
    }

    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        for buffer in &mut self.buffers {
            buffer.destroy(device);
        }
    }
}
