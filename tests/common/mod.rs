#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use xian_render_core::engine::batch::{
    DrawDescriptor, DrawHandle, INSTANCE_RECORD_SIZE, InstanceData, VertexRange,
};
use xian_render_core::engine::context::HeadlessPlatform;
use xian_render_core::engine::gpu::{DrawArraysIndirectCommand, INDIRECT_COMMAND_SIZE, PrimitiveType};
use xian_render_core::engine::streaming::{BufferClass, StreamAllocation};
use xian_render_core::engine::vertex_format::{AttributeType, VertexFormat};
use xian_render_core::engine::{Output, Renderer, RendererConfig, StreamSizes};

pub const VS: &str = "#version 450\nvoid main() { gl_Position = vec4(0.0); }";
pub const FS: &str = "#version 450\nout vec4 color;\nvoid main() { color = vec4(1.0); }";

pub fn headless(stereo: bool) -> (Renderer, Arc<HeadlessPlatform>) {
    let platform = HeadlessPlatform::new();
    let config = RendererConfig {
        acquire_timeout: Duration::from_secs(10),
        stereo,
        streams: StreamSizes {
            vertex: 64 << 10,
            index: 16 << 10,
            draw_indirect: 16 << 10,
            draw_info: 64 << 10,
            uniform: 64 << 10,
            pixel_staging: 16 << 10,
        },
        max_draws_per_frame: 1024,
        ..RendererConfig::default()
    };
    let renderer = Renderer::new(config, platform.clone(), Output::offscreen())
        .expect("headless renderer");
    (renderer, platform)
}

pub fn position_format() -> VertexFormat {
    VertexFormat::default()
        .with(AttributeType::F32, 3, false, 0)
        .expect("valid format")
}

pub fn draw(primitive: PrimitiveType, first: u32, count: u32) -> DrawDescriptor {
    DrawDescriptor {
        format: position_format(),
        stride: 0,
        primitive,
        vertices: VertexRange { first, count },
        elements: None,
    }
}

/// Streams `count` position-only vertices into the renderer's current frame.
pub fn stream(renderer: &mut Renderer, count: u32) -> VertexRange {
    let bytes = vec![0u8; count as usize * 12];
    renderer.stream_vertices(12, &bytes).expect("vertices fit the slice")
}

pub fn streamed(renderer: &mut Renderer, primitive: PrimitiveType, count: u32) -> DrawDescriptor {
    let range = stream(renderer, count);
    draw(primitive, range.first, range.count)
}

pub fn triangles(renderer: &mut Renderer, count: u32) -> DrawDescriptor {
    streamed(renderer, PrimitiveType::Triangles, count)
}

/// Re-streams the geometry of `draws` for the frame about to be rendered.
pub fn restream(renderer: &mut Renderer, draws: &[DrawHandle]) {
    for &handle in draws {
        let count = renderer.registry().draw(handle).expect("live draw").vertices().count;
        let range = stream(renderer, count);
        renderer.set_draw_geometry(handle, range).expect("live draw");
    }
}

pub fn command(renderer: &Renderer, commands: &StreamAllocation, slot: usize) -> DrawArraysIndirectCommand {
    let bytes = renderer
        .streams()
        .get(BufferClass::DrawIndirect)
        .read(commands.absolute() + slot * INDIRECT_COMMAND_SIZE, INDIRECT_COMMAND_SIZE)
        .expect("command in mapped range");
    bytemuck::pod_read_unaligned(bytes)
}

pub fn records(renderer: &Renderer, range: &StreamAllocation) -> Vec<InstanceData> {
    renderer
        .streams()
        .get(BufferClass::DrawInfo)
        .read(range.absolute(), range.size)
        .expect("records in mapped range")
        .chunks_exact(INSTANCE_RECORD_SIZE)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}
