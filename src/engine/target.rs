//! ### English
//! Render target descriptions and the per-viewpoint attachment textures.
//!
//! Textures are shared objects owned by the renderer; framebuffers are per-context and live in
//! each context's [`PipelineCache`](crate::engine::context::PipelineCache), keyed by
//! [`RenderTargetDesc`].
//!
//! ### 中文
//! 渲染目标描述以及每个视点的附件纹理。
//!
//! 纹理是由渲染器持有的共享对象；framebuffer 属于各上下文，存放在各自的
//! [`PipelineCache`](crate::engine::context::PipelineCache) 中，以 [`RenderTargetDesc`] 为键。

use dpi::PhysicalSize;

use crate::engine::error::Result;
use crate::engine::gpu::{GpuDevice, TextureDesc, TextureFormat, TextureId};
use crate::engine::pass::PassDescriptor;

/// ### English
/// Attachment set of one framebuffer: colour attachments in order plus an optional
/// depth/stencil texture.
///
/// ### 中文
/// 单个 framebuffer 的附件集合：按顺序的颜色附件以及可选的深度/模板纹理。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderTargetDesc {
    pub colors: Vec<TextureId>,
    pub depth_stencil: Option<TextureId>,
}

impl RenderTargetDesc {
    pub fn attachment_count(&self) -> usize {
        self.colors.len() + usize::from(self.depth_stencil.is_some())
    }
}

/// ### English
/// Attachments of one pass for one viewpoint.
///
/// ### 中文
/// 某个视点在某个 pass 上的附件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassTarget {
    pub desc: RenderTargetDesc,
    /// ### English
    /// Colour attachments of the previous pass, bound for sampling when requested.
    ///
    /// ### 中文
    /// 上一个 pass 的颜色附件，按需绑定供采样。
    pub inputs: Vec<TextureId>,
}

/// ### English
/// Every pass target of one viewpoint at one size.
///
/// ### 中文
/// 某个视点在某一尺寸下的全部 pass 目标。
#[derive(Debug)]
pub struct ViewpointTargets {
    size: PhysicalSize<u32>,
    passes: Vec<PassTarget>,
}

impl ViewpointTargets {
    /// ### English
    /// Creates attachment textures for `passes` at `size`. On failure, textures created so far are
    /// deleted.
    ///
    /// ### 中文
    /// 以 `size` 为 `passes` 创建附件纹理。失败时会删除已创建的纹理。
    pub fn create(
        device: &dyn GpuDevice,
        passes: &[PassDescriptor],
        size: PhysicalSize<u32>,
    ) -> Result<Self> {
        let mut targets = Self {
            size,
            passes: Vec::with_capacity(passes.len()),
        };
        let mut previous_colors: Vec<TextureId> = Vec::new();
        for pass in passes {
            let built = Self::create_pass(device, pass, size);
            let desc = match built {
                Ok(desc) => desc,
                Err(err) => {
                    targets.destroy(device);
                    return Err(err);
                }
            };
            let inputs = if pass.sample_previous {
                previous_colors.clone()
            } else {
                Vec::new()
            };
            previous_colors = desc.colors.clone();
            targets.passes.push(PassTarget { desc, inputs });
        }
        Ok(targets)
    }

    fn create_pass(
        device: &dyn GpuDevice,
        pass: &PassDescriptor,
        size: PhysicalSize<u32>,
    ) -> Result<RenderTargetDesc> {
        let mut desc = RenderTargetDesc::default();
        let created = (|| -> Result<()> {
            for format in &pass.color_formats {
                desc.colors
                    .push(device.create_texture(&TextureDesc { format: *format, size })?);
            }
            if pass.depth_stencil {
                desc.depth_stencil = Some(device.create_texture(&TextureDesc {
                    format: TextureFormat::Depth24Stencil8,
                    size,
                })?);
            }
            Ok(())
        })();
        match created {
            Ok(()) => Ok(desc),
            Err(err) => {
                delete_textures(device, &desc);
                Err(err)
            }
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn passes(&self) -> &[PassTarget] {
        &self.passes
    }

    /// ### English
    /// First colour attachment of the last pass: the viewpoint's final image.
    ///
    /// ### 中文
    /// 最后一个 pass 的第一个颜色附件，即该视点的最终图像。
    pub fn output(&self) -> Option<TextureId> {
        self.passes.last()?.desc.colors.first().copied()
    }

    /// ### English
    /// Deletes every attachment texture and returns the descriptions whose framebuffers must be
    /// evicted from the context caches.
    ///
    /// ### 中文
    /// 删除全部附件纹理，并返回需要从各上下文缓存中淘汰 framebuffer 的描述。
    pub fn destroy(&mut self, device: &dyn GpuDevice) -> Vec<RenderTargetDesc> {
        let retired: Vec<RenderTargetDesc> =
            self.passes.drain(..).map(|pass| pass.desc).collect();
        for desc in &retired {
            delete_textures(device, desc);
        }
        retired
    }
}

fn delete_textures(device: &dyn GpuDevice, desc: &RenderTargetDesc) {
    for texture in desc.colors.iter().chain(desc.depth_stencil.iter()) {
        device.delete_texture(*texture);
    }
}
