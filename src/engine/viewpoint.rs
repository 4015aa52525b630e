//! ### English
//! Viewpoints: one independent camera, viewport and target set per stereo half.
//!
//! ### 中文
//! 视点：每个立体半幅各自独立的相机、视口与渲染目标集合。

use bytemuck::{Pod, Zeroable};
use dpi::PhysicalSize;
use glam::Mat4;

use crate::engine::target::ViewpointTargets;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewpointId {
    Left,
    Right,
}

impl ViewpointId {
    pub const ALL: [Self; 2] = [Self::Left, Self::Right];

    pub const fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Left),
            1 => Some(Self::Right),
            _ => None,
        }
    }
}

/// ### English
/// Camera uniform block written once per viewpoint per frame (std140 compatible).
///
/// ### 中文
/// 每帧每视点写入一次的相机 uniform block（兼容 std140）。
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraBlock {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    /// ### English
    /// `[width, height, 1/width, 1/height]`.
    ///
    /// ### 中文
    /// `[宽, 高, 1/宽, 1/高]`。
    pub viewport: [f32; 4],
}

#[derive(Debug)]
pub struct Viewpoint {
    pub(crate) view: Mat4,
    pub(crate) projection: Mat4,
    pub(crate) size: PhysicalSize<u32>,
    pub(crate) enabled: bool,
    pub(crate) targets: Option<ViewpointTargets>,
}

impl Viewpoint {
    pub(crate) fn new(size: PhysicalSize<u32>, enabled: bool) -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            size,
            enabled,
            targets: None,
        }
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// ### English
    /// Whether the attachment textures are missing or were built for another size.
    ///
    /// ### 中文
    /// 附件纹理是否缺失或按其它尺寸创建。
    pub(crate) fn needs_targets(&self) -> bool {
        self.targets
            .as_ref()
            .is_none_or(|targets| targets.size() != self.size)
    }

    pub fn camera_block(&self) -> CameraBlock {
        let width = self.size.width.max(1) as f32;
        let height = self.size.height.max(1) as f32;
        CameraBlock {
            view: self.view,
            projection: self.projection,
            view_projection: self.projection * self.view,
            viewport: [width, height, 1.0 / width, 1.0 / height],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn camera_block_matches_std140_size() {
        assert_eq!(size_of::<CameraBlock>(), 3 * 64 + 16);
    }

    #[test]
    fn camera_block_combines_projection_and_view() {
        let mut viewpoint = Viewpoint::new(PhysicalSize::new(200, 100), true);
        viewpoint.view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        viewpoint.projection = Mat4::from_scale(Vec3::splat(2.0));
        let block = viewpoint.camera_block();
        assert_eq!(block.view_projection, viewpoint.projection * viewpoint.view);
        assert_eq!(block.viewport, [200.0, 100.0, 0.005, 0.01]);
    }

    #[test]
    fn ids_round_trip_through_indices() {
        for id in ViewpointId::ALL {
            assert_eq!(ViewpointId::from_index(id.index()), Some(id));
        }
        assert_eq!(ViewpointId::from_index(2), None);
    }
}
