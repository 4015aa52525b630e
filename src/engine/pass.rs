//! ### English
//! Render pass descriptors: fixed-function state, clear values and attachment layout.
//!
//! ### 中文
//! 渲染 pass 描述：固定管线状态、清屏值与附件布局。

use crate::engine::gpu::TextureFormat;

/// ### English
/// Index of a pass in the renderer's declared pass order.
///
/// ### 中文
/// pass 在渲染器声明顺序中的下标。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub u32);

impl PassId {
    pub const FORWARD: Self = Self(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Opaque,
    Alpha,
    Premultiplied,
    Additive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub func: CompareFunc,
    pub reference: i32,
    pub mask: u32,
    pub write_mask: u32,
}

/// ### English
/// Fixed-function state applied once at the start of a pass.
///
/// ### 中文
/// 在 pass 开始时一次性应用的固定管线状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FixedFunctionState {
    pub color_write: bool,
    pub depth_write: bool,
    /// ### English
    /// `None` disables depth testing.
    ///
    /// ### 中文
    /// `None` 表示关闭深度测试。
    pub depth_test: Option<CompareFunc>,
    pub cull: CullMode,
    pub blend: BlendMode,
    pub stencil: Option<StencilState>,
    pub srgb: bool,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            color_write: true,
            depth_write: true,
            depth_test: Some(CompareFunc::LessEqual),
            cull: CullMode::Back,
            blend: BlendMode::Opaque,
            stencil: None,
            srgb: false,
        }
    }
}

/// ### English
/// Buffers to clear at the start of a pass. `None` keeps the previous contents.
///
/// ### 中文
/// pass 开始时需要清除的缓冲区。`None` 表示保留原内容。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
    pub stencil: Option<i32>,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: Some([0.0, 0.0, 0.0, 1.0]),
            depth: Some(1.0),
            stencil: Some(0),
        }
    }
}

impl ClearValues {
    pub const NONE: Self = Self {
        color: None,
        depth: None,
        stencil: None,
    };
}

/// ### English
/// Static description of one render pass.
///
/// `color_formats` and `depth_stencil` describe the pass's own attachments, created per
/// viewpoint at the viewpoint's size. `sample_previous` binds the previous pass's colour
/// attachments as input textures.
///
/// ### 中文
/// 单个渲染 pass 的静态描述。
///
/// `color_formats` 与 `depth_stencil` 描述该 pass 自身的附件，按视点尺寸为每个视点创建。
/// `sample_previous` 会把上一个 pass 的颜色附件绑定为输入纹理。
#[derive(Clone, Debug, PartialEq)]
pub struct PassDescriptor {
    pub name: String,
    pub color_formats: Vec<TextureFormat>,
    pub depth_stencil: bool,
    pub state: FixedFunctionState,
    pub clear: ClearValues,
    pub sample_previous: bool,
}

impl PassDescriptor {
    /// ### English
    /// Default forward pass: one sRGB colour target plus depth/stencil, cleared each frame.
    ///
    /// ### 中文
    /// 默认前向 pass：一个 sRGB 颜色目标加深度/模板，每帧清除。
    pub fn forward() -> Self {
        Self {
            name: "forward".to_owned(),
            color_formats: vec![TextureFormat::Srgb8Alpha8],
            depth_stencil: true,
            state: FixedFunctionState {
                srgb: true,
                ..FixedFunctionState::default()
            },
            clear: ClearValues::default(),
            sample_previous: false,
        }
    }
}
