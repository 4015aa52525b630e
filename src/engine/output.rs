//! ### English
//! Presentation outputs: where finished viewpoint textures go at the end of a frame.
//!
//! ### 中文
//! 呈现输出：帧结束时已完成的视点纹理交给谁。

use crossbeam_channel as channel;

use crate::engine::context::{ContextPool, ScopedContext};
use crate::engine::error::Result;
use crate::engine::gpu::TextureId;

/// ### English
/// Final textures of one frame. `None` for a disabled viewpoint.
///
/// ### 中文
/// 单帧的最终纹理。关闭的视点为 `None`。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameTextures {
    pub frame: u64,
    pub left: Option<TextureId>,
    pub right: Option<TextureId>,
}

/// ### English
/// Closed set of output variants, selected at construction.
///
/// ### 中文
/// 输出变体的封闭集合，在构造时选定。
#[derive(Debug)]
pub enum Output {
    /// ### English
    /// Keeps the latest submitted textures for the embedder to sample.
    ///
    /// ### 中文
    /// 保存最近一次提交的纹理，供宿主采样。
    Offscreen {
        pending: Option<FrameTextures>,
        latest: Option<FrameTextures>,
    },
    /// ### English
    /// Sends every frame to a presentation thread. A full channel drops the frame.
    ///
    /// ### 中文
    /// 把每帧发送给呈现线程。通道满时丢弃该帧。
    Channel {
        pending: Option<FrameTextures>,
        sender: channel::Sender<FrameTextures>,
        dropped: u64,
    },
}

impl Default for Output {
    fn default() -> Self {
        Self::offscreen()
    }
}

impl Output {
    pub fn offscreen() -> Self {
        Self::Offscreen {
            pending: None,
            latest: None,
        }
    }

    /// ### English
    /// Creates a channel output and the receiver for the presentation thread.
    ///
    /// #### Parameters
    /// - `capacity`: Frames buffered before new ones are dropped (0 is treated as 1).
    ///
    /// ### 中文
    /// 创建通道输出以及呈现线程使用的接收端。
    ///
    /// #### 参数
    /// - `capacity`：在开始丢帧前可缓冲的帧数（0 视为 1）。
    pub fn channel(capacity: usize) -> (Self, channel::Receiver<FrameTextures>) {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        (
            Self::Channel {
                pending: None,
                sender,
                dropped: 0,
            },
            receiver,
        )
    }

    pub fn set_textures(&mut self, textures: FrameTextures) {
        match self {
            Self::Offscreen { pending, .. } | Self::Channel { pending, .. } => {
                *pending = Some(textures)
            }
        }
    }

    /// ### English
    /// Makes the context that owns the final textures current for submission.
    ///
    /// ### 中文
    /// 将持有最终纹理的上下文设为 current 以便提交。
    pub fn make_current<'pool>(&self, pool: &'pool ContextPool) -> Result<ScopedContext<'pool>> {
        ScopedContext::main(pool)
    }

    /// ### English
    /// Flushes rendering on `scope` so the textures are complete for other contexts, then
    /// delivers the pending textures.
    ///
    /// ### 中文
    /// 在 `scope` 上刷新渲染命令使纹理对其它上下文完整可见，然后交付待提交纹理。
    pub fn submit(&mut self, scope: &ScopedContext<'_>) -> Result<()> {
        scope.device().flush();
        match self {
            Self::Offscreen { pending, latest } => {
                if let Some(textures) = pending.take() {
                    *latest = Some(textures);
                }
            }
            Self::Channel {
                pending,
                sender,
                dropped,
            } => {
                if let Some(textures) = pending.take() {
                    match sender.try_send(textures) {
                        Ok(()) => {}
                        Err(channel::TrySendError::Full(textures)) => {
                            *dropped += 1;
                            log::warn!("presentation channel full, frame {} dropped", textures.frame);
                        }
                        Err(channel::TrySendError::Disconnected(textures)) => {
                            *dropped += 1;
                            log::warn!("presentation receiver gone, frame {} dropped", textures.frame);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn done_current(scope: ScopedContext<'_>) {
        drop(scope);
    }

    /// ### English
    /// Last textures delivered by an offscreen output.
    ///
    /// ### 中文
    /// 离屏输出最近交付的纹理。
    pub fn latest(&self) -> Option<FrameTextures> {
        match self {
            Self::Offscreen { latest, .. } => *latest,
            Self::Channel { .. } => None,
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        match self {
            Self::Offscreen { .. } => 0,
            Self::Channel { dropped, .. } => *dropped,
        }
    }
}
