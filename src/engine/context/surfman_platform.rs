//! ### English
//! surfman-backed context platform: one root GL 4.5 context plus shared contexts.
//!
//! ### 中文
//! 基于 surfman 的上下文平台：一个 GL 4.5 根上下文加若干共享上下文。

use std::sync::Arc;

use parking_lot::Mutex;
use surfman::{
    Connection, Context, ContextAttributeFlags, ContextAttributes, ContextDescriptor, Device,
    GLApi, GLVersion,
};

use crate::engine::context::MAIN_CONTEXT;
use crate::engine::context::platform::ContextPlatform;
use crate::engine::error::{RenderError, Result};
use crate::engine::gpu::{GlowDevice, GpuDevice};

/// ### English
/// Owns the surfman device and every pooled context.
///
/// Lock order is `contexts` then `device`.
///
/// ### 中文
/// 持有 surfman 设备以及全部池化上下文。
///
/// 加锁顺序为先 `contexts` 后 `device`。
pub struct SurfmanPlatform {
    _connection: Connection,
    descriptor: ContextDescriptor,
    contexts: Mutex<Vec<Option<Context>>>,
    device: Mutex<Device>,
}

// SAFETY: contexts are only made current through the pool, which guarantees a context is
// current on at most one thread; every surfman call happens under the mutexes above.
unsafe impl Send for SurfmanPlatform {}
unsafe impl Sync for SurfmanPlatform {}

impl SurfmanPlatform {
    /// ### English
    /// Opens the default surfman connection and adapter and prepares a GL 4.5 core descriptor.
    ///
    /// ### 中文
    /// 打开默认的 surfman connection 与 adapter，并准备 GL 4.5 core 上下文描述。
    pub fn new() -> Result<Arc<Self>> {
        let connection = Connection::new()
            .map_err(|err| RenderError::ContextInit(format!("surfman connection: {err:?}")))?;
        let adapter = connection
            .create_adapter()
            .map_err(|err| RenderError::ContextInit(format!("surfman adapter: {err:?}")))?;
        let device = connection
            .create_device(&adapter)
            .map_err(|err| RenderError::ContextInit(format!("surfman device: {err:?}")))?;
        if device.gl_api() != GLApi::GL {
            return Err(RenderError::ContextInit(
                "desktop OpenGL is required, the adapter only offers GLES".to_owned(),
            ));
        }
        let attributes = ContextAttributes {
            version: GLVersion::new(4, 5),
            flags: ContextAttributeFlags::empty(),
        };
        let descriptor = device
            .create_context_descriptor(&attributes)
            .map_err(|err| RenderError::ContextInit(format!("context descriptor: {err:?}")))?;
        log::info!("surfman platform ready");
        Ok(Arc::new(Self {
            _connection: connection,
            descriptor,
            contexts: Mutex::new(Vec::new()),
            device: Mutex::new(device),
        }))
    }
}

impl ContextPlatform for SurfmanPlatform {
    fn create_context(&self, slot: usize) -> Result<Arc<dyn GpuDevice>> {
        let mut contexts = self.contexts.lock();
        let mut device = self.device.lock();
        let share = if slot == MAIN_CONTEXT {
            None
        } else {
            contexts.get(MAIN_CONTEXT).and_then(Option::as_ref)
        };
        if slot != MAIN_CONTEXT && share.is_none() {
            return Err(RenderError::ContextInit(format!(
                "context {slot} needs the root context to share with"
            )));
        }
        let mut context = device
            .create_context(&self.descriptor, share)
            .map_err(|err| RenderError::ContextInit(format!("create context {slot}: {err:?}")))?;

        // Function pointers are resolved with the new context current, then it is released
        // again; the pool makes it current when a thread acquires the slot.
        let loaded = device
            .make_context_current(&context)
            .map_err(|err| RenderError::ContextInit(format!("make context {slot} current: {err:?}")))
            .and_then(|()| {
                let gl = unsafe {
                    glow::Context::from_loader_function(|symbol| {
                        device.get_proc_address(&context, symbol) as *const _
                    })
                };
                GlowDevice::new(gl)
            });
        if let Err(err) = device.make_no_context_current() {
            log::warn!("failed to release context {slot} after loading: {err:?}");
        }
        let gpu = match loaded {
            Ok(gpu) => gpu,
            Err(err) => {
                if let Err(destroy_err) = device.destroy_context(&mut context) {
                    log::error!("failed to destroy context {slot}: {destroy_err:?}");
                }
                return Err(err);
            }
        };

        if contexts.len() <= slot {
            contexts.resize_with(slot + 1, || None);
        }
        contexts[slot] = Some(context);
        log::debug!("surfman context {slot} created");
        Ok(Arc::new(gpu))
    }

    fn make_current(&self, slot: Option<usize>) -> Result<()> {
        let contexts = self.contexts.lock();
        let device = self.device.lock();
        match slot {
            Some(slot) => {
                let context = contexts
                    .get(slot)
                    .and_then(Option::as_ref)
                    .ok_or(RenderError::ContextNotHeld { slot })?;
                device
                    .make_context_current(context)
                    .map_err(|err| RenderError::ContextInit(format!("make current {slot}: {err:?}")))
            }
            None => device
                .make_no_context_current()
                .map_err(|err| RenderError::ContextInit(format!("release current: {err:?}"))),
        }
    }

    fn destroy_context(&self, slot: usize) {
        let mut contexts = self.contexts.lock();
        let device = self.device.lock();
        if let Some(mut context) = contexts.get_mut(slot).and_then(Option::take) {
            if let Err(err) = device.destroy_context(&mut context) {
                log::error!("failed to destroy surfman context {slot}: {err:?}");
            }
        }
    }
}

impl Drop for SurfmanPlatform {
    fn drop(&mut self) {
        let mut contexts = self.contexts.lock();
        let device = self.device.lock();
        for (slot, context) in contexts.iter_mut().enumerate().rev() {
            if let Some(mut context) = context.take()
                && let Err(err) = device.destroy_context(&mut context)
            {
                log::error!("failed to destroy surfman context {slot}: {err:?}");
            }
        }
    }
}
