//! ### English
//! Lock-free primitives shared across the engine.
//!
//! - `Backoff`: spin-then-yield used while claiming context slots.
//! - `OneShot`: joins a render pass dispatched to a worker thread.
//!
//! ### 中文
//! 引擎内复用的无锁原语。
//!
//! - `Backoff`：获取上下文槽位时的“短自旋 + 让出调度”。
//! - `OneShot`：等待派发到工作线程的渲染 pass 完成。
mod backoff;
mod oneshot;

pub(crate) use backoff::Backoff;
pub(crate) use oneshot::OneShot;
