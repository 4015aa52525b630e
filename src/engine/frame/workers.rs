use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel as channel;

use crate::engine::error::{RenderError, Result};
use crate::engine::lockfree::OneShot;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// ### English
/// Fixed pool of named OS threads that run render passes.
///
/// Jobs are taken from one shared queue; each dispatch returns a [`OneShot`] the dispatching
/// thread parks on. A panicking job reports `WorkerPanicked` instead of losing its reply.
///
/// ### 中文
/// 固定数量、带名字的 OS 线程池，用于执行渲染 pass。
///
/// 所有线程从同一个队列取任务；每次派发返回一个 [`OneShot`]，派发线程在其上 park 等待。
/// 任务 panic 时会回复 `WorkerPanicked`，而不会丢失结果。
pub(crate) struct RenderWorkers {
    sender: Option<channel::Sender<Job>>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl RenderWorkers {
    /// ### English
    /// Spawns `count` worker threads (at least one).
    ///
    /// ### 中文
    /// 启动 `count` 个工作线程（至少一个）。
    pub(crate) fn spawn(count: usize) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let mut workers = Self {
            sender: Some(sender),
            threads: Vec::with_capacity(count.max(1)),
        };
        for index in 0..count.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("XianRenderWorker{index}"))
                .spawn(move || {
                    for job in receiver {
                        job();
                    }
                })
                .map_err(|err| {
                    RenderError::ContextInit(format!("spawning render worker {index}: {err}"))
                })?;
            workers.threads.push(handle);
        }
        Ok(workers)
    }

    pub(crate) fn len(&self) -> usize {
        self.threads.len()
    }

    /// ### English
    /// Queues `job` and returns the slot its result will be sent to.
    ///
    /// The slot must be received on the calling thread.
    ///
    /// ### 中文
    /// 将 `job` 入队，并返回接收其结果的槽位。
    ///
    /// 必须在调用线程上接收该槽位。
    pub(crate) fn dispatch<T, F>(&self, job: F) -> Arc<OneShot<Result<T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let slot = Arc::new(OneShot::for_current_thread());
        let reply = slot.clone();
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
                log::error!(
                    "render job panicked on {}",
                    thread::current().name().unwrap_or("<unnamed>")
                );
                Err(RenderError::WorkerPanicked)
            });
            reply.send(result);
        });

        let queued = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(job).is_ok());
        if !queued {
            slot.send(Err(RenderError::WorkerPanicked));
        }
        slot
    }
}

impl Drop for RenderWorkers {
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("render worker exited by panic");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_come_back_to_the_dispatcher() {
        let workers = RenderWorkers::spawn(2).unwrap();
        assert_eq!(workers.len(), 2);
        let slots: Vec<_> = (0..4u32).map(|n| workers.dispatch(move || Ok(n * 10))).collect();
        let results: Vec<u32> = slots.iter().map(|slot| slot.recv().unwrap()).collect();
        assert_eq!(results, vec![0, 10, 20, 30]);
    }

    #[test]
    fn jobs_run_on_named_threads() {
        let workers = RenderWorkers::spawn(1).unwrap();
        let name = workers
            .dispatch(|| Ok(thread::current().name().map(str::to_owned)))
            .recv()
            .unwrap();
        assert_eq!(name.as_deref(), Some("XianRenderWorker0"));
    }

    #[test]
    fn panics_are_reported_and_the_worker_survives() {
        let workers = RenderWorkers::spawn(1).unwrap();
        let failed = workers.dispatch(|| -> Result<()> { panic!("boom") });
        assert_eq!(failed.recv(), Err(RenderError::WorkerPanicked));
        assert_eq!(workers.dispatch(|| Ok(5)).recv(), Ok(5));
    }
}
