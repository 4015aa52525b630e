use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;
const TAKEN: u8 = 3;

/// ### English
/// One-shot, single-producer single-consumer value handoff used to join a dispatched job.
///
/// - No locks.
/// - The waiting thread is captured at construction; the sender `unpark()`s it.
///
/// ### 中文
/// 一次性（oneshot）的单生产者/单消费者值传递，用于等待已派发任务的结果。
///
/// - 无锁。
/// - 构造时记录等待线程，发送方完成后 `unpark()` 唤醒它。
pub(crate) struct OneShot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
    waiter: thread::Thread,
}

unsafe impl<T: Send> Send for OneShot<T> {}
unsafe impl<T: Send> Sync for OneShot<T> {}

impl<T> OneShot<T> {
    /// ### English
    /// Creates an empty slot whose receiver is the calling thread.
    ///
    /// ### 中文
    /// 创建一个空槽位，接收方为当前调用线程。
    #[inline]
    pub(crate) fn for_current_thread() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            waiter: thread::current(),
        }
    }

    /// ### English
    /// Sends the value. Returns `false` if it was already sent.
    ///
    /// ### 中文
    /// 发送值；若已发送过则返回 `false`。
    #[inline]
    pub(crate) fn send(&self, value: T) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        unsafe {
            (*self.value.get()).write(value);
        }
        self.state.store(READY, Ordering::Release);
        self.waiter.unpark();
        true
    }

    #[inline]
    pub(crate) fn try_recv(&self) -> Option<T> {
        self.state
            .compare_exchange(READY, TAKEN, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| unsafe { (*self.value.get()).assume_init_read() })
    }

    /// ### English
    /// Parks until the value arrives. Must be called from the thread that created the slot.
    ///
    /// ### 中文
    /// 阻塞（park）直到值到达。必须在创建该槽位的线程上调用。
    pub(crate) fn recv(&self) -> T {
        debug_assert_eq!(thread::current().id(), self.waiter.id());
        loop {
            if let Some(value) = self.try_recv() {
                return value;
            }
            thread::park();
        }
    }
}

impl<T> Drop for OneShot<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            unsafe {
                drop((*self.value.get()).assume_init_read());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn recv_blocks_until_another_thread_sends() {
        let slot = Arc::new(OneShot::for_current_thread());
        let sender = slot.clone();
        let handle = thread::spawn(move || assert!(sender.send(42u32)));
        assert_eq!(slot.recv(), 42);
        handle.join().unwrap();
        assert_eq!(slot.try_recv(), None);
    }

    #[test]
    fn second_send_is_rejected() {
        let slot = OneShot::for_current_thread();
        assert!(slot.send(String::from("first")));
        assert!(!slot.send(String::from("second")));
        assert_eq!(slot.try_recv().as_deref(), Some("first"));
    }
}
