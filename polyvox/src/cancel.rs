// Cooperative cancellation for long searches.
//
// A `CancelToken` is a shared flag plus an optional deadline. The search and
// the applier poll `is_cancelled` at every backtracking step and candidate
// trial and unwind with `GenerationError::Timeout`. Clones share the flag, so
// another thread (a timer, a signal handler, a UI) can stop a running
// generation by calling `cancel` on its own clone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Also report cancellation once `timeout` has elapsed from now.
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Spawn a timer thread that cancels this token after `timeout`.
    pub fn cancel_after(&self, timeout: Duration) -> thread::JoinHandle<()> {
        let flag = Arc::clone(&self.flag);
        thread::spawn(move || {
            thread::sleep(timeout);
            flag.store(true, Ordering::Relaxed);
        })
    }
}
