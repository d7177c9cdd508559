//! Response timer.
//!
//! A single background thread tracks at most one deadline. When it expires
//! the callback receives the id the deadline was armed with; the session
//! turns that into a message on its own queue, so the timer never touches
//! session state directly.

use log::trace;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Default)]
struct TimerState {
    deadline: Option<(u64, Instant)>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    changed: Condvar,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One-shot, re-armable timer running on its own thread.
pub struct ResponseTimer {
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

impl ResponseTimer {
    /// Spawn the timer thread. `on_fire` runs on that thread.
    pub fn spawn<F>(on_fire: F) -> std::io::Result<Self>
    where
        F: Fn(u64) + Send + 'static,
    {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            changed: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("holuxlog-timer".into())
            .spawn(move || run(&thread_shared, &on_fire))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Arm the timer, replacing any previous deadline.
    pub fn start(&self, id: u64, timeout: Duration) {
        trace!("Response timer {id} armed for {timeout:?}");
        self.shared.lock().deadline = Some((id, Instant::now() + timeout));
        self.shared.changed.notify_all();
    }

    /// Disarm the timer.
    pub fn cancel(&self) {
        self.shared.lock().deadline = None;
        self.shared.changed.notify_all();
    }

    /// Id of the armed deadline, if any.
    pub fn armed(&self) -> Option<u64> {
        self.shared.lock().deadline.map(|(id, _)| id)
    }
}

impl Drop for ResponseTimer {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.changed.notify_all();
        if let Some(thread) = self.thread.take() {
            // the last owner may be dropped from inside the callback
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

fn run(shared: &TimerShared, on_fire: &dyn Fn(u64)) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            None => {
                state = shared
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            },
            Some((id, at)) => {
                let now = Instant::now();
                if now >= at {
                    state.deadline = None;
                    drop(state);
                    trace!("Response timer {id} fired");
                    on_fire(id);
                    state = shared.lock();
                } else {
                    state = shared
                        .changed
                        .wait_timeout(state, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            },
        }
    }
}
