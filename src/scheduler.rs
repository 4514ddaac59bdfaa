use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info};

use crate::engine::ExecutionEngine;

/// Fires the engine's tick at a fixed delay on a dedicated thread. The loop
/// is sequential, so two ticks can never overlap and race on the same
/// mandate. The timer holds no business state; everything lives in the
/// injected engine.
pub struct Scheduler {
    engine: Arc<ExecutionEngine>,
    interval: Duration,
}

// Sleep in short slices so stop() takes effect promptly even with long
// intervals.
const STOP_POLL: Duration = Duration::from_millis(200);

impl Scheduler {
    pub fn new(engine: Arc<ExecutionEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub fn start(self) -> SchedulerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        info!("Scheduler starting, tick every {:?}", self.interval);

        let thread = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                self.engine.tick();

                let mut slept = Duration::ZERO;
                while slept < self.interval && !flag.load(Ordering::Relaxed) {
                    let step = STOP_POLL.min(self.interval - slept);
                    thread::sleep(step);
                    slept += step;
                }
            }
        });

        SchedulerHandle { stop, thread }
    }
}

pub struct SchedulerHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop and waits for the in-flight tick to finish. A tick
    /// always runs to completion over its due set.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.thread.join().is_err() {
            error!("Scheduler thread panicked");
        }
    }

    /// Blocks forever (until the scheduler thread exits). Used by the binary
    /// when running as a long-lived process.
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("Scheduler thread panicked");
        }
    }
}
