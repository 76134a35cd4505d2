//! The one countdown tick source: a lazily-spawned task that delivers one
//! tick per second into a channel while armed. Pausing stops delivery
//! without tearing the task down; re-arming resumes it with a fresh
//! one-second cadence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

struct Shared {
    armed: AtomicBool,
    // Bumped on every arm so a tick already in flight across a
    // pause/re-arm pair is discarded instead of shortening the fresh
    // countdown's first second.
    generation: AtomicU64,
    resume: Notify,
}

pub struct CountdownTimer {
    shared: Arc<Shared>,
    ticks: mpsc::UnboundedSender<()>,
    started: bool,
}

impl CountdownTimer {
    /// Returns the timer handle plus the receiving end of its tick stream.
    /// Nothing runs until the first `arm()`.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timer = Self {
            shared: Arc::new(Shared {
                armed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                resume: Notify::new(),
            }),
            ticks: tx,
            started: false,
        };
        (timer, rx)
    }

    /// Start (first call) or resume tick delivery. Idempotent.
    pub fn arm(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.armed.store(true, Ordering::SeqCst);
        if self.started {
            self.shared.resume.notify_one();
        } else {
            self.started = true;
            tokio::spawn(run_ticker(self.shared.clone(), self.ticks.clone()));
        }
    }

    /// Stop tick delivery, keeping the task parked for the next arm.
    /// Idempotent.
    pub fn pause(&mut self) {
        self.shared.armed.store(false, Ordering::SeqCst);
    }
}

async fn run_ticker(shared: Arc<Shared>, ticks: mpsc::UnboundedSender<()>) {
    loop {
        while !shared.armed.load(Ordering::SeqCst) {
            shared.resume.notified().await;
        }
        let generation = shared.generation.load(Ordering::SeqCst);
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first tick of a fresh interval completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if !shared.armed.load(Ordering::SeqCst)
                || shared.generation.load(Ordering::SeqCst) != generation
            {
                break;
            }
            if ticks.send(()).is_err() {
                // Coordinator gone; the process is shutting down.
                return;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn recv_tick(rx: &mut mpsc::UnboundedReceiver<()>) -> bool {
        timeout(Duration::from_secs(5), rx.recv()).await.is_ok()
    }

    #[tokio::test(start_paused = true)]
    async fn no_ticks_before_arm() {
        let (_timer, mut rx) = CountdownTimer::new();
        assert!(!recv_tick(&mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_second_while_armed() {
        let (mut timer, mut rx) = CountdownTimer::new();
        timer.arm();

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            assert!(recv_tick(&mut rx).await);
        }
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_delivery() {
        let (mut timer, mut rx) = CountdownTimer::new();
        timer.arm();
        assert!(recv_tick(&mut rx).await);

        timer.pause();
        assert!(!recv_tick(&mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_resumes_with_fresh_cadence() {
        let (mut timer, mut rx) = CountdownTimer::new();
        timer.arm();
        assert!(recv_tick(&mut rx).await);

        timer.pause();
        assert!(!recv_tick(&mut rx).await);

        timer.arm();
        assert!(recv_tick(&mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn arm_and_pause_are_idempotent() {
        let (mut timer, mut rx) = CountdownTimer::new();
        timer.pause();
        timer.arm();
        timer.arm();
        assert!(recv_tick(&mut rx).await);

        timer.pause();
        timer.pause();
        assert!(!recv_tick(&mut rx).await);
    }
}
