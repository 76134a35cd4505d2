//! Valve state coordinator. Reconciles the three origins of state change
//! (local toggle, remote broker command, countdown expiry) into one
//! authoritative valve state.
//!
//! Every transition runs under a single lock that also covers the display
//! mutation; the resulting broker publish (if any) is handed off through a
//! channel after the lock is released, so the critical section never touches
//! network I/O and a collaborator callback can never re-enter the lock.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::countdown::CountdownTimer;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Who asked for a transition. Decides which side effects are suppressed:
/// a remote command must not be echoed back to the broker, and a local
/// toggle has already drawn its own visual state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    UserToggle,
    RemoteCommand,
    TimerExpiry,
}

/// The single authoritative valve state.
///
/// Invariants: `remaining_secs > 0` whenever open; `remaining_secs ==
/// open_secs` whenever closed (the countdown re-arms fresh on every close
/// rather than holding its last value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValveState {
    pub is_open: bool,
    pub remaining_secs: u32,
    open_secs: u32,
}

/// What a committed transition asks the caller to do. Display and timer
/// actions are applied while the lock is still held; the publish is issued
/// after release.
#[derive(Debug, Default, PartialEq, Eq)]
struct Effects {
    publish: Option<bool>,
    set_toggle: Option<bool>,
    set_countdown: Option<u32>,
    timer: Option<TimerCmd>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerCmd {
    Arm,
    Pause,
}

/// The coordinator's view of the panel: flip the toggle visual, rewrite the
/// countdown label. Implementations take their own exclusive access for the
/// duration of each call.
pub trait DisplaySurface: Send {
    fn set_toggle(&mut self, open: bool);
    fn set_countdown(&mut self, text: &str);
}

/// Render seconds as the `MM:SS` countdown label.
pub fn format_mmss(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

impl ValveState {
    pub fn new(open_secs: u32) -> Self {
        Self {
            is_open: false,
            remaining_secs: open_secs,
            open_secs,
        }
    }

    /// `CLOSED -> OPEN(open_secs)`. Returns `None` when already open: a
    /// duplicate request must not restart the countdown or re-publish.
    fn open(&mut self, origin: ChangeOrigin) -> Option<Effects> {
        if self.is_open {
            return None;
        }
        self.is_open = true;
        self.remaining_secs = self.open_secs;
        Some(Effects {
            publish: (origin != ChangeOrigin::RemoteCommand).then_some(true),
            set_toggle: (origin != ChangeOrigin::UserToggle).then_some(true),
            set_countdown: Some(self.remaining_secs),
            timer: Some(TimerCmd::Arm),
        })
    }

    /// `OPEN -> CLOSED`, countdown reset to full. `None` when already closed.
    fn close(&mut self, origin: ChangeOrigin) -> Option<Effects> {
        if !self.is_open {
            return None;
        }
        self.is_open = false;
        self.remaining_secs = self.open_secs;
        Some(Effects {
            publish: (origin != ChangeOrigin::RemoteCommand).then_some(false),
            set_toggle: (origin != ChangeOrigin::UserToggle).then_some(false),
            set_countdown: Some(self.remaining_secs),
            timer: Some(TimerCmd::Pause),
        })
    }

    /// One second elapsed. Reaching zero closes the valve with the full
    /// expiry side-effect set. A tick that lands after the valve closed
    /// (already queued when the close committed) is absorbed silently.
    fn tick(&mut self) -> Option<Effects> {
        if !self.is_open {
            return None;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            return self.close(ChangeOrigin::TimerExpiry);
        }
        Some(Effects {
            set_countdown: Some(self.remaining_secs),
            ..Effects::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

struct Inner<D> {
    valve: ValveState,
    timer: CountdownTimer,
    display: D,
}

pub struct ValveCoordinator<D: DisplaySurface> {
    inner: Mutex<Inner<D>>,
    publishes: mpsc::UnboundedSender<bool>,
}

impl<D: DisplaySurface> ValveCoordinator<D> {
    /// Build the coordinator around a display surface and the (not yet
    /// armed) countdown timer. The returned receiver carries requested
    /// state publishes (`true` = ON) for the network context to deliver.
    pub fn new(
        display: D,
        timer: CountdownTimer,
        open_secs: u32,
    ) -> (Self, mpsc::UnboundedReceiver<bool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            inner: Mutex::new(Inner {
                valve: ValveState::new(open_secs),
                timer,
                display,
            }),
            publishes: tx,
        };
        (coordinator, rx)
    }

    pub fn request_open(&self, origin: ChangeOrigin) {
        debug!(?origin, "open requested");
        self.apply(|valve| valve.open(origin));
    }

    pub fn request_close(&self, origin: ChangeOrigin) {
        debug!(?origin, "close requested");
        self.apply(|valve| valve.close(origin));
    }

    pub fn on_timer_tick(&self) {
        self.apply(ValveState::tick);
    }

    /// Snapshot of the canonical state.
    pub fn state(&self) -> ValveState {
        self.inner.lock().valve
    }

    /// Run one transition: commit state, arm/pause the timer, and mutate
    /// the display under the lock, then send the publish (if any) after the
    /// lock is released. The closure returns `None` for no-op requests.
    fn apply<F>(&self, transition: F)
    where
        F: FnOnce(&mut ValveState) -> Option<Effects>,
    {
        let publish = {
            let mut inner = self.inner.lock();
            let Some(fx) = transition(&mut inner.valve) else {
                return;
            };
            match fx.timer {
                // Pausing here, before the lock drops, guarantees the
                // countdown cannot fire for a valve that is already closed.
                Some(TimerCmd::Pause) => inner.timer.pause(),
                Some(TimerCmd::Arm) => inner.timer.arm(),
                None => {}
            }
            if let Some(open) = fx.set_toggle {
                inner.display.set_toggle(open);
            }
            if let Some(secs) = fx.set_countdown {
                inner.display.set_countdown(&format_mmss(secs));
            }
            fx.publish
        };
        if let Some(open) = publish {
            // Receiver only drops at shutdown.
            let _ = self.publishes.send(open);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
