use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

use crate::valve::{format_mmss, DisplaySurface, ValveState};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedUi = Arc<RwLock<UiState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// The display surface: everything the control page renders. The
/// coordinator mutates `toggle_open` and `countdown_text` through
/// [`UiPanel`]; the gateway flips `mqtt_connected` and appends events.
pub struct UiState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub toggle_open: bool,
    pub countdown_text: String,
    pub events: VecDeque<UiEvent>,
}

#[derive(Clone, Serialize)]
pub struct UiEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Valve,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub valve_open: bool,
    pub remaining_secs: u32,
    pub toggle_open: bool,
    pub countdown: String,
    pub events: Vec<UiEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl UiState {
    pub fn new(open_secs: u32) -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            toggle_open: false,
            countdown_text: format_mmss(open_secs),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Set the toggle visual and log the change. Called both by the
    /// coordinator (remote/expiry transitions) and by the input layer for a
    /// local toggle, which reflects itself before the coordinator runs.
    pub fn apply_toggle(&mut self, open: bool) {
        self.toggle_open = open;
        let state_str = if open { "ON" } else { "OFF" };
        self.push_event(EventKind::Valve, format!("valve set {state_str}"));
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot around the canonical
    /// valve state.
    pub fn to_status(&self, valve: ValveState) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            valve_open: valve.is_open,
            remaining_secs: valve.remaining_secs,
            toggle_open: self.toggle_open,
            countdown: self.countdown_text.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(UiEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ---------------------------------------------------------------------------
// Display seam
// ---------------------------------------------------------------------------

/// The coordinator's handle onto the shared UI state. Each call takes the
/// surface's write lock for just the duration of the mutation.
pub struct UiPanel {
    ui: SharedUi,
}

impl UiPanel {
    pub fn new(ui: SharedUi) -> Self {
        Self { ui }
    }
}

impl DisplaySurface for UiPanel {
    fn set_toggle(&mut self, open: bool) {
        self.ui.write().apply_toggle(open);
    }

    fn set_countdown(&mut self, text: &str) {
        self.ui.write().countdown_text = text.to_string();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
