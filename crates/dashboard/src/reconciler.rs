//! Merges polled device snapshots into one authoritative view while
//! respecting in-flight user edits.
//!
//! ## Pending intent state machine (per toggle field)
//!
//! ```text
//! Idle ──[user action]──▶ Pending ──[status confirms value]──▶ Idle
//!                          │  ▲                 (schedule only: timeout)
//!                          └──┘ another user action overwrites the value
//! ```
//!
//! While a field is `Pending`, incoming snapshots never overwrite the value
//! the user set. Responses carry a [`RequestSeq`] taken before the request
//! was sent so a slow, stale response cannot roll back a newer one.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::model::{
    DeviceSnapshot, HistoryRecord, MeasurementTime, Reading, StatusSnapshot, SystemStatus,
};
use crate::schedule::SecuritySchedule;

/// How long a saved schedule is shielded from polled values.
pub const SCHEDULE_INTENT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Toggle fields and intents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoMode {
    Irrigation,
    Tank,
    Security,
    Luminary,
}

impl AutoMode {
    pub const ALL: [AutoMode; 4] = [
        AutoMode::Irrigation,
        AutoMode::Tank,
        AutoMode::Security,
        AutoMode::Luminary,
    ];
}

/// A user-editable control whose value can be pending confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToggleField {
    Auto(AutoMode),
    SecuritySchedule,
}

impl ToggleField {
    pub fn as_str(self) -> &'static str {
        match self {
            ToggleField::Auto(AutoMode::Irrigation) => "irrigation_auto",
            ToggleField::Auto(AutoMode::Tank) => "tank_auto",
            ToggleField::Auto(AutoMode::Security) => "security_auto",
            ToggleField::Auto(AutoMode::Luminary) => "luminary_auto",
            ToggleField::SecuritySchedule => "security_schedule",
        }
    }
}

impl fmt::Display for ToggleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ToggleField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The value a user set on a toggle field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Auto(AutoMode, bool),
    Schedule(SecuritySchedule),
}

impl Intent {
    pub fn field(&self) -> ToggleField {
        match self {
            Intent::Auto(mode, _) => ToggleField::Auto(*mode),
            Intent::Schedule(_) => ToggleField::SecuritySchedule,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingIntent {
    pub intent: Intent,
    /// Only schedule saves expire; auto toggles wait for confirmation.
    pub expires_at: Option<Instant>,
}

/// Monotonic request number, taken before a fetch is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RequestSeq(u64);

// ---------------------------------------------------------------------------
// Merged view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Readings {
    pub temperature: Reading,
    pub humidity: Reading,
    pub soil_moisture: Reading,
    pub light: Reading,
    pub tank_level: Reading,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Actuators {
    pub irrigation_pump: bool,
    pub tank_pump: bool,
    pub security: bool,
    pub luminary: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutoModes {
    pub irrigation: bool,
    pub tank: bool,
    pub security: bool,
    pub luminary: bool,
}

impl AutoModes {
    pub fn get(&self, mode: AutoMode) -> bool {
        match mode {
            AutoMode::Irrigation => self.irrigation,
            AutoMode::Tank => self.tank,
            AutoMode::Security => self.security,
            AutoMode::Luminary => self.luminary,
        }
    }

    pub fn set(&mut self, mode: AutoMode, on: bool) {
        match mode {
            AutoMode::Irrigation => self.irrigation = on,
            AutoMode::Tank => self.tank = on,
            AutoMode::Security => self.security = on,
            AutoMode::Luminary => self.luminary = on,
        }
    }
}

/// The single current view of the device handed to the rendering layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergedState {
    pub readings: Readings,
    pub actuators: Actuators,
    pub auto_modes: AutoModes,
    pub status: SystemStatus,
    pub measured_at: MeasurementTime,
    pub schedule: Option<SecuritySchedule>,
    pub history: Vec<HistoryRecord>,
}

impl MergedState {
    /// No measurement yet: readings show placeholders, buttons are disabled.
    pub fn is_startup(&self) -> bool {
        self.measured_at.is_startup()
    }
}

/// What the rendering layer has to do after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refresh {
    pub startup: bool,
    /// First real measurement after a startup snapshot.
    pub left_startup: bool,
    pub redraw_history: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied(Refresh),
    /// Response older than one already applied; dropped.
    Stale,
    /// Status update before any full snapshot; nothing to merge into.
    NoView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HistoryMark {
    len: usize,
    last_timestamp: Option<u64>,
}

impl HistoryMark {
    fn of(history: &[HistoryRecord]) -> Self {
        Self {
            len: history.len(),
            last_timestamp: history.last().and_then(|r| r.timestamp),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct ViewModelReconciler {
    current: Option<MergedState>,
    pending: HashMap<ToggleField, PendingIntent>,
    rendered_history: Option<HistoryMark>,
    schedule_timeout: Duration,
    next_seq: u64,
    last_full_seq: Option<RequestSeq>,
    last_status_seq: Option<RequestSeq>,
}

impl Default for ViewModelReconciler {
    fn default() -> Self {
        Self::new(SCHEDULE_INTENT_TIMEOUT)
    }
}

impl ViewModelReconciler {
    pub fn new(schedule_timeout: Duration) -> Self {
        Self {
            current: None,
            pending: HashMap::new(),
            rendered_history: None,
            schedule_timeout,
            next_seq: 0,
            last_full_seq: None,
            last_status_seq: None,
        }
    }

    pub fn current(&self) -> Option<&MergedState> {
        self.current.as_ref()
    }

    /// Take the sequence number for a request about to be sent.
    pub fn begin_request(&mut self) -> RequestSeq {
        self.next_seq += 1;
        RequestSeq(self.next_seq)
    }

    // -- Merging ------------------------------------------------------------

    /// Replace the current view with a full snapshot. Fields missing from
    /// the payload keep their previous value and fields under a pending
    /// intent keep the user's value.
    pub fn apply_full_snapshot(
        &mut self,
        seq: RequestSeq,
        snapshot: DeviceSnapshot,
        now: Instant,
    ) -> MergeOutcome {
        self.expire_intents(now);

        if self.last_full_seq.is_some_and(|last| seq < last) {
            debug!(?seq, "dropping out-of-order full snapshot");
            return MergeOutcome::Stale;
        }
        // A newer status update already set actuator fields; keep those.
        let controls_superseded = self.last_status_seq.is_some_and(|last| seq < last);

        let was_startup = self.current.as_ref().map(MergedState::is_startup);
        let mut merged = self.current.clone().unwrap_or_default();

        let r = &mut merged.readings;
        overlay(&mut r.temperature, snapshot.temp);
        overlay(&mut r.humidity, snapshot.humidity);
        overlay(&mut r.soil_moisture, snapshot.soil_moisture);
        overlay(&mut r.light, snapshot.light);
        overlay(&mut r.tank_level, snapshot.tank_level);

        if let Some(millis) = snapshot.last_measurement_time {
            merged.measured_at = MeasurementTime::new(millis, snapshot.time_basis);
        }

        if !controls_superseded {
            let status = snapshot.status_part();
            merge_controls(&mut merged, &status);
            for (mode, value) in auto_values(&status) {
                merged.auto_modes.set(mode, value);
            }
        }

        let history_sent = snapshot.history.is_some();
        if let Some(history) = snapshot.history {
            merged.history = history;
        }

        self.shield_pending(&mut merged);

        let startup = merged.is_startup();
        let left_startup = was_startup == Some(true) && !startup;
        if left_startup {
            info!("first measurement received, leaving startup mode");
            self.rendered_history = None;
        }

        let redraw_history = history_sent && self.should_redraw_history(&merged.history);
        if redraw_history {
            self.rendered_history = Some(HistoryMark::of(&merged.history));
        }

        self.current = Some(merged);
        self.last_full_seq = Some(seq);

        MergeOutcome::Applied(Refresh {
            startup,
            left_startup,
            redraw_history,
        })
    }

    /// Copy actuator, auto-mode and status fields onto the current view.
    /// Readings and history are untouched. An auto-mode value that disagrees
    /// with a pending intent is not displayed until it matches.
    pub fn apply_status_update(
        &mut self,
        seq: RequestSeq,
        status: StatusSnapshot,
        now: Instant,
    ) -> MergeOutcome {
        self.expire_intents(now);

        let newest = self.last_full_seq.max(self.last_status_seq);
        if newest.is_some_and(|last| seq < last) {
            debug!(?seq, "dropping out-of-order status update");
            return MergeOutcome::Stale;
        }

        let Some(mut merged) = self.current.take() else {
            debug!("status update before first snapshot ignored");
            return MergeOutcome::NoView;
        };

        merge_controls(&mut merged, &status);
        for (mode, value) in auto_values(&status) {
            self.clear_pending_intent_if_confirmed(Intent::Auto(mode, value));
            merged.auto_modes.set(mode, value);
        }

        self.shield_pending(&mut merged);

        let startup = merged.is_startup();
        self.current = Some(merged);
        self.last_status_seq = Some(seq);

        MergeOutcome::Applied(Refresh {
            startup,
            left_startup: false,
            redraw_history: false,
        })
    }

    // -- Pending intents ----------------------------------------------------

    /// Mark a field as user-edited and not yet confirmed. The user's value
    /// is reflected in the current view immediately.
    pub fn record_pending_intent(&mut self, intent: Intent, now: Instant) {
        let expires_at = match intent {
            Intent::Schedule(_) => Some(now + self.schedule_timeout),
            Intent::Auto(..) => None,
        };
        let field = intent.field();
        debug!(%field, ?intent, "pending intent recorded");
        self.pending.insert(field, PendingIntent { intent, expires_at });

        if let Some(mut merged) = self.current.take() {
            self.shield_pending(&mut merged);
            self.current = Some(merged);
        }
    }

    /// Clear the intent for `confirmed.field()` only on an exact match.
    /// Returns whether an intent was cleared.
    pub fn clear_pending_intent_if_confirmed(&mut self, confirmed: Intent) -> bool {
        let field = confirmed.field();
        match self.pending.get(&field) {
            Some(p) if p.intent == confirmed => {
                self.pending.remove(&field);
                debug!(%field, "pending intent confirmed");
                true
            }
            _ => false,
        }
    }

    /// Drop an intent without confirmation (e.g. the submit failed).
    pub fn cancel_pending_intent(&mut self, field: ToggleField) -> Option<Intent> {
        self.pending.remove(&field).map(|p| p.intent)
    }

    pub fn pending_intent(&self, field: ToggleField) -> Option<&Intent> {
        self.pending.get(&field).map(|p| &p.intent)
    }

    pub fn pending_fields(&self) -> Vec<ToggleField> {
        let mut fields: Vec<ToggleField> = self.pending.keys().copied().collect();
        fields.sort_by_key(|f| f.as_str());
        fields
    }

    /// Remove intents whose timeout has passed.
    pub fn expire_intents(&mut self, now: Instant) {
        self.pending.retain(|field, p| match p.expires_at {
            Some(deadline) if now >= deadline => {
                debug!(%field, "pending intent expired");
                false
            }
            _ => true,
        });
    }

    // -- Redraw tracking ----------------------------------------------------

    /// True iff `history` differs from what was last rendered in length or
    /// in the timestamp of its last record.
    pub fn should_redraw_history(&self, history: &[HistoryRecord]) -> bool {
        match self.rendered_history {
            None => true,
            Some(mark) => mark != HistoryMark::of(history),
        }
    }

    fn shield_pending(&self, merged: &mut MergedState) {
        for p in self.pending.values() {
            match p.intent {
                Intent::Auto(mode, value) => merged.auto_modes.set(mode, value),
                Intent::Schedule(schedule) => merged.schedule = Some(schedule),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn overlay<T>(slot: &mut T, incoming: Option<T>) {
    if let Some(v) = incoming {
        *slot = v;
    }
}

/// Actuators, status and schedule. Auto modes go through the intent check.
fn merge_controls(merged: &mut MergedState, status: &StatusSnapshot) {
    let a = &mut merged.actuators;
    overlay(&mut a.irrigation_pump, status.pump);
    overlay(&mut a.tank_pump, status.tank_pump);
    overlay(&mut a.security, status.security);
    overlay(&mut a.luminary, status.luminary);
    overlay(&mut merged.status, status.status);

    match (status.security_start, status.security_end) {
        (Some(start), Some(end)) => merged.schedule = Some(SecuritySchedule::new(start, end)),
        (Some(start), None) => {
            if let Some(s) = merged.schedule.as_mut() {
                s.start = start;
            }
        }
        (None, Some(end)) => {
            if let Some(s) = merged.schedule.as_mut() {
                s.end = end;
            }
        }
        (None, None) => {}
    }
}

fn auto_values(status: &StatusSnapshot) -> Vec<(AutoMode, bool)> {
    AutoMode::ALL
        .into_iter()
        .filter_map(|mode| {
            let v = match mode {
                AutoMode::Irrigation => status.irrigation_auto,
                AutoMode::Tank => status.tank_auto,
                AutoMode::Security => status.security_auto,
                AutoMode::Luminary => status.luminary_auto,
            };
            v.map(|v| (mode, v))
        })
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
