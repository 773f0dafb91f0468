use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::Config;
use crate::model::{DeviceSnapshot, PollingConfig, StatusSnapshot};
use crate::reconciler::{MergeOutcome, MergedState, RequestSeq, ToggleField, ViewModelReconciler};
use crate::view::{chart_series, last_fill, ChartPoint, ConnectionIndicator, DisplayModel, FillAge};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<DashboardState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct DashboardState {
    pub started_at: Instant,
    pub reconciler: ViewModelReconciler,
    /// False after a failed full poll, true again after the next success.
    pub link_up: bool,
    /// Bumped whenever the reconciler signals a history redraw.
    pub history_revision: u64,
    pub periods: PollPeriods,
    pub utc_offset: UtcOffset,
    pub events: VecDeque<DashboardEvent>,
}

/// Current polling periods; the device may announce new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPeriods {
    pub full: Duration,
    pub status: Duration,
    /// Re-check delay while status polling is paused.
    pub paused_recheck: Duration,
}

#[derive(Clone, Serialize)]
pub struct DashboardEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Snapshot,
    Status,
    Action,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ViewResponse {
    pub uptime_secs: u64,
    pub link_up: bool,
    pub connection: ConnectionIndicator,
    pub history_revision: u64,
    pub pending: Vec<ToggleField>,
    pub view: Option<ViewBody>,
}

#[derive(Serialize)]
pub struct ViewBody {
    pub state: MergedState,
    pub display: DisplayModel,
    pub chart: Vec<ChartPoint>,
    pub last_fill: Option<FillAge>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl DashboardState {
    pub fn new(cfg: &Config) -> Self {
        Self {
            started_at: Instant::now(),
            reconciler: ViewModelReconciler::new(cfg.schedule_intent_timeout()),
            link_up: false,
            history_revision: 0,
            periods: PollPeriods {
                full: cfg.server_polling_interval(),
                status: cfg.status_polling_interval(),
                paused_recheck: cfg.status_backoff(),
            },
            utc_offset: cfg.utc_offset(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Merge a full snapshot and adopt any polling periods it announces.
    pub fn apply_snapshot(&mut self, seq: RequestSeq, snapshot: DeviceSnapshot) -> MergeOutcome {
        let polling = snapshot.config;
        let history_len = snapshot.history.as_ref().map(Vec::len);

        let outcome = self
            .reconciler
            .apply_full_snapshot(seq, snapshot, Instant::now());
        self.link_up = true;

        if let MergeOutcome::Applied(refresh) = outcome {
            if refresh.redraw_history {
                self.history_revision += 1;
            }
            if refresh.left_startup {
                self.record_system("first measurement received".to_string());
            }
            if let Some(polling) = polling {
                self.adopt_periods(polling);
            }
            let mut detail = match history_len {
                Some(n) => format!("snapshot applied ({n} history points)"),
                None => "snapshot applied (no history)".to_string(),
            };
            if refresh.startup {
                detail.push_str(", device starting up");
            }
            self.push_event(EventKind::Snapshot, detail);
        }
        outcome
    }

    pub fn apply_status(&mut self, seq: RequestSeq, status: StatusSnapshot) -> MergeOutcome {
        let outcome = self
            .reconciler
            .apply_status_update(seq, status, Instant::now());
        if matches!(outcome, MergeOutcome::Applied(_)) {
            self.push_event(EventKind::Status, "status merged".to_string());
        }
        outcome
    }

    /// A full poll failed: show the connection as degraded.
    pub fn record_link_down(&mut self, detail: String) {
        if self.link_up {
            warn!("device link lost");
        }
        self.link_up = false;
        self.record_error(detail);
    }

    /// Record a user action forwarded to the device.
    pub fn record_action(&mut self, detail: String) {
        self.push_event(EventKind::Action, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable view for the rendering layer.
    pub fn to_view(&mut self) -> ViewResponse {
        self.reconciler.expire_intents(Instant::now());
        let client_now = OffsetDateTime::now_utc().to_offset(self.utc_offset);

        let current = self.reconciler.current();
        let view = current.map(|state| ViewBody {
            display: DisplayModel::of(state),
            chart: chart_series(&state.history, state.measured_at, client_now),
            last_fill: last_fill(&state.history, state.measured_at),
            state: state.clone(),
        });

        ViewResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            link_up: self.link_up,
            connection: ConnectionIndicator::of(current.map(|s| s.status), self.link_up),
            history_revision: self.history_revision,
            pending: self.reconciler.pending_fields(),
            view,
        }
    }

    pub fn recent_events(&self) -> Vec<DashboardEvent> {
        self.events.iter().rev().cloned().collect()
    }

    fn adopt_periods(&mut self, polling: PollingConfig) {
        let full = polling
            .server_polling_interval
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        let status = polling
            .status_polling_interval
            .filter(|s| *s > 0)
            .map(Duration::from_secs);

        let before = self.periods;
        if let Some(full) = full {
            self.periods.full = full;
        }
        if let Some(status) = status {
            self.periods.status = status;
        }
        if self.periods != before {
            info!(
                full_sec = self.periods.full.as_secs(),
                status_sec = self.periods.status.as_secs(),
                "polling periods updated by device"
            );
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(DashboardEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reading;

    fn state() -> DashboardState {
        DashboardState::new(&Config::default())
    }

    fn snapshot(measured: u64) -> DeviceSnapshot {
        DeviceSnapshot {
            tank_level: Some(Reading::Value(60.0)),
            status: Some(crate::model::SystemStatus::Connected),
            last_measurement_time: Some(measured),
            history: Some(vec![]),
            ..DeviceSnapshot::default()
        }
    }

    #[test]
    fn empty_state_has_no_view() {
        let mut st = state();
        let resp = st.to_view();
        assert!(resp.view.is_none());
        assert_eq!(resp.connection, ConnectionIndicator::Disconnected);
    }

    #[test]
    fn snapshot_marks_link_up_and_bumps_revision() {
        let mut st = state();
        let seq = st.reconciler.begin_request();
        st.apply_snapshot(seq, snapshot(5_000));

        assert!(st.link_up);
        assert_eq!(st.history_revision, 1);
        let resp = st.to_view();
        assert_eq!(resp.connection, ConnectionIndicator::Connected);
        assert!(resp.view.is_some());

        // Same (empty) history again: no new revision.
        let seq = st.reconciler.begin_request();
        st.apply_snapshot(seq, snapshot(6_000));
        assert_eq!(st.history_revision, 1);
    }

    #[test]
    fn device_announced_periods_adopted() {
        let mut st = state();
        let mut snap = snapshot(5_000);
        snap.config = Some(PollingConfig {
            server_polling_interval: Some(12),
            status_polling_interval: Some(0),
        });
        let seq = st.reconciler.begin_request();
        st.apply_snapshot(seq, snap);

        assert_eq!(st.periods.full, Duration::from_secs(12));
        assert_eq!(st.periods.status, Config::default().status_polling_interval());
    }

    #[test]
    fn link_down_degrades_connection() {
        let mut st = state();
        let seq = st.reconciler.begin_request();
        st.apply_snapshot(seq, snapshot(5_000));
        st.record_link_down("fetch failed".into());

        assert_eq!(st.to_view().connection, ConnectionIndicator::Disconnected);
        assert_eq!(st.recent_events()[0].kind, EventKind::Error);
    }

    #[test]
    fn event_ring_buffer_is_bounded() {
        let mut st = state();
        for i in 0..(MAX_EVENTS + 10) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.recent_events()[0].detail, format!("event {}", MAX_EVENTS + 9));
    }
}
