//! Periodic device polling: full snapshots and lightweight status updates.
//!
//! Two tasks share one cancellation token. The full poll runs immediately
//! and then every `periods.full`. The status poll first waits one period,
//! then polls only while [`should_poll_status`] allows it; otherwise it
//! sleeps the paused re-check delay and asks again.
//!
//! Periods are re-read from shared state before each sleep so intervals
//! announced by the device take effect on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::DeviceClient;
use crate::reconciler::MergeOutcome;
use crate::schedule::{should_poll_status, time_of_day_now, TimeOfDay};
use crate::state::{PollPeriods, SharedState};

/// Result of one status tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTick {
    Polled(MergeOutcome),
    /// Outside the polling window; nothing was fetched.
    Paused,
    Failed,
}

pub struct PollerHandle {
    cancel: CancellationToken,
    full: JoinHandle<()>,
    status: JoinHandle<()>,
}

impl PollerHandle {
    /// Cancel both tasks and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, task) in [("full", self.full), ("status", self.status)] {
            if let Err(e) = task.await {
                warn!(task = name, "poller task ended abnormally: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Start both polling tasks. They stop when `cancel` fires.
pub fn spawn(
    shared: SharedState,
    client: Arc<dyn DeviceClient>,
    cancel: CancellationToken,
) -> PollerHandle {
    let full = tokio::spawn(run_full(
        shared.clone(),
        Arc::clone(&client),
        cancel.clone(),
    ));
    let status = tokio::spawn(run_status(shared, client, cancel.clone()));
    PollerHandle {
        cancel,
        full,
        status,
    }
}

async fn run_full(shared: SharedState, client: Arc<dyn DeviceClient>, cancel: CancellationToken) {
    info!("full poller started");
    loop {
        poll_full_once(&shared, client.as_ref()).await;

        let period = shared.read().await.periods.full;
        if !wait(&cancel, period).await {
            break;
        }
    }
    info!("full poller stopped");
}

async fn run_status(
    shared: SharedState,
    client: Arc<dyn DeviceClient>,
    cancel: CancellationToken,
) {
    info!("status poller started");
    let mut delay = shared.read().await.periods.status;
    loop {
        if !wait(&cancel, delay).await {
            break;
        }

        let offset = shared.read().await.utc_offset;
        let tick = poll_status_once(&shared, client.as_ref(), time_of_day_now(offset)).await;

        if let StatusTick::Polled(outcome) = tick {
            debug!(?outcome, "status poll merged");
        }
        delay = next_delay(tick, shared.read().await.periods);
    }
    info!("status poller stopped");
}

/// Delay before the next status tick: the fixed re-check while paused,
/// otherwise the status period (failures retry at the same interval).
fn next_delay(tick: StatusTick, periods: PollPeriods) -> Duration {
    match tick {
        StatusTick::Paused => periods.paused_recheck,
        StatusTick::Polled(_) | StatusTick::Failed => periods.status,
    }
}

/// Sleep for `period` unless cancelled first. Returns false on cancellation.
async fn wait(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(period) => true,
    }
}

// ---------------------------------------------------------------------------
// Single ticks
// ---------------------------------------------------------------------------

/// Fetch `/data` and merge it. A failure marks the link as down.
pub async fn poll_full_once(shared: &SharedState, client: &dyn DeviceClient) {
    let seq = shared.write().await.reconciler.begin_request();

    match client.fetch_data().await {
        Ok(snapshot) => {
            let outcome = shared.write().await.apply_snapshot(seq, snapshot);
            debug!(?outcome, "full poll merged");
        }
        Err(e) => {
            warn!("full poll failed: {e}");
            shared
                .write()
                .await
                .record_link_down(format!("full poll failed: {e}"));
        }
    }
}

/// Fetch `/status` and merge it, unless polling is paused at `now`.
pub async fn poll_status_once(
    shared: &SharedState,
    client: &dyn DeviceClient,
    now: TimeOfDay,
) -> StatusTick {
    let seq = {
        let mut st = shared.write().await;
        let view = st.reconciler.current();
        let schedule = view.and_then(|v| v.schedule.as_ref());
        if !should_poll_status(view, now, schedule) {
            debug!(%now, "status polling paused");
            return StatusTick::Paused;
        }
        st.reconciler.begin_request()
    };

    match client.fetch_status().await {
        Ok(status) => StatusTick::Polled(shared.write().await.apply_status(seq, status)),
        Err(e) => {
            warn!("status poll failed: {e}");
            shared
                .write()
                .await
                .record_error(format!("status poll failed: {e}"));
            StatusTick::Failed
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
