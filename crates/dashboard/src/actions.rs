//! User actions: guards, pending intents and the `/action` payload.
//!
//! An action is first planned against the current view (pure, no I/O), then
//! its intents are recorded so the next poll cannot flip the control back,
//! and only then is the payload sent to the device.

use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::client::{ClientError, DeviceClient};
use crate::model::{ActionPayload, Reading};
use crate::reconciler::{AutoMode, Intent, MergedState};
use crate::schedule::{SecuritySchedule, TimeOfDay};
use crate::state::SharedState;
use crate::view::TANK_CRITICAL_LEVEL;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UserAction {
    SetAuto { mode: AutoMode, enabled: bool },
    /// Start or stop the irrigation pump; the duration is used when starting.
    ToggleIrrigation { duration_min: u32 },
    ToggleTankFill,
    ToggleSecurity,
    ToggleLuminary,
    SaveSchedule { start: TimeOfDay, end: TimeOfDay },
    AcknowledgeAlarm,
}

impl UserAction {
    pub fn name(&self) -> &'static str {
        match self {
            UserAction::SetAuto { .. } => "set_auto",
            UserAction::ToggleIrrigation { .. } => "toggle_irrigation",
            UserAction::ToggleTankFill => "toggle_tank_fill",
            UserAction::ToggleSecurity => "toggle_security",
            UserAction::ToggleLuminary => "toggle_luminary",
            UserAction::SaveSchedule { .. } => "save_schedule",
            UserAction::AcknowledgeAlarm => "acknowledge_alarm",
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no device data received yet")]
    NoView,

    #[error("device has not completed its first measurement")]
    Startup,

    #[error("tank level is critical")]
    TankCritical,

    #[error("tank sensor error")]
    TankSensorError,

    #[error("device rejected the action: {0}")]
    Device(#[from] ClientError),
}

impl ActionError {
    /// Refused locally; nothing was sent.
    pub fn is_refusal(&self) -> bool {
        !matches!(self, ActionError::Device(_))
    }
}

/// What an action records and sends.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub intents: Vec<Intent>,
    pub payload: ActionPayload,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

pub fn plan(action: &UserAction, view: Option<&MergedState>) -> Result<Plan, ActionError> {
    let mut payload = ActionPayload::default();
    let mut intents = Vec::new();

    match *action {
        UserAction::SetAuto { mode, enabled } => {
            set_auto(&mut payload, mode, enabled);
            intents.push(Intent::Auto(mode, enabled));
        }

        UserAction::ToggleIrrigation { duration_min } => {
            let view = actuator_view(view)?;
            let turn_on = !view.actuators.irrigation_pump;
            if turn_on {
                match view.readings.tank_level {
                    Reading::SensorError => return Err(ActionError::TankSensorError),
                    Reading::Value(v) if v < TANK_CRITICAL_LEVEL => {
                        return Err(ActionError::TankCritical)
                    }
                    Reading::Value(_) => {}
                }
                payload.duration = Some(duration_min);
            }
            payload.force_irrigation = Some(turn_on);
        }

        UserAction::ToggleTankFill => {
            let view = actuator_view(view)?;
            let turn_on = !view.actuators.tank_pump;
            if turn_on && view.readings.tank_level.is_error() {
                return Err(ActionError::TankSensorError);
            }
            payload.force_tank = Some(turn_on);
        }

        UserAction::ToggleSecurity => {
            let view = actuator_view(view)?;
            payload.security = Some(!view.actuators.security);
            manual_override(view, AutoMode::Security, &mut payload, &mut intents);
        }

        UserAction::ToggleLuminary => {
            let view = actuator_view(view)?;
            payload.force_luminary = Some(!view.actuators.luminary);
            manual_override(view, AutoMode::Luminary, &mut payload, &mut intents);
        }

        UserAction::SaveSchedule { start, end } => {
            payload.security_start = Some(start);
            payload.security_end = Some(end);
            intents.push(Intent::Schedule(SecuritySchedule::new(start, end)));
        }

        UserAction::AcknowledgeAlarm => {
            payload.clear_alarm = Some(true);
        }
    }

    Ok(Plan { intents, payload })
}

/// Actuator toggles need a view with a real measurement.
fn actuator_view(view: Option<&MergedState>) -> Result<&MergedState, ActionError> {
    let view = view.ok_or(ActionError::NoView)?;
    if view.is_startup() {
        return Err(ActionError::Startup);
    }
    Ok(view)
}

/// Switching an actuator by hand turns its auto mode off first.
fn manual_override(
    view: &MergedState,
    mode: AutoMode,
    payload: &mut ActionPayload,
    intents: &mut Vec<Intent>,
) {
    if view.auto_modes.get(mode) {
        set_auto(payload, mode, false);
        intents.push(Intent::Auto(mode, false));
    }
}

fn set_auto(payload: &mut ActionPayload, mode: AutoMode, enabled: bool) {
    let slot = match mode {
        AutoMode::Irrigation => &mut payload.irrigation_auto,
        AutoMode::Tank => &mut payload.tank_auto,
        AutoMode::Security => &mut payload.security_auto,
        AutoMode::Luminary => &mut payload.luminary_auto,
    };
    *slot = Some(enabled);
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Plan, record and send a user action, then refresh the status.
pub async fn submit(
    shared: &SharedState,
    client: &dyn DeviceClient,
    action: UserAction,
) -> Result<(), ActionError> {
    let plan = {
        let mut st = shared.write().await;
        let plan = plan(&action, st.reconciler.current())?;
        let now = Instant::now();
        for intent in &plan.intents {
            st.reconciler.record_pending_intent(*intent, now);
        }
        plan
    };

    if let Err(e) = client.submit_action(&plan.payload).await {
        warn!(action = action.name(), "action failed: {e}");
        let mut st = shared.write().await;
        for intent in &plan.intents {
            // A newer action may have replaced the intent meanwhile.
            if st.reconciler.pending_intent(intent.field()) == Some(intent) {
                st.reconciler.cancel_pending_intent(intent.field());
            }
        }
        st.record_error(format!("{} failed: {e}", action.name()));
        return Err(ActionError::Device(e));
    }

    info!(action = action.name(), "action submitted");
    let seq = {
        let mut st = shared.write().await;
        st.record_action(format!("{} submitted", action.name()));
        st.reconciler.begin_request()
    };

    // Confirm quickly instead of waiting for the next status tick.
    match client.fetch_status().await {
        Ok(status) => {
            shared.write().await.apply_status(seq, status);
        }
        Err(e) => warn!(action = action.name(), "status refresh after action failed: {e}"),
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
