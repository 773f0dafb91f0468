//! Display model derived from the merged state: what each metric, button
//! and indicator shows, plus the chart series built from history.

use serde::Serialize;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

use crate::model::{HistoryRecord, MeasurementTime, Reading, SystemStatus, TimeBasis};
use crate::reconciler::MergedState;

/// Below this tank level (%) manual irrigation is refused.
pub const TANK_CRITICAL_LEVEL: f64 = 20.0;
/// At or above this tank level (%) the tank counts as full.
pub const TANK_FULL_LEVEL: f64 = 95.0;
/// A rise of more than this many points between two samples is a fill.
const TANK_FILL_DELTA: f64 = 10.0;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricDisplay {
    /// Device still starting up, no measurement yet.
    Placeholder,
    /// Sensor reported the error sentinel.
    Error,
    Value { value: f64, text: String },
}

impl MetricDisplay {
    fn of(reading: Reading, startup: bool, decimals: usize) -> Self {
        if startup {
            return MetricDisplay::Placeholder;
        }
        match reading {
            Reading::SensorError => MetricDisplay::Error,
            Reading::Value(value) => MetricDisplay::Value {
                value,
                text: format!("{value:.decimals$}"),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tank, buttons, indicators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TankStatus {
    Startup,
    SensorError,
    Filling,
    Full,
    Critical,
    Normal,
}

impl TankStatus {
    fn of(view: &MergedState) -> Self {
        if view.is_startup() {
            return TankStatus::Startup;
        }
        match view.readings.tank_level {
            Reading::SensorError => TankStatus::SensorError,
            Reading::Value(_) if view.actuators.tank_pump => TankStatus::Filling,
            Reading::Value(v) if v >= TANK_FULL_LEVEL => TankStatus::Full,
            Reading::Value(v) if v < TANK_CRITICAL_LEVEL => TankStatus::Critical,
            Reading::Value(_) => TankStatus::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonLabel {
    On,
    Off,
    Waiting,
    Low,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ButtonState {
    pub enabled: bool,
    pub label: ButtonLabel,
}

impl ButtonState {
    fn switch(on: bool, startup: bool) -> Self {
        if startup {
            return Self {
                enabled: false,
                label: ButtonLabel::Waiting,
            };
        }
        Self {
            enabled: true,
            label: if on { ButtonLabel::On } else { ButtonLabel::Off },
        }
    }

    /// Low or failed tank readings only block starting; a running pump
    /// can always be stopped.
    fn irrigation(view: &MergedState) -> Self {
        let on = view.actuators.irrigation_pump;
        match view.readings.tank_level {
            _ if view.is_startup() => Self::switch(false, true),
            _ if on => Self::switch(true, false),
            Reading::SensorError => Self {
                enabled: false,
                label: ButtonLabel::Error,
            },
            Reading::Value(v) if v < TANK_CRITICAL_LEVEL => Self {
                enabled: false,
                label: ButtonLabel::Low,
            },
            Reading::Value(_) => Self::switch(false, false),
        }
    }

    fn tank_fill(view: &MergedState) -> Self {
        let on = view.actuators.tank_pump;
        if !view.is_startup() && !on && view.readings.tank_level.is_error() {
            return Self {
                enabled: false,
                label: ButtonLabel::Error,
            };
        }
        Self::switch(on, view.is_startup())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Buttons {
    pub irrigation: ButtonState,
    pub tank: ButtonState,
    pub security: ButtonState,
    pub luminary: ButtonState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Idle,
    Active,
    Alarm,
    Error,
}

/// Top-level connection badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionIndicator {
    Connected,
    Alert,
    SensorError,
    Alarm,
    Disconnected,
}

impl ConnectionIndicator {
    pub fn of(status: Option<SystemStatus>, link_up: bool) -> Self {
        match (link_up, status) {
            (false, _) | (true, None) => ConnectionIndicator::Disconnected,
            (true, Some(SystemStatus::Connected)) => ConnectionIndicator::Connected,
            (true, Some(SystemStatus::Alert)) => ConnectionIndicator::Alert,
            (true, Some(SystemStatus::SensorError)) => ConnectionIndicator::SensorError,
            (true, Some(SystemStatus::Alarm)) => ConnectionIndicator::Alarm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Indicators {
    pub irrigation: Indicator,
    pub tank: Indicator,
    pub security: Indicator,
    pub luminary: Indicator,
}

fn active(on: bool) -> Indicator {
    if on {
        Indicator::Active
    } else {
        Indicator::Idle
    }
}

// ---------------------------------------------------------------------------
// Display model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayModel {
    pub startup: bool,
    pub temperature: MetricDisplay,
    pub humidity: MetricDisplay,
    pub soil_moisture: MetricDisplay,
    pub light: MetricDisplay,
    pub tank_level: MetricDisplay,
    pub tank: TankStatus,
    pub buttons: Buttons,
    pub indicators: Indicators,
}

impl DisplayModel {
    pub fn of(view: &MergedState) -> Self {
        let startup = view.is_startup();
        let r = &view.readings;
        let a = &view.actuators;

        let irrigation_indicator = match ButtonState::irrigation(view).label {
            ButtonLabel::Error | ButtonLabel::Low => Indicator::Error,
            _ if startup => Indicator::Idle,
            _ => active(a.irrigation_pump),
        };

        Self {
            startup,
            temperature: MetricDisplay::of(r.temperature, startup, 1),
            humidity: MetricDisplay::of(r.humidity, startup, 0),
            soil_moisture: MetricDisplay::of(r.soil_moisture, startup, 0),
            light: MetricDisplay::of(r.light, startup, 0),
            tank_level: MetricDisplay::of(r.tank_level, startup, 0),
            tank: TankStatus::of(view),
            buttons: Buttons {
                irrigation: ButtonState::irrigation(view),
                tank: ButtonState::tank_fill(view),
                security: ButtonState::switch(a.security, startup),
                luminary: ButtonState::switch(a.luminary, startup),
            },
            indicators: Indicators {
                irrigation: irrigation_indicator,
                tank: active(a.tank_pump),
                security: if view.status == SystemStatus::Alarm {
                    Indicator::Alarm
                } else {
                    active(a.security)
                },
                luminary: active(a.luminary),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Chart series
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub at: Option<OffsetDateTime>,
    pub temperature: f64,
    pub humidity: f64,
    pub soil_moisture: f64,
    pub tank_level: f64,
}

/// Wall-clock time of a device timestamp, seen from `client_now`.
pub fn point_time(
    timestamp: u64,
    device_now: MeasurementTime,
    client_now: OffsetDateTime,
) -> Option<OffsetDateTime> {
    match device_now.basis {
        TimeBasis::Epoch => {
            let nanos = timestamp as i128 * 1_000_000;
            OffsetDateTime::from_unix_timestamp_nanos(nanos)
                .ok()
                .map(|t| t.to_offset(client_now.offset()))
        }
        TimeBasis::UptimeMillis => {
            let age_ms = device_now.millis.saturating_sub(timestamp);
            let age = Duration::milliseconds(i64::try_from(age_ms).ok()?);
            client_now.checked_sub(age)
        }
    }
}

/// One point per history record. Sensor errors and missing values chart as 0.
pub fn chart_series(
    history: &[HistoryRecord],
    device_now: MeasurementTime,
    client_now: OffsetDateTime,
) -> Vec<ChartPoint> {
    let label_format = format_description!("[hour]:[minute]");
    history
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let at = rec
                .timestamp
                .and_then(|ts| point_time(ts, device_now, client_now));
            let label = at
                .and_then(|t| t.format(label_format).ok())
                .unwrap_or_else(|| format!("T-{}", history.len() - i));
            ChartPoint {
                label,
                at,
                temperature: charted(rec.temp),
                humidity: charted(rec.humidity),
                soil_moisture: charted(rec.soil),
                tank_level: charted(rec.tank),
            }
        })
        .collect()
}

fn charted(reading: Option<Reading>) -> f64 {
    reading.map(Reading::charted).unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Last tank fill
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FillAge {
    Recent,
    Minutes(u64),
    Hours(u64),
}

/// Age of the most recent tank fill found in `history`, measured against
/// the device's own clock.
pub fn last_fill(history: &[HistoryRecord], device_now: MeasurementTime) -> Option<FillAge> {
    let filled = history
        .windows(2)
        .rposition(|w| charted(w[1].tank) - charted(w[0].tank) > TANK_FILL_DELTA)?;
    let ts = history[filled + 1].timestamp?;

    let age_ms = device_now.millis.saturating_sub(ts);
    let minutes = age_ms / 60_000;
    Some(match minutes {
        0 => FillAge::Recent,
        m if m < 60 => FillAge::Minutes(m),
        m => FillAge::Hours(m / 60),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
