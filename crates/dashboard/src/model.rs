//! Wire types exchanged with the device's `/data`, `/status` and `/action`
//! endpoints.
//!
//! Every field the device sends is optional here: a field missing from a
//! payload means "no change", never a decode failure.

use serde::{Deserialize, Serialize};

use crate::schedule::{lenient_time_of_day, TimeOfDay};

/// Value the firmware reports when a sensor could not be read.
pub const SENSOR_ERROR_SENTINEL: f64 = -999.0;

/// Measurement times above this are epoch millis; below, device uptime.
const EPOCH_THRESHOLD_MS: u64 = 10_000_000_000;

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// A single sensor reading: either a measurement or the firmware's
/// "sensor unavailable" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reading {
    Value(f64),
    SensorError,
}

impl Reading {
    pub fn value(self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(v),
            Reading::SensorError => None,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, Reading::SensorError)
    }

    /// Value for charting: sensor errors are drawn as zero.
    pub fn charted(self) -> f64 {
        self.value().unwrap_or(0.0)
    }
}

impl Default for Reading {
    /// A reading the device never sent is treated as unavailable.
    fn default() -> Self {
        Reading::SensorError
    }
}

impl From<f64> for Reading {
    fn from(v: f64) -> Self {
        if v == SENSOR_ERROR_SENTINEL {
            Reading::SensorError
        } else {
            Reading::Value(v)
        }
    }
}

// ---------------------------------------------------------------------------
// Device status
// ---------------------------------------------------------------------------

/// Overall device status as encoded by the firmware (0, 1, 2, 3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", rename_all = "snake_case")]
pub enum SystemStatus {
    #[default]
    Connected,
    Alert,
    Alarm,
    SensorError,
}

impl From<i64> for SystemStatus {
    fn from(code: i64) -> Self {
        match code {
            0 => SystemStatus::Connected,
            1 => SystemStatus::Alert,
            3 => SystemStatus::SensorError,
            _ => SystemStatus::Alarm,
        }
    }
}

// ---------------------------------------------------------------------------
// Measurement time
// ---------------------------------------------------------------------------

/// What a device timestamp is counted from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBasis {
    /// Milliseconds since the Unix epoch (RTC or NTP synced device).
    Epoch,
    /// Milliseconds since the device booted.
    #[default]
    #[serde(rename = "uptime")]
    UptimeMillis,
}

impl TimeBasis {
    /// Legacy magnitude heuristic for payloads that do not say.
    pub fn infer(millis: u64) -> Self {
        if millis > EPOCH_THRESHOLD_MS {
            TimeBasis::Epoch
        } else {
            TimeBasis::UptimeMillis
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MeasurementTime {
    pub basis: TimeBasis,
    pub millis: u64,
}

impl MeasurementTime {
    pub fn new(millis: u64, basis: Option<TimeBasis>) -> Self {
        Self {
            basis: basis.unwrap_or_else(|| TimeBasis::infer(millis)),
            millis,
        }
    }

    /// Zero means the device has not completed its first measurement yet.
    pub fn is_startup(&self) -> bool {
        self.millis == 0
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub temp: Option<Reading>,
    #[serde(default)]
    pub humidity: Option<Reading>,
    #[serde(default)]
    pub soil: Option<Reading>,
    #[serde(default)]
    pub tank: Option<Reading>,
    #[serde(default)]
    pub light: Option<Reading>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Polling periods announced by the device, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingConfig {
    pub server_polling_interval: Option<u64>,
    pub status_polling_interval: Option<u64>,
}

/// Response of `GET /data`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub temp: Option<Reading>,
    pub humidity: Option<Reading>,
    pub soil_moisture: Option<Reading>,
    pub light: Option<Reading>,
    pub tank_level: Option<Reading>,

    pub pump: Option<bool>,
    pub tank_pump: Option<bool>,
    pub security: Option<bool>,
    pub luminary: Option<bool>,

    pub irrigation_auto: Option<bool>,
    pub tank_auto: Option<bool>,
    pub security_auto: Option<bool>,
    pub luminary_auto: Option<bool>,

    pub status: Option<SystemStatus>,
    #[serde(default, deserialize_with = "lenient_time_of_day")]
    pub security_start: Option<TimeOfDay>,
    #[serde(default, deserialize_with = "lenient_time_of_day")]
    pub security_end: Option<TimeOfDay>,

    pub last_measurement_time: Option<u64>,
    pub time_basis: Option<TimeBasis>,
    pub config: Option<PollingConfig>,
    pub history: Option<Vec<HistoryRecord>>,
}

impl DeviceSnapshot {
    pub fn status_part(&self) -> StatusSnapshot {
        StatusSnapshot {
            pump: self.pump,
            tank_pump: self.tank_pump,
            security: self.security,
            luminary: self.luminary,
            irrigation_auto: self.irrigation_auto,
            tank_auto: self.tank_auto,
            security_auto: self.security_auto,
            luminary_auto: self.luminary_auto,
            security_start: self.security_start,
            security_end: self.security_end,
            status: self.status,
        }
    }
}

/// Response of `GET /status`: actuators, auto modes and status only.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub pump: Option<bool>,
    pub tank_pump: Option<bool>,
    pub security: Option<bool>,
    pub luminary: Option<bool>,

    pub irrigation_auto: Option<bool>,
    pub tank_auto: Option<bool>,
    pub security_auto: Option<bool>,
    pub luminary_auto: Option<bool>,

    #[serde(default, deserialize_with = "lenient_time_of_day")]
    pub security_start: Option<TimeOfDay>,
    #[serde(default, deserialize_with = "lenient_time_of_day")]
    pub security_end: Option<TimeOfDay>,
    pub status: Option<SystemStatus>,
}

/// Body of `POST /action`. Only the fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub irrigation_auto: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_irrigation: Option<bool>,
    /// Manual irrigation run time in minutes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tank_auto: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_tank: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_auto: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_start: Option<TimeOfDay>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_end: Option<TimeOfDay>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clear_alarm: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub luminary_auto: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_luminary: Option<bool>,
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Reading ------------------------------------------------------------

    #[test]
    fn sentinel_decodes_as_sensor_error() {
        let r: Reading = serde_json::from_str("-999").unwrap();
        assert_eq!(r, Reading::SensorError);
        let r: Reading = serde_json::from_str("-999.0").unwrap();
        assert_eq!(r, Reading::SensorError);
    }

    #[test]
    fn zero_is_a_valid_reading() {
        let r: Reading = serde_json::from_str("0").unwrap();
        assert_eq!(r, Reading::Value(0.0));
        assert!(!r.is_error());
    }

    #[test]
    fn sensor_error_charts_as_zero() {
        assert_eq!(Reading::SensorError.charted(), 0.0);
        assert_eq!(Reading::Value(21.5).charted(), 21.5);
    }

    // -- SystemStatus -------------------------------------------------------

    #[test]
    fn status_codes_map_to_variants() {
        assert_eq!(SystemStatus::from(0), SystemStatus::Connected);
        assert_eq!(SystemStatus::from(1), SystemStatus::Alert);
        assert_eq!(SystemStatus::from(2), SystemStatus::Alarm);
        assert_eq!(SystemStatus::from(3), SystemStatus::SensorError);
        assert_eq!(SystemStatus::from(42), SystemStatus::Alarm);
    }

    // -- TimeBasis ----------------------------------------------------------

    #[test]
    fn basis_inferred_from_magnitude() {
        assert_eq!(TimeBasis::infer(3_600_000), TimeBasis::UptimeMillis);
        assert_eq!(TimeBasis::infer(1_760_000_000_000), TimeBasis::Epoch);
    }

    #[test]
    fn explicit_basis_wins_over_heuristic() {
        let t = MeasurementTime::new(3_600_000, Some(TimeBasis::Epoch));
        assert_eq!(t.basis, TimeBasis::Epoch);
    }

    // -- DeviceSnapshot -----------------------------------------------------

    #[test]
    fn parse_full_data_payload() {
        let json = r#"{
            "temp": 24.5, "humidity": 61, "soilMoisture": -999, "light": 40,
            "tankLevel": 75, "pump": false, "tankPump": true, "security": false,
            "luminary": true, "irrigationAuto": true, "tankAuto": false,
            "securityAuto": true, "luminaryAuto": false, "status": 1,
            "securityStart": "22:00", "securityEnd": "06:00",
            "config": {"serverPollingInterval": 10, "statusPollingInterval": 20, "soilDry": 3000},
            "lastMeasurementTime": 123456,
            "history": [{"temp": 24.0, "humidity": 60, "soil": 30, "tank": 70, "light": 40, "timestamp": 120000}]
        }"#;
        let snap: DeviceSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.temp, Some(Reading::Value(24.5)));
        assert_eq!(snap.soil_moisture, Some(Reading::SensorError));
        assert_eq!(snap.tank_pump, Some(true));
        assert_eq!(snap.status, Some(SystemStatus::Alert));
        assert_eq!(snap.security_start, TimeOfDay::new(22, 0));
        assert_eq!(snap.config.unwrap().server_polling_interval, Some(10));
        assert_eq!(snap.last_measurement_time, Some(123456));
        assert_eq!(snap.history.as_ref().unwrap().len(), 1);
        assert_eq!(snap.history.unwrap()[0].timestamp, Some(120000));
    }

    #[test]
    fn parse_partial_payload_leaves_missing_fields_unset() {
        let snap: DeviceSnapshot = serde_json::from_str(r#"{"pump": true}"#).unwrap();
        assert_eq!(snap.pump, Some(true));
        assert!(snap.temp.is_none());
        assert!(snap.history.is_none());
        assert!(snap.last_measurement_time.is_none());
    }

    #[test]
    fn empty_schedule_strings_are_ignored() {
        let s: StatusSnapshot =
            serde_json::from_str(r#"{"securityStart": "", "securityEnd": "bogus"}"#).unwrap();
        assert!(s.security_start.is_none());
        assert!(s.security_end.is_none());
    }

    #[test]
    fn history_record_without_tank_or_timestamp() {
        let r: HistoryRecord = serde_json::from_str(r#"{"temp": 20}"#).unwrap();
        assert_eq!(r.temp, Some(Reading::Value(20.0)));
        assert!(r.tank.is_none());
        assert!(r.timestamp.is_none());
    }

    // -- ActionPayload ------------------------------------------------------

    #[test]
    fn action_payload_is_sparse() {
        let p = ActionPayload {
            force_irrigation: Some(true),
            duration: Some(15),
            ..ActionPayload::default()
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v, serde_json::json!({"forceIrrigation": true, "duration": 15}));
    }

    #[test]
    fn schedule_action_serializes_times() {
        let p = ActionPayload {
            security_start: TimeOfDay::new(22, 0),
            security_end: TimeOfDay::new(6, 30),
            ..ActionPayload::default()
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"securityStart": "22:00", "securityEnd": "06:30"})
        );
    }
}
