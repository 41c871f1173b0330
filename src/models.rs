//! Data models shared by the classifier, the alert stores and the feed.
//!
//! `SensorReading` mirrors what the appliance backend emits, both from the
//! pull endpoints (`/sensor-data`, `/data`) and from the push stream. The
//! backend is loose with its types (fish counts arrive as floats, timestamps
//! arrive with or without an offset), so deserialization is tolerant here
//! and strict everywhere downstream.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---

/// One measured water-quality dimension.
///
/// The declaration order is the canonical reporting order: every list of
/// issues or recommendations is built by walking parameters in this order,
/// and `BTreeMap<Parameter, _>` iterates the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    Temperature,
    Oxygen,
    Ph,
    Turbidity,
}

impl Parameter {
    // ---
    pub const ALL: [Parameter; 4] = [
        Parameter::Temperature,
        Parameter::Oxygen,
        Parameter::Ph,
        Parameter::Turbidity,
    ];

    /// Human-readable name used in issue and recommendation text.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::Temperature => "Temperature",
            Parameter::Oxygen => "Oxygen",
            Parameter::Ph => "pH",
            Parameter::Turbidity => "Turbidity",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Parameter::Temperature => "°C",
            Parameter::Oxygen => "mg/L",
            Parameter::Ph => "",
            Parameter::Turbidity => "NTU",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temperature" | "temp" => Ok(Parameter::Temperature),
            "oxygen" | "do" => Ok(Parameter::Oxygen),
            "ph" | "phlevel" | "ph_level" => Ok(Parameter::Ph),
            "turbidity" => Ok(Parameter::Turbidity),
            other => Err(format!("unknown parameter '{other}'")),
        }
    }
}

/// Aggregation severity. Every status band maps onto exactly one of these,
/// and an alert's priority level is the highest severity among its
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl Severity {
    /// Display colour for the gauge line indicator.
    pub fn color(self) -> &'static str {
        match self {
            Severity::Normal => "green",
            Severity::Warning => "orange",
            Severity::Critical => "red",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Normal => "Normal",
            Severity::Warning => "Warning",
            Severity::Critical => "Critical",
        };
        f.write_str(s)
    }
}

/// Short-term direction of change of a parameter's recent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    #[default]
    Flat,
}

impl Trend {
    pub fn arrow(self) -> &'static str {
        match self {
            Trend::Up => "↑",
            Trend::Down => "↓",
            Trend::Flat => "→",
        }
    }
}

/// One point of a parameter's historical series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A single timestamped measurement set from the telemetry source.
///
/// Sensor values are optional because the backend reports `null` for a
/// sensor that has not produced data yet; the classifier turns those into
/// `Unknown`, never into `Normal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    // ---
    /// Backend row id, when the reading came from a persisted row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[serde(alias = "timeData", deserialize_with = "de_timestamp")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub temperature: Option<f64>,

    #[serde(default)]
    pub oxygen: Option<f64>,

    #[serde(default, alias = "phLevel", alias = "ph")]
    pub phlevel: Option<f64>,

    #[serde(default)]
    pub turbidity: Option<f64>,

    #[serde(default, alias = "catfish", deserialize_with = "de_count")]
    pub alive_catfish: u32,

    #[serde(default, deserialize_with = "de_count")]
    pub dead_catfish: u32,

    /// Labels the backend computed for persisted rows (`tempResult` etc.).
    #[serde(default, rename = "tempResult", skip_serializing_if = "Option::is_none")]
    pub temp_result: Option<String>,

    #[serde(default, rename = "oxygenResult", skip_serializing_if = "Option::is_none")]
    pub oxygen_result: Option<String>,

    #[serde(default, rename = "phResult", skip_serializing_if = "Option::is_none")]
    pub ph_result: Option<String>,

    #[serde(default, rename = "turbidityResult", skip_serializing_if = "Option::is_none")]
    pub turbidity_result: Option<String>,
}

impl SensorReading {
    // ---
    /// A reading with every sensor value present and no backend labels.
    pub fn new(
        timestamp: DateTime<Utc>,
        temperature: f64,
        oxygen: f64,
        phlevel: f64,
        turbidity: f64,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            temperature: Some(temperature),
            oxygen: Some(oxygen),
            phlevel: Some(phlevel),
            turbidity: Some(turbidity),
            alive_catfish: 0,
            dead_catfish: 0,
            temp_result: None,
            oxygen_result: None,
            ph_result: None,
            turbidity_result: None,
        }
    }

    pub fn value(&self, parameter: Parameter) -> Option<f64> {
        match parameter {
            Parameter::Temperature => self.temperature,
            Parameter::Oxygen => self.oxygen,
            Parameter::Ph => self.phlevel,
            Parameter::Turbidity => self.turbidity,
        }
    }

    pub fn backend_label(&self, parameter: Parameter) -> Option<&str> {
        let label = match parameter {
            Parameter::Temperature => &self.temp_result,
            Parameter::Oxygen => &self.oxygen_result,
            Parameter::Ph => &self.ph_result,
            Parameter::Turbidity => &self.turbidity_result,
        };
        label.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }

    /// Stable key for alerts derived from this reading.
    ///
    /// Prefers the backend row id; falls back to the reading's own
    /// timestamp, which is identical across repeated fetches of the same
    /// sample. Never derived from the wall clock.
    pub fn identity(&self) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => self.timestamp.timestamp_millis().to_string(),
        }
    }
}

/// Accepts RFC 3339 as well as the backend's offset-less
/// `YYYY-MM-DD HH:MM:SS` / ISO forms, which are UTC.
fn de_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    // ---
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("unrecognized timestamp '{raw}'"))
}

/// Fish counts come from a float column; `null`, negatives and NaN are 0.
fn de_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(match raw {
        Some(v) if v.is_finite() && v > 0.0 => v.round().min(u32::MAX as f64) as u32,
        _ => 0,
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backend_row_deserializes() {
        // ---
        let json = r#"{
            "id": 812,
            "temperature": 28.5,
            "tempResult": "Normal",
            "oxygen": 3.1,
            "oxygenResult": "Normal",
            "phlevel": 7.2,
            "phResult": "Alkaline",
            "turbidity": 12.0,
            "turbidityResult": "Clean",
            "catfish": 14.0,
            "dead_catfish": 1.0,
            "timeData": "2024-05-01 12:30:00"
        }"#;

        let reading: SensorReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.id, Some(812));
        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());
        assert_eq!(reading.alive_catfish, 14);
        assert_eq!(reading.dead_catfish, 1);
        assert_eq!(reading.value(Parameter::Ph), Some(7.2));
        assert_eq!(reading.backend_label(Parameter::Ph), Some("Alkaline"));
        assert_eq!(reading.identity(), "812");
    }

    #[test]
    fn test_live_snapshot_with_nulls_deserializes() {
        // ---
        let json = r#"{
            "temperature": null,
            "oxygen": 4.0,
            "phlevel": null,
            "turbidity": 30,
            "catfish": null,
            "dead_catfish": 0,
            "timestamp": "2024-05-01T08:00:00-05:00"
        }"#;

        let reading: SensorReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.turbidity, Some(30.0));
        assert_eq!(reading.alive_catfish, 0);
        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap());
        assert_eq!(reading.backend_label(Parameter::Temperature), None);
    }

    #[test]
    fn test_identity_falls_back_to_sample_timestamp() {
        // ---
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let a = SensorReading::new(ts, 28.0, 3.0, 7.0, 10.0);
        let b = SensorReading::new(ts, 29.0, 3.0, 7.0, 10.0);
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity(), ts.timestamp_millis().to_string());
    }

    #[test]
    fn test_invalid_timestamp_is_rejected() {
        assert!(parse_timestamp("yesterday-ish").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_parameter_parsing_accepts_backend_keys() {
        // ---
        assert_eq!("phlevel".parse::<Parameter>(), Ok(Parameter::Ph));
        assert_eq!("Temperature".parse::<Parameter>(), Ok(Parameter::Temperature));
        assert!("salinity".parse::<Parameter>().is_err());
    }

    #[test]
    fn test_severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Normal);
    }
}
