//! Alert records and the bounded, de-duplicated stores that hold them.
//!
//! Two alert classes exist and are kept apart: water-quality
//! [`AlertRecord`]s and [`DeadFishAlert`]s. Each lives in its own
//! [`AlertStore`] with its own retention limit. Identity is always the
//! producer-minted `alert_id`; display text is never used to decide
//! whether two alerts are the same event.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{HistoryPoint, Parameter, SensorReading, Severity, Trend};
use crate::thresholds::{ParameterStatus, ThresholdTable};
use crate::trend::{CorrelationMatrix, MonitoringSchedule};

// ---

/// Anything that can live in an [`AlertStore`].
pub trait Identified {
    fn alert_id(&self) -> &str;
}

/// Current value, classification and trend of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterAssessment {
    pub value: Option<f64>,
    pub status: ParameterStatus,
    pub severity: Severity,
    pub trend: Trend,
    pub trend_arrow: &'static str,
    pub color: &'static str,

    /// Label the backend attached to the row, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_label: Option<String>,

    /// `Some(false)` when the backend label names a different band.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_agrees: Option<bool>,
}

impl ParameterAssessment {
    pub fn new(value: Option<f64>, status: ParameterStatus, trend: Trend) -> Self {
        Self {
            value,
            status,
            severity: status.severity(),
            trend,
            trend_arrow: trend.arrow(),
            color: status.indicator_color(),
            backend_label: None,
            backend_agrees: None,
        }
    }
}

/// A water-quality alert: readings, statuses, trends and actions for one
/// sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    // ---
    pub alert_id: String,
    pub time_detected: DateTime<Utc>,
    pub priority_level: Severity,
    pub alive_catfish: u32,
    pub parameters: BTreeMap<Parameter, ParameterAssessment>,
    pub detected_issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub historical_series: BTreeMap<Parameter, Vec<HistoryPoint>>,

    /// Linear projection for the next hours, one value per hour.
    pub forecast: BTreeMap<Parameter, Vec<f64>>,

    /// Pearson correlation between parameters over the history window.
    pub parameter_correlations: CorrelationMatrix,
    pub monitoring_schedule: MonitoringSchedule,
}

impl AlertRecord {
    pub fn all_parameters_normal(&self) -> bool {
        self.parameters.values().all(|a| a.status.is_normal())
    }

    pub fn status(&self, parameter: Parameter) -> ParameterStatus {
        self.parameters
            .get(&parameter)
            .map_or(ParameterStatus::Unknown, |a| a.status)
    }
}

impl Identified for AlertRecord {
    fn alert_id(&self) -> &str {
        &self.alert_id
    }
}

pub fn water_quality_alert_id(reading: &SensorReading) -> String {
    format!("wq_{}", reading.identity())
}

pub fn dead_fish_alert_id(reading: &SensorReading) -> String {
    format!("dead_{}", reading.identity())
}

/// Raised when the vision pipeline reports newly dead catfish.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadFishAlert {
    // ---
    pub alert_id: String,
    pub time_detected: DateTime<Utc>,
    pub dead_catfish_count: u32,
    pub statuses: BTreeMap<Parameter, ParameterStatus>,
    pub values: BTreeMap<Parameter, Option<f64>>,

    /// Conditions at time of death that may have stressed the fish.
    pub possible_causes: Vec<String>,

    /// Backend path serving the printable report for this alert.
    pub report_path: String,
}

impl Identified for DeadFishAlert {
    fn alert_id(&self) -> &str {
        &self.alert_id
    }
}

impl DeadFishAlert {
    pub fn from_reading(reading: &SensorReading, table: &ThresholdTable) -> Self {
        // ---
        let statuses: BTreeMap<_, _> = Parameter::ALL
            .iter()
            .map(|&p| (p, table.classify_value(p, reading.value(p))))
            .collect();
        let values = Parameter::ALL
            .iter()
            .map(|&p| (p, reading.value(p)))
            .collect();
        let alert_id = dead_fish_alert_id(reading);

        Self {
            report_path: format!("/check_dead_catfish/print/{}", reading.identity()),
            possible_causes: possible_causes(reading, &statuses),
            alert_id,
            time_detected: reading.timestamp,
            dead_catfish_count: reading.dead_catfish,
            statuses,
            values,
        }
    }
}

/// One sentence per non-normal parameter, in canonical order.
pub fn possible_causes(
    reading: &SensorReading,
    statuses: &BTreeMap<Parameter, ParameterStatus>,
) -> Vec<String> {
    // ---
    statuses
        .iter()
        .filter(|(_, status)| !status.is_normal())
        .map(|(&parameter, &status)| {
            if status == ParameterStatus::Unknown {
                return format!("{} reading was unavailable at time of detection.", parameter.name());
            }
            let reading_text = match reading.value(parameter) {
                Some(v) => format!("{:.2}{}", v, unit_suffix(parameter)),
                None => "n/a".to_string(),
            };
            let contributors = stress_factors(parameter, status);
            if contributors.is_empty() {
                format!(
                    "{} was {} ({}).",
                    parameter.name(),
                    status.label().to_lowercase(),
                    reading_text
                )
            } else {
                format!(
                    "{} was {} ({}); likely contributors: {}.",
                    parameter.name(),
                    status.label().to_lowercase(),
                    reading_text,
                    contributors.join(", ")
                )
            }
        })
        .collect()
}

fn unit_suffix(parameter: Parameter) -> String {
    match parameter.unit() {
        "" => String::new(),
        unit => format!(" {unit}"),
    }
}

fn stress_factors(parameter: Parameter, status: ParameterStatus) -> &'static [&'static str] {
    // ---
    use ParameterStatus::*;

    match (parameter, status) {
        (Parameter::Temperature, TooCold) => {
            &["cold weather", "cold make-up water", "wind exposure"]
        }
        (Parameter::Temperature, BelowAverage) => &["cool weather", "cold make-up water"],
        (Parameter::Temperature, AboveAverage) => {
            &["hot weather", "lukewarm make-up water", "partial sun exposure"]
        }
        (Parameter::Temperature, TooHot) => {
            &["very hot weather", "heated make-up water", "full sun exposure"]
        }
        (Parameter::Oxygen, CriticalLow) => {
            &["overstocking", "stagnant water", "aerator failure", "overfeeding"]
        }
        (Parameter::Oxygen, Low) => &["high stocking density", "low water movement", "weak aeration"],
        (Parameter::Oxygen, High) => &["over-aeration", "chemical dosing", "hyperoxygenation"],
        (Parameter::Ph, VeryAcidic) => &["acid rain runoff", "acidic contamination"],
        (Parameter::Ph, BelowAverage) => &["acidic products in the water"],
        (Parameter::Ph, AboveAverage) => &["saltwater intrusion"],
        (Parameter::Ph, VeryAlkaline) => {
            &["detergent or soap", "ammonia solution", "bleach"]
        }
        (Parameter::Turbidity, Cloudy) => &["uneaten feed", "suspended sediment"],
        (Parameter::Turbidity, Dirty) => &["decomposing organic matter", "filtration failure"],
        _ => &[],
    }
}

// ---

/// How many dismissed ids a store remembers.
const DISMISSED_MEMORY: usize = 256;

/// Outcome of [`AlertStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
    /// The id was dismissed earlier; the alert was not stored.
    Suppressed,
}

/// Bounded, most-recent-first collection keyed by `alert_id`.
///
/// Dismissed ids are remembered so that re-fetching the same sample does
/// not bring a dismissed alert back.
#[derive(Debug, Clone)]
pub struct AlertStore<A> {
    entries: VecDeque<A>,
    capacity: Option<usize>,
    dismissed: VecDeque<String>,
}

impl<A: Identified + Clone> AlertStore<A> {
    // ---
    /// `capacity` of `None` keeps every alert until dismissed.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            dismissed: VecDeque::new(),
        }
    }

    /// Insert `alert` at the front, replacing any entry with the same id.
    /// Entries beyond the capacity are dropped from the back (oldest).
    pub fn upsert(&mut self, alert: A) -> Upsert {
        // ---
        if self.was_dismissed(alert.alert_id()) {
            return Upsert::Suppressed;
        }
        let outcome = match self.position(alert.alert_id()) {
            Some(idx) => {
                self.entries.remove(idx);
                Upsert::Replaced
            }
            None => Upsert::Inserted,
        };
        self.entries.push_front(alert);
        if let Some(cap) = self.capacity {
            self.entries.truncate(cap);
        }
        outcome
    }

    /// Remove the alert with `alert_id`. Unknown ids are ignored.
    pub fn dismiss(&mut self, alert_id: &str) -> Option<A> {
        // ---
        let idx = self.position(alert_id)?;
        let removed = self.entries.remove(idx)?;
        if self.dismissed.len() == DISMISSED_MEMORY {
            self.dismissed.pop_front();
        }
        self.dismissed.push_back(alert_id.to_string());
        Some(removed)
    }

    pub fn was_dismissed(&self, alert_id: &str) -> bool {
        self.dismissed.iter().any(|id| id == alert_id)
    }

    /// Snapshot, most recent first.
    pub fn list(&self) -> Vec<A> {
        self.entries.iter().cloned().collect()
    }

    pub fn get(&self, alert_id: &str) -> Option<&A> {
        self.entries.iter().find(|a| a.alert_id() == alert_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, alert_id: &str) -> Option<usize> {
        self.entries.iter().position(|a| a.alert_id() == alert_id)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{Duration, TimeZone};

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        at: i64,
    }

    impl Identified for Note {
        fn alert_id(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, at: i64) -> Note {
        Note { id: id.to_string(), at }
    }

    fn ids(store: &AlertStore<Note>) -> Vec<String> {
        store.list().into_iter().map(|n| n.id).collect()
    }

    // --- AlertStore ---------------------------------------------------------

    #[test]
    fn test_upsert_same_id_keeps_one_entry_with_latest_fields() {
        // ---
        let mut store = AlertStore::new(Some(5));
        assert_eq!(store.upsert(note("wq_1", 100)), Upsert::Inserted);
        assert_eq!(store.upsert(note("wq_1", 200)), Upsert::Replaced);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("wq_1").map(|n| n.at), Some(200));
    }

    #[test]
    fn test_newest_alert_is_listed_first() {
        // ---
        let mut store = AlertStore::new(Some(5));
        store.upsert(note("a", 1));
        store.upsert(note("b", 2));
        store.upsert(note("c", 3));
        assert_eq!(ids(&store), vec!["c", "b", "a"]);

        // Refreshing an old alert moves it to the front.
        store.upsert(note("a", 4));
        assert_eq!(ids(&store), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_retention_evicts_oldest_first() {
        // ---
        let mut store = AlertStore::new(Some(5));
        for i in 0..6 {
            store.upsert(note(&format!("wq_{i}"), i));
        }
        assert_eq!(store.len(), 5);
        assert!(store.get("wq_0").is_none());
        assert_eq!(ids(&store)[0], "wq_5");
        assert_eq!(ids(&store)[4], "wq_1");
    }

    #[test]
    fn test_unbounded_store_keeps_everything() {
        let mut store = AlertStore::new(None);
        for i in 0..50 {
            store.upsert(note(&format!("dead_{i}"), i));
        }
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn test_dismiss_removes_matching_alert() {
        // ---
        let mut store = AlertStore::new(Some(5));
        store.upsert(note("a", 1));
        store.upsert(note("b", 2));
        assert_eq!(store.dismiss("a").map(|n| n.id), Some("a".to_string()));
        assert_eq!(ids(&store), vec!["b"]);
    }

    #[test]
    fn test_dismiss_unknown_id_is_a_noop() {
        // ---
        let mut store = AlertStore::new(Some(5));
        store.upsert(note("a", 1));
        assert!(store.dismiss("nope").is_none());
        assert_eq!(store.len(), 1);

        let mut empty: AlertStore<Note> = AlertStore::new(Some(5));
        assert!(empty.dismiss("a").is_none());
        assert!(empty.is_empty());
        assert!(!empty.was_dismissed("a"));
    }

    #[test]
    fn test_dismissed_id_is_not_reinserted() {
        // ---
        let mut store = AlertStore::new(Some(5));
        store.upsert(note("dead_1", 1));
        store.dismiss("dead_1");

        assert_eq!(store.upsert(note("dead_1", 2)), Upsert::Suppressed);
        assert!(store.is_empty());
        assert_eq!(store.upsert(note("dead_2", 3)), Upsert::Inserted);
        assert_eq!(ids(&store), vec!["dead_2"]);
    }

    #[test]
    fn test_dismissed_memory_is_bounded() {
        // ---
        let mut store = AlertStore::new(None);
        for i in 0..=DISMISSED_MEMORY {
            let id = format!("wq_{i}");
            store.upsert(note(&id, i as i64));
            store.dismiss(&id);
        }
        // The oldest dismissal has been forgotten.
        assert!(!store.was_dismissed("wq_0"));
        assert!(store.was_dismissed(&format!("wq_{DISMISSED_MEMORY}")));
        assert_eq!(store.upsert(note("wq_0", 0)), Upsert::Inserted);
    }

    // --- Dead-fish alerts ---------------------------------------------------

    fn reading() -> SensorReading {
        // ---
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let mut r = SensorReading::new(ts, 36.0, 1.0, 7.0, 10.0);
        r.id = Some(77);
        r.dead_catfish = 2;
        r
    }

    #[test]
    fn test_dead_fish_alert_uses_stable_identity() {
        // ---
        let table = ThresholdTable::canonical();
        let first = DeadFishAlert::from_reading(&reading(), &table);
        let again = DeadFishAlert::from_reading(&reading(), &table);
        assert_eq!(first.alert_id, "dead_77");
        assert_eq!(first.alert_id, again.alert_id);
        assert_eq!(first.report_path, "/check_dead_catfish/print/77");
        assert_eq!(first.dead_catfish_count, 2);

        let mut store = AlertStore::new(None);
        store.upsert(first);
        store.upsert(again);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_possible_causes_cover_each_out_of_range_parameter_in_order() {
        // ---
        let alert = DeadFishAlert::from_reading(&reading(), &ThresholdTable::canonical());
        assert_eq!(alert.possible_causes.len(), 2);
        assert!(alert.possible_causes[0].starts_with("Temperature was too hot (36.00 °C)"));
        assert!(alert.possible_causes[0].contains("full sun exposure"));
        assert!(alert.possible_causes[1].starts_with("Oxygen was low (1.00 mg/L)"));
    }

    #[test]
    fn test_possible_causes_mention_missing_readings() {
        // ---
        let mut r = reading();
        r.temperature = Some(28.0);
        r.oxygen = Some(3.0);
        r.phlevel = None;
        let alert = DeadFishAlert::from_reading(&r, &ThresholdTable::canonical());
        assert_eq!(
            alert.possible_causes,
            vec!["pH reading was unavailable at time of detection.".to_string()]
        );
    }

    #[test]
    fn test_alert_ids_are_prefixed_by_class() {
        // ---
        let mut r = reading();
        r.id = None;
        r.timestamp = r.timestamp + Duration::seconds(1);
        let millis = r.timestamp.timestamp_millis();
        assert_eq!(water_quality_alert_id(&r), format!("wq_{millis}"));
        assert_eq!(dead_fish_alert_id(&r), format!("dead_{millis}"));
    }
}
