//! The monitor: applies readings, keeps history, raises and retires alerts.
//!
//! A single `Monitor` is owned by the composition root and shared as
//! `Arc<Monitor>`. All mutable state sits behind one mutex that is only
//! held for synchronous work, so updates from the poller and the push
//! stream are applied one at a time, in arrival order, without awaiting
//! anything while locked.
//!
//! Readings that are older than the last applied one are rejected, which
//! keeps a slow response for an old sample from overwriting a newer one.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alerts::{
    water_quality_alert_id, AlertRecord, AlertStore, DeadFishAlert, ParameterAssessment, Upsert,
};
use crate::models::{HistoryPoint, Parameter, SensorReading, Severity};
use crate::priority::resolve_priority;
use crate::thresholds::ThresholdTable;
use crate::trend::{self, MonitoringSchedule, DEFAULT_TREND_NOISE, DEFAULT_TREND_WINDOW};

// ---

/// Tunables for trend detection, history and alert retention.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    // ---
    pub trend_window: usize,
    pub trend_noise: f64,

    /// Maximum points kept per parameter.
    pub history_max_points: usize,

    /// Points older than this, relative to the newest one, are dropped.
    pub history_max_age: Duration,

    /// Water-quality alerts kept; `None` is unbounded.
    pub alert_retention: Option<usize>,

    /// Dead-fish alerts kept; `None` is unbounded.
    pub dead_fish_retention: Option<usize>,

    pub forecast_hours: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            trend_window: DEFAULT_TREND_WINDOW,
            trend_noise: DEFAULT_TREND_NOISE,
            history_max_points: 180,
            history_max_age: Duration::hours(3),
            alert_retention: Some(5),
            dead_fish_retention: None,
            forecast_hours: 6,
        }
    }
}

/// Result of [`Monitor::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The reading became the current state.
    Applied {
        priority: Severity,
        /// A water-quality alert was stored or refreshed; `false` when the
        /// reading was normal or its alert had been dismissed.
        alert_raised: bool,
        /// Same, for the dead-fish store.
        dead_fish_alert: bool,
    },
    /// The reading is older than the one already applied.
    Stale { latest: DateTime<Utc> },
}

/// Latest reading together with its full assessment.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub reading: SensorReading,
    pub assessment: AlertRecord,
}

#[derive(Debug)]
struct MonitorState {
    latest: Option<SensorReading>,
    current: Option<AlertRecord>,
    history: BTreeMap<Parameter, VecDeque<HistoryPoint>>,
    alerts: AlertStore<AlertRecord>,
    dead_fish: AlertStore<DeadFishAlert>,
}

/// Classification and alerting state shared by the feed and the HTTP API.
///
/// All mutable state sits behind one `Mutex`; every method takes `&self`,
/// so the monitor is shared as `Arc<Monitor>`. A poisoned lock is
/// recovered rather than propagated since no method leaves the state
/// half-updated.
pub struct Monitor {
    table: ThresholdTable,
    settings: MonitorSettings,
    state: Mutex<MonitorState>,
}

impl Monitor {
    // ---
    /// Create a monitor with empty history and alert stores.
    ///
    /// # Arguments
    /// * `table` - Threshold table every classification goes through;
    ///   callers should have run [`ThresholdTable::validate`]
    /// * `settings` - Trend, history and retention tunables
    pub fn new(table: ThresholdTable, settings: MonitorSettings) -> Self {
        let state = MonitorState {
            latest: None,
            current: None,
            history: BTreeMap::new(),
            alerts: AlertStore::new(settings.alert_retention),
            dead_fish: AlertStore::new(settings.dead_fish_retention),
        };
        Self {
            table,
            settings,
            state: Mutex::new(state),
        }
    }

    pub fn table(&self) -> &ThresholdTable {
        &self.table
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Apply one reading: record history, assess it, and raise alerts.
    ///
    /// A record is stored only when its priority is above `Normal`; the
    /// all-normal assessment is still kept as the current snapshot. A
    /// dead-fish alert is raised for every sample reporting dead catfish,
    /// keyed by the sample so a re-fetch refreshes rather than duplicates.
    /// Dismissed alerts stay dismissed for the same sample.
    ///
    /// # Returns
    /// [`ApplyOutcome::Stale`] when the reading is older than the one
    /// already applied (nothing changes), otherwise
    /// [`ApplyOutcome::Applied`] with the resolved priority and whether
    /// each alert class was stored or refreshed.
    pub fn apply(&self, reading: SensorReading) -> ApplyOutcome {
        // ---
        let mut state = self.lock();

        if let Some(latest) = state.latest.as_ref().map(|r| r.timestamp) {
            if reading.timestamp < latest {
                debug!(
                    "Rejecting out-of-order reading from {} (already applied {})",
                    reading.timestamp, latest
                );
                return ApplyOutcome::Stale { latest };
            }
        }

        self.record_history(&mut state.history, &reading);
        let record = self.assess_with(&state.history, &reading);
        let priority = record.priority_level;

        let mut alert_raised = false;
        if priority > Severity::Normal {
            let outcome = state.alerts.upsert(record.clone());
            alert_raised = outcome != Upsert::Suppressed;
            if outcome == Upsert::Inserted {
                let issues = record.detected_issues.join(", ");
                match priority {
                    Severity::Critical => warn!("Critical alert {}: {}", record.alert_id, issues),
                    _ => info!("Warning alert {}: {}", record.alert_id, issues),
                }
            }
        }

        let mut dead_fish_alert = false;
        if reading.dead_catfish > 0 {
            let alert = DeadFishAlert::from_reading(&reading, &self.table);
            let (id, count) = (alert.alert_id.clone(), alert.dead_catfish_count);
            let outcome = state.dead_fish.upsert(alert);
            dead_fish_alert = outcome != Upsert::Suppressed;
            if outcome == Upsert::Inserted {
                warn!("Dead catfish detected ({} in sample), alert {}", count, id);
            }
        }

        state.current = Some(record);
        state.latest = Some(reading);

        ApplyOutcome::Applied {
            priority,
            alert_raised,
            dead_fish_alert,
        }
    }

    /// Seed the history window with earlier readings, oldest first.
    ///
    /// Backfilled readings only feed trends and charts; they never raise
    /// alerts. Readings at or after the current one are skipped.
    pub fn backfill(&self, mut readings: Vec<SensorReading>) -> usize {
        // ---
        readings.sort_by_key(|r| r.timestamp);
        let mut state = self.lock();
        let cutoff = state.latest.as_ref().map(|r| r.timestamp);

        let mut added = 0;
        for reading in readings
            .iter()
            .filter(|r| cutoff.map_or(true, |c| r.timestamp < c))
        {
            self.record_history(&mut state.history, reading);
            added += 1;
        }
        debug!("Backfilled {} readings into history", added);
        added
    }

    /// Assess a reading against the current history without applying it.
    pub fn assess(&self, reading: &SensorReading) -> AlertRecord {
        let state = self.lock();
        self.assess_with(&state.history, reading)
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.lock().alerts.list()
    }

    pub fn dead_fish_alerts(&self) -> Vec<DeadFishAlert> {
        self.lock().dead_fish.list()
    }

    /// Dismiss a water-quality alert. Returns whether one was removed.
    pub fn dismiss(&self, alert_id: &str) -> bool {
        let removed = self.lock().alerts.dismiss(alert_id).is_some();
        debug!("Dismiss {} (removed: {})", alert_id, removed);
        removed
    }

    /// Dismiss a dead-fish alert. Returns whether one was removed.
    pub fn dismiss_dead_fish(&self, alert_id: &str) -> bool {
        let removed = self.lock().dead_fish.dismiss(alert_id).is_some();
        debug!("Dismiss dead-fish {} (removed: {})", alert_id, removed);
        removed
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        let state = self.lock();
        Some(Snapshot {
            reading: state.latest.clone()?,
            assessment: state.current.clone()?,
        })
    }

    pub fn history(&self, parameter: Parameter) -> Vec<HistoryPoint> {
        self.lock()
            .history
            .get(&parameter)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    // ---

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_history(
        &self,
        history: &mut BTreeMap<Parameter, VecDeque<HistoryPoint>>,
        reading: &SensorReading,
    ) {
        // ---
        for parameter in Parameter::ALL {
            let Some(value) = reading.value(parameter).filter(|v| v.is_finite()) else {
                continue;
            };
            let series = history.entry(parameter).or_default();
            let point = HistoryPoint {
                timestamp: reading.timestamp,
                value,
            };

            // Re-fetches of the same sample replace rather than duplicate.
            match series.back_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => series.push_back(point),
            }

            let oldest_allowed = reading.timestamp - self.settings.history_max_age;
            while series.front().is_some_and(|p| p.timestamp < oldest_allowed) {
                series.pop_front();
            }
            while series.len() > self.settings.history_max_points {
                series.pop_front();
            }
        }
    }

    fn assess_with(
        &self,
        history: &BTreeMap<Parameter, VecDeque<HistoryPoint>>,
        reading: &SensorReading,
    ) -> AlertRecord {
        // ---
        let mut parameters = BTreeMap::new();
        let mut statuses = BTreeMap::new();
        let mut historical_series = BTreeMap::new();
        let mut forecast = BTreeMap::new();
        let mut recommendations = Vec::new();

        for parameter in Parameter::ALL {
            let series: Vec<HistoryPoint> = history
                .get(&parameter)
                .map(|h| h.iter().copied().collect())
                .unwrap_or_default();

            let value = reading.value(parameter);
            let status = self.table.classify_value(parameter, value);
            let direction = trend::trend(&series, self.settings.trend_window, self.settings.trend_noise);

            let mut assessment = ParameterAssessment::new(value, status, direction);
            if let Some(label) = reading.backend_label(parameter) {
                let agrees = status.agrees_with(parameter, label);
                if !agrees {
                    warn!(
                        "{} backend label '{}' disagrees with local status '{}' (value {:?})",
                        parameter, label, status, value
                    );
                }
                assessment.backend_label = Some(label.to_string());
                assessment.backend_agrees = Some(agrees);
            }

            recommendations.extend(trend::action_plan(parameter, status, direction));
            forecast.insert(parameter, trend::forecast(&series, self.settings.forecast_hours));
            historical_series.insert(parameter, series);
            statuses.insert(parameter, status);
            parameters.insert(parameter, assessment);
        }

        let (priority_level, detected_issues) = resolve_priority(&statuses);
        let parameter_correlations = trend::correlations(&historical_series);

        AlertRecord {
            alert_id: water_quality_alert_id(reading),
            time_detected: reading.timestamp,
            priority_level,
            alive_catfish: reading.alive_catfish,
            parameters,
            detected_issues,
            recommendations,
            historical_series,
            forecast,
            parameter_correlations,
            monitoring_schedule: MonitoringSchedule::for_priority(priority_level),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(ThresholdTable::canonical(), MonitorSettings::default())
    }
}
