//! Trend detection, short-range forecasting and recommended actions.
//!
//! All functions here are pure. `trend` and `forecast` take an ordered
//! historical series; `correlations` compares the series of different
//! parameters; `recommend` is a static lookup keyed by parameter and the
//! side of the normal range a status lies on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{HistoryPoint, Parameter, Severity, Trend};
use crate::thresholds::{Direction, ParameterStatus};

// ---

/// Default number of points averaged on each side of the comparison.
pub const DEFAULT_TREND_WINDOW: usize = 3;

/// Default mean delta below which a series is considered flat.
pub const DEFAULT_TREND_NOISE: f64 = 0.1;

/// Direction of change of `series`.
///
/// Compares the mean of the most recent `window` points against the mean
/// of the `window` points before them. When the series is shorter than
/// two windows the window shrinks to half the series. Fewer than two
/// finite points is `Flat`. A delta whose magnitude does not exceed
/// `noise` is `Flat`.
pub fn trend(series: &[HistoryPoint], window: usize, noise: f64) -> Trend {
    // ---
    let values: Vec<f64> = series
        .iter()
        .map(|p| p.value)
        .filter(|v| v.is_finite())
        .collect();
    if values.len() < 2 {
        return Trend::Flat;
    }

    let k = window.max(1).min(values.len() / 2);
    let recent = &values[values.len() - k..];
    let previous = &values[values.len() - 2 * k..values.len() - k];

    let delta = mean(recent) - mean(previous);
    if delta > noise {
        Trend::Up
    } else if delta < -noise {
        Trend::Down
    } else {
        Trend::Flat
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Least-squares linear projection of `series` for the next
/// `horizon_hours` whole hours after its last point.
///
/// Returns an empty vector when there are fewer than two finite points or
/// all points share one timestamp.
pub fn forecast(series: &[HistoryPoint], horizon_hours: u32) -> Vec<f64> {
    // ---
    let points: Vec<&HistoryPoint> = series.iter().filter(|p| p.value.is_finite()).collect();
    let Some(first) = points.first() else {
        return Vec::new();
    };
    if points.len() < 2 {
        return Vec::new();
    }

    let xs: Vec<f64> = points
        .iter()
        .map(|p| (p.timestamp - first.timestamp).num_milliseconds() as f64 / 3_600_000.0)
        .collect();
    let ys: Vec<f64> = points.iter().map(|p| p.value).collect();

    let x_mean = mean(&xs);
    let y_mean = mean(&ys);
    let sxx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    if sxx == 0.0 {
        return Vec::new();
    }
    let sxy: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let last_x = xs.iter().cloned().fold(f64::MIN, f64::max);

    (1..=horizon_hours)
        .map(|h| intercept + slope * (last_x + h as f64))
        .collect()
}

/// Pairwise correlation matrix, keyed by parameter on both axes.
pub type CorrelationMatrix = BTreeMap<Parameter, BTreeMap<Parameter, f64>>;

/// Pearson correlation between every pair of parameters.
///
/// Only samples present in both series at the same timestamp are paired.
/// A pair with fewer than two shared samples, or where either side has no
/// variance, has no entry. A parameter with variance correlates `1.0` with
/// itself.
pub fn correlations(history: &BTreeMap<Parameter, Vec<HistoryPoint>>) -> CorrelationMatrix {
    // ---
    let finite = |p: Parameter| -> BTreeMap<DateTime<Utc>, f64> {
        history
            .get(&p)
            .map(|s| {
                s.iter()
                    .filter(|pt| pt.value.is_finite())
                    .map(|pt| (pt.timestamp, pt.value))
                    .collect()
            })
            .unwrap_or_default()
    };
    let columns: BTreeMap<Parameter, BTreeMap<DateTime<Utc>, f64>> =
        Parameter::ALL.iter().map(|&p| (p, finite(p))).collect();

    let mut matrix = CorrelationMatrix::new();
    for (i, &a) in Parameter::ALL.iter().enumerate() {
        for &b in &Parameter::ALL[i..] {
            let pairs: Vec<(f64, f64)> = columns[&a]
                .iter()
                .filter_map(|(ts, &x)| columns[&b].get(ts).map(|&y| (x, y)))
                .collect();
            if let Some(r) = pearson(&pairs) {
                matrix.entry(a).or_default().insert(b, r);
                matrix.entry(b).or_default().insert(a, r);
            }
        }
    }
    matrix
}

fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    // ---
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let x_mean = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let y_mean = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let (dx, dy) = (x - x_mean, y - y_mean);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0))
}

/// Recommended actions for a status, most urgent first.
///
/// One entry per (parameter, direction). `Normal` has no actions; an
/// `Unknown` reading asks for the sensor to be checked.
pub fn recommend(parameter: Parameter, status: ParameterStatus) -> &'static [&'static str] {
    // ---
    use Direction::*;
    use Parameter::*;

    if status == ParameterStatus::Unknown {
        return match parameter {
            Temperature => &["Check the temperature sensor and its wiring"],
            Oxygen => &["Check the dissolved oxygen sensor and its wiring"],
            Ph => &["Check the pH sensor and recalibrate it"],
            Turbidity => &["Check the turbidity sensor for fouling"],
        };
    }

    let Some(direction) = status.direction() else {
        return &[];
    };

    match (parameter, direction) {
        (Temperature, High) => &[
            "Increase water circulation",
            "Activate the cooling system",
            "Add shade covers to reduce sun exposure",
            "Consider a partial water exchange with cooler water",
        ],
        (Temperature, Low) => &[
            "Activate the water heaters",
            "Check for cold water inflow",
            "Insulate exposed pipes",
        ],
        (Oxygen, Low) => &[
            "Increase aeration",
            "Add an emergency oxygen supply",
            "Reduce feeding temporarily",
            "Check the aerators for malfunction",
        ],
        (Oxygen, High) => &[
            "Reduce aeration",
            "Check for chemical contamination",
        ],
        (Ph, Low) => &[
            "Adjust water chemistry: add a pH buffer to raise alkalinity",
            "Check for acid contamination",
            "Prepare for a partial water exchange",
        ],
        (Ph, High) => &[
            "Adjust water chemistry: add a pH buffer to lower alkalinity",
            "Check for alkaline contamination",
            "Prepare for a partial water exchange",
        ],
        (Turbidity, High) => &[
            "Check the filtration system",
            "Perform a partial water change",
            "Stop feeding temporarily",
        ],
        (Turbidity, Low) => &[],
    }
}

/// Full action list attached to an alert for one parameter.
///
/// Critical statuses are prefixed with an urgent call to action; warnings
/// with a rising or falling trend get a monitoring advisory appended.
pub fn action_plan(parameter: Parameter, status: ParameterStatus, trend: Trend) -> Vec<String> {
    // ---
    let mut actions = Vec::new();
    if status.severity() == Severity::Critical {
        actions.push(format!(
            "URGENT: Immediate action required for {}",
            parameter.name()
        ));
    }
    actions.extend(recommend(parameter, status).iter().map(|s| s.to_string()));
    if status.severity() == Severity::Warning {
        actions.extend(trend_advisory(parameter, trend));
    }
    actions
}

pub fn trend_advisory(parameter: Parameter, trend: Trend) -> Option<String> {
    match trend {
        Trend::Up => Some(format!("Monitor increasing trend in {}", parameter.name())),
        Trend::Down => Some(format!("Monitor decreasing trend in {}", parameter.name())),
        Trend::Flat => None,
    }
}

/// How often the pond should be checked at a given priority level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitoringSchedule {
    pub parameter_checking: &'static str,
    pub water_sampling: &'static str,
    pub equipment_inspection: &'static str,
    pub catfish_observation: &'static str,
}

impl MonitoringSchedule {
    pub fn for_priority(priority: Severity) -> Self {
        match priority {
            Severity::Critical => Self {
                parameter_checking: "Every 5 minutes",
                water_sampling: "Every 30 minutes",
                equipment_inspection: "Every hour",
                catfish_observation: "Continuous",
            },
            Severity::Warning => Self {
                parameter_checking: "Every 15 minutes",
                water_sampling: "Every 2 hours",
                equipment_inspection: "Every 4 hours",
                catfish_observation: "Every 30 minutes",
            },
            Severity::Normal => Self {
                parameter_checking: "Every 30 minutes",
                water_sampling: "Every 4 hours",
                equipment_inspection: "Every 8 hours",
                catfish_observation: "Every hour",
            },
        }
    }
}
