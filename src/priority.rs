//! Aggregation of per-parameter statuses into one alert priority.

use std::collections::BTreeMap;

use crate::models::{Parameter, Severity};
use crate::thresholds::ParameterStatus;

// ---

/// Resolve the overall priority and the list of detected issues.
///
/// Priority is the highest severity present. Issues are listed in the
/// canonical parameter order (temperature, oxygen, pH, turbidity), never in
/// severity order, one phrase per non-normal parameter. An all-normal input
/// yields `Severity::Normal` and no issues.
pub fn resolve_priority(statuses: &BTreeMap<Parameter, ParameterStatus>) -> (Severity, Vec<String>) {
    // ---
    let priority = statuses
        .values()
        .map(|s| s.severity())
        .max()
        .unwrap_or(Severity::Normal);

    let issues = statuses
        .iter()
        .filter_map(|(&parameter, &status)| issue_phrase(parameter, status))
        .collect();

    (priority, issues)
}

/// Human-readable phrase for a non-normal status, e.g. "Temperature is too hot".
pub fn issue_phrase(parameter: Parameter, status: ParameterStatus) -> Option<String> {
    match status {
        ParameterStatus::Normal => None,
        ParameterStatus::Unknown => Some(format!("{} reading is unavailable", parameter.name())),
        other => Some(format!(
            "{} is {}",
            parameter.name(),
            other.label().to_lowercase()
        )),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::thresholds::ParameterStatus::*;

    fn all_normal() -> BTreeMap<Parameter, ParameterStatus> {
        Parameter::ALL.iter().map(|&p| (p, Normal)).collect()
    }

    #[test]
    fn test_all_normal_resolves_to_normal_with_no_issues() {
        // ---
        let (priority, issues) = resolve_priority(&all_normal());
        assert_eq!(priority, Severity::Normal);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_any_critical_flips_all_normal_to_critical() {
        // ---
        for p in Parameter::ALL {
            for status in [TooCold, TooHot, CriticalLow, VeryAcidic, VeryAlkaline, Dirty] {
                let mut statuses = all_normal();
                statuses.insert(p, status);
                let (priority, _) = resolve_priority(&statuses);
                assert_eq!(priority, Severity::Critical, "{p} {status:?}");
            }
        }
    }

    #[test]
    fn test_any_warning_flips_all_normal_to_warning() {
        // ---
        for p in Parameter::ALL {
            for status in [BelowAverage, AboveAverage, Low, High, Cloudy, Unknown] {
                let mut statuses = all_normal();
                statuses.insert(p, status);
                let (priority, _) = resolve_priority(&statuses);
                assert_eq!(priority, Severity::Warning, "{p} {status:?}");
            }
        }
    }

    #[test]
    fn test_warning_does_not_downgrade_critical() {
        // ---
        let mut statuses = all_normal();
        statuses.insert(Parameter::Temperature, TooHot);
        statuses.insert(Parameter::Oxygen, Low);
        let (priority, _) = resolve_priority(&statuses);
        assert_eq!(priority, Severity::Critical);
    }

    #[test]
    fn test_issues_follow_canonical_order_not_severity() {
        // ---
        let mut statuses = BTreeMap::new();
        statuses.insert(Parameter::Turbidity, Dirty);
        statuses.insert(Parameter::Ph, AboveAverage);
        statuses.insert(Parameter::Oxygen, High);
        statuses.insert(Parameter::Temperature, Normal);

        let (priority, issues) = resolve_priority(&statuses);
        assert_eq!(priority, Severity::Critical);
        assert_eq!(
            issues,
            vec![
                "Oxygen is high".to_string(),
                "pH is above average".to_string(),
                "Turbidity is dirty".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_reading_is_reported_as_unavailable() {
        assert_eq!(
            issue_phrase(Parameter::Oxygen, Unknown).as_deref(),
            Some("Oxygen reading is unavailable")
        );
    }

    #[test]
    fn test_empty_input_is_normal() {
        let (priority, issues) = resolve_priority(&BTreeMap::new());
        assert_eq!(priority, Severity::Normal);
        assert!(issues.is_empty());
    }
}
