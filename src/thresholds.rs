//! Threshold classification of raw sensor values.
//!
//! One canonical table drives every gauge and every alert. Each parameter
//! is described by up to four boundaries, low to high:
//!
//! ```text
//!   critical_low | warning low | normal_low ..normal.. normal_high | warning high | critical_high
//! ```
//!
//! Each boundary records which side owns a value sitting exactly on it,
//! so the bands partition the parameter's domain with no gaps or overlaps.
//! Values outside the physical domain, `NaN`, infinities and missing
//! values classify as [`ParameterStatus::Unknown`].

use std::fmt;

use serde::Serialize;

use crate::models::{Parameter, Severity};

// ---

/// Which band owns a value equal to the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tie {
    Lower,
    Upper,
}

/// A cut point between two adjacent bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundary {
    pub at: f64,
    pub tie: Tie,
}

impl Boundary {
    /// Boundary whose exact value belongs to the band below it.
    pub const fn lower(at: f64) -> Self {
        Self { at, tie: Tie::Lower }
    }

    /// Boundary whose exact value belongs to the band above it.
    pub const fn upper(at: f64) -> Self {
        Self { at, tie: Tie::Upper }
    }

    fn is_below(&self, value: f64) -> bool {
        value < self.at || (value == self.at && self.tie == Tie::Lower)
    }

    fn is_above(&self, value: f64) -> bool {
        value > self.at || (value == self.at && self.tie == Tie::Upper)
    }
}

/// Position of a value relative to one parameter's boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    CriticalLow,
    WarningLow,
    Normal,
    WarningHigh,
    CriticalHigh,
}

/// Boundaries for one parameter. Missing boundaries mean the band does
/// not exist (turbidity has no low side, oxygen no critical high).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterThresholds {
    // ---
    /// Smallest physically meaningful value, inclusive.
    pub min: Option<f64>,

    /// Largest physically meaningful value, inclusive.
    pub max: Option<f64>,

    pub critical_low: Option<Boundary>,
    pub normal_low: Option<Boundary>,
    pub normal_high: Boundary,
    pub critical_high: Option<Boundary>,
}

impl ParameterThresholds {
    // ---
    fn admits(&self, value: f64) -> bool {
        value.is_finite()
            && self.min.map_or(true, |min| value >= min)
            && self.max.map_or(true, |max| value <= max)
    }

    fn band(&self, value: f64) -> Band {
        // ---
        if self.critical_low.is_some_and(|b| b.is_below(value)) {
            Band::CriticalLow
        } else if self.normal_low.is_some_and(|b| b.is_below(value)) {
            Band::WarningLow
        } else if self.critical_high.is_some_and(|b| b.is_above(value)) {
            Band::CriticalHigh
        } else if self.normal_high.is_above(value) {
            Band::WarningHigh
        } else {
            Band::Normal
        }
    }

    fn check(&self, parameter: Parameter) -> Result<(), ThresholdError> {
        // ---
        let ordered = [
            ("critical_low", self.critical_low),
            ("normal_low", self.normal_low),
            ("normal_high", Some(self.normal_high)),
            ("critical_high", self.critical_high),
        ];
        let present: Vec<(&'static str, f64)> = ordered
            .iter()
            .filter_map(|(name, b)| b.map(|b| (*name, b.at)))
            .collect();

        for &(name, at) in &present {
            if !at.is_finite() {
                return Err(ThresholdError::NonFinite {
                    parameter,
                    boundary: name,
                });
            }
        }

        for pair in present.windows(2) {
            let (lower_name, lower) = pair[0];
            let (upper_name, upper) = pair[1];
            // Critical cut points must sit strictly outside the normal range.
            let strict = lower_name == "critical_low" || upper_name == "critical_high";
            if lower > upper || (strict && lower == upper) {
                return Err(ThresholdError::Unordered {
                    parameter,
                    lower: lower_name,
                    upper: upper_name,
                });
            }
        }

        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min >= max {
                return Err(ThresholdError::EmptyDomain { parameter });
            }
        }
        Ok(())
    }
}

/// The full classification table, one entry per parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdTable {
    pub temperature: ParameterThresholds,
    pub oxygen: ParameterThresholds,
    pub ph: ParameterThresholds,
    pub turbidity: ParameterThresholds,
}

impl ThresholdTable {
    // ---
    /// The canonical table every view and alert uses.
    ///
    /// - Temperature °C: `<20` too cold, `[20,26)` below average,
    ///   `[26,32]` normal, `(32,35)` above average, `>=35` too hot.
    /// - Oxygen mg/L: `0` critically low, `(0,1.5)` low, `[1.5,5]` normal,
    ///   `>5` high.
    /// - pH: `<4` very acidic, `[4,6)` below average, `[6,7]` normal,
    ///   `(7,9]` above average, `>9` very alkaline.
    /// - Turbidity NTU: `<20` normal, `[20,50)` cloudy, `>=50` dirty.
    pub const fn canonical() -> Self {
        Self {
            temperature: ParameterThresholds {
                min: None,
                max: None,
                critical_low: Some(Boundary::upper(20.0)),
                normal_low: Some(Boundary::upper(26.0)),
                normal_high: Boundary::lower(32.0),
                critical_high: Some(Boundary::upper(35.0)),
            },
            oxygen: ParameterThresholds {
                min: Some(0.0),
                max: None,
                critical_low: Some(Boundary::lower(0.0)),
                normal_low: Some(Boundary::upper(1.5)),
                normal_high: Boundary::lower(5.0),
                critical_high: None,
            },
            ph: ParameterThresholds {
                min: Some(0.0),
                max: Some(14.0),
                critical_low: Some(Boundary::upper(4.0)),
                normal_low: Some(Boundary::upper(6.0)),
                normal_high: Boundary::lower(7.0),
                critical_high: Some(Boundary::lower(9.0)),
            },
            turbidity: ParameterThresholds {
                min: Some(0.0),
                max: None,
                critical_low: None,
                normal_low: None,
                normal_high: Boundary::upper(20.0),
                critical_high: Some(Boundary::upper(50.0)),
            },
        }
    }

    pub fn get(&self, parameter: Parameter) -> &ParameterThresholds {
        match parameter {
            Parameter::Temperature => &self.temperature,
            Parameter::Oxygen => &self.oxygen,
            Parameter::Ph => &self.ph,
            Parameter::Turbidity => &self.turbidity,
        }
    }

    /// Check that every parameter's boundaries are finite and totally
    /// ordered. Run once at startup.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        Parameter::ALL
            .iter()
            .try_for_each(|&p| self.get(p).check(p))
    }

    pub fn classify(&self, parameter: Parameter, value: f64) -> ParameterStatus {
        // ---
        let thresholds = self.get(parameter);
        if !thresholds.admits(value) {
            return ParameterStatus::Unknown;
        }
        ParameterStatus::from_band(parameter, thresholds.band(value))
    }

    /// Classify a possibly-missing value; `None` is `Unknown`.
    pub fn classify_value(&self, parameter: Parameter, value: Option<f64>) -> ParameterStatus {
        value.map_or(ParameterStatus::Unknown, |v| self.classify(parameter, v))
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::canonical()
    }
}

/// Classify `value` against the canonical table.
pub fn classify(parameter: Parameter, value: f64) -> ParameterStatus {
    ThresholdTable::canonical().classify(parameter, value)
}

/// Side of the normal range a status lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Low,
    High,
}

/// Qualitative status band of one parameter value.
///
/// The label set is parameter dependent: temperature and pH have soft
/// below/above-average bands, oxygen uses low/high, turbidity
/// cloudy/dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParameterStatus {
    Normal,
    BelowAverage,
    AboveAverage,
    TooCold,
    TooHot,
    CriticalLow,
    Low,
    High,
    VeryAcidic,
    VeryAlkaline,
    Cloudy,
    Dirty,
    Unknown,
}

impl ParameterStatus {
    // ---
    pub fn from_band(parameter: Parameter, band: Band) -> Self {
        use ParameterStatus::*;

        match (parameter, band) {
            (_, Band::Normal) => Normal,
            (Parameter::Temperature, Band::CriticalLow) => TooCold,
            (Parameter::Temperature, Band::WarningLow) => BelowAverage,
            (Parameter::Temperature, Band::WarningHigh) => AboveAverage,
            (Parameter::Temperature, Band::CriticalHigh) => TooHot,
            (Parameter::Oxygen, Band::CriticalLow) => CriticalLow,
            (Parameter::Oxygen, Band::WarningLow) => Low,
            (Parameter::Oxygen, Band::WarningHigh | Band::CriticalHigh) => High,
            (Parameter::Ph, Band::CriticalLow) => VeryAcidic,
            (Parameter::Ph, Band::WarningLow) => BelowAverage,
            (Parameter::Ph, Band::WarningHigh) => AboveAverage,
            (Parameter::Ph, Band::CriticalHigh) => VeryAlkaline,
            (Parameter::Turbidity, Band::WarningHigh) => Cloudy,
            (Parameter::Turbidity, Band::CriticalHigh) => Dirty,
            // Turbidity has no low side; a table that grows one is not
            // something the labels can describe.
            (Parameter::Turbidity, Band::CriticalLow | Band::WarningLow) => Unknown,
        }
    }

    pub fn severity(self) -> Severity {
        use ParameterStatus::*;

        match self {
            Normal => Severity::Normal,
            BelowAverage | AboveAverage | Low | High | Cloudy | Unknown => Severity::Warning,
            TooCold | TooHot | CriticalLow | VeryAcidic | VeryAlkaline | Dirty => {
                Severity::Critical
            }
        }
    }

    pub fn direction(self) -> Option<Direction> {
        use ParameterStatus::*;

        match self {
            BelowAverage | TooCold | CriticalLow | Low | VeryAcidic => Some(Direction::Low),
            AboveAverage | TooHot | High | VeryAlkaline | Cloudy | Dirty => Some(Direction::High),
            Normal | Unknown => None,
        }
    }

    pub fn is_normal(self) -> bool {
        self == ParameterStatus::Normal
    }

    pub fn label(self) -> &'static str {
        use ParameterStatus::*;

        match self {
            Normal => "Normal",
            BelowAverage => "Below Average",
            AboveAverage => "Above Average",
            TooCold => "Too Cold",
            TooHot => "Too Hot",
            CriticalLow => "Critically Low",
            Low => "Low",
            High => "High",
            VeryAcidic => "Very Acidic",
            VeryAlkaline => "Very Alkaline",
            Cloudy => "Cloudy",
            Dirty => "Dirty",
            Unknown => "Unknown",
        }
    }

    /// Gauge line colour, finer grained than [`Severity::color`].
    pub fn indicator_color(self) -> &'static str {
        use ParameterStatus::*;

        match self {
            Normal => "green",
            BelowAverage | Low => "blue",
            AboveAverage | High | Cloudy => "orange",
            TooCold | CriticalLow | VeryAcidic => "navy",
            TooHot | VeryAlkaline | Dirty => "darkred",
            Unknown => "gray",
        }
    }

    /// Whether a backend-computed label describes the same band.
    ///
    /// Backend labels are free text; comparison ignores case, spacing and
    /// punctuation, and also accepts the bare severity name. The backend's
    /// "acidic"/"alkaline" wording only means anything for pH.
    pub fn agrees_with(self, parameter: Parameter, backend_label: &str) -> bool {
        // ---
        let norm = |s: &str| {
            s.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        };
        let theirs = norm(backend_label);
        if theirs == norm(self.label()) || theirs == norm(&self.severity().to_string()) {
            return true;
        }
        match self {
            ParameterStatus::Normal => matches!(theirs.as_str(), "good" | "ok" | "clean" | "clear"),
            ParameterStatus::TooCold => theirs == "cold",
            ParameterStatus::TooHot => theirs == "hot",
            ParameterStatus::BelowAverage => parameter == Parameter::Ph && theirs == "acidic",
            ParameterStatus::AboveAverage => parameter == Parameter::Ph && theirs == "alkaline",
            _ => false,
        }
    }
}

impl fmt::Display for ParameterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---

/// A threshold table that cannot partition its parameter's domain.
#[derive(Debug, PartialEq)]
pub enum ThresholdError {
    /// A boundary is `NaN` or infinite.
    NonFinite {
        parameter: Parameter,
        boundary: &'static str,
    },
    /// Two adjacent boundaries are out of order.
    Unordered {
        parameter: Parameter,
        lower: &'static str,
        upper: &'static str,
    },
    /// `min` is not below `max`.
    EmptyDomain { parameter: Parameter },
}

impl fmt::Display for ThresholdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdError::NonFinite { parameter, boundary } => {
                write!(f, "{} threshold {} is not finite", parameter, boundary)
            }
            ThresholdError::Unordered {
                parameter,
                lower,
                upper,
            } => write!(f, "{} threshold {} must be below {}", parameter, lower, upper),
            ThresholdError::EmptyDomain { parameter } => {
                write!(f, "{} domain is empty", parameter)
            }
        }
    }
}

impl std::error::Error for ThresholdError {}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use ParameterStatus::*;

    // --- Temperature --------------------------------------------------------

    #[test]
    fn test_temperature_boundaries_resolve_exactly() {
        // ---
        assert_eq!(classify(Parameter::Temperature, 19.999), TooCold);
        assert_eq!(classify(Parameter::Temperature, 20.0), BelowAverage);
        assert_eq!(classify(Parameter::Temperature, 25.999), BelowAverage);
        assert_eq!(classify(Parameter::Temperature, 26.0), Normal);
        assert_eq!(classify(Parameter::Temperature, 32.0), Normal);
        assert_eq!(classify(Parameter::Temperature, 32.001), AboveAverage);
        assert_eq!(classify(Parameter::Temperature, 34.999), AboveAverage);
        assert_eq!(classify(Parameter::Temperature, 35.0), TooHot);
    }

    #[test]
    fn test_temperature_partition_has_no_gaps() {
        // ---
        // Sweep well past both ends in 0.001 steps; every value must land in
        // a real band and bands must appear in ascending order.
        let order = [TooCold, BelowAverage, Normal, AboveAverage, TooHot];
        let mut last_rank = 0;
        let mut t = -50_000i64;
        while t <= 80_000 {
            let status = classify(Parameter::Temperature, t as f64 / 1000.0);
            let rank = order
                .iter()
                .position(|s| *s == status)
                .unwrap_or_else(|| panic!("{} classified as {:?}", t, status));
            assert!(rank >= last_rank, "band order regressed at {}", t);
            last_rank = rank;
            t += 1;
        }
        assert_eq!(last_rank, order.len() - 1);
    }

    #[test]
    fn test_temperature_extremes_are_still_classified() {
        assert_eq!(classify(Parameter::Temperature, -40.0), TooCold);
        assert_eq!(classify(Parameter::Temperature, 120.0), TooHot);
    }

    // --- Oxygen -------------------------------------------------------------

    #[test]
    fn test_oxygen_boundaries_resolve_exactly() {
        // ---
        assert_eq!(classify(Parameter::Oxygen, 0.0), CriticalLow);
        assert_eq!(classify(Parameter::Oxygen, 0.4), Low);
        assert_eq!(classify(Parameter::Oxygen, 1.499), Low);
        assert_eq!(classify(Parameter::Oxygen, 1.5), Normal);
        assert_eq!(classify(Parameter::Oxygen, 5.0), Normal);
        assert_eq!(classify(Parameter::Oxygen, 5.1), High);
        assert_eq!(High.severity(), Severity::Warning);
    }

    #[test]
    fn test_negative_oxygen_is_unknown() {
        assert_eq!(classify(Parameter::Oxygen, -0.1), Unknown);
    }

    // --- pH -----------------------------------------------------------------

    #[test]
    fn test_ph_boundaries_resolve_exactly() {
        // ---
        assert_eq!(classify(Parameter::Ph, 3.99), VeryAcidic);
        assert_eq!(classify(Parameter::Ph, 4.0), BelowAverage);
        assert_eq!(classify(Parameter::Ph, 5.99), BelowAverage);
        assert_eq!(classify(Parameter::Ph, 6.0), Normal);
        assert_eq!(classify(Parameter::Ph, 7.0), Normal);
        assert_eq!(classify(Parameter::Ph, 7.01), AboveAverage);
        assert_eq!(classify(Parameter::Ph, 9.0), AboveAverage);
        assert_eq!(classify(Parameter::Ph, 9.01), VeryAlkaline);
    }

    #[test]
    fn test_ph_outside_scale_is_unknown() {
        assert_eq!(classify(Parameter::Ph, -1.0), Unknown);
        assert_eq!(classify(Parameter::Ph, 14.5), Unknown);
        assert_eq!(classify(Parameter::Ph, 14.0), VeryAlkaline);
    }

    // --- Turbidity ----------------------------------------------------------

    #[test]
    fn test_turbidity_boundaries_resolve_exactly() {
        // ---
        assert_eq!(classify(Parameter::Turbidity, 0.0), Normal);
        assert_eq!(classify(Parameter::Turbidity, 19.99), Normal);
        assert_eq!(classify(Parameter::Turbidity, 20.0), Cloudy);
        assert_eq!(classify(Parameter::Turbidity, 49.99), Cloudy);
        assert_eq!(classify(Parameter::Turbidity, 50.0), Dirty);
        assert_eq!(classify(Parameter::Turbidity, 140.0), Dirty);
    }

    // --- Malformed input ----------------------------------------------------

    #[test]
    fn test_non_finite_values_are_unknown_never_normal() {
        // ---
        for p in Parameter::ALL {
            assert_eq!(classify(p, f64::NAN), Unknown, "{p} NaN");
            assert_eq!(classify(p, f64::INFINITY), Unknown, "{p} +inf");
            assert_eq!(classify(p, f64::NEG_INFINITY), Unknown, "{p} -inf");
        }
    }

    #[test]
    fn test_missing_value_is_unknown() {
        let table = ThresholdTable::canonical();
        assert_eq!(table.classify_value(Parameter::Oxygen, None), Unknown);
        assert_eq!(table.classify_value(Parameter::Oxygen, Some(3.0)), Normal);
    }

    #[test]
    fn test_unknown_is_not_silently_normal() {
        assert_eq!(Unknown.severity(), Severity::Warning);
        assert!(!Unknown.is_normal());
    }

    // --- Severity mapping ---------------------------------------------------

    #[test]
    fn test_soft_bands_map_to_warning_outer_bands_to_critical() {
        // ---
        for s in [BelowAverage, AboveAverage, Low, High, Cloudy] {
            assert_eq!(s.severity(), Severity::Warning, "{s:?}");
        }
        for s in [TooCold, TooHot, CriticalLow, VeryAcidic, VeryAlkaline, Dirty] {
            assert_eq!(s.severity(), Severity::Critical, "{s:?}");
        }
        assert_eq!(Normal.severity(), Severity::Normal);
    }

    // --- Table validation ---------------------------------------------------

    #[test]
    fn test_canonical_table_is_valid() {
        assert_eq!(ThresholdTable::canonical().validate(), Ok(()));
    }

    #[test]
    fn test_overlapping_boundaries_are_rejected() {
        // ---
        let mut table = ThresholdTable::canonical();
        table.temperature.critical_low = Some(Boundary::upper(27.0));
        assert_eq!(
            table.validate(),
            Err(ThresholdError::Unordered {
                parameter: Parameter::Temperature,
                lower: "critical_low",
                upper: "normal_low",
            })
        );
    }

    #[test]
    fn test_critical_cut_point_equal_to_normal_edge_is_rejected() {
        let mut table = ThresholdTable::canonical();
        table.turbidity.critical_high = Some(Boundary::upper(20.0));
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_nan_boundary_is_rejected() {
        let mut table = ThresholdTable::canonical();
        table.ph.normal_high = Boundary::lower(f64::NAN);
        assert!(matches!(
            table.validate(),
            Err(ThresholdError::NonFinite { parameter: Parameter::Ph, .. })
        ));
    }

    // --- Backend label agreement --------------------------------------------

    #[test]
    fn test_backend_label_agreement_is_loose_on_formatting() {
        // ---
        use Parameter::*;
        assert!(AboveAverage.agrees_with(Temperature, "above average"));
        assert!(AboveAverage.agrees_with(Ph, "Above-Average"));
        assert!(TooHot.agrees_with(Temperature, "Too Hot!"));
        assert!(Normal.agrees_with(Oxygen, "normal"));
        assert!(Dirty.agrees_with(Turbidity, "Critical"));
        assert!(!Normal.agrees_with(Turbidity, "Cloudy"));
        assert!(!TooCold.agrees_with(Temperature, "Normal"));
    }

    #[test]
    fn test_acidic_and_alkaline_only_describe_ph() {
        // ---
        assert!(BelowAverage.agrees_with(Parameter::Ph, "Acidic"));
        assert!(AboveAverage.agrees_with(Parameter::Ph, "alkaline"));
        assert!(!AboveAverage.agrees_with(Parameter::Temperature, "Alkaline"));
        assert!(!BelowAverage.agrees_with(Parameter::Oxygen, "acidic"));
    }
}
