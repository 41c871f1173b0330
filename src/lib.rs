//! Water-quality classification, alerting and live sensor feed for a
//! catfish aquaculture appliance.
//!
//! Module map:
//! - `models`: readings, parameters, severities
//! - `thresholds`: canonical band table and per-parameter classification
//! - `priority`: alert priority and issue list from parameter statuses
//! - `trend`: trend detection, forecast, correlations and recommendations
//! - `alerts`: alert records, dead-fish alerts and the bounded stores
//! - `monitor`: shared state applying readings and raising alerts
//! - `source`: backend client, Socket.IO push client and the pull/push
//!   subscription feed
//! - `config`, `routes`: service plumbing used by the binary

pub mod alerts;
pub mod config;
pub mod models;
pub mod monitor;
pub mod priority;
pub mod routes;
pub mod source;
pub mod thresholds;
pub mod trend;

pub use config::Config;
pub use models::{HistoryPoint, Parameter, SensorReading, Severity, Trend};
pub use monitor::{ApplyOutcome, Monitor, MonitorSettings, Snapshot};
pub use thresholds::{classify, ParameterStatus, ThresholdTable};
