//! Core data types shared by the collection and reporting pipeline.

use std::collections::HashMap;
use std::fmt;

use clap::ValueEnum;
use serde::Deserialize;

/// Largest metric value accepted as real data. The management API is known to
/// return absurd spikes for certain timeframe/aggregation combinations; any
/// value strictly above this ceiling is quarantined instead of aggregated.
pub const ANOMALY_CEILING: u64 = 0x3f_ffff_ffff;

/// Virtualization backend of a machine. Determines the API path segment for
/// machine-scoped endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineKind {
    Qemu,
    Lxc,
    Openvz,
}

impl MachineKind {
    /// Parse the `type` field of an inventory listing entry.
    pub fn from_api(kind: &str) -> Option<Self> {
        match kind {
            "qemu" => Some(MachineKind::Qemu),
            "lxc" => Some(MachineKind::Lxc),
            "openvz" => Some(MachineKind::Openvz),
            _ => None,
        }
    }

    /// Path segment used in `nodes/{node}/{segment}/{vmid}/...` endpoints.
    pub fn path_segment(&self) -> &'static str {
        match self {
            MachineKind::Qemu => "qemu",
            MachineKind::Lxc => "lxc",
            MachineKind::Openvz => "openvz",
        }
    }
}

/// Machine run state as reported by the inventory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineStatus {
    Running,
    Paused,
    Stopped,
    /// Error or transitional state; carries the raw status string.
    Other(String),
}

impl MachineStatus {
    pub fn from_api(status: &str) -> Self {
        match status {
            "running" => MachineStatus::Running,
            "paused" => MachineStatus::Paused,
            "stopped" => MachineStatus::Stopped,
            other => MachineStatus::Other(other.to_string()),
        }
    }
}

/// One virtual machine instance. Exactly one record exists per machine id per
/// collection run; nothing is persisted across runs.
#[derive(Debug, Clone)]
pub struct MachineRecord {
    /// Cluster-unique machine id.
    pub id: u32,
    /// Display name. Not guaranteed unique by the platform; the collector
    /// fails loudly on duplicates instead of overwriting.
    pub name: String,
    /// Physical host the machine runs on.
    pub node: String,
    pub kind: MachineKind,
    pub status: MachineStatus,
    /// Raw UUID string from the machine configuration. May be absent or
    /// malformed; validated after collection, never fatal.
    pub uuid: Option<String>,
}

/// Tracked usage metrics. Each maps to one field of a sample row and has its
/// own display scaling rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cpu,
    DiskRead,
    DiskWrite,
    NetIn,
    NetOut,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Cpu,
        MetricKind::DiskRead,
        MetricKind::DiskWrite,
        MetricKind::NetIn,
        MetricKind::NetOut,
    ];
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Cpu => "cpu",
            MetricKind::DiskRead => "diskread",
            MetricKind::DiskWrite => "diskwrite",
            MetricKind::NetIn => "netin",
            MetricKind::NetOut => "netout",
        };
        write!(f, "{}", name)
    }
}

/// Requested history window. The finest option is not supported server-side
/// and is emulated by fetching the hourly series and cutting it off
/// client-side (see [`Timeframe::cutoff_secs`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Timeframe {
    #[value(name = "5min")]
    FiveMin,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Timeframe {
    /// Timeframe name sent to the API. `FiveMin` degrades to `hour`.
    pub fn api_name(&self) -> &'static str {
        match self {
            Timeframe::FiveMin | Timeframe::Hour => "hour",
            Timeframe::Day => "day",
            Timeframe::Week => "week",
            Timeframe::Month => "month",
            Timeframe::Year => "year",
        }
    }

    /// Client-side row cutoff in seconds, where the API cannot provide the
    /// requested resolution natively.
    pub fn cutoff_secs(&self) -> Option<i64> {
        match self {
            Timeframe::FiveMin => Some(300),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Timeframe::FiveMin => "5min",
            Timeframe::Hour => "hour",
            Timeframe::Day => "day",
            Timeframe::Week => "week",
            Timeframe::Month => "month",
            Timeframe::Year => "year",
        };
        write!(f, "{}", name)
    }
}

/// Which aggregate statistic drives the ranking. MEDIAN is not supported
/// server-side: the API is asked for AVERAGE and the median is reconstructed
/// client-side over the already-averaged samples. That approximation is
/// long-standing, documented behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum Aggregation {
    Average,
    Max,
    Median,
}

impl Aggregation {
    /// Consolidation function name sent to the API.
    pub fn api_cf(&self) -> &'static str {
        match self {
            Aggregation::Average | Aggregation::Median => "AVERAGE",
            Aggregation::Max => "MAX",
        }
    }

    /// Select this aggregation's value out of a computed aggregate.
    pub fn pick(&self, aggregate: &MetricAggregate) -> f64 {
        match self {
            Aggregation::Average => aggregate.average,
            Aggregation::Max => aggregate.max,
            Aggregation::Median => aggregate.median,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Aggregation::Average => "average",
            Aggregation::Max => "max",
            Aggregation::Median => "median",
        };
        write!(f, "{}", name)
    }
}

/// One time-series observation for a machine. A metric missing from a row is
/// skipped during aggregation, never treated as zero (a freshly created
/// machine reports rows without history for some metrics).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SampleRow {
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub diskread: Option<f64>,
    #[serde(default)]
    pub diskwrite: Option<f64>,
    #[serde(default)]
    pub netin: Option<f64>,
    #[serde(default)]
    pub netout: Option<f64>,
}

impl SampleRow {
    pub fn value(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::Cpu => self.cpu,
            MetricKind::DiskRead => self.diskread,
            MetricKind::DiskWrite => self.diskwrite,
            MetricKind::NetIn => self.netin,
            MetricKind::NetOut => self.netout,
        }
    }
}

/// Per (machine, metric) statistics over the valid sample subset.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricAggregate {
    pub average: f64,
    pub median: f64,
    pub max: f64,
    /// Samples excluded as anomalous.
    pub ignored: usize,
}

/// Machine name to quarantined (metric, value) pairs. Feeds the secondary
/// anomaly report printed ahead of the ranked blocks.
#[derive(Debug, Default)]
pub struct AnomalyLedger {
    entries: HashMap<String, Vec<(MetricKind, f64)>>,
}

impl AnomalyLedger {
    pub fn record(&mut self, machine: &str, metric: MetricKind, value: f64) {
        self.entries
            .entry(machine.to_string())
            .or_default()
            .push((metric, value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Machines ordered by anomaly count descending, name ascending on ties.
    pub fn ranked(&self) -> Vec<(&str, &[(MetricKind, f64)])> {
        let mut ranked: Vec<(&str, &[(MetricKind, f64)])> = self
            .entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
            .collect();
        ranked.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_kind_from_api() {
        assert_eq!(MachineKind::from_api("qemu"), Some(MachineKind::Qemu));
        assert_eq!(MachineKind::from_api("lxc"), Some(MachineKind::Lxc));
        assert_eq!(MachineKind::from_api("bhyve"), None);
    }

    #[test]
    fn test_timeframe_degrades_five_min() {
        assert_eq!(Timeframe::FiveMin.api_name(), "hour");
        assert_eq!(Timeframe::FiveMin.cutoff_secs(), Some(300));
        assert_eq!(Timeframe::Week.api_name(), "week");
        assert_eq!(Timeframe::Week.cutoff_secs(), None);
    }

    #[test]
    fn test_median_maps_to_average_cf() {
        assert_eq!(Aggregation::Median.api_cf(), "AVERAGE");
        assert_eq!(Aggregation::Max.api_cf(), "MAX");
    }

    #[test]
    fn test_sample_row_value_lookup() {
        let row = SampleRow {
            time: 1000,
            cpu: Some(0.5),
            netin: Some(2048.0),
            ..Default::default()
        };
        assert_eq!(row.value(MetricKind::Cpu), Some(0.5));
        assert_eq!(row.value(MetricKind::NetIn), Some(2048.0));
        assert_eq!(row.value(MetricKind::DiskRead), None);
    }

    #[test]
    fn test_ledger_ranked_order() {
        let mut ledger = AnomalyLedger::default();
        ledger.record("beta", MetricKind::NetIn, 1e12);
        ledger.record("alpha", MetricKind::DiskRead, 1e12);
        ledger.record("alpha", MetricKind::DiskWrite, 2e12);

        let ranked = ledger.ranked();
        assert_eq!(ranked[0].0, "alpha");
        assert_eq!(ranked[0].1.len(), 2);
        assert_eq!(ranked[1].0, "beta");
    }
}
