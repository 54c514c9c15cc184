//! Per-machine, per-metric statistics with anomaly quarantine.
//!
//! The time-series source occasionally emits single corrupt rows or
//! out-of-range spikes. Values above [`ANOMALY_CEILING`] are diverted into
//! the [`AnomalyLedger`] instead of failing the run, and surfaced in the
//! diagnostic report later.

use std::collections::HashMap;

use log::warn;

use crate::collector::MachineUsage;
use crate::types::{
    AnomalyLedger, MachineRecord, MetricAggregate, MetricKind, SampleRow, ANOMALY_CEILING,
};

/// Sentinel reported for average/max/median when a machine has a single
/// sample row, too little history to say anything meaningful.
pub const INSUFFICIENT_DATA: f64 = -1.0;

/// One machine with its computed aggregates, ready for ranking.
#[derive(Debug)]
pub struct MachineStats {
    pub record: MachineRecord,
    pub aggregates: HashMap<MetricKind, MetricAggregate>,
}

/// Median of a sequence: middle element for odd counts, mean of the two
/// middle elements for even counts. Sorts in place. Must not be called with
/// an empty slice (callers guard the zero-sample case).
fn median_of(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Computes aggregates machine by machine, accumulating quarantined values
/// and a warning count across the run.
#[derive(Debug, Default)]
pub struct Aggregator {
    ledger: AnomalyLedger,
    warnings: u32,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> &AnomalyLedger {
        &self.ledger
    }

    /// Warnings emitted so far (missing metrics, all-anomalous metrics).
    pub fn warning_count(&self) -> u32 {
        self.warnings
    }

    /// Aggregate one metric over one machine's raw rows.
    pub fn aggregate(
        &mut self,
        machine: &str,
        metric: MetricKind,
        rows: &[SampleRow],
    ) -> MetricAggregate {
        // A single row is insufficient data, whatever it contains. Reported
        // with sentinels and kept out of the ledger.
        if rows.len() == 1 {
            return MetricAggregate {
                average: INSUFFICIENT_DATA,
                median: INSUFFICIENT_DATA,
                max: INSUFFICIENT_DATA,
                ignored: 0,
            };
        }

        let mut values: Vec<f64> = rows.iter().filter_map(|row| row.value(metric)).collect();
        if values.is_empty() {
            warn!("no {} values at all for machine '{}'", metric, machine);
            self.warnings += 1;
            return MetricAggregate {
                average: 0.0,
                median: 0.0,
                max: 0.0,
                ignored: 0,
            };
        }

        // Median is taken over all present values, before the anomaly
        // filter; the valid subset only feeds average and max.
        let median = median_of(&mut values);

        let ceiling = ANOMALY_CEILING as f64;
        let (mut valid, ignored): (Vec<f64>, Vec<f64>) =
            values.iter().partition(|value| **value <= ceiling);
        for value in &ignored {
            self.ledger.record(machine, metric, *value);
        }
        if valid.is_empty() {
            warn!(
                "all {} values for machine '{}' were above the validity ceiling",
                metric, machine
            );
            self.warnings += 1;
            valid.push(0.0);
        }

        let average = valid.iter().sum::<f64>() / valid.len() as f64;
        let max = valid.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        MetricAggregate {
            average,
            median,
            max,
            ignored: ignored.len(),
        }
    }

    /// Aggregate every tracked metric for every collected machine,
    /// preserving collection order.
    pub fn aggregate_all(&mut self, machines: &[MachineUsage]) -> Vec<MachineStats> {
        machines
            .iter()
            .map(|machine| MachineStats {
                record: machine.record.clone(),
                aggregates: MetricKind::ALL
                    .iter()
                    .map(|&metric| {
                        (
                            metric,
                            self.aggregate(&machine.record.name, metric, &machine.rows),
                        )
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_rows(values: &[f64]) -> Vec<SampleRow> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| SampleRow {
                time: i as i64 * 60,
                cpu: Some(v),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_median_odd_count() {
        let rows = cpu_rows(&[30.0, 10.0, 20.0]);
        let agg = Aggregator::new().aggregate("m", MetricKind::Cpu, &rows);
        assert_eq!(agg.median, 20.0);
    }

    #[test]
    fn test_median_even_count() {
        let rows = cpu_rows(&[40.0, 10.0, 30.0, 20.0]);
        let agg = Aggregator::new().aggregate("m", MetricKind::Cpu, &rows);
        assert_eq!(agg.median, 25.0);
    }

    #[test]
    fn test_average_and_max() {
        let rows = cpu_rows(&[10.0, 20.0, 30.0]);
        let agg = Aggregator::new().aggregate("m", MetricKind::Cpu, &rows);
        assert_eq!(agg.average, 20.0);
        assert_eq!(agg.max, 30.0);
        assert_eq!(agg.ignored, 0);
    }

    #[test]
    fn test_ceiling_boundary() {
        let at_ceiling = ANOMALY_CEILING as f64;
        let above = at_ceiling + 1.0;
        let rows = cpu_rows(&[100.0, at_ceiling, above]);

        let mut aggregator = Aggregator::new();
        let agg = aggregator.aggregate("spiky", MetricKind::Cpu, &rows);

        // The value exactly at the ceiling is valid; the one above is not.
        assert_eq!(agg.max, at_ceiling);
        assert_eq!(agg.ignored, 1);
        let ranked = aggregator.ledger().ranked();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, "spiky");
        assert_eq!(ranked[0].1, &[(MetricKind::Cpu, above)]);
    }

    #[test]
    fn test_single_row_sentinels() {
        let rows = cpu_rows(&[1e15]);
        let mut aggregator = Aggregator::new();
        let agg = aggregator.aggregate("young", MetricKind::Cpu, &rows);

        assert_eq!(agg.average, INSUFFICIENT_DATA);
        assert_eq!(agg.median, INSUFFICIENT_DATA);
        assert_eq!(agg.max, INSUFFICIENT_DATA);
        // Single-row machines never reach the ledger, even with absurd data.
        assert!(aggregator.ledger().is_empty());
        assert_eq!(aggregator.warning_count(), 0);
    }

    #[test]
    fn test_all_missing_metric_is_zero_with_warning() {
        // Rows exist but none carries a netin value.
        let rows = cpu_rows(&[10.0, 20.0]);
        let mut aggregator = Aggregator::new();
        let agg = aggregator.aggregate("fresh", MetricKind::NetIn, &rows);

        assert_eq!(agg.average, 0.0);
        assert_eq!(agg.median, 0.0);
        assert_eq!(agg.max, 0.0);
        assert_eq!(aggregator.warning_count(), 1);
    }

    #[test]
    fn test_all_anomalous_falls_back_to_zero() {
        let above = ANOMALY_CEILING as f64 * 2.0;
        let rows = cpu_rows(&[above, above]);
        let mut aggregator = Aggregator::new();
        let agg = aggregator.aggregate("corrupt", MetricKind::Cpu, &rows);

        assert_eq!(agg.average, 0.0);
        assert_eq!(agg.max, 0.0);
        // The median still reflects the unfiltered values.
        assert_eq!(agg.median, above);
        assert_eq!(agg.ignored, 2);
        assert_eq!(aggregator.warning_count(), 1);
    }

    #[test]
    fn test_absent_rows_are_skipped_not_zeroed() {
        let mut rows = cpu_rows(&[10.0, 20.0]);
        rows.push(SampleRow {
            time: 180,
            ..Default::default()
        });
        let agg = Aggregator::new().aggregate("m", MetricKind::Cpu, &rows);
        // Three rows, two values; the empty row does not drag the mean down.
        assert_eq!(agg.average, 15.0);
        assert_eq!(agg.median, 15.0);
    }
}
