//! Ranked per-metric reports and the anomaly summary.
//!
//! Produces plain text for stdout: an anomaly block first (only when the
//! ledger is non-empty), then one ranked block per metric.

use crate::aggregate::MachineStats;
use crate::types::{Aggregation, AnomalyLedger, MetricKind};

/// Scale a value through successive units, dividing by `step` while it still
/// fits the next unit. One decimal place.
fn scale(mut value: f64, step: f64, units: &[&str]) -> String {
    let mut idx = 0;
    while value >= step && idx + 1 < units.len() {
        value /= step;
        idx += 1;
    }
    format!("{:.1} {}", value, units[idx])
}

/// Human-readable rendering of one metric value. CPU is a fraction shown as
/// a percentage; disk rates are bytes/second in 1024 steps; network rates
/// are converted to bits/second and shown in decimal steps.
pub fn format_metric(metric: MetricKind, value: f64) -> String {
    match metric {
        MetricKind::Cpu => format!("{:.0}%", value * 100.0),
        MetricKind::DiskRead | MetricKind::DiskWrite => {
            scale(value, 1024.0, &["B/s", "KiB/s", "MiB/s", "GiB/s", "TiB/s"])
        }
        MetricKind::NetIn | MetricKind::NetOut => {
            scale(value * 8.0, 1000.0, &["bps", "Kbps", "Mbps", "Gbps", "Tbps"])
        }
    }
}

/// Indices into `stats` ranked descending by the chosen aggregate of
/// `metric`, truncated to `top`. The sort is stable: machines with equal
/// values keep their collection order.
fn rank(stats: &[MachineStats], metric: MetricKind, aggregation: Aggregation, top: usize) -> Vec<(usize, f64)> {
    let mut order: Vec<(usize, f64)> = stats
        .iter()
        .enumerate()
        .map(|(idx, machine)| {
            let value = machine
                .aggregates
                .get(&metric)
                .map(|aggregate| aggregation.pick(aggregate))
                .unwrap_or(0.0);
            (idx, value)
        })
        .collect();
    order.sort_by(|a, b| b.1.total_cmp(&a.1));
    order.truncate(top);
    order
}

fn anomaly_lines(ledger: &AnomalyLedger, top: usize) -> Vec<String> {
    let mut lines = Vec::new();
    if ledger.is_empty() {
        return lines;
    }

    lines.push("ANOMALOUS SAMPLES (ignored in the rankings below)".to_string());
    for (rank, (machine, entries)) in ledger.ranked().iter().take(top).enumerate() {
        let detail: Vec<String> = entries
            .iter()
            .map(|(metric, value)| format!("{}={:.0}", metric, value))
            .collect();
        lines.push(format!(
            "#{:<3} {} ({} samples): {}",
            rank + 1,
            machine,
            entries.len(),
            detail.join(", ")
        ));
    }
    lines.push(String::new());
    lines
}

fn metric_lines(
    stats: &[MachineStats],
    metric: MetricKind,
    aggregation: Aggregation,
    top: usize,
) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("TOP {} BY {} ({})", top, metric, aggregation));
    for (rank, (idx, value)) in rank(stats, metric, aggregation, top).into_iter().enumerate() {
        let record = &stats[idx].record;
        lines.push(format!(
            "#{:<3} {:>12}  {} ({})",
            rank + 1,
            format_metric(metric, value),
            record.node,
            record.name
        ));
    }
    lines.push(String::new());
    lines
}

/// Assemble the full report: anomaly summary first, then one ranked block
/// per tracked metric.
pub fn render_report(
    stats: &[MachineStats],
    ledger: &AnomalyLedger,
    aggregation: Aggregation,
    top: usize,
) -> String {
    let mut lines = anomaly_lines(ledger, top);
    for metric in MetricKind::ALL {
        lines.extend(metric_lines(stats, metric, aggregation, top));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        MachineKind, MachineRecord, MachineStatus, MetricAggregate,
    };
    use std::collections::HashMap;

    fn machine(name: &str, node: &str, values: &[(MetricKind, f64)]) -> MachineStats {
        let aggregates: HashMap<MetricKind, MetricAggregate> = MetricKind::ALL
            .iter()
            .map(|&metric| {
                let value = values
                    .iter()
                    .find(|(m, _)| *m == metric)
                    .map(|(_, v)| *v)
                    .unwrap_or(0.0);
                (
                    metric,
                    MetricAggregate {
                        average: value,
                        median: value,
                        max: value,
                        ignored: 0,
                    },
                )
            })
            .collect();
        MachineStats {
            record: MachineRecord {
                id: 0,
                name: name.to_string(),
                node: node.to_string(),
                kind: MachineKind::Qemu,
                status: MachineStatus::Running,
                uuid: None,
            },
            aggregates,
        }
    }

    #[test]
    fn test_cpu_formatting() {
        assert_eq!(format_metric(MetricKind::Cpu, 0.1234), "12%");
        assert_eq!(format_metric(MetricKind::Cpu, 1.0), "100%");
    }

    #[test]
    fn test_disk_formatting_scales_by_1024() {
        assert_eq!(format_metric(MetricKind::DiskRead, 512.0), "512.0 B/s");
        assert_eq!(format_metric(MetricKind::DiskRead, 1048576.0), "1.0 MiB/s");
        assert_eq!(
            format_metric(MetricKind::DiskWrite, 1536.0 * 1024.0 * 1024.0),
            "1.5 GiB/s"
        );
    }

    #[test]
    fn test_net_formatting_converts_to_bits() {
        // 125000 bytes/s is exactly 1,000,000 bits/s.
        assert_eq!(format_metric(MetricKind::NetIn, 125000.0), "1.0 Mbps");
        assert_eq!(format_metric(MetricKind::NetOut, 100.0), "800.0 bps");
    }

    #[test]
    fn test_ranking_is_stable_on_ties() {
        let stats = vec![
            machine("a", "pve1", &[(MetricKind::Cpu, 0.5)]),
            machine("b", "pve1", &[(MetricKind::Cpu, 0.5)]),
            machine("c", "pve2", &[(MetricKind::Cpu, 0.5)]),
        ];
        let order = rank(&stats, MetricKind::Cpu, Aggregation::Median, 8);
        let names: Vec<&str> = order
            .iter()
            .map(|(idx, _)| stats[*idx].record.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_top_n_truncation() {
        let values = [50.0, 40.0, 30.0, 20.0, 10.0];
        let stats: Vec<MachineStats> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| machine(&format!("m{}", i), "pve1", &[(MetricKind::Cpu, v)]))
            .collect();

        let order = rank(&stats, MetricKind::Cpu, Aggregation::Average, 2);
        assert_eq!(order.len(), 2);
        assert_eq!(stats[order[0].0].record.name, "m0");
        assert_eq!(stats[order[1].0].record.name, "m1");
    }

    #[test]
    fn test_report_layout() {
        let stats = vec![
            machine("web-01", "pve1", &[(MetricKind::DiskRead, 1048576.0)]),
            machine("db-01", "pve2", &[(MetricKind::DiskRead, 2048.0)]),
        ];
        let ledger = AnomalyLedger::default();
        let report = render_report(&stats, &ledger, Aggregation::Median, 8);

        // No anomaly block when the ledger is empty.
        assert!(!report.contains("ANOMALOUS"));
        assert!(report.contains("TOP 8 BY diskread (median)"));
        let disk_block: Vec<&str> = report
            .lines()
            .skip_while(|line| !line.contains("BY diskread"))
            .take(3)
            .collect();
        assert!(disk_block[1].contains("1.0 MiB/s"));
        assert!(disk_block[1].contains("pve1 (web-01)"));
        assert!(disk_block[2].contains("2.0 KiB/s"));
    }

    #[test]
    fn test_anomaly_block_comes_first() {
        let stats = vec![machine("web-01", "pve1", &[(MetricKind::Cpu, 0.2)])];
        let mut ledger = AnomalyLedger::default();
        ledger.record("web-01", MetricKind::NetIn, 1e13);

        let report = render_report(&stats, &ledger, Aggregation::Median, 8);
        let first_line = report.lines().next().unwrap();
        assert!(first_line.contains("ANOMALOUS"));
        assert!(report.contains("web-01 (1 samples): netin=10000000000000"));
    }
}
