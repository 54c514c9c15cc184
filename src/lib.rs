//! # vmtop - Top resource consumers for a virtualization cluster
//!
//! Queries a Proxmox-style management API for per-machine resource-usage
//! history (CPU, disk read/write, network in/out), aggregates it over a
//! requested timeframe, and prints the top-N consumers per metric.
//!
//! ## Pipeline
//!
//! One invocation is a strict two-stage batch pass:
//!
//! 1. The [`collector`] walks the cluster inventory once, applies the
//!    name/storage filters and status rules, and fetches raw sample rows per
//!    machine, sequentially, with blocking I/O.
//! 2. The [`aggregate`] stage computes average/median/max per machine and
//!    metric (quarantining anomalous samples), and [`report`] ranks and
//!    formats the result for the terminal.
//!
//! Nothing is persisted; every run starts from scratch.
//!
//! ## Modules
//!
//! - `types`: shared data model (machines, metrics, timeframes, aggregates)
//! - `api`: the `ClusterApi` trait and its blocking HTTP implementation
//! - `collector`: inventory walk, filtering, and sample collection
//! - `aggregate`: per-metric statistics and the anomaly ledger
//! - `report`: ranking, unit scaling, and plain-text report assembly
//! - `config`: CLI arguments and the `~/.vmtoprc` defaults file
//!
//! ## Known approximations
//!
//! The backing API supports neither a 5-minute timeframe nor a MEDIAN
//! consolidation function. The former is emulated by fetching the hourly
//! series and discarding rows older than five minutes; the latter by asking
//! for AVERAGE and taking the median of the already-averaged samples. The
//! median therefore is not a true median of raw data. Both substitutions are
//! deliberate, long-standing behavior.

pub mod aggregate;
pub mod api;
pub mod collector;
pub mod config;
pub mod report;
pub mod types;
