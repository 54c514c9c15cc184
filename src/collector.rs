//! Inventory walk and per-machine sample collection.
//!
//! Runs once per invocation: lists every machine cluster-wide, applies the
//! name/storage filters and status rules, and fetches the time-series rows
//! for each machine that survives. Any fetch-layer failure aborts the whole
//! run with the machine's name and id attached; data-quality problems are
//! tolerated and surfaced as warnings.

use std::collections::{HashMap, HashSet};

use color_eyre::eyre::{ensure, eyre, Result, WrapErr};
use log::{info, warn};
use regex::Regex;
use uuid::Uuid;

use crate::api::{ClusterApi, InventoryItem, MachineConfig};
use crate::types::{Aggregation, MachineKind, MachineRecord, MachineStatus, SampleRow, Timeframe};

/// One machine together with its raw sample rows for the requested
/// timeframe. Rows carry all metrics; a metric can be absent per row.
#[derive(Debug)]
pub struct MachineUsage {
    pub record: MachineRecord,
    pub rows: Vec<SampleRow>,
}

/// Compile a shell-style glob (`*`, `?`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(&ch.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).wrap_err_with(|| format!("invalid filter pattern '{}'", pattern))
}

/// Extract the UUID from a machine configuration. QEMU machines carry it in
/// the `smbios1` field as `uuid=...` among other comma-separated pairs;
/// containers usually have none.
fn extract_uuid(config: &MachineConfig) -> Option<String> {
    let smbios = config.get("smbios1")?.as_str()?;
    smbios
        .split(',')
        .find_map(|pair| pair.strip_prefix("uuid="))
        .map(str::to_string)
}

/// Config keys describing attached volumes.
fn is_volume_key(key: &str) -> bool {
    if key == "rootfs" {
        return true;
    }
    for prefix in ["ide", "sata", "scsi", "virtio", "efidisk", "mp"] {
        if let Some(rest) = key.strip_prefix(prefix) {
            if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
                return true;
            }
        }
    }
    false
}

/// Storage identifiers of all attached volumes. A volume value looks like
/// `local-lvm:vm-100-disk-0,size=32G`; the storage is the part before the
/// first colon. Values without one (e.g. `none,media=cdrom`) are skipped.
fn volume_storages(config: &MachineConfig) -> Vec<String> {
    config
        .iter()
        .filter(|(key, _)| is_volume_key(key))
        .filter_map(|(_, value)| value.as_str())
        .filter_map(|volume| {
            let storage = volume.split(':').next().unwrap_or_default();
            if storage.is_empty() || storage.contains(',') || storage.contains('=') {
                None
            } else {
                Some(storage.to_string())
            }
        })
        .collect()
}

/// Invalid-UUID machine names (sorted) and groups of machines sharing one
/// UUID, over the collected set.
fn uuid_findings(machines: &[MachineUsage]) -> (Vec<String>, Vec<(Uuid, Vec<String>)>) {
    let mut invalid: Vec<String> = Vec::new();
    let mut by_uuid: HashMap<Uuid, Vec<String>> = HashMap::new();

    for machine in machines {
        let parsed = machine
            .record
            .uuid
            .as_deref()
            .map(Uuid::parse_str);
        match parsed {
            Some(Ok(uuid)) => by_uuid
                .entry(uuid)
                .or_default()
                .push(machine.record.name.clone()),
            _ => invalid.push(machine.record.name.clone()),
        }
    }

    invalid.sort_unstable();
    let mut shared: Vec<(Uuid, Vec<String>)> = by_uuid
        .into_iter()
        .filter(|(_, names)| names.len() > 1)
        .collect();
    shared.sort_by_key(|(uuid, _)| *uuid);
    (invalid, shared)
}

/// Walks the inventory and collects raw samples for every machine that
/// passes the filters.
pub struct Collector<'a> {
    api: &'a dyn ClusterApi,
    timeframe: Timeframe,
    aggregation: Aggregation,
    name_filters: Vec<Regex>,
    storage_filter: Option<Regex>,
    /// Nodes already reported as down, so each is warned about once per run.
    warned_down_nodes: HashSet<String>,
}

impl<'a> Collector<'a> {
    pub fn new(
        api: &'a dyn ClusterApi,
        timeframe: Timeframe,
        aggregation: Aggregation,
        name_patterns: &[String],
        only_storage: Option<&str>,
    ) -> Result<Self> {
        let name_filters = name_patterns
            .iter()
            .map(|pattern| glob_to_regex(pattern))
            .collect::<Result<Vec<_>>>()?;
        let storage_filter = only_storage.map(glob_to_regex).transpose()?;

        Ok(Collector {
            api,
            timeframe,
            aggregation,
            name_filters,
            storage_filter,
            warned_down_nodes: HashSet::new(),
        })
    }

    /// Run the collection pass. `now` is the reference timestamp for the
    /// 5-minute cutoff; machines are processed strictly in inventory order,
    /// which later ranking relies on for tie-breaking.
    pub fn collect(&mut self, now: i64) -> Result<Vec<MachineUsage>> {
        let items = self
            .api
            .list_machines()
            .wrap_err("failed to list cluster machines")?;
        info!("Inventory lists {} machines", items.len());

        let mut collected: Vec<MachineUsage> = Vec::new();
        let mut seen_names: HashSet<String> = HashSet::new();

        for item in &items {
            let usage = self.collect_one(item, now).wrap_err_with(|| {
                format!(
                    "while processing machine '{}' (vmid {})",
                    item.display_name(),
                    item.vmid
                )
            })?;
            if let Some(usage) = usage {
                ensure!(
                    seen_names.insert(usage.record.name.clone()),
                    "duplicate machine name '{}' in inventory",
                    usage.record.name
                );
                collected.push(usage);
            }
        }

        self.report_uuid_problems(&collected);
        Ok(collected)
    }

    fn collect_one(&mut self, item: &InventoryItem, now: i64) -> Result<Option<MachineUsage>> {
        let name = item.display_name();

        if !self.name_filters.is_empty()
            && !self.name_filters.iter().any(|filter| filter.is_match(&name))
        {
            return Ok(None);
        }

        let kind = MachineKind::from_api(&item.kind)
            .ok_or_else(|| eyre!("unsupported machine kind '{}'", item.kind))?;

        // Config is needed by both the storage filter and the UUID lookup;
        // fetch it at most once.
        let mut config: Option<MachineConfig> = None;

        if let Some(filter) = &self.storage_filter {
            let fetched = self
                .api
                .machine_config(&item.node, kind, item.vmid)
                .wrap_err("failed to fetch machine configuration")?;
            let matches = volume_storages(&fetched)
                .iter()
                .any(|storage| filter.is_match(storage));
            if !matches {
                return Ok(None);
            }
            config = Some(fetched);
        }

        let status = match &item.status {
            None => {
                if self.warned_down_nodes.insert(item.node.clone()) {
                    warn!("node '{}' appears to be down, skipping its machines", item.node);
                }
                return Ok(None);
            }
            Some(raw) => MachineStatus::from_api(raw),
        };
        match &status {
            MachineStatus::Stopped => return Ok(None),
            MachineStatus::Other(raw) => {
                warn!(
                    "machine '{}' is in unexpected state '{}', skipping: {:?}",
                    name, raw, item
                );
                return Ok(None);
            }
            MachineStatus::Running | MachineStatus::Paused => {}
        }

        let config = match config {
            Some(config) => config,
            None => self
                .api
                .machine_config(&item.node, kind, item.vmid)
                .wrap_err("failed to fetch machine configuration")?,
        };
        let uuid = extract_uuid(&config);

        info!("Fetching {} samples for '{}'", self.timeframe.api_name(), name);
        let mut rows = self
            .api
            .sample_rows(
                &item.node,
                kind,
                item.vmid,
                self.timeframe.api_name(),
                self.aggregation.api_cf(),
            )
            .wrap_err("failed to fetch sample rows")?;

        if let Some(cutoff) = self.timeframe.cutoff_secs() {
            rows.retain(|row| row.time >= now - cutoff);
        }

        Ok(Some(MachineUsage {
            record: MachineRecord {
                id: item.vmid,
                name,
                node: item.node.clone(),
                kind,
                status,
                uuid,
            },
            rows,
        }))
    }

    fn report_uuid_problems(&self, machines: &[MachineUsage]) {
        let (invalid, shared) = uuid_findings(machines);
        if !invalid.is_empty() {
            warn!(
                "machines without a valid UUID: {}",
                invalid.join(", ")
            );
        }
        for (uuid, names) in shared {
            warn!("UUID {} is shared by machines: {}", uuid, names.join(", "));
        }
    }
}
