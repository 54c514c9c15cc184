//! Command-line arguments and the `~/.vmtoprc` defaults file.
//!
//! The rc file holds `key=value` lines for `hostname`, `username` and
//! `password`; explicit CLI arguments always win. The password is prompted
//! interactively only when the file does not provide one.

use std::fs;
use std::path::Path;

use clap::Parser;
use color_eyre::eyre::{bail, Result, WrapErr};
use log::warn;

use crate::types::{Aggregation, Timeframe};

/// Name of the defaults file, looked up in the user's home directory.
pub const RC_FILE_NAME: &str = ".vmtoprc";

/// Rank the top resource consumers of a virtualization cluster
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Cluster API hostname, optionally with port (host[:port])
    pub hostname: Option<String>,

    /// API username; the @pam realm is assumed when none is given
    pub username: Option<String>,

    /// Glob patterns selecting machines by display name
    pub patterns: Vec<String>,

    /// Number of machines listed per metric
    #[arg(long, default_value_t = 8)]
    pub top: usize,

    /// History window to aggregate over
    #[arg(long, value_enum, default_value_t = Timeframe::Hour)]
    pub timeframe: Timeframe,

    /// Statistic that drives the ranking
    #[arg(long, value_enum, default_value_t = Aggregation::Median)]
    pub aggregation: Aggregation,

    /// Only consider machines with a volume on a matching storage
    #[arg(long, value_name = "GLOB")]
    pub only_storage: Option<String>,

    /// Accept self-signed TLS certificates from the cluster
    #[arg(long)]
    pub insecure: bool,
}

/// Values prefilled from the defaults file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Connection parameters after merging CLI arguments over the defaults
/// file. A missing password means the caller should prompt for one.
#[derive(Debug)]
pub struct Connection {
    pub hostname: String,
    pub username: String,
    pub password: Option<String>,
}

fn parse_defaults(content: &str, origin: &Path) -> Defaults {
    let mut defaults = Defaults::default();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!("ignoring malformed line in {}: {}", origin.display(), line);
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "hostname" => defaults.hostname = Some(value),
            "username" => defaults.username = Some(value),
            "password" => defaults.password = Some(value),
            other => warn!("ignoring unknown key '{}' in {}", other, origin.display()),
        }
    }
    defaults
}

/// Load defaults from a specific file. A missing file yields empty defaults.
pub fn load_defaults_from(path: &Path) -> Result<Defaults> {
    if !path.exists() {
        return Ok(Defaults::default());
    }
    let content = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read defaults file {}", path.display()))?;
    Ok(parse_defaults(&content, path))
}

/// Load defaults from `~/.vmtoprc`, if the home directory is known.
pub fn load_defaults() -> Result<Defaults> {
    match dirs_next::home_dir() {
        Some(home) => load_defaults_from(&home.join(RC_FILE_NAME)),
        None => Ok(Defaults::default()),
    }
}

/// Resolve connection parameters, CLI arguments taking precedence over the
/// defaults file.
pub fn resolve(args: &Args, defaults: &Defaults) -> Result<Connection> {
    let Some(hostname) = args.hostname.clone().or_else(|| defaults.hostname.clone()) else {
        bail!("no hostname given on the command line or in ~/{}", RC_FILE_NAME);
    };
    let Some(username) = args.username.clone().or_else(|| defaults.username.clone()) else {
        bail!("no username given on the command line or in ~/{}", RC_FILE_NAME);
    };
    Ok(Connection {
        hostname,
        username,
        password: defaults.password.clone(),
    })
}
