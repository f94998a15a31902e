//! Runtime configuration.
//!
//! A TOML file (path in `MEMSTAT_CONFIG`) is parsed into optional sections,
//! then resolved against defaults and validated:
//!
//! ```toml
//! [table]
//! initial_capacity = 8192   # power of two
//!
//! [report]
//! enabled = true
//! signal = "SIGQUIT"        # SIGQUIT, SIGUSR1 or SIGUSR2
//!
//! [log]
//! level = "info"
//! ```
//!
//! `MEMSTAT_SIGNAL` and `MEMSTAT_LOG` override the file.

use crate::error::{Error, Result};
use crate::reporter::ReportSignal;
use crate::table::DEFAULT_CAPACITY;
use log::LevelFilter;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

pub const CONFIG_ENV: &str = "MEMSTAT_CONFIG";
pub const SIGNAL_ENV: &str = "MEMSTAT_SIGNAL";
pub const LOG_ENV: &str = "MEMSTAT_LOG";

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TableSection {
    initial_capacity: Option<usize>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ReportSection {
    enabled: Option<bool>,
    signal: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LogSection {
    level: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    table: TableSection,
    #[serde(default)]
    report: ReportSection,
    #[serde(default)]
    log: LogSection,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableConfig {
    /// Slots reserved up front; the table doubles from here.
    pub initial_capacity: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportConfig {
    /// Whether a signal-driven reporter should be installed.
    pub enabled: bool,
    pub signal: ReportSignal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    pub level: LevelFilter,
}

/// Resolved, validated configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub table: TableConfig,
    pub report: ReportConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table: TableConfig {
                initial_capacity: DEFAULT_CAPACITY,
            },
            report: ReportConfig {
                enabled: true,
                signal: ReportSignal::Quit,
            },
            log: LogConfig {
                level: LevelFilter::Info,
            },
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text)?;
        resolve(raw, |_| None)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Read the file named by `MEMSTAT_CONFIG` (defaults if unset), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let raw = match env::var_os(CONFIG_ENV) {
            Some(path) => {
                let text = fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
                    path: path.clone().into(),
                    source,
                })?;
                toml::from_str(&text)?
            }
            None => RawConfig::default(),
        };
        let config = resolve(raw, |key| env::var(key).ok())?;
        log::debug!("loaded config: {config:?}");
        Ok(config)
    }
}

/// Fill defaults, apply overrides from `lookup`, validate.
fn resolve(raw: RawConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let initial_capacity = raw.table.initial_capacity.unwrap_or(DEFAULT_CAPACITY);
    if initial_capacity == 0 || !initial_capacity.is_power_of_two() {
        return Err(Error::InvalidConfig(format!(
            "table.initial_capacity ({initial_capacity}) must be a non-zero power of 2"
        )));
    }

    let signal = match lookup(SIGNAL_ENV).or(raw.report.signal) {
        Some(name) => name.parse()?,
        None => ReportSignal::default(),
    };

    let level = match lookup(LOG_ENV).or(raw.log.level) {
        Some(name) => name.parse::<LevelFilter>().map_err(|_| {
            Error::InvalidConfig(format!(
                "log.level `{name}` is not one of off, error, warn, info, debug, trace"
            ))
        })?,
        None => LevelFilter::Info,
    };

    Ok(Config {
        table: TableConfig { initial_capacity },
        report: ReportConfig {
            enabled: raw.report.enabled.unwrap_or(true),
            signal,
        },
        log: LogConfig { level },
    })
}
