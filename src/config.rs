//! On-disk configuration and the CLI surface (§6 "CLI surface", SPEC_FULL §C).

use std::fs::read_to_string;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use codec::channel::{ChannelMeta, GeoPoint};

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

/// Where a channel's RTP multicast stream is received (§6 "Inbound (packet
/// source)"). The packet source itself is an external collaborator; this
/// is only the bind information the reference multicast listener needs.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelSource {
    pub multicast_addr: SocketAddr,
    #[serde(default = "ChannelSource::default_interface")]
    pub interface: Ipv4Addr,
}

impl ChannelSource {
    fn default_interface() -> Ipv4Addr {
        Ipv4Addr::UNSPECIFIED
    }
}

/// One channel's full configuration: the static metadata every [`codec::segment::Segment`]
/// carries (§6 "Inbound (channel config)"), plus where to receive it from.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelConfig {
    #[serde(flatten)]
    pub meta: ChannelMeta,
    pub source: ChannelSource,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Ntp {
    #[serde(default = "Ntp::default_refresh_seconds")]
    pub refresh_seconds: u64,
}

impl Ntp {
    fn default_refresh_seconds() -> u64 {
        64
    }
}

impl Default for Ntp {
    fn default() -> Self {
        Self { refresh_seconds: Self::default_refresh_seconds() }
    }
}

/// Output directories for the three outbound interfaces (§6): the raw
/// archive, the per-method daily CSVs, and the versioned JSON state files.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Storage {
    pub archive_dir: PathBuf,
    pub csv_dir: PathBuf,
    pub state_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub ntp: Ntp,
    /// Where this receiver sits, used for great-circle propagation delay
    /// (§4.6 `tau_geo`) and BCD dual-peak station assignment (§4.5). One
    /// receiver records every configured channel, so this is site-wide
    /// rather than per-channel.
    pub receiver_location: GeoPoint,
    pub storage: Storage,
    pub channels: Vec<ChannelConfig>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        Ok(toml::from_str(&read_to_string(path)?)?)
    }
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// The minimal CLI surface (§6): `run` starts every configured channel's
/// pipeline, `reset-state` clears one channel's persisted TimeSnap/Kalman
/// state so it re-acquires from scratch.
#[derive(Subcommand, Debug)]
pub enum Command {
    Run {
        #[arg(long, short)]
        config: String,
    },
    ResetState {
        #[arg(long, short)]
        config: String,
        #[arg(long)]
        channel: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NtpStatus {
    pub synchronized: bool,
    pub offset_ms: f64,
    pub stratum: u8,
}

impl Default for NtpStatus {
    fn default() -> Self {
        Self { synchronized: false, offset_ms: 0.0, stratum: 16 }
    }
}
