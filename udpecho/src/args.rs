use std::net::IpAddr;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Opts {
    #[command(subcommand)]
    pub mode: Modes,
}

#[derive(Subcommand, Debug)]
pub enum Modes {
    /// Set udpecho to run as the probing client
    #[command(arg_required_else_help = true)]
    Probe {
        #[command(subcommand)]
        source: ProbeSource,
    },

    /// Set udpecho to run as the echo responder
    Respond(RespondOpts),
}

#[derive(Subcommand, Debug)]
pub enum ProbeSource {
    #[command(arg_required_else_help = true)]
    /// Load the probe configuration from a JSON file
    File(FileOpts),
    #[command(arg_required_else_help = true)]
    /// Configure the probe from command line flags
    Opts(ProbeOpts),
}

impl ProbeSource {
    pub fn resolve(self) -> Result<ProbeOpts> {
        match self {
            ProbeSource::File(file) => {
                let raw = std::fs::read_to_string(&file.path)?;
                Ok(serde_json::from_str(&raw)?)
            }
            ProbeSource::Opts(opts) => Ok(opts),
        }
    }
}

#[derive(Args, Clone, Debug, Deserialize, Serialize)]
pub struct FileOpts {
    /// Path to the config file
    #[arg(long, short)]
    pub path: String,
}

#[derive(Args, Clone, Debug, Deserialize, Serialize)]
pub struct ProbeOpts {
    /// Set the destination address of the responder
    #[arg(long)]
    pub dst_addr: IpAddr,
    /// Set the destination port of the responder
    #[arg(long, default_value = "5005")]
    pub dst_port: u16,
    /// Number of probes to send
    #[arg(long, short, default_value = "100")]
    pub count: u32,
    /// Size of each probe datagram in bytes, header included
    #[arg(long, short, default_value = "64")]
    pub size: usize,
    /// Interval between probes in seconds
    #[arg(long, short, default_value = "0.01")]
    pub interval: f64,
    /// Interface to bind to
    #[arg(long)]
    pub iface: Option<String>,
    /// Save the per-probe results to a file (timestamped name if omitted)
    #[arg(long)]
    pub file: Option<String>,
}

#[derive(Args, Clone, Debug, Deserialize, Serialize)]
pub struct RespondOpts {
    /// Set the listen address
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_addr: IpAddr,
    /// Set the listen port
    #[arg(long, default_value = "5005")]
    pub listen_port: u16,
    /// Interface to bind to
    #[arg(long)]
    pub iface: Option<String>,
    /// Save the per-packet results to a file (timestamped name if omitted)
    #[arg(long)]
    pub file: Option<String>,
}
