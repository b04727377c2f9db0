//! Wrapper for the gobgp command line client

use std::net::{IpAddr, Ipv4Addr};
use std::process::Stdio;

use ipnetwork::IpNetwork;
use tokio::process::Command;
use tracing::trace;

use crate::error::{GobgpError, Result};

pub const DEFAULT_GOBGP_BIN: &str = "gobgp";
pub const DEFAULT_GOBGP_HOST: &str = "127.0.0.1";
pub const DEFAULT_GOBGP_PORT: u16 = 50051;

/// Address family argument (`-a`) for a prefix
pub fn family(prefix: &IpNetwork) -> &'static str {
    match prefix {
        IpNetwork::V4(_) => "ipv4",
        IpNetwork::V6(_) => "ipv6",
    }
}

/// Runs gobgp against one gobgpd API endpoint
#[derive(Clone, Debug)]
pub struct GobgpCli {
    bin: String,
    host: String,
    port: u16,
}

impl Default for GobgpCli {
    fn default() -> Self {
        Self::new(DEFAULT_GOBGP_BIN, DEFAULT_GOBGP_HOST, DEFAULT_GOBGP_PORT)
    }
}

impl GobgpCli {
    pub fn new(bin: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            bin: bin.into(),
            host: host.into(),
            port,
        }
    }

    fn connection_args(&self) -> Vec<String> {
        vec![
            "-u".to_string(),
            self.host.clone(),
            "-p".to_string(),
            self.port.to_string(),
        ]
    }

    pub fn rib_add_args(&self, prefix: &IpNetwork, next_hop: Option<IpAddr>) -> Vec<String> {
        let mut args = self.rib_args(&["add"], prefix);
        if let Some(nh) = next_hop {
            args.extend(["nexthop".to_string(), nh.to_string()]);
        }
        args
    }

    pub fn rib_del_args(&self, prefix: &IpNetwork) -> Vec<String> {
        self.rib_args(&["del"], prefix)
    }

    /// Look up one prefix, JSON output
    pub fn rib_lookup_args(&self, prefix: &IpNetwork) -> Vec<String> {
        let mut args = self.rib_args(&[], prefix);
        args.push("-j".to_string());
        args
    }

    /// Dump the global RIB of one family, JSON output
    pub fn rib_list_args(&self, family: &str) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend(["global", "rib", "-a", family, "-j"].map(String::from));
        args
    }

    pub fn global_args(&self, asn: u32, router_id: Ipv4Addr) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend([
            "global".to_string(),
            "as".to_string(),
            asn.to_string(),
            "router-id".to_string(),
            router_id.to_string(),
        ]);
        args
    }

    pub fn neighbor_add_args(
        &self,
        neighbor: IpAddr,
        asn: u32,
        local: Option<IpAddr>,
    ) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend([
            "neighbor".to_string(),
            "add".to_string(),
            neighbor.to_string(),
            "as".to_string(),
            asn.to_string(),
        ]);
        if let Some(local) = local {
            args.extend(["local-address".to_string(), local.to_string()]);
        }
        args
    }

    fn rib_args(&self, action: &[&str], prefix: &IpNetwork) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend(["global", "rib"].map(String::from));
        args.extend(action.iter().map(|a| a.to_string()));
        args.extend([
            "-a".to_string(),
            family(prefix).to_string(),
            prefix.to_string(),
        ]);
        args
    }

    /// Run gobgp with `args` and return its stdout
    pub async fn run(&self, args: &[String]) -> Result<String> {
        trace!(bin = %self.bin, ?args, "Running gobgp");
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| GobgpError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(GobgpError::CommandFailed {
                command: format!("{} {}", self.bin, args.join(" ")),
                status: output.status,
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(stdout)
    }
}
