//! [`RouteSpeaker`] driving a gobgpd sidecar

use std::collections::BTreeMap;
use std::net::IpAddr;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use speaker_core::RouteSpeaker;
use tracing::{debug, info, warn};

use crate::cli::GobgpCli;
use crate::config::BgpConfig;
use crate::error::{GobgpError, Result};

/// One path of a RIB destination as printed by `gobgp global rib -j`
#[derive(Debug, Default, Deserialize)]
struct RibPath {
    /// Peer the path was learned from; unset for paths added through the API
    #[serde(rename = "neighbor-ip", default)]
    neighbor_ip: Option<String>,

    #[serde(default)]
    withdrawal: bool,
}

impl RibPath {
    fn is_local(&self) -> bool {
        if self.withdrawal {
            return false;
        }
        match self.neighbor_ip.as_deref().map(str::trim) {
            None | Some("") | Some("<nil>") => true,
            Some(ip) => ip.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified()),
        }
    }
}

/// Locally originated prefixes in a `gobgp global rib -j` dump. The dump is
/// an object keyed by prefix; an empty RIB prints nothing, `null` or `{}`.
/// Destinations whose paths were all learned from a neighbor are skipped.
pub fn parse_rib(output: &str) -> Result<Vec<IpNetwork>> {
    let output = output.trim();
    if output.is_empty() || output == "null" {
        return Ok(Vec::new());
    }

    let rib: BTreeMap<String, Vec<RibPath>> =
        serde_json::from_str(output).map_err(|e| GobgpError::Parse(e.to_string()))?;
    let mut prefixes = Vec::new();
    for (key, paths) in rib {
        let prefix = key
            .parse::<IpNetwork>()
            .map_err(|e| GobgpError::Parse(format!("prefix {}: {}", key, e)))?;
        if paths.iter().any(RibPath::is_local) {
            prefixes.push(prefix);
        }
    }
    Ok(prefixes)
}

pub struct GobgpSpeaker {
    cli: GobgpCli,
    config: BgpConfig,
}

impl GobgpSpeaker {
    pub fn new(cli: GobgpCli, config: BgpConfig) -> Self {
        Self { cli, config }
    }

    /// Start the global BGP instance and add every configured neighbor
    pub async fn configure(&self) -> Result<()> {
        let router_id = self.config.effective_router_id()?;
        self.cli
            .run(&self.cli.global_args(self.config.cluster_as, router_id))
            .await?;
        info!(asn = self.config.cluster_as, %router_id, "Started BGP instance");

        for neighbor in self.config.neighbors() {
            let local = self.config.local_address(neighbor.is_ipv4());
            self.cli
                .run(&self.cli.neighbor_add_args(neighbor, self.config.neighbor_as, local))
                .await?;
            info!(%neighbor, asn = self.config.neighbor_as, ?local, "Added BGP neighbor");
        }
        Ok(())
    }

    async fn lookup(&self, prefix: &IpNetwork) -> Result<bool> {
        let output = self.cli.run(&self.cli.rib_lookup_args(prefix)).await?;
        Ok(parse_rib(&output)?.contains(prefix))
    }
}

#[async_trait]
impl RouteSpeaker for GobgpSpeaker {
    async fn announce(&self, prefix: &IpNetwork) -> speaker_core::Result<()> {
        let args = self.cli.rib_add_args(prefix, self.config.next_hop(prefix));
        self.cli.run(&args).await?;
        debug!(prefix = %prefix, "gobgp route added");
        Ok(())
    }

    async fn withdraw(&self, prefix: &IpNetwork) -> speaker_core::Result<()> {
        self.cli.run(&self.cli.rib_del_args(prefix)).await?;
        debug!(prefix = %prefix, "gobgp route deleted");
        Ok(())
    }

    async fn is_announced(&self, prefix: &IpNetwork) -> bool {
        match self.lookup(prefix).await {
            Ok(found) => found,
            Err(e) => {
                warn!(prefix = %prefix, "Failed to look up route in gobgp: {}", e);
                false
            }
        }
    }

    async fn announced(&self) -> speaker_core::Result<Vec<IpNetwork>> {
        let mut prefixes = Vec::new();
        for fam in ["ipv4", "ipv6"] {
            let output = self.cli.run(&self.cli.rib_list_args(fam)).await?;
            prefixes.extend(parse_rib(&output)?);
        }
        Ok(prefixes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_rib() {
        assert!(parse_rib("").unwrap().is_empty());
        assert!(parse_rib("null\n").unwrap().is_empty());
        assert!(parse_rib("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rib_keys() {
        let output = r#"{
            "172.18.0.10/32": [{"nlri": {"prefix": "172.18.0.10/32"}, "age": 10, "best": true}],
            "10.16.0.0/16": [{"nlri": {"prefix": "10.16.0.0/16"}, "age": 20, "best": true}]
        }"#;
        let mut prefixes = parse_rib(output).unwrap();
        prefixes.sort();
        assert_eq!(
            prefixes,
            vec![
                "10.16.0.0/16".parse::<IpNetwork>().unwrap(),
                "172.18.0.10/32".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_rib_skips_peer_learned_paths() {
        let output = r#"{
            "0.0.0.0/0": [{"nlri": {"prefix": "0.0.0.0/0"}, "neighbor-ip": "10.0.0.1"}],
            "172.18.0.10/32": [
                {"nlri": {"prefix": "172.18.0.10/32"}, "neighbor-ip": "10.0.0.1", "best": true},
                {"nlri": {"prefix": "172.18.0.10/32"}, "best": false}
            ],
            "172.18.0.11/32": [{"nlri": {"prefix": "172.18.0.11/32"}, "neighbor-ip": "<nil>"}],
            "fd00::10/128": [{"nlri": {"prefix": "fd00::10/128"}, "neighbor-ip": "fd00::1"}],
            "172.18.0.12/32": [{"nlri": {"prefix": "172.18.0.12/32"}, "withdrawal": true}]
        }"#;
        assert_eq!(
            parse_rib(output).unwrap(),
            vec![
                "172.18.0.10/32".parse::<IpNetwork>().unwrap(),
                "172.18.0.11/32".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_rib_rejects_garbage() {
        assert!(matches!(parse_rib("not json"), Err(GobgpError::Parse(_))));
        assert!(matches!(parse_rib(r#"{"bogus": []}"#), Err(GobgpError::Parse(_))));
    }

    #[tokio::test]
    async fn test_lookup_failure_reads_as_not_announced() {
        let speaker = GobgpSpeaker::new(
            GobgpCli::new("/nonexistent/gobgp", "127.0.0.1", 50051),
            BgpConfig::default(),
        );
        let prefix: IpNetwork = "172.18.0.10/32".parse().unwrap();
        assert!(!speaker.is_announced(&prefix).await);
        assert!(speaker.announce(&prefix).await.is_err());
    }
}
