//! Expected prefix sets

use std::collections::BTreeSet;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use tracing::warn;

use crate::{Result, SpeakerError};

/// Parse an address or CIDR into the prefix announced for it. Plain
/// addresses become host routes (/32 or /128); CIDRs are normalized to
/// their network address.
pub fn parse_prefix(input: &str) -> Result<IpNetwork> {
    let input = input.trim();
    let invalid = |reason: String| SpeakerError::InvalidPrefix {
        input: input.to_string(),
        reason,
    };

    if input.contains('/') {
        let net: IpNetwork = input.parse().map_err(|e| invalid(format!("{}", e)))?;
        IpNetwork::new(net.network(), net.prefix()).map_err(|e| invalid(format!("{}", e)))
    } else {
        let ip: IpAddr = input.parse().map_err(|e| invalid(format!("{}", e)))?;
        Ok(IpNetwork::from(ip))
    }
}

/// The set of prefixes that should be announced right now.
///
/// A set is always computed from scratch for a reconciliation pass and then
/// handed to [`crate::reconcile_routes`] as a whole.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefixSet(BTreeSet<IpNetwork>);

impl PrefixSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, prefix: IpNetwork) -> bool {
        self.0.insert(prefix)
    }

    /// Add an address or CIDR string. Unparseable input is logged and skipped
    /// so one bad object cannot block the rest of the pass.
    pub fn add(&mut self, input: &str) {
        match parse_prefix(input) {
            Ok(prefix) => {
                self.0.insert(prefix);
            }
            Err(e) => warn!("Skipping expected prefix: {}", e),
        }
    }

    pub fn contains(&self, prefix: &IpNetwork) -> bool {
        self.0.contains(prefix)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpNetwork> {
        self.0.iter()
    }
}

impl FromIterator<IpNetwork> for PrefixSet {
    fn from_iter<T: IntoIterator<Item = IpNetwork>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PrefixSet {
    type Item = &'a IpNetwork;
    type IntoIter = std::collections::btree_set::Iter<'a, IpNetwork>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
