//! Diff/apply of expected prefixes against the speaker's live table

use ipnetwork::IpNetwork;
use tracing::{debug, error, info};

use crate::prefix::{parse_prefix, PrefixSet};
use crate::speaker::RouteSpeaker;
use crate::{Result, SpeakerError};

/// Mutations performed by one reconciliation pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub announced: usize,
    pub withdrawn: usize,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        self.announced == 0 && self.withdrawn == 0
    }
}

/// Make the speaker originate exactly `expected`.
///
/// Stale prefixes are withdrawn, missing ones announced. A prefix that fails
/// does not stop the others; all failures are joined into the returned
/// error and the prefixes that succeeded stay applied.
pub async fn reconcile_routes(
    speaker: &dyn RouteSpeaker,
    expected: &PrefixSet,
) -> Result<ReconcileSummary> {
    let current = speaker.announced().await?;
    let mut summary = ReconcileSummary::default();
    let mut errors = Vec::new();

    for prefix in current.iter().filter(|p| !expected.contains(p)) {
        match speaker.withdraw(prefix).await {
            Ok(()) => {
                info!(prefix = %prefix, "Withdrew stale BGP route");
                summary.withdrawn += 1;
            }
            Err(e) => {
                error!(prefix = %prefix, "Failed to withdraw BGP route: {}", e);
                errors.push(SpeakerError::Withdraw {
                    prefix: *prefix,
                    source: Box::new(e),
                });
            }
        }
    }

    for prefix in expected {
        if speaker.is_announced(prefix).await {
            continue;
        }
        match speaker.announce(prefix).await {
            Ok(()) => {
                info!(prefix = %prefix, "Announced BGP route");
                summary.announced += 1;
            }
            Err(e) => {
                error!(prefix = %prefix, "Failed to announce BGP route: {}", e);
                errors.push(SpeakerError::Announce {
                    prefix: *prefix,
                    source: Box::new(e),
                });
            }
        }
    }

    SpeakerError::join(errors)?;
    Ok(summary)
}

/// Result of applying one resource's addresses
#[derive(Debug, Default)]
pub struct AppliedRoutes {
    /// Prefixes the speaker was actually asked to change
    pub changed: Vec<IpNetwork>,
    pub errors: Vec<SpeakerError>,
}

impl AppliedRoutes {
    pub fn into_result(self) -> Result<Vec<IpNetwork>> {
        SpeakerError::join(self.errors)?;
        Ok(self.changed)
    }
}

/// Announce the addresses of `owner` that are not announced yet
pub async fn announce_addresses(
    speaker: &dyn RouteSpeaker,
    owner: &str,
    addresses: &[&str],
) -> AppliedRoutes {
    let mut applied = AppliedRoutes::default();
    for address in addresses.iter().filter(|a| !a.is_empty()) {
        let prefix = match parse_prefix(address) {
            Ok(p) => p,
            Err(e) => {
                applied.errors.push(e);
                continue;
            }
        };
        if speaker.is_announced(&prefix).await {
            debug!(owner, prefix = %prefix, "BGP route already announced, skipping");
            continue;
        }
        match speaker.announce(&prefix).await {
            Ok(()) => applied.changed.push(prefix),
            Err(e) => {
                error!(owner, prefix = %prefix, "Failed to announce BGP route: {}", e);
                applied.errors.push(SpeakerError::Announce {
                    prefix,
                    source: Box::new(e),
                });
            }
        }
    }
    if !applied.changed.is_empty() {
        info!(owner, routes = ?applied.changed, "Announced BGP routes");
    }
    applied
}

/// Withdraw the addresses of `owner` that are currently announced
pub async fn withdraw_addresses(
    speaker: &dyn RouteSpeaker,
    owner: &str,
    addresses: &[&str],
) -> AppliedRoutes {
    let mut applied = AppliedRoutes::default();
    for address in addresses.iter().filter(|a| !a.is_empty()) {
        let prefix = match parse_prefix(address) {
            Ok(p) => p,
            Err(e) => {
                applied.errors.push(e);
                continue;
            }
        };
        if !speaker.is_announced(&prefix).await {
            debug!(owner, prefix = %prefix, "BGP route not announced, skipping withdraw");
            continue;
        }
        match speaker.withdraw(&prefix).await {
            Ok(()) => applied.changed.push(prefix),
            Err(e) => {
                error!(owner, prefix = %prefix, "Failed to withdraw BGP route: {}", e);
                applied.errors.push(SpeakerError::Withdraw {
                    prefix,
                    source: Box::new(e),
                });
            }
        }
    }
    if !applied.changed.is_empty() {
        info!(owner, routes = ?applied.changed, "Withdrew BGP routes");
    }
    applied
}
