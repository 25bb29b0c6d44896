use crate::models::NetworkState;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Edge-triggered network-level alarm: one message on entering the stuck
/// state, one on leaving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkAlert {
    Stuck { height: u64, since: Duration },
    Resumed { height: u64 },
}

impl NetworkAlert {
    pub fn message(&self) -> String {
        match self {
            Self::Stuck { height, since } => format!(
                "Network appears stuck! Consensus height {height} last changed {} minutes ago.",
                since.as_secs() / 60
            ),
            Self::Resumed { height } => {
                format!("Network is moving again. Consensus height is now {height}.")
            }
        }
    }
}

pub fn evaluate_network(
    network: &mut NetworkState,
    stuck_after: Duration,
    now: SystemTime,
) -> Option<NetworkAlert> {
    // Height 0 means no pool has reported yet, not a stalled chain.
    if network.consensus_height == 0 {
        return None;
    }

    let since = now
        .duration_since(network.consensus_changed_at)
        .unwrap_or(Duration::ZERO);
    let stuck = since > stuck_after;

    match (stuck, network.network_stuck_alert_active) {
        (true, false) => {
            warn!(height = network.consensus_height, stalled_seconds = since.as_secs(), "network stuck");
            network.network_stuck_alert_active = true;
            Some(NetworkAlert::Stuck {
                height: network.consensus_height,
                since,
            })
        }
        (false, true) => {
            info!(height = network.consensus_height, "network resumed");
            network.network_stuck_alert_active = false;
            Some(NetworkAlert::Resumed {
                height: network.consensus_height,
            })
        }
        _ => None,
    }
}
