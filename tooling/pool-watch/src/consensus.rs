use crate::models::NetworkState;
use std::{collections::BTreeMap, time::SystemTime};

/// Most frequent height. Ties resolve to the lowest height so repeated runs
/// over the same input agree.
///
/// With `include_down` unset, zero heights (down pools) are ignored.
pub fn mode_height(heights: impl IntoIterator<Item = u64>, include_down: bool) -> Option<u64> {
    let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
    for height in heights {
        if height == 0 && !include_down {
            continue;
        }
        *counts.entry(height).or_insert(0) += 1;
    }

    // BTreeMap iterates ascending, and max_by_key keeps the last maximum, so
    // walk in reverse to land on the lowest tied height.
    counts
        .into_iter()
        .rev()
        .max_by_key(|(_, count)| *count)
        .map(|(height, _)| height)
}

/// Stores `candidate` as the new consensus when it differs from the current
/// one. Returns whether the consensus moved.
pub fn update_consensus(network: &mut NetworkState, candidate: Option<u64>, now: SystemTime) -> bool {
    match candidate {
        Some(height) if height != network.consensus_height => {
            network.consensus_height = height;
            network.consensus_changed_at = now;
            true
        }
        _ => false,
    }
}
