//! Per-rendezvous-server metric snapshots and the consolidated merge.

use crate::metrics::tracker::PeerRecord;
use crate::peer_id::PeerId;

use std::collections::{HashMap, HashSet};

/// A rendezvous node silent for two sync intervals is presumed gone.
pub const STALE_AFTER_MS: u64 = 120_000;

/// The last ranking snapshot received from another rendezvous node.
#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub server_id: PeerId,
    pub snapshot: Vec<PeerRecord>,
    pub last_update: u64,
}

#[derive(Debug, Default)]
pub struct ServerRegistry {
    records: HashMap<PeerId, ServerRecord>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        ServerRegistry { records: HashMap::new() }
    }

    pub fn upsert(&mut self, server_id: PeerId, snapshot: Vec<PeerRecord>, now: u64) {
        let record = ServerRecord { server_id: server_id.clone(), snapshot, last_update: now };
        let _ = self.records.insert(server_id, record);
    }

    /// Evicts every record older than [STALE_AFTER_MS] and returns the
    /// evicted server ids.
    pub fn sweep(&mut self, now: u64) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .records
            .iter()
            .filter(|(_, record)| now.saturating_sub(record.last_update) > STALE_AFTER_MS)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale.iter() {
            let _ = self.records.remove(id);
        }
        stale
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &ServerRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Merges the local ranking with every retained snapshot into the mesh-wide
/// best-peer view: rendezvous ids are excluded, the higher bandwidth wins per
/// peer, and the result is sorted descending and capped at `max_peers`.
pub fn consolidate(
    local: &[PeerRecord],
    registry: &ServerRegistry,
    rendezvous_ids: &HashSet<PeerId>,
    max_peers: usize,
) -> Vec<PeerRecord> {
    let mut merged: HashMap<PeerId, PeerRecord> = HashMap::new();
    let mut order: Vec<PeerId> = vec![];
    let snapshots = registry.snapshots().flat_map(|record| record.snapshot.iter());
    for record in local.iter().chain(snapshots) {
        if rendezvous_ids.contains(&record.peer_id) {
            continue;
        }
        match merged.get(&record.peer_id) {
            Some(existing) if existing.bandwidth >= record.bandwidth => (),
            Some(_) => {
                let _ = merged.insert(record.peer_id.clone(), record.clone());
            }
            None => {
                order.push(record.peer_id.clone());
                let _ = merged.insert(record.peer_id.clone(), record.clone());
            }
        }
    }
    let mut consolidated: Vec<PeerRecord> =
        order.iter().filter_map(|id| merged.get(id).cloned()).collect();
    consolidated.sort_by(|a, b| {
        b.bandwidth.partial_cmp(&a.bandwidth).unwrap_or(std::cmp::Ordering::Equal)
    });
    consolidated.truncate(max_peers);
    consolidated
}
