//! Sliding-window link quality estimation.

use crate::peer_id::PeerId;

use std::collections::{HashMap, VecDeque};

/// Samples retained per peer; the oldest is evicted first.
pub const SAMPLE_WINDOW: usize = 10;

/// Default cap on the ranked best-peer list.
pub const DEFAULT_MAX_PEERS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub timestamp: u64,
    pub bandwidth_bps: f64,
    pub latency_ms: f64,
}

/// Derived per-peer record, recomputed on every new sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub peer_id: PeerId,
    /// Exponentially recency-weighted bandwidth, bits per second.
    pub bandwidth: f64,
    /// Exponentially recency-weighted latency, milliseconds.
    pub latency: f64,
    pub last_update: u64,
}

/// Keeps the raw sample windows and the derived records for every known peer.
#[derive(Debug)]
pub struct MetricsTracker {
    max_peers: usize,
    windows: HashMap<PeerId, VecDeque<MetricSample>>,
    records: HashMap<PeerId, PeerRecord>,
    // Ranking ties are broken by insertion order; the order must survive
    // record recomputation, so it is tracked separately.
    insertion_order: Vec<PeerId>,
}

impl MetricsTracker {
    pub fn new(max_peers: usize) -> Self {
        MetricsTracker {
            max_peers,
            windows: HashMap::new(),
            records: HashMap::new(),
            insertion_order: vec![],
        }
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Appends a sample to the peer's window and recomputes its record.
    pub fn update(&mut self, peer_id: &PeerId, bandwidth_bps: f64, latency_ms: f64, now: u64) {
        let window = self.windows.entry(peer_id.clone()).or_insert_with(VecDeque::new);
        if window.len() >= SAMPLE_WINDOW {
            let _ = window.pop_front();
        }
        window.push_back(MetricSample { timestamp: now, bandwidth_bps, latency_ms });

        let (bandwidth, latency) = weighted_average(window);
        if !self.records.contains_key(peer_id) {
            self.insertion_order.push(peer_id.clone());
        }
        let record =
            PeerRecord { peer_id: peer_id.clone(), bandwidth, latency, last_update: now };
        let _ = self.records.insert(peer_id.clone(), record);
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerRecord> {
        self.records.get(peer_id)
    }

    /// All known records sorted descending by weighted bandwidth, truncated
    /// to `max_peers`. `sort_by` is stable, so equal bandwidths keep their
    /// insertion order.
    pub fn best_peers(&self) -> Vec<PeerRecord> {
        let mut ranked: Vec<PeerRecord> = self
            .insertion_order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect();
        ranked.sort_by(|a, b| {
            b.bandwidth.partial_cmp(&a.bandwidth).unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(self.max_peers);
        ranked
    }

    /// Drops both the sample window and the derived record. Idempotent.
    pub fn remove(&mut self, peer_id: &PeerId) {
        let _ = self.windows.remove(peer_id);
        let _ = self.records.remove(peer_id);
        self.insertion_order.retain(|id| id != peer_id);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Exponentially-weighted average: the sample at retained position `i`
/// (0 = oldest) receives weight `2^i`, biasing strongly toward the most
/// recent samples while staying stable against a single outlier.
fn weighted_average(samples: &VecDeque<MetricSample>) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut total_weight = 0.0;
    let mut weighted_bandwidth = 0.0;
    let mut weighted_latency = 0.0;
    for (i, sample) in samples.iter().enumerate() {
        let weight = (1u64 << i) as f64;
        total_weight += weight;
        weighted_bandwidth += sample.bandwidth_bps * weight;
        weighted_latency += sample.latency_ms * weight;
    }
    (weighted_bandwidth / total_weight, weighted_latency / total_weight)
}

#[cfg(test)]
mod test {
    use super::*;

    fn peer(s: &str) -> PeerId {
        PeerId::new(s)
    }

    #[test]
    fn weighted_average_matches_exponential_formula() {
        let mut tracker = MetricsTracker::new(DEFAULT_MAX_PEERS);
        let p = peer("a");
        tracker.update(&p, 10.0, 10.0, 1);
        tracker.update(&p, 20.0, 20.0, 2);
        tracker.update(&p, 30.0, 30.0, 3);
        // weights 1, 2, 4 -> (10 + 40 + 120) / 7
        let record = tracker.get(&p).unwrap();
        assert!((record.bandwidth - 170.0 / 7.0).abs() < 1e-9);
        assert!((record.latency - 170.0 / 7.0).abs() < 1e-9);
        assert_eq!(record.last_update, 3);
    }

    #[test]
    fn window_caps_at_ten_samples() {
        let mut tracker = MetricsTracker::new(DEFAULT_MAX_PEERS);
        let p = peer("a");
        // One outlier followed by ten identical samples: the outlier must be
        // evicted, leaving an exact average.
        tracker.update(&p, 1_000_000.0, 1.0, 0);
        for t in 1..=10 {
            tracker.update(&p, 100.0, 5.0, t);
        }
        let record = tracker.get(&p).unwrap();
        assert!((record.bandwidth - 100.0).abs() < 1e-9);
    }

    #[test]
    fn best_peers_sorted_capped_and_tie_broken_by_insertion() {
        let mut tracker = MetricsTracker::new(3);
        tracker.update(&peer("a"), 50.0, 1.0, 1);
        tracker.update(&peer("b"), 70.0, 1.0, 2);
        tracker.update(&peer("c"), 50.0, 1.0, 3);
        tracker.update(&peer("d"), 90.0, 1.0, 4);
        tracker.update(&peer("e"), 10.0, 1.0, 5);

        let best = tracker.best_peers();
        assert_eq!(best.len(), 3);
        assert_eq!(best[0].peer_id, peer("d"));
        assert_eq!(best[1].peer_id, peer("b"));
        // "a" and "c" tie at 50.0; "a" was inserted first
        assert_eq!(best[2].peer_id, peer("a"));
    }

    #[test]
    fn remove_is_idempotent_and_leaves_no_residue() {
        let mut tracker = MetricsTracker::new(DEFAULT_MAX_PEERS);
        let p = peer("a");
        tracker.update(&p, 50.0, 1.0, 1);
        tracker.remove(&p);
        assert!(tracker.get(&p).is_none());
        assert!(tracker.is_empty());
        assert!(tracker.best_peers().is_empty());
        // A second removal is a no-op.
        tracker.remove(&p);
        assert!(tracker.is_empty());

        // A fresh sample after removal starts a new window.
        tracker.update(&p, 80.0, 1.0, 2);
        assert!((tracker.get(&p).unwrap().bandwidth - 80.0).abs() < 1e-9);
    }
}
