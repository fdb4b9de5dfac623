//! Peer link-quality measurement and ranking.
//!
//! The [PeerMetricsTracker] actor owns the sample windows and derived
//! records. Bandwidth is measured actively: a fixed-size probe is sent over
//! the peer's channel and the remote channel task acks the observed volume
//! with `probeEcho` frames. A probe that does not complete within the
//! timeout is abandoned and the peer's metrics are left untouched.

pub mod tracker;

use crate::p2p::manager::SendEnvelope;
use crate::p2p::PeerEvent;
use crate::peer_id::PeerId;
use crate::protocol::Envelope;
use crate::util;

use self::tracker::{MetricsTracker, PeerRecord};

use crate::colored::Colorize;
use tracing::{debug, info, warn};

use actix::{Actor, ActorFutureExt, AsyncContext, Context, Handler, Message, MessageResponse, Recipient, WrapFuture};

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Nominal probe volume: 1 MiB.
pub const PROBE_BYTES: usize = 1024 * 1024;
/// A measurement that has not observed the full probe volume within this
/// window is treated as unknown and dropped.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

struct ProbeState {
    token: u64,
    started: Instant,
    expected: usize,
    observed: usize,
}

pub struct PeerMetricsTracker {
    self_id: PeerId,
    tracker: MetricsTracker,
    sender: Recipient<SendEnvelope>,
    watchers: Vec<Recipient<MetricsUpdated>>,
    pending: HashMap<PeerId, ProbeState>,
    next_token: u64,
    probe_bytes: usize,
    probe_timeout: Duration,
}

impl PeerMetricsTracker {
    pub fn new(self_id: PeerId, max_peers: usize, sender: Recipient<SendEnvelope>) -> Self {
        Self::with_probe(self_id, max_peers, sender, PROBE_BYTES, PROBE_TIMEOUT)
    }

    /// Probe volume and timeout are injectable so tests stay fast.
    pub fn with_probe(
        self_id: PeerId,
        max_peers: usize,
        sender: Recipient<SendEnvelope>,
        probe_bytes: usize,
        probe_timeout: Duration,
    ) -> Self {
        PeerMetricsTracker {
            self_id,
            tracker: MetricsTracker::new(max_peers),
            sender,
            watchers: vec![],
            pending: HashMap::new(),
            next_token: 1,
            probe_bytes,
            probe_timeout,
        }
    }

    fn record(&mut self, peer_id: &PeerId, bandwidth_bps: f64, latency_ms: f64) {
        let now = util::now_millis();
        self.tracker.update(peer_id, bandwidth_bps, latency_ms, now);
        // Every measured link also bounds this node's own uplink; the local
        // record is what the rendezvous role hand-off decision compares.
        let self_id = self.self_id.clone();
        if *peer_id != self_id {
            self.tracker.update(&self_id, bandwidth_bps, latency_ms, now);
        }
    }
}

impl Actor for PeerMetricsTracker {
    type Context = Context<Self>;
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Measure {
    pub peer_id: PeerId,
}

impl Handler<Measure> for PeerMetricsTracker {
    type Result = ();

    fn handle(&mut self, msg: Measure, ctx: &mut Context<Self>) -> Self::Result {
        let peer_id = msg.peer_id.clone();
        if self.pending.contains_key(&peer_id) {
            debug!("[{}] measurement already in flight for {}", "metrics".cyan(), peer_id);
            return;
        }
        let token = self.next_token;
        self.next_token += 1;
        let payload = "x".repeat(self.probe_bytes);
        let expected = payload.len();
        self.pending.insert(
            peer_id.clone(),
            ProbeState { token, started: Instant::now(), expected, observed: 0 },
        );
        ctx.notify_later(
            ProbeTimedOut { peer_id: peer_id.clone(), token },
            self.probe_timeout,
        );

        let send = self
            .sender
            .send(SendEnvelope { peer_id: peer_id.clone(), envelope: Envelope::Probe { token, payload } });
        ctx.spawn(send.into_actor(self).map(move |result, actor, _ctx| match result {
            Ok(Ok(())) => (),
            _ => {
                // The probe never left this node; retire the token now
                // rather than waiting out the timeout.
                warn!("[{}] probe send to {} failed", "metrics".cyan(), peer_id);
                if actor.pending.get(&peer_id).map(|p| p.token) == Some(token) {
                    let _ = actor.pending.remove(&peer_id);
                }
            }
        }));
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct ProbeEchoed {
    pub peer_id: PeerId,
    pub token: u64,
    pub len: usize,
}

impl Handler<ProbeEchoed> for PeerMetricsTracker {
    type Result = ();

    fn handle(&mut self, msg: ProbeEchoed, _ctx: &mut Context<Self>) -> Self::Result {
        let state = match self.pending.get_mut(&msg.peer_id) {
            Some(state) if state.token == msg.token => state,
            // Echo for a retired token (timed out or superseded): ignored.
            _ => {
                debug!("[{}] stale probe echo from {}", "metrics".cyan(), msg.peer_id);
                return;
            }
        };
        state.observed += msg.len;
        if state.observed < state.expected {
            return;
        }
        let state = match self.pending.remove(&msg.peer_id) {
            Some(state) => state,
            None => return,
        };
        let elapsed = state.started.elapsed();
        let secs = elapsed.as_secs_f64().max(1e-6);
        let bandwidth_bps = (state.observed as f64 * 8.0) / secs;
        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        info!(
            "[{}] {} measured at {:.0} bit/s ({:.1} ms)",
            "metrics".cyan(),
            msg.peer_id,
            bandwidth_bps,
            latency_ms
        );
        self.record(&msg.peer_id, bandwidth_bps, latency_ms);
        for watcher in self.watchers.iter() {
            let _ = watcher.do_send(MetricsUpdated { peer_id: msg.peer_id.clone() });
        }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
struct ProbeTimedOut {
    peer_id: PeerId,
    token: u64,
}

impl Handler<ProbeTimedOut> for PeerMetricsTracker {
    type Result = ();

    fn handle(&mut self, msg: ProbeTimedOut, _ctx: &mut Context<Self>) -> Self::Result {
        match self.pending.get(&msg.peer_id) {
            Some(state) if state.token == msg.token => {
                let _ = self.pending.remove(&msg.peer_id);
                // Unknown, do not update: the peer stays ranked on whatever
                // data it had until a future measurement succeeds.
                warn!("[{}] measurement timeout for {}", "metrics".cyan(), msg.peer_id);
            }
            _ => (),
        }
    }
}

/// Direct metric injection, used by callers that obtain samples out of band.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct UpdatePeerMetrics {
    pub peer_id: PeerId,
    pub bandwidth_bps: f64,
    pub latency_ms: f64,
}

impl Handler<UpdatePeerMetrics> for PeerMetricsTracker {
    type Result = ();

    fn handle(&mut self, msg: UpdatePeerMetrics, _ctx: &mut Context<Self>) -> Self::Result {
        let now = util::now_millis();
        self.tracker.update(&msg.peer_id, msg.bandwidth_bps, msg.latency_ms, now);
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "BestPeerList")]
pub struct GetBestPeers;

#[derive(Debug, Clone, MessageResponse)]
pub struct BestPeerList {
    pub peers: Vec<PeerRecord>,
}

impl Handler<GetBestPeers> for PeerMetricsTracker {
    type Result = BestPeerList;

    fn handle(&mut self, _msg: GetBestPeers, _ctx: &mut Context<Self>) -> Self::Result {
        BestPeerList { peers: self.tracker.best_peers() }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "PeerMetricsResult")]
pub struct GetPeerMetrics {
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct PeerMetricsResult(pub Option<PeerRecord>);

impl Handler<GetPeerMetrics> for PeerMetricsTracker {
    type Result = PeerMetricsResult;

    fn handle(&mut self, msg: GetPeerMetrics, _ctx: &mut Context<Self>) -> Self::Result {
        PeerMetricsResult(self.tracker.get(&msg.peer_id).cloned())
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct RemovePeer {
    pub peer_id: PeerId,
}

impl Handler<RemovePeer> for PeerMetricsTracker {
    type Result = ();

    fn handle(&mut self, msg: RemovePeer, _ctx: &mut Context<Self>) -> Self::Result {
        self.tracker.remove(&msg.peer_id);
        let _ = self.pending.remove(&msg.peer_id);
    }
}

/// Subscribes a recipient to successful-measurement notifications.
#[derive(Clone, Message)]
#[rtype(result = "()")]
pub struct WatchUpdates {
    pub recipient: Recipient<MetricsUpdated>,
}

impl Handler<WatchUpdates> for PeerMetricsTracker {
    type Result = ();

    fn handle(&mut self, msg: WatchUpdates, _ctx: &mut Context<Self>) -> Self::Result {
        self.watchers.push(msg.recipient);
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct MetricsUpdated {
    pub peer_id: PeerId,
}

impl Handler<PeerEvent> for PeerMetricsTracker {
    type Result = ();

    fn handle(&mut self, msg: PeerEvent, ctx: &mut Context<Self>) -> Self::Result {
        match msg {
            PeerEvent::Connected { peer_id } => ctx.notify(Measure { peer_id }),
            PeerEvent::Disconnected { peer_id } => {
                self.tracker.remove(&peer_id);
                let _ = self.pending.remove(&peer_id);
            }
        }
    }
}
