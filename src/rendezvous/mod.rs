//! Rendezvous-role coordination.
//!
//! Nodes holding the rendezvous role periodically exchange ranking snapshots,
//! merge them into the mesh-wide best-peer view, and shed the role to a
//! better-connected peer when their own link quality falls below every peer
//! in the consolidated list. Identities travel with the role, so the
//! well-known rendezvous id set stays stable while nodes rotate behind it.

pub mod registry;

use crate::metrics::{GetBestPeers, GetPeerMetrics, MetricsUpdated, PeerMetricsTracker};
use crate::metrics::tracker::PeerRecord;
use crate::p2p::manager::{Initiate, SendEnvelope};
use crate::peer_id::PeerId;
use crate::protocol::Envelope;
use crate::util;

use self::registry::{consolidate, ServerRegistry};

use crate::colored::Colorize;
use tracing::{debug, info, warn};

use actix::{
    Actor, ActorFutureExt, Addr, AsyncContext, Context, Handler, Message, MessageResponse,
    Recipient, ResponseActFuture, ResponseFuture, SpawnHandle, WrapFuture,
};

use rand::rngs::StdRng;

use tokio::time::Duration;

use std::collections::HashSet;

/// Snapshot broadcast period between rendezvous nodes.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(30);
/// A hand-off request unanswered for this long is abandoned.
pub const HANDOFF_TIMEOUT: Duration = Duration::from_secs(10);

struct PendingHandoff {
    token: u64,
    candidate: PeerId,
}

pub struct SignalingCoordinator {
    self_id: PeerId,
    is_rendezvous: bool,
    rendezvous_ids: HashSet<PeerId>,
    max_peers: usize,
    registry: ServerRegistry,
    metrics: Addr<PeerMetricsTracker>,
    sender: Recipient<SendEnvelope>,
    connector: Recipient<Initiate>,
    publish: Vec<Recipient<BestPeersUpdated>>,
    identity_subs: Vec<Recipient<IdentityChanged>>,
    pending: Option<PendingHandoff>,
    /// Set while this node is adopting a departing server's identity; any
    /// concurrent hand-off request is refused.
    adopting: bool,
    next_token: u64,
    rng: StdRng,
    sync_interval: Duration,
    handoff_timeout: Duration,
    sync_handle: Option<SpawnHandle>,
}

impl SignalingCoordinator {
    pub fn new(
        self_id: PeerId,
        is_rendezvous: bool,
        rendezvous_ids: HashSet<PeerId>,
        max_peers: usize,
        metrics: Addr<PeerMetricsTracker>,
        sender: Recipient<SendEnvelope>,
        connector: Recipient<Initiate>,
        publish: Vec<Recipient<BestPeersUpdated>>,
        identity_subs: Vec<Recipient<IdentityChanged>>,
        rng: StdRng,
    ) -> Self {
        Self::with_timeouts(
            self_id,
            is_rendezvous,
            rendezvous_ids,
            max_peers,
            metrics,
            sender,
            connector,
            publish,
            identity_subs,
            rng,
            SYNC_INTERVAL,
            HANDOFF_TIMEOUT,
        )
    }

    pub fn with_timeouts(
        self_id: PeerId,
        is_rendezvous: bool,
        rendezvous_ids: HashSet<PeerId>,
        max_peers: usize,
        metrics: Addr<PeerMetricsTracker>,
        sender: Recipient<SendEnvelope>,
        connector: Recipient<Initiate>,
        publish: Vec<Recipient<BestPeersUpdated>>,
        identity_subs: Vec<Recipient<IdentityChanged>>,
        rng: StdRng,
        sync_interval: Duration,
        handoff_timeout: Duration,
    ) -> Self {
        SignalingCoordinator {
            self_id,
            is_rendezvous,
            rendezvous_ids,
            max_peers,
            registry: ServerRegistry::new(),
            metrics,
            sender,
            connector,
            publish,
            identity_subs,
            pending: None,
            adopting: false,
            next_token: 1,
            rng,
            sync_interval,
            handoff_timeout,
            sync_handle: None,
        }
    }

    fn other_rendezvous_ids(&self) -> Vec<PeerId> {
        self.rendezvous_ids.iter().filter(|id| **id != self.self_id).cloned().collect()
    }

    fn start_sync(&mut self, ctx: &mut Context<Self>) {
        if self.sync_handle.is_none() {
            let handle =
                ctx.run_interval(self.sync_interval, |_actor, ctx| ctx.notify(SyncNow));
            self.sync_handle = Some(handle);
        }
    }

    fn stop_sync(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.sync_handle.take() {
            let _ = ctx.cancel_future(handle);
        }
    }

    /// Consolidates the registry with the local ranking, publishes the
    /// result, then evaluates whether this node should shed its role.
    fn after_merge(&mut self, local: Vec<PeerRecord>, own: Option<PeerRecord>, ctx: &mut Context<Self>) {
        let consolidated =
            consolidate(&local, &self.registry, &self.rendezvous_ids, self.max_peers);
        for publish in self.publish.iter() {
            let _ = publish.do_send(BestPeersUpdated { peers: consolidated.clone() });
        }
        self.maybe_shed_role(own, &consolidated, ctx);
    }

    fn maybe_shed_role(
        &mut self,
        own: Option<PeerRecord>,
        consolidated: &[PeerRecord],
        ctx: &mut Context<Self>,
    ) {
        // The last remaining rendezvous node keeps its role unconditionally.
        if self.registry.is_empty() || consolidated.is_empty() {
            return;
        }
        let own = match own {
            Some(own) => own,
            // No local estimate yet; stay put until a measurement lands.
            None => return,
        };
        let lowest = consolidated
            .iter()
            .map(|record| record.bandwidth)
            .fold(f64::INFINITY, f64::min);
        if own.bandwidth >= lowest {
            return;
        }
        if self.pending.is_some() {
            debug!("[{}] hand-off already in flight", "coordinator".yellow());
            return;
        }
        let candidate = match util::choose(&mut self.rng, consolidated) {
            Some(record) => record.peer_id.clone(),
            None => return,
        };
        let token = self.next_token;
        self.next_token += 1;
        self.pending = Some(PendingHandoff { token, candidate: candidate.clone() });
        ctx.notify_later(HandoffTimedOut { token }, self.handoff_timeout);
        info!(
            "[{}] bandwidth {:.0} below consolidated minimum {:.0}; requesting hand-off to {}",
            "coordinator".yellow(),
            own.bandwidth,
            lowest,
            candidate
        );
        let envelope = Envelope::RequestSignalingRole {
            current_server_id: self.self_id.clone(),
            new_server_id: candidate.clone(),
        };
        let sender = self.sender.clone();
        ctx.spawn(
            async move {
                match sender.send(SendEnvelope { peer_id: candidate.clone(), envelope }).await {
                    Ok(Ok(())) => (),
                    _ => warn!(
                        "[{}] hand-off request to {} could not be delivered",
                        "coordinator".yellow(),
                        candidate
                    ),
                }
            }
            .into_actor(self),
        );
    }

    fn adopt_identity(&mut self, new_id: PeerId, rendezvous: bool, ctx: &mut Context<Self>) {
        info!(
            "[{}] adopting identity {} ({})",
            "coordinator".yellow(),
            new_id,
            if rendezvous { "rendezvous" } else { "peer" }
        );
        self.self_id = new_id.clone();
        self.is_rendezvous = rendezvous;
        for subscriber in self.identity_subs.iter() {
            let _ = subscriber
                .do_send(IdentityChanged { peer_id: new_id.clone(), is_rendezvous: rendezvous });
        }
        if rendezvous {
            self.start_sync(ctx);
            // Join the rendezvous mesh: the coordinator reaches its peers
            // over channels established between rendezvous nodes.
            for id in self.other_rendezvous_ids() {
                let _ = self.connector.do_send(Initiate { peer_id: id });
            }
        } else {
            self.stop_sync(ctx);
            self.registry.clear();
        }
    }
}

impl Actor for SignalingCoordinator {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        if self.is_rendezvous {
            self.start_sync(ctx);
        }
    }
}

/// Broadcast the local ranking snapshot to every other rendezvous node.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct SyncNow;

impl Handler<SyncNow> for SignalingCoordinator {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, _msg: SyncNow, _ctx: &mut Context<Self>) -> Self::Result {
        if !self.is_rendezvous {
            return Box::pin(async {});
        }
        let metrics = self.metrics.clone();
        let sender = self.sender.clone();
        let self_id = self.self_id.clone();
        let targets = self.other_rendezvous_ids();
        Box::pin(async move {
            let best = match metrics.send(GetBestPeers).await {
                Ok(best) => best.peers,
                Err(_) => return,
            };
            let timestamp = util::now_millis();
            for target in targets {
                let envelope = Envelope::SignalingServerSync {
                    server_id: self_id.clone(),
                    metrics: best.clone(),
                    timestamp,
                };
                match sender.send(SendEnvelope { peer_id: target.clone(), envelope }).await {
                    Ok(Ok(())) => (),
                    // Rendezvous peers we cannot reach are simply skipped;
                    // the staleness sweep retires them on the other side.
                    _ => debug!("[{}] sync to {} skipped", "coordinator".yellow(), target),
                }
            }
        })
    }
}

/// A `signalingServerSync` snapshot received from another rendezvous node.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct InboundSync {
    pub server_id: PeerId,
    pub metrics: Vec<PeerRecord>,
    pub timestamp: u64,
}

impl Handler<InboundSync> for SignalingCoordinator {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, msg: InboundSync, _ctx: &mut Context<Self>) -> Self::Result {
        if !self.is_rendezvous {
            return Box::pin(actix::fut::ready(()));
        }
        let now = util::now_millis();
        self.registry.upsert(msg.server_id, msg.metrics, now);
        for evicted in self.registry.sweep(now) {
            info!("[{}] evicted stale rendezvous node {}", "coordinator".yellow(), evicted);
        }
        let metrics = self.metrics.clone();
        let self_id = self.self_id.clone();
        let fut = async move {
            let best = metrics.send(GetBestPeers).await;
            let own = metrics.send(GetPeerMetrics { peer_id: self_id }).await;
            (best, own)
        };
        Box::pin(fut.into_actor(self).map(|(best, own), actor, ctx| {
            let local = match best {
                Ok(best) => best.peers,
                Err(_) => return,
            };
            let own = match own {
                Ok(own) => own.0,
                Err(_) => return,
            };
            actor.after_merge(local, own, ctx);
        }))
    }
}

/// A successful measurement landed; republish and resync opportunistically.
impl Handler<MetricsUpdated> for SignalingCoordinator {
    type Result = ();

    fn handle(&mut self, _msg: MetricsUpdated, ctx: &mut Context<Self>) -> Self::Result {
        if self.is_rendezvous {
            ctx.notify(Recompute);
            ctx.notify(SyncNow);
        }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
struct Recompute;

impl Handler<Recompute> for SignalingCoordinator {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, _msg: Recompute, _ctx: &mut Context<Self>) -> Self::Result {
        if !self.is_rendezvous {
            return Box::pin(actix::fut::ready(()));
        }
        let _ = self.registry.sweep(util::now_millis());
        let metrics = self.metrics.clone();
        let self_id = self.self_id.clone();
        let fut = async move {
            let best = metrics.send(GetBestPeers).await;
            let own = metrics.send(GetPeerMetrics { peer_id: self_id }).await;
            (best, own)
        };
        Box::pin(fut.into_actor(self).map(|(best, own), actor, ctx| {
            if let (Ok(best), Ok(own)) = (best, own) {
                actor.after_merge(best.peers, own.0, ctx);
            }
        }))
    }
}

/// An incoming `requestSignalingRole`; only the named candidate acts on it.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct HandoffRequested {
    pub from: PeerId,
    pub current_server_id: PeerId,
    pub new_server_id: PeerId,
}

impl Handler<HandoffRequested> for SignalingCoordinator {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, msg: HandoffRequested, _ctx: &mut Context<Self>) -> Self::Result {
        if msg.new_server_id != self.self_id {
            return Box::pin(actix::fut::ready(()));
        }
        let sender = self.sender.clone();
        let reply_to = msg.from.clone();
        if self.adopting || self.pending.is_some() {
            // Only the first hand-off per decision window is honoured.
            info!("[{}] refusing concurrent hand-off request", "coordinator".yellow());
            let envelope = Envelope::SignalingRoleResponse {
                current_server_id: msg.current_server_id,
                new_server_id: msg.new_server_id,
                new_peer_id: None,
                accepted: false,
            };
            return Box::pin(
                async move {
                    let _ = sender.send(SendEnvelope { peer_id: reply_to, envelope }).await;
                }
                .into_actor(self)
                .map(|_, _, _| ()),
            );
        }
        self.adopting = true;
        // The fresh identifier is vacated to the departing server; this node
        // takes over the departing server's well-known id.
        let fresh = PeerId::generate();
        let envelope = Envelope::SignalingRoleResponse {
            current_server_id: msg.current_server_id.clone(),
            new_server_id: msg.new_server_id,
            new_peer_id: Some(fresh),
            accepted: true,
        };
        let adopted = msg.current_server_id;
        Box::pin(
            async move { sender.send(SendEnvelope { peer_id: reply_to, envelope }).await }
                .into_actor(self)
                .map(move |result, actor, ctx| {
                    actor.adopting = false;
                    match result {
                        Ok(Ok(())) => actor.adopt_identity(adopted, true, ctx),
                        _ => {
                            // The acceptance never reached the requester; it
                            // will time out, so no state changes here.
                            warn!(
                                "[{}] hand-off acceptance could not be delivered",
                                "coordinator".yellow()
                            );
                        }
                    }
                }),
        )
    }
}

/// A `signalingRoleResponse` correlated with our in-flight request.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct HandoffResponded {
    pub current_server_id: PeerId,
    pub new_server_id: PeerId,
    pub new_peer_id: Option<PeerId>,
    pub accepted: bool,
}

impl Handler<HandoffResponded> for SignalingCoordinator {
    type Result = ();

    fn handle(&mut self, msg: HandoffResponded, ctx: &mut Context<Self>) -> Self::Result {
        let pending = match self.pending.take() {
            Some(pending) => pending,
            None => {
                debug!("[{}] dropping late hand-off response", "coordinator".yellow());
                return;
            }
        };
        if msg.current_server_id != self.self_id || msg.new_server_id != pending.candidate {
            self.pending = Some(pending);
            debug!("[{}] dropping uncorrelated hand-off response", "coordinator".yellow());
            return;
        }
        // The token is retired here regardless of outcome; the timer for it
        // becomes a no-op.
        if !msg.accepted {
            info!("[{}] candidate refused the hand-off", "coordinator".yellow());
            return;
        }
        match msg.new_peer_id {
            Some(new_id) => self.adopt_identity(new_id, false, ctx),
            None => warn!(
                "[{}] accepted hand-off carried no replacement id; keeping role",
                "coordinator".yellow()
            ),
        }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
struct HandoffTimedOut {
    token: u64,
}

impl Handler<HandoffTimedOut> for SignalingCoordinator {
    type Result = ();

    fn handle(&mut self, msg: HandoffTimedOut, _ctx: &mut Context<Self>) -> Self::Result {
        match &self.pending {
            Some(pending) if pending.token == msg.token => {
                self.pending = None;
                // Recoverable: the node stays in its current role and the
                // decision reruns on the next sync cycle.
                warn!(
                    "[{}] hand-off request timed out; keeping rendezvous role",
                    "coordinator".yellow()
                );
            }
            _ => (),
        }
    }
}

/// The consolidated best-peer list, published to ranking consumers.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct BestPeersUpdated {
    pub peers: Vec<PeerRecord>,
}

/// Broadcast when this node adopts a new identity (and possibly a new role).
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct IdentityChanged {
    pub peer_id: PeerId,
    pub is_rendezvous: bool,
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "CoordinatorState")]
pub struct GetCoordinatorState;

#[derive(Debug, Clone, MessageResponse)]
pub struct CoordinatorState {
    pub self_id: PeerId,
    pub is_rendezvous: bool,
    pub pending_handoff: bool,
}

impl Handler<GetCoordinatorState> for SignalingCoordinator {
    type Result = CoordinatorState;

    fn handle(&mut self, _msg: GetCoordinatorState, _ctx: &mut Context<Self>) -> Self::Result {
        CoordinatorState {
            self_id: self.self_id.clone(),
            is_rendezvous: self.is_rendezvous,
            pending_handoff: self.pending.is_some(),
        }
    }
}
