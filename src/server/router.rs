use crate::metrics::{PeerMetricsTracker, ProbeEchoed};
use crate::p2p::manager::InboundEnvelope;
use crate::protocol::Envelope;
use crate::rendezvous::{HandoffRequested, HandoffResponded, InboundSync, SignalingCoordinator};
use crate::router::{ContentRouter, PageDelivered, PageRequested};
use crate::store::{RecordStore, RecordSync};

use tracing::debug;

use actix::{Actor, Addr, Context, Handler};

/// Dispatches inbound peer envelopes to the component that owns them.
pub struct Router {
    store: Addr<RecordStore>,
    coordinator: Addr<SignalingCoordinator>,
    content: Addr<ContentRouter>,
    metrics: Addr<PeerMetricsTracker>,
}

impl Router {
    pub fn new(
        store: Addr<RecordStore>,
        coordinator: Addr<SignalingCoordinator>,
        content: Addr<ContentRouter>,
        metrics: Addr<PeerMetricsTracker>,
    ) -> Self {
        Router { store, coordinator, content, metrics }
    }
}

impl Actor for Router {
    type Context = Context<Self>;
}

impl Handler<InboundEnvelope> for Router {
    type Result = ();

    fn handle(&mut self, msg: InboundEnvelope, _ctx: &mut Context<Self>) -> Self::Result {
        let from = msg.peer_id;
        match msg.envelope {
            envelope @ Envelope::ContactAdded { .. }
            | envelope @ Envelope::ContactDeleted { .. }
            | envelope @ Envelope::SyncRequest { .. }
            | envelope @ Envelope::FullSync { .. } => {
                self.store.do_send(RecordSync { from, envelope });
            }
            Envelope::SignalingServerSync { server_id, metrics, timestamp } => {
                self.coordinator.do_send(InboundSync { server_id, metrics, timestamp });
            }
            Envelope::RequestSignalingRole { current_server_id, new_server_id } => {
                self.coordinator.do_send(HandoffRequested {
                    from,
                    current_server_id,
                    new_server_id,
                });
            }
            Envelope::SignalingRoleResponse {
                current_server_id,
                new_server_id,
                new_peer_id,
                accepted,
            } => {
                self.coordinator.do_send(HandoffResponded {
                    current_server_id,
                    new_server_id,
                    new_peer_id,
                    accepted,
                });
            }
            Envelope::RequestPage { path, repo_coordinates } => {
                self.content.do_send(PageRequested { from, path, repo_coordinates });
            }
            Envelope::PageContent { path, content } => {
                self.content.do_send(PageDelivered { path, content });
            }
            Envelope::ProbeEcho { token, len } => {
                self.metrics.do_send(ProbeEchoed { peer_id: from, token, len });
            }
            // Probes are echoed by the channel task; a hello past the
            // handshake carries no information.
            Envelope::Probe { .. } | Envelope::Hello { .. } => (),
            Envelope::Unknown => {
                debug!("ignoring unknown message type from {}", from);
            }
        }
    }
}
