//! The connection manager actor.
//!
//! Establishes and supervises exactly one connection per remote peer. The
//! negotiation (offer / answer / candidate) travels through the directory;
//! the resulting message channel is a framed TCP stream whose read and write
//! halves are driven by dedicated tasks feeding back into the actor.

use crate::channel::{Channel, Receiver as ChannelReceiver, Sender as ChannelSender};
use crate::peer_id::PeerId;
use crate::protocol::{CandidateAddr, Envelope, Sdp, SignalPayload};
use crate::rendezvous::IdentityChanged;
use crate::{Error, Result};

use super::connection::{Connection, ConnectionState, Role};
use super::signaling::{OutboundSignal, RegisterIdentity};
use super::PeerEvent;

use crate::colored::Colorize;
use tracing::{debug, error, info, warn};

use actix::{Actor, Addr, AsyncContext, Context, Handler, Message, MessageResponse, Recipient};

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use std::collections::HashMap;
use std::net::SocketAddr;

/// Per-candidate dial timeout while completing a negotiation.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConnectionManager {
    self_id: PeerId,
    listen_addr: SocketAddr,
    advertised_addrs: Vec<SocketAddr>,
    signals: Recipient<OutboundSignal>,
    registrations: Recipient<RegisterIdentity>,
    routes: Option<Recipient<InboundEnvelope>>,
    subscribers: Vec<Recipient<PeerEvent>>,
    connections: HashMap<PeerId, Connection>,
    /// Candidates that arrived before any offer for their peer.
    orphan_candidates: HashMap<PeerId, Vec<CandidateAddr>>,
    next_session: u64,
    dial_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(
        self_id: PeerId,
        listen_addr: SocketAddr,
        advertised_addrs: Vec<SocketAddr>,
        signals: Recipient<OutboundSignal>,
        registrations: Recipient<RegisterIdentity>,
    ) -> Self {
        Self::with_dial_timeout(
            self_id,
            listen_addr,
            advertised_addrs,
            signals,
            registrations,
            DIAL_TIMEOUT,
        )
    }

    pub fn with_dial_timeout(
        self_id: PeerId,
        listen_addr: SocketAddr,
        advertised_addrs: Vec<SocketAddr>,
        signals: Recipient<OutboundSignal>,
        registrations: Recipient<RegisterIdentity>,
        dial_timeout: Duration,
    ) -> Self {
        ConnectionManager {
            self_id,
            listen_addr,
            advertised_addrs,
            signals,
            registrations,
            routes: None,
            subscribers: vec![],
            connections: HashMap::new(),
            orphan_candidates: HashMap::new(),
            next_session: 1,
            dial_timeout,
        }
    }

    fn send_local_candidates(&self, to: &PeerId) {
        let mut addrs = vec![self.listen_addr.clone()];
        addrs.extend(self.advertised_addrs.iter().cloned());
        for addr in addrs {
            let _ = self.signals.do_send(OutboundSignal {
                to: to.clone(),
                payload: SignalPayload::Candidate { candidate: CandidateAddr { addr } },
            });
        }
    }

    fn emit(&self, event: PeerEvent) {
        for subscriber in self.subscribers.iter() {
            let _ = subscriber.do_send(event.clone());
        }
    }

    fn teardown(&mut self, peer_id: &PeerId, state: ConnectionState) {
        if let Some(mut connection) = self.connections.remove(peer_id) {
            connection.state = state;
            // Dropping the write handle ends the writer task and closes the
            // socket, which the remote side observes as a channel close.
            let _ = connection.outbound.take();
            self.emit(PeerEvent::Disconnected { peer_id: peer_id.clone() });
        }
        let _ = self.orphan_candidates.remove(peer_id);
    }

    /// Initiators dial once per negotiation, walking the applied candidates
    /// in order until a `Hello` handshake succeeds.
    fn maybe_dial(&mut self, peer_id: &PeerId, ctx: &mut Context<Self>) {
        let dial_timeout = self.dial_timeout.clone();
        let self_id = self.self_id.clone();
        let connection = match self.connections.get_mut(peer_id) {
            Some(connection) => connection,
            None => return,
        };
        if connection.role != Role::Initiator
            || connection.dialing
            || connection.state != ConnectionState::CandidateExchange
            || connection.candidates.is_empty()
        {
            return;
        }
        connection.dialing = true;
        let candidates = connection.candidates.clone();
        let manager = ctx.address();
        let peer_id = peer_id.clone();
        tokio::spawn(async move {
            for candidate in candidates.iter() {
                match timeout(dial_timeout, Channel::<Envelope>::connect(&candidate.addr)).await {
                    Ok(Ok(channel)) => {
                        let (mut sender, receiver) = channel.split();
                        let hello = Envelope::Hello { peer_id: self_id.clone() };
                        if sender.send(hello).await.is_err() {
                            continue;
                        }
                        let outbound =
                            attach_channel(peer_id.clone(), sender, receiver, manager.clone());
                        manager.do_send(ChannelEstablished { peer_id: peer_id.clone(), outbound });
                        return;
                    }
                    _ => continue,
                }
            }
            manager.do_send(NegotiationFailed {
                peer_id,
                reason: "no dialable candidate".to_owned(),
            });
        });
    }
}

/// Spawns the writer and reader tasks for an established channel and returns
/// the write handle. Probe frames are echoed directly from the reader task so
/// measurements see channel latency, not actor scheduling.
pub(crate) fn attach_channel(
    peer_id: PeerId,
    mut sender: ChannelSender<Envelope>,
    mut receiver: ChannelReceiver<Envelope>,
    manager: Addr<ConnectionManager>,
) -> mpsc::UnboundedSender<Envelope> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if sender.send(envelope).await.is_err() {
                break;
            }
        }
    });
    let echo = tx.clone();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(Some(Envelope::Probe { token, payload })) => {
                    let _ = echo.send(Envelope::ProbeEcho { token, len: payload.len() });
                }
                Ok(Some(envelope)) => {
                    manager.do_send(InboundEnvelope { peer_id: peer_id.clone(), envelope });
                }
                Ok(None) | Err(_) => {
                    manager.do_send(ChannelClosed { peer_id: peer_id.clone() });
                    break;
                }
            }
        }
    });
    tx
}

impl Actor for ConnectionManager {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("[{}] started as {}", "manager".blue(), self.self_id);
    }
}

/// Starts a negotiation toward `peer_id` as initiator. A no-op when a
/// connection for the peer already exists in any state.
#[derive(Debug, Clone, Message)]
#[rtype(result = "Result<()>")]
pub struct Initiate {
    pub peer_id: PeerId,
}

impl Handler<Initiate> for ConnectionManager {
    type Result = Result<()>;

    fn handle(&mut self, msg: Initiate, _ctx: &mut Context<Self>) -> Self::Result {
        if msg.peer_id == self.self_id {
            return Ok(());
        }
        if self.connections.contains_key(&msg.peer_id) {
            debug!("[{}] connection to {} already exists", "manager".blue(), msg.peer_id);
            return Ok(());
        }
        let session = self.next_session;
        self.next_session += 1;
        let sdp = Sdp { peer_id: self.self_id.clone(), session };
        let mut connection = Connection::initiator(sdp.clone());
        if let Some(buffered) = self.orphan_candidates.remove(&msg.peer_id) {
            connection.buffered_candidates = buffered;
        }
        self.connections.insert(msg.peer_id.clone(), connection);
        info!("[{}] initiating connection to {}", "manager".blue(), msg.peer_id);
        let _ = self.signals.do_send(OutboundSignal {
            to: msg.peer_id.clone(),
            payload: SignalPayload::Offer { sdp },
        });
        self.send_local_candidates(&msg.peer_id);
        Ok(())
    }
}

/// A signaling payload relayed by the directory.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct SignalReceived {
    pub from: PeerId,
    pub payload: SignalPayload,
}

impl Handler<SignalReceived> for ConnectionManager {
    type Result = ();

    fn handle(&mut self, msg: SignalReceived, ctx: &mut Context<Self>) -> Self::Result {
        match msg.payload {
            SignalPayload::Offer { sdp } => {
                if self.connections.contains_key(&msg.from) {
                    // Offer glare: the existing negotiation continues and the
                    // duplicate offer is dropped.
                    debug!("[{}] ignoring duplicate offer from {}", "manager".blue(), msg.from);
                    return;
                }
                // No connection for this peer: an inbound offer is accepted
                // implicitly.
                let local = Sdp { peer_id: self.self_id.clone(), session: sdp.session };
                let mut connection = Connection::responder(sdp, local.clone());
                if let Some(buffered) = self.orphan_candidates.remove(&msg.from) {
                    for candidate in buffered {
                        connection.add_candidate(candidate);
                    }
                }
                connection.state = ConnectionState::CandidateExchange;
                self.connections.insert(msg.from.clone(), connection);
                info!("[{}] accepted offer from {}", "manager".blue(), msg.from);
                let _ = self.signals.do_send(OutboundSignal {
                    to: msg.from.clone(),
                    payload: SignalPayload::Answer { sdp: local },
                });
                self.send_local_candidates(&msg.from);
            }
            SignalPayload::Answer { sdp } => match self.connections.get_mut(&msg.from) {
                Some(connection)
                    if connection.role == Role::Initiator
                        && connection.remote_description.is_none() =>
                {
                    connection.remote_description = Some(sdp);
                    connection.apply_buffered_candidates();
                    connection.state = ConnectionState::CandidateExchange;
                    self.maybe_dial(&msg.from, ctx);
                }
                _ => {
                    debug!("[{}] unexpected answer from {}", "manager".blue(), msg.from);
                }
            },
            SignalPayload::Candidate { candidate } => match self.connections.get_mut(&msg.from) {
                None => {
                    self.orphan_candidates.entry(msg.from).or_insert_with(Vec::new).push(candidate)
                }
                Some(connection) => {
                    connection.add_candidate(candidate);
                    if connection.role == Role::Initiator {
                        self.maybe_dial(&msg.from, ctx);
                    }
                }
            },
        }
    }
}

/// A channel finished its `Hello` handshake (either by dialling out or via
/// the accept loop).
#[derive(Debug, Message)]
#[rtype(result = "()")]
pub struct ChannelEstablished {
    pub peer_id: PeerId,
    pub outbound: mpsc::UnboundedSender<Envelope>,
}

impl Handler<ChannelEstablished> for ConnectionManager {
    type Result = ();

    fn handle(&mut self, msg: ChannelEstablished, _ctx: &mut Context<Self>) -> Self::Result {
        match self.connections.get_mut(&msg.peer_id) {
            Some(connection) => {
                if connection.is_open() {
                    // Keep the first channel; the duplicate's write handle is
                    // dropped, which tears the extra socket down.
                    warn!("[{}] duplicate channel for {}", "manager".blue(), msg.peer_id);
                    return;
                }
                connection.outbound = Some(msg.outbound);
                connection.state = ConnectionState::Connected;
            }
            None => {
                let _ = self
                    .connections
                    .insert(msg.peer_id.clone(), Connection::established(msg.outbound));
            }
        }
        info!("[{}] peer {} connected {}", "manager".blue(), msg.peer_id, "✓".green());
        self.emit(PeerEvent::Connected { peer_id: msg.peer_id });
    }
}

/// Negotiation could not complete; the connection is torn down without retry.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct NegotiationFailed {
    pub peer_id: PeerId,
    pub reason: String,
}

impl Handler<NegotiationFailed> for ConnectionManager {
    type Result = ();

    fn handle(&mut self, msg: NegotiationFailed, _ctx: &mut Context<Self>) -> Self::Result {
        error!(
            "[{}] negotiation with {} failed: {}",
            "manager".blue(),
            msg.peer_id,
            msg.reason.red()
        );
        self.teardown(&msg.peer_id, ConnectionState::Failed);
    }
}

/// The reader task observed the channel closing.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct ChannelClosed {
    pub peer_id: PeerId,
}

impl Handler<ChannelClosed> for ConnectionManager {
    type Result = ();

    fn handle(&mut self, msg: ChannelClosed, _ctx: &mut Context<Self>) -> Self::Result {
        if self.connections.contains_key(&msg.peer_id) {
            info!("[{}] channel to {} closed", "manager".blue(), msg.peer_id);
            self.teardown(&msg.peer_id, ConnectionState::Failed);
        }
    }
}

/// Explicit close requested by a caller.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Close {
    pub peer_id: PeerId,
}

impl Handler<Close> for ConnectionManager {
    type Result = ();

    fn handle(&mut self, msg: Close, _ctx: &mut Context<Self>) -> Self::Result {
        if self.connections.contains_key(&msg.peer_id) {
            info!("[{}] closing connection to {}", "manager".blue(), msg.peer_id);
            self.teardown(&msg.peer_id, ConnectionState::Closed);
        } else {
            debug!("[{}] close for unknown peer {}", "manager".blue(), msg.peer_id);
        }
    }
}

/// Sends one envelope over the peer's established channel.
#[derive(Debug, Clone, Message)]
#[rtype(result = "Result<()>")]
pub struct SendEnvelope {
    pub peer_id: PeerId,
    pub envelope: Envelope,
}

impl Handler<SendEnvelope> for ConnectionManager {
    type Result = Result<()>;

    fn handle(&mut self, msg: SendEnvelope, _ctx: &mut Context<Self>) -> Self::Result {
        match self.connections.get(&msg.peer_id) {
            Some(connection) if connection.is_open() => match &connection.outbound {
                Some(outbound) => {
                    outbound.send(msg.envelope).map_err(|_| Error::NoConnection)
                }
                None => Err(Error::NoConnection),
            },
            _ => Err(Error::NoConnection),
        }
    }
}

/// Sends one envelope to every connected peer.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct BroadcastEnvelope {
    pub envelope: Envelope,
}

impl Handler<BroadcastEnvelope> for ConnectionManager {
    type Result = ();

    fn handle(&mut self, msg: BroadcastEnvelope, _ctx: &mut Context<Self>) -> Self::Result {
        for (peer_id, connection) in self.connections.iter() {
            if !connection.is_open() {
                continue;
            }
            if let Some(outbound) = &connection.outbound {
                if outbound.send(msg.envelope.clone()).is_err() {
                    debug!("[{}] broadcast to {} failed", "manager".blue(), peer_id);
                }
            }
        }
    }
}

/// An application envelope received on a peer channel.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct InboundEnvelope {
    pub peer_id: PeerId,
    pub envelope: Envelope,
}

impl Handler<InboundEnvelope> for ConnectionManager {
    type Result = ();

    fn handle(&mut self, msg: InboundEnvelope, _ctx: &mut Context<Self>) -> Self::Result {
        match &self.routes {
            Some(routes) => {
                let _ = routes.do_send(msg);
            }
            None => warn!("[{}] no routes wired; dropping inbound envelope", "manager".blue()),
        }
    }
}

/// Wires the dispatcher for inbound envelopes; done once at startup.
#[derive(Clone, Message)]
#[rtype(result = "()")]
pub struct RegisterRoutes {
    pub routes: Recipient<InboundEnvelope>,
}

impl Handler<RegisterRoutes> for ConnectionManager {
    type Result = ();

    fn handle(&mut self, msg: RegisterRoutes, _ctx: &mut Context<Self>) -> Self::Result {
        self.routes = Some(msg.routes);
    }
}

/// Subscribes a component to peer lifecycle events.
#[derive(Clone, Message)]
#[rtype(result = "()")]
pub struct Subscribe {
    pub recipient: Recipient<PeerEvent>,
}

impl Handler<Subscribe> for ConnectionManager {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, _ctx: &mut Context<Self>) -> Self::Result {
        self.subscribers.push(msg.recipient);
    }
}

impl Handler<IdentityChanged> for ConnectionManager {
    type Result = ();

    fn handle(&mut self, msg: IdentityChanged, _ctx: &mut Context<Self>) -> Self::Result {
        info!("[{}] adopting identity {}", "manager".blue(), msg.peer_id);
        self.self_id = msg.peer_id.clone();
        let _ = self.registrations.do_send(RegisterIdentity { peer_id: msg.peer_id });
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "ConnectedPeers")]
pub struct GetConnectedPeers;

#[derive(Debug, Clone, MessageResponse)]
pub struct ConnectedPeers {
    pub peers: Vec<PeerId>,
}

impl Handler<GetConnectedPeers> for ConnectionManager {
    type Result = ConnectedPeers;

    fn handle(&mut self, _msg: GetConnectedPeers, _ctx: &mut Context<Self>) -> Self::Result {
        let peers = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.is_open())
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        ConnectedPeers { peers }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "ConnectionStateResult")]
pub struct GetConnectionState {
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct ConnectionStateResult(pub Option<ConnectionState>);

impl Handler<GetConnectionState> for ConnectionManager {
    type Result = ConnectionStateResult;

    fn handle(&mut self, msg: GetConnectionState, _ctx: &mut Context<Self>) -> Self::Result {
        ConnectionStateResult(self.connections.get(&msg.peer_id).map(|c| c.state))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct MockDirectory {
        signals: Vec<OutboundSignal>,
    }

    impl MockDirectory {
        fn new() -> Self {
            MockDirectory { signals: vec![] }
        }
    }

    impl Actor for MockDirectory {
        type Context = Context<Self>;
    }

    impl Handler<OutboundSignal> for MockDirectory {
        type Result = ();

        fn handle(&mut self, msg: OutboundSignal, _ctx: &mut Context<Self>) -> Self::Result {
            self.signals.push(msg);
        }
    }

    impl Handler<RegisterIdentity> for MockDirectory {
        type Result = ();

        fn handle(&mut self, _msg: RegisterIdentity, _ctx: &mut Context<Self>) -> Self::Result {}
    }

    #[derive(Debug, Clone, Message)]
    #[rtype(result = "Signals")]
    struct GetSignals;

    #[derive(Debug, Clone, MessageResponse)]
    struct Signals(Vec<OutboundSignal>);

    impl Handler<GetSignals> for MockDirectory {
        type Result = Signals;

        fn handle(&mut self, _msg: GetSignals, _ctx: &mut Context<Self>) -> Self::Result {
            Signals(self.signals.clone())
        }
    }

    struct EventCollector {
        events: Vec<PeerEvent>,
    }

    impl Actor for EventCollector {
        type Context = Context<Self>;
    }

    impl Handler<PeerEvent> for EventCollector {
        type Result = ();

        fn handle(&mut self, msg: PeerEvent, _ctx: &mut Context<Self>) -> Self::Result {
            self.events.push(msg);
        }
    }

    #[derive(Debug, Clone, Message)]
    #[rtype(result = "Events")]
    struct GetEvents;

    #[derive(Debug, Clone, MessageResponse)]
    struct Events(Vec<PeerEvent>);

    impl Handler<GetEvents> for EventCollector {
        type Result = Events;

        fn handle(&mut self, _msg: GetEvents, _ctx: &mut Context<Self>) -> Self::Result {
            Events(self.events.clone())
        }
    }

    fn manager(directory: &Addr<MockDirectory>) -> Addr<ConnectionManager> {
        ConnectionManager::with_dial_timeout(
            PeerId::new("self"),
            "127.0.0.1:39000".parse().unwrap(),
            vec![],
            directory.clone().recipient(),
            directory.clone().recipient(),
            Duration::from_millis(200),
        )
        .start()
    }

    #[actix_rt::test]
    async fn initiate_sends_offer_and_candidates() {
        let directory = MockDirectory::new().start();
        let manager = manager(&directory);
        let peer = PeerId::new("b");

        manager.send(Initiate { peer_id: peer.clone() }).await.unwrap().unwrap();

        let Signals(signals) = directory.send(GetSignals).await.unwrap();
        assert!(matches!(&signals[0].payload, SignalPayload::Offer { sdp } if sdp.peer_id == PeerId::new("self")));
        assert!(signals
            .iter()
            .any(|s| matches!(&s.payload, SignalPayload::Candidate { .. }) && s.to == peer));

        let state = manager.send(GetConnectionState { peer_id: peer }).await.unwrap();
        assert_eq!(state.0, Some(ConnectionState::Negotiating));
    }

    #[actix_rt::test]
    async fn unknown_offer_is_accepted_implicitly() {
        let directory = MockDirectory::new().start();
        let manager = manager(&directory);
        let peer = PeerId::new("b");

        // A candidate arriving before the offer is buffered, not dropped.
        manager
            .send(SignalReceived {
                from: peer.clone(),
                payload: SignalPayload::Candidate {
                    candidate: CandidateAddr { addr: "127.0.0.1:39001".parse().unwrap() },
                },
            })
            .await
            .unwrap();
        manager
            .send(SignalReceived {
                from: peer.clone(),
                payload: SignalPayload::Offer {
                    sdp: Sdp { peer_id: peer.clone(), session: 7 },
                },
            })
            .await
            .unwrap();

        let Signals(signals) = directory.send(GetSignals).await.unwrap();
        assert!(signals.iter().any(
            |s| matches!(&s.payload, SignalPayload::Answer { sdp } if sdp.session == 7)
        ));
        let state = manager.send(GetConnectionState { peer_id: peer }).await.unwrap();
        assert_eq!(state.0, Some(ConnectionState::CandidateExchange));
    }

    #[actix_rt::test]
    async fn failed_dial_tears_the_connection_down() {
        let directory = MockDirectory::new().start();
        let collector = EventCollector { events: vec![] }.start();
        let manager = manager(&directory);
        manager.send(Subscribe { recipient: collector.clone().recipient() }).await.unwrap();
        let peer = PeerId::new("b");

        manager.send(Initiate { peer_id: peer.clone() }).await.unwrap().unwrap();
        manager
            .send(SignalReceived {
                from: peer.clone(),
                payload: SignalPayload::Answer {
                    sdp: Sdp { peer_id: peer.clone(), session: 1 },
                },
            })
            .await
            .unwrap();
        // Nothing listens on this port; the dial must fail and the
        // connection must be removed without retry.
        manager
            .send(SignalReceived {
                from: peer.clone(),
                payload: SignalPayload::Candidate {
                    candidate: CandidateAddr { addr: "127.0.0.1:9".parse().unwrap() },
                },
            })
            .await
            .unwrap();

        actix_rt::time::sleep(Duration::from_millis(500)).await;
        let state = manager.send(GetConnectionState { peer_id: peer.clone() }).await.unwrap();
        assert_eq!(state.0, None);
        let Events(events) = collector.send(GetEvents).await.unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, PeerEvent::Disconnected { peer_id } if *peer_id == peer)));
    }

    #[actix_rt::test]
    async fn explicit_close_removes_the_connection() {
        let directory = MockDirectory::new().start();
        let collector = EventCollector { events: vec![] }.start();
        let manager = manager(&directory);
        manager.send(Subscribe { recipient: collector.clone().recipient() }).await.unwrap();
        let peer = PeerId::new("b");

        let (tx, _rx) = mpsc::unbounded_channel();
        manager.send(ChannelEstablished { peer_id: peer.clone(), outbound: tx }).await.unwrap();
        let state = manager.send(GetConnectionState { peer_id: peer.clone() }).await.unwrap();
        assert_eq!(state.0, Some(ConnectionState::Connected));

        manager.send(Close { peer_id: peer.clone() }).await.unwrap();
        let state = manager.send(GetConnectionState { peer_id: peer.clone() }).await.unwrap();
        assert_eq!(state.0, None);

        let Events(events) = collector.send(GetEvents).await.unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, PeerEvent::Connected { peer_id } if *peer_id == peer)));
        assert!(events
            .iter()
            .any(|e| matches!(e, PeerEvent::Disconnected { peer_id } if *peer_id == peer)));

        // Sending after close fails with NoConnection.
        let result = manager
            .send(SendEnvelope { peer_id: peer, envelope: Envelope::SyncRequest { peer_id: PeerId::new("self") } })
            .await
            .unwrap();
        assert!(matches!(result, Err(Error::NoConnection)));
    }
}
