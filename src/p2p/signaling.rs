//! Client side of the rendezvous (directory) transport.
//!
//! The node keeps one persistent framed channel to the directory. This actor
//! owns the write side via an unbounded queue drained by a writer task; the
//! read side is pumped in `server::node` and fans relayed payloads into the
//! connection manager.

use crate::peer_id::PeerId;
use crate::protocol::{DirectoryMsg, SignalPayload};

use crate::colored::Colorize;
use tracing::{error, info, warn};

use actix::{Actor, AsyncContext, Context, Handler, Message};

use tokio::sync::mpsc;
use tokio::time::Duration;

/// Base delay of the re-registration backoff; attempt `n` waits `n` deltas.
pub const REGISTER_RETRY_DELTA: Duration = Duration::from_millis(250);
const REGISTER_RETRY_LIMIT: u32 = 5;

pub struct DirectoryClient {
    self_id: PeerId,
    writer: mpsc::UnboundedSender<DirectoryMsg>,
    /// An identity adoption that has not been acknowledged yet.
    pending_register: Option<PeerId>,
    attempts: u32,
}

impl DirectoryClient {
    pub fn new(self_id: PeerId, writer: mpsc::UnboundedSender<DirectoryMsg>) -> Self {
        DirectoryClient { self_id, writer, pending_register: None, attempts: 0 }
    }

    fn push(&self, msg: DirectoryMsg) {
        if self.writer.send(msg).is_err() {
            error!("[{}] directory channel is gone", "signaling".magenta());
        }
    }
}

impl Actor for DirectoryClient {
    type Context = Context<Self>;
}

/// A negotiation payload to relay to another peer.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct OutboundSignal {
    pub to: PeerId,
    pub payload: SignalPayload,
}

impl Handler<OutboundSignal> for DirectoryClient {
    type Result = ();

    fn handle(&mut self, msg: OutboundSignal, _ctx: &mut Context<Self>) -> Self::Result {
        self.push(DirectoryMsg::Relay {
            from: self.self_id.clone(),
            to: msg.to,
            payload: msg.payload,
        });
    }
}

/// Registers a (possibly newly adopted) identity with the directory.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct RegisterIdentity {
    pub peer_id: PeerId,
}

impl Handler<RegisterIdentity> for DirectoryClient {
    type Result = ();

    fn handle(&mut self, msg: RegisterIdentity, _ctx: &mut Context<Self>) -> Self::Result {
        self.self_id = msg.peer_id.clone();
        self.pending_register = Some(msg.peer_id.clone());
        self.attempts = 0;
        self.push(DirectoryMsg::Register { peer_id: msg.peer_id });
    }
}

/// Registration outcome pumped back from the directory read loop.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct ReceiveRegisterAck {
    pub peer_id: PeerId,
    pub accepted: bool,
}

impl Handler<ReceiveRegisterAck> for DirectoryClient {
    type Result = ();

    fn handle(&mut self, msg: ReceiveRegisterAck, ctx: &mut Context<Self>) -> Self::Result {
        let pending = match &self.pending_register {
            Some(pending) if *pending == msg.peer_id => pending.clone(),
            _ => return,
        };
        if msg.accepted {
            info!("[{}] registered as {}", "signaling".magenta(), pending);
            self.pending_register = None;
            return;
        }
        // The previous holder of an adopted id frees it only once it
        // re-registers itself, so a refusal here is usually transient.
        self.attempts += 1;
        if self.attempts >= REGISTER_RETRY_LIMIT {
            error!("[{}] giving up registering {}", "signaling".magenta(), pending);
            self.pending_register = None;
            return;
        }
        warn!(
            "[{}] registration of {} refused, retrying (attempt {})",
            "signaling".magenta(),
            pending,
            self.attempts
        );
        let delta = REGISTER_RETRY_DELTA * self.attempts;
        ctx.notify_later(RetryRegister, delta);
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
struct RetryRegister;

impl Handler<RetryRegister> for DirectoryClient {
    type Result = ();

    fn handle(&mut self, _msg: RetryRegister, _ctx: &mut Context<Self>) -> Self::Result {
        if let Some(pending) = &self.pending_register {
            self.push(DirectoryMsg::Register { peer_id: pending.clone() });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[actix_rt::test]
    async fn relays_are_stamped_with_the_current_identity() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = DirectoryClient::new(PeerId::new("a"), tx).start();

        client
            .send(OutboundSignal {
                to: PeerId::new("b"),
                payload: SignalPayload::Offer {
                    sdp: crate::protocol::Sdp { peer_id: PeerId::new("a"), session: 1 },
                },
            })
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            DirectoryMsg::Relay { from, to, .. } => {
                assert_eq!(from, PeerId::new("a"));
                assert_eq!(to, PeerId::new("b"));
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        // After adopting a new identity, relays carry the new id.
        client.send(RegisterIdentity { peer_id: PeerId::new("s1") }).await.unwrap();
        match rx.recv().await.unwrap() {
            DirectoryMsg::Register { peer_id } => assert_eq!(peer_id, PeerId::new("s1")),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[actix_rt::test]
    async fn refused_registration_is_retried_with_backoff() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = DirectoryClient::new(PeerId::new("a"), tx).start();

        client.send(RegisterIdentity { peer_id: PeerId::new("s1") }).await.unwrap();
        let _ = rx.recv().await.unwrap();

        client
            .send(ReceiveRegisterAck { peer_id: PeerId::new("s1"), accepted: false })
            .await
            .unwrap();
        actix_rt::time::sleep(Duration::from_millis(400)).await;
        match rx.recv().await.unwrap() {
            DirectoryMsg::Register { peer_id } => assert_eq!(peer_id, PeerId::new("s1")),
            other => panic!("unexpected frame: {:?}", other),
        }

        // An acceptance settles the pending registration.
        client
            .send(ReceiveRegisterAck { peer_id: PeerId::new("s1"), accepted: true })
            .await
            .unwrap();
        actix_rt::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
