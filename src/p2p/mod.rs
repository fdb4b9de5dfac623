//! Peer-to-peer connection establishment and supervision.
//!
//! The [manager::ConnectionManager] owns one [connection::Connection] per
//! remote peer and advances its negotiation state machine from signaling
//! payloads relayed by the directory. Once a channel opens, lifecycle events
//! fan out to subscribed components.

pub mod connection;
pub mod manager;
pub mod signaling;

use crate::peer_id::PeerId;
use actix::Message;

/// Channel lifecycle notifications emitted by the connection manager.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub enum PeerEvent {
    Connected { peer_id: PeerId },
    Disconnected { peer_id: PeerId },
}
