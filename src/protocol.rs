//! The overlay wire protocol.
//!
//! Two framings share this module: [DirectoryMsg], spoken on the persistent
//! channel between a node and the directory (the rendezvous transport), and
//! [Envelope], the `{type, data}` JSON object exchanged on established peer
//! channels.

use crate::metrics::tracker::PeerRecord;
use crate::peer_id::PeerId;
use crate::store::contacts::Contact;

use std::net::SocketAddr;

/// A session description produced while negotiating a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sdp {
    /// The node that issued this description.
    pub peer_id: PeerId,
    /// Nonce correlating the offer with its answer.
    pub session: u64,
}

/// A connectivity candidate: an address the issuing node can be dialled on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAddr {
    pub addr: SocketAddr,
}

/// Negotiation payloads relayed through the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalPayload {
    Offer { sdp: Sdp },
    Answer { sdp: Sdp },
    Candidate { candidate: CandidateAddr },
}

/// Frames on the node <-> directory relay channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DirectoryMsg {
    Register { peer_id: PeerId },
    RegisterAck { peer_id: PeerId, accepted: bool },
    Relay { from: PeerId, to: PeerId, payload: SignalPayload },
}

/// The mesh application-channel message envelope.
///
/// Serialized as a JSON object `{"type": ..., "data": ...}`. Unrecognized
/// types deserialize to [Envelope::Unknown] and are dropped silently, which
/// keeps old nodes compatible with newer message sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Envelope {
    /// First frame sent by the dialling side of a freshly opened channel.
    #[serde(rename_all = "camelCase")]
    Hello { peer_id: PeerId },

    // Record store sync
    ContactAdded { contact: Contact },
    ContactDeleted { id: String },
    #[serde(rename_all = "camelCase")]
    SyncRequest { peer_id: PeerId },
    FullSync { contacts: Vec<Contact> },

    // Rendezvous coordination
    #[serde(rename_all = "camelCase")]
    SignalingServerSync { server_id: PeerId, metrics: Vec<PeerRecord>, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    RequestSignalingRole { current_server_id: PeerId, new_server_id: PeerId },
    #[serde(rename_all = "camelCase")]
    SignalingRoleResponse {
        current_server_id: PeerId,
        new_server_id: PeerId,
        new_peer_id: Option<PeerId>,
        accepted: bool,
    },

    // Content routing
    #[serde(rename_all = "camelCase")]
    RequestPage { path: String, repo_coordinates: String },
    PageContent { path: String, content: String },

    // Bandwidth probing; the receiving channel task echoes `ProbeEcho`
    // carrying the observed byte count.
    Probe { token: u64, payload: String },
    ProbeEcho { token: u64, len: usize },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_has_type_data_shape() {
        let env = Envelope::RequestPage {
            path: "index.html".to_owned(),
            repo_coordinates: "example/site@main".to_owned(),
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "requestPage");
        assert_eq!(json["data"]["path"], "index.html");
    }

    #[test]
    fn unknown_envelope_types_are_absorbed() {
        let raw = r#"{"type":"somethingNewer","data":{"x":1}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env, Envelope::Unknown);
    }

    #[test]
    fn signaling_payload_roundtrip() {
        let payload = SignalPayload::Candidate {
            candidate: CandidateAddr { addr: "127.0.0.1:9000".parse().unwrap() },
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: SignalPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, back);
    }
}
