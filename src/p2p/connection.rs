//! Per-peer connection state.

use crate::protocol::{CandidateAddr, Envelope, Sdp};

use tokio::sync::mpsc::UnboundedSender;

/// Which side of the negotiation this node took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Lifecycle of a single peer connection.
///
/// `Idle -> Negotiating -> CandidateExchange -> Connected -> {Failed | Closed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Negotiating,
    CandidateExchange,
    Connected,
    Failed,
    Closed,
}

/// One negotiation attempt plus, once established, the channel write handle.
/// Owned exclusively by the connection manager and removed on close/failure.
pub struct Connection {
    pub role: Role,
    pub state: ConnectionState,
    pub local_description: Option<Sdp>,
    pub remote_description: Option<Sdp>,
    /// Candidates received before both descriptions were set.
    pub buffered_candidates: Vec<CandidateAddr>,
    /// Candidates applied and available for dialling.
    pub candidates: Vec<CandidateAddr>,
    /// Write handle of the open channel; `None` until `Connected`.
    pub outbound: Option<UnboundedSender<Envelope>>,
    /// An initiator dials at most once per negotiation.
    pub dialing: bool,
}

impl Connection {
    pub fn initiator(local_description: Sdp) -> Self {
        Connection {
            role: Role::Initiator,
            state: ConnectionState::Negotiating,
            local_description: Some(local_description),
            remote_description: None,
            buffered_candidates: vec![],
            candidates: vec![],
            outbound: None,
            dialing: false,
        }
    }

    pub fn responder(remote_description: Sdp, local_description: Sdp) -> Self {
        Connection {
            role: Role::Responder,
            state: ConnectionState::Negotiating,
            local_description: Some(local_description),
            remote_description: Some(remote_description),
            buffered_candidates: vec![],
            candidates: vec![],
            outbound: None,
            dialing: false,
        }
    }

    /// A channel that opened without a tracked negotiation (the remote side
    /// completed its half and dialled us directly).
    pub fn established(outbound: UnboundedSender<Envelope>) -> Self {
        Connection {
            role: Role::Responder,
            state: ConnectionState::Connected,
            local_description: None,
            remote_description: None,
            buffered_candidates: vec![],
            candidates: vec![],
            outbound: Some(outbound),
            dialing: false,
        }
    }

    pub fn descriptions_set(&self) -> bool {
        self.local_description.is_some() && self.remote_description.is_some()
    }

    /// Moves buffered candidates into the applied set once both descriptions
    /// are in place.
    pub fn apply_buffered_candidates(&mut self) {
        if self.descriptions_set() && !self.buffered_candidates.is_empty() {
            self.candidates.append(&mut self.buffered_candidates);
        }
    }

    pub fn add_candidate(&mut self, candidate: CandidateAddr) {
        if self.descriptions_set() {
            self.candidates.push(candidate);
            if self.state == ConnectionState::Negotiating {
                self.state = ConnectionState::CandidateExchange;
            }
        } else {
            self.buffered_candidates.push(candidate);
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Connected && self.outbound.is_some()
    }
}
