//! The rendezvous directory.
//!
//! An external collaborator implemented at its interface boundary only: it
//! maps registered peer ids to live relay channels and forwards opaque
//! signaling payloads between them. It holds no overlay state beyond the
//! registration table and never inspects payloads.

use crate::channel::Channel;
use crate::peer_id::PeerId;
use crate::protocol::DirectoryMsg;
use crate::Result;

use crate::colored::Colorize;
use tracing::{debug, info, warn};

use actix::{Actor, Addr, Context, Handler, Message};

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use std::collections::HashMap;

pub struct Directory {
    peers: HashMap<PeerId, mpsc::UnboundedSender<DirectoryMsg>>,
}

impl Directory {
    pub fn new() -> Self {
        Directory { peers: HashMap::new() }
    }
}

impl Actor for Directory {
    type Context = Context<Self>;
}

/// Registers a relay channel under `peer_id`. An id held by another live
/// channel is refused; a connection re-registering frees its previous id
/// (identity adoption during a role hand-off).
#[derive(Message)]
#[rtype(result = "bool")]
pub struct RegisterRelay {
    pub peer_id: PeerId,
    pub relay: mpsc::UnboundedSender<DirectoryMsg>,
    pub replaces: Option<PeerId>,
}

impl Handler<RegisterRelay> for Directory {
    type Result = bool;

    fn handle(&mut self, msg: RegisterRelay, _ctx: &mut Context<Self>) -> Self::Result {
        match self.peers.get(&msg.peer_id) {
            Some(existing) if !existing.is_closed() && !existing.same_channel(&msg.relay) => {
                debug!("[{}] id {} is taken", "directory".magenta(), msg.peer_id);
                return false;
            }
            _ => (),
        }
        if let Some(previous) = msg.replaces {
            let _ = self.peers.remove(&previous);
        }
        info!("[{}] registered {}", "directory".magenta(), msg.peer_id);
        let _ = self.peers.insert(msg.peer_id, msg.relay);
        true
    }
}

/// Removes a registration when its connection goes away.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deregister {
    pub peer_id: PeerId,
    pub relay: mpsc::UnboundedSender<DirectoryMsg>,
}

impl Handler<Deregister> for Directory {
    type Result = ();

    fn handle(&mut self, msg: Deregister, _ctx: &mut Context<Self>) -> Self::Result {
        match self.peers.get(&msg.peer_id) {
            Some(existing) if existing.same_channel(&msg.relay) => {
                info!("[{}] deregistered {}", "directory".magenta(), msg.peer_id);
                let _ = self.peers.remove(&msg.peer_id);
            }
            // The id has already been taken over by another connection.
            _ => (),
        }
    }
}

/// Forwards one signaling payload to its target, best effort.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Forward {
    pub frame: DirectoryMsg,
}

impl Handler<Forward> for Directory {
    type Result = ();

    fn handle(&mut self, msg: Forward, _ctx: &mut Context<Self>) -> Self::Result {
        let to = match &msg.frame {
            DirectoryMsg::Relay { to, .. } => to.clone(),
            _ => return,
        };
        match self.peers.get(&to) {
            Some(relay) => {
                if relay.send(msg.frame).is_err() {
                    warn!("[{}] relay target {} hung up", "directory".magenta(), to);
                }
            }
            None => warn!("[{}] dropping relay for unknown peer {}", "directory".magenta(), to),
        }
    }
}

/// Accept loop: one framed channel per node, a writer task per connection,
/// registrations tracked so the table cleans up on disconnect.
pub async fn listen(listener: TcpListener, directory: Addr<Directory>) -> Result<()> {
    info!("[{}] listening on {:?}", "directory".magenta(), listener.local_addr()?);
    loop {
        let channel: Channel<DirectoryMsg> = Channel::accept(&listener).await?;
        let directory = directory.clone();
        tokio::spawn(async move {
            let (mut sender, mut receiver) = channel.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<DirectoryMsg>();
            tokio::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
            });
            let mut registered: Option<PeerId> = None;
            loop {
                match receiver.recv().await {
                    Ok(Some(DirectoryMsg::Register { peer_id })) => {
                        let accepted = directory
                            .send(RegisterRelay {
                                peer_id: peer_id.clone(),
                                relay: tx.clone(),
                                replaces: registered.clone(),
                            })
                            .await
                            .unwrap_or(false);
                        if accepted {
                            registered = Some(peer_id.clone());
                        }
                        let _ = tx.send(DirectoryMsg::RegisterAck { peer_id, accepted });
                    }
                    Ok(Some(frame @ DirectoryMsg::Relay { .. })) => {
                        directory.do_send(Forward { frame });
                    }
                    Ok(Some(other)) => {
                        debug!("[{}] unexpected frame: {:?}", "directory".magenta(), other)
                    }
                    Ok(None) | Err(_) => {
                        if let Some(peer_id) = registered.take() {
                            directory.do_send(Deregister { peer_id, relay: tx.clone() });
                        }
                        break;
                    }
                }
            }
        });
    }
}
