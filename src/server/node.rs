//! Node wiring.
//!
//! The only place that knows the cross-component topology: it builds every
//! actor, connects their recipients, claims a rendezvous identity at the
//! directory, and spawns the two I/O loops (peer accept loop and directory
//! read pump).

use crate::channel::{Channel, Receiver as ChannelReceiver, Sender as ChannelSender};
use crate::directory;
use crate::metrics::{PeerMetricsTracker, WatchUpdates};
use crate::p2p::manager::{
    ConnectionManager, Initiate, RegisterRoutes, SignalReceived, Subscribe,
};
use crate::p2p::signaling::{DirectoryClient, ReceiveRegisterAck};
use crate::peer_id::PeerId;
use crate::protocol::DirectoryMsg;
use crate::rendezvous::SignalingCoordinator;
use crate::router::{ContentRouter, FsOrigin, LoadPage};
use crate::server::{Router, Server, Settings};
use crate::store::RecordStore;
use crate::{Error, Result};

use crate::colored::Colorize;
use tracing::{error, info};

use actix::{Actor, Addr};

use rand::rngs::StdRng;
use rand::SeedableRng;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Handles to a running node, used by callers and tests to drive it.
pub struct NodeHandle {
    pub self_id: PeerId,
    pub is_rendezvous: bool,
    pub listen_addr: SocketAddr,
    pub manager: Addr<ConnectionManager>,
    pub metrics: Addr<PeerMetricsTracker>,
    pub coordinator: Addr<SignalingCoordinator>,
    pub content: Addr<ContentRouter>,
    pub store: Addr<RecordStore>,
}

/// Claims an identity at the directory: the first free well-known rendezvous
/// id makes this node a rendezvous node; with all of them taken the node
/// joins under a fresh random id.
async fn claim_identity(
    sender: &mut ChannelSender<DirectoryMsg>,
    receiver: &mut ChannelReceiver<DirectoryMsg>,
    rendezvous_ids: &[PeerId],
) -> Result<(PeerId, bool)> {
    for id in rendezvous_ids.iter() {
        sender.send(DirectoryMsg::Register { peer_id: id.clone() }).await?;
        match receiver.recv().await? {
            Some(DirectoryMsg::RegisterAck { accepted: true, .. }) => {
                return Ok((id.clone(), true));
            }
            Some(DirectoryMsg::RegisterAck { accepted: false, .. }) => continue,
            _ => return Err(Error::DirectoryClosed),
        }
    }
    let id = PeerId::generate();
    sender.send(DirectoryMsg::Register { peer_id: id.clone() }).await?;
    match receiver.recv().await? {
        Some(DirectoryMsg::RegisterAck { accepted: true, .. }) => Ok((id, false)),
        Some(DirectoryMsg::RegisterAck { accepted: false, .. }) => {
            Err(Error::RegistrationRefused)
        }
        _ => Err(Error::DirectoryClosed),
    }
}

pub async fn run(settings: Settings) -> Result<NodeHandle> {
    let listen_addr: SocketAddr =
        settings.listen_addr.parse().map_err(|_| Error::PeerParseError)?;
    let listener = TcpListener::bind(&listen_addr).await?;
    let listen_addr = listener.local_addr()?;
    let directory_addr: SocketAddr =
        settings.directory_addr.parse().map_err(|_| Error::PeerParseError)?;
    let rendezvous_ids: Vec<PeerId> =
        settings.rendezvous_ids.iter().map(|s| PeerId::new(s.as_str())).collect();
    let rendezvous_set: HashSet<PeerId> = rendezvous_ids.iter().cloned().collect();
    let advertised: Vec<SocketAddr> = settings
        .advertised_addrs
        .iter()
        .filter_map(|addr| addr.parse().ok())
        .collect();

    // Claim an identity before anything else runs; the claim handshake is
    // the only sequential use of the directory channel.
    let channel: Channel<DirectoryMsg> = Channel::connect(&directory_addr).await?;
    let (mut dir_sender, mut dir_receiver) = channel.split();
    let (self_id, is_rendezvous) =
        claim_identity(&mut dir_sender, &mut dir_receiver, &rendezvous_ids).await?;
    info!(
        "node {} starting on {:?} ({})",
        self_id,
        listen_addr,
        if is_rendezvous { "rendezvous".yellow() } else { "peer".green() }
    );

    let data_dir = settings.data_dir().join(self_id.as_str());
    std::fs::create_dir_all(&data_dir)?;
    let db = sled::open(data_dir.join("records.sled"))?;

    // Directory writer pump.
    let (dir_tx, mut dir_rx) = mpsc::unbounded_channel::<DirectoryMsg>();
    tokio::spawn(async move {
        while let Some(frame) = dir_rx.recv().await {
            if dir_sender.send(frame).await.is_err() {
                break;
            }
        }
    });
    let client = DirectoryClient::new(self_id.clone(), dir_tx).start();

    let manager = ConnectionManager::new(
        self_id.clone(),
        listen_addr,
        advertised,
        client.clone().recipient(),
        client.clone().recipient(),
    )
    .start();

    let metrics = PeerMetricsTracker::new(
        self_id.clone(),
        settings.max_peers,
        manager.clone().recipient(),
    )
    .start();

    let store = RecordStore::new(
        self_id.clone(),
        db,
        manager.clone().recipient(),
        manager.clone().recipient(),
    )
    .start();

    let origin = FsOrigin::new(PathBuf::from(&settings.site_root));
    let content = ContentRouter::new(
        self_id.clone(),
        rendezvous_set.clone(),
        manager.clone().recipient(),
        manager.clone().recipient(),
        origin,
        None,
        settings.repo_coordinates.clone(),
        StdRng::from_entropy(),
    )
    .start();

    let coordinator = SignalingCoordinator::new(
        self_id.clone(),
        is_rendezvous,
        rendezvous_set,
        settings.max_peers,
        metrics.clone(),
        manager.clone().recipient(),
        manager.clone().recipient(),
        vec![content.clone().recipient()],
        vec![
            manager.clone().recipient(),
            content.clone().recipient(),
            store.clone().recipient(),
        ],
        StdRng::from_entropy(),
    )
    .start();

    let router = Router::new(
        store.clone(),
        coordinator.clone(),
        content.clone(),
        metrics.clone(),
    )
    .start();

    manager.do_send(RegisterRoutes { routes: router.recipient() });
    manager.do_send(Subscribe { recipient: metrics.clone().recipient() });
    manager.do_send(Subscribe { recipient: store.clone().recipient() });
    manager.do_send(Subscribe { recipient: content.clone().recipient() });
    metrics.do_send(WatchUpdates { recipient: coordinator.clone().recipient() });

    // Directory read pump: relayed payloads drive the negotiation state
    // machines; registration acks feed the client's retry logic.
    let pump_manager = manager.clone();
    let pump_client = client.clone();
    tokio::spawn(async move {
        loop {
            match dir_receiver.recv().await {
                Ok(Some(DirectoryMsg::Relay { from, payload, .. })) => {
                    pump_manager.do_send(SignalReceived { from, payload });
                }
                Ok(Some(DirectoryMsg::RegisterAck { peer_id, accepted })) => {
                    pump_client.do_send(ReceiveRegisterAck { peer_id, accepted });
                }
                Ok(Some(_)) => (),
                Ok(None) | Err(_) => {
                    error!("directory connection lost");
                    break;
                }
            }
        }
    });

    // Peer channel accept loop.
    let server = Server::new(listener, manager.clone());
    tokio::spawn(async move {
        if let Err(err) = server.listen().await {
            error!("peer listener failed: {:?}", err);
        }
    });

    // Join the overlay: rendezvous nodes interconnect, everyone else reaches
    // for the first well-known rendezvous id.
    if is_rendezvous {
        for id in rendezvous_ids.iter().filter(|id| **id != self_id) {
            manager.do_send(Initiate { peer_id: id.clone() });
        }
    } else if let Some(first) = rendezvous_ids.first() {
        manager.do_send(Initiate { peer_id: first.clone() });
    }

    content.do_send(LoadPage { path: "index.html".to_owned() });

    Ok(NodeHandle {
        self_id,
        is_rendezvous,
        listen_addr,
        manager,
        metrics,
        coordinator,
        content,
        store,
    })
}

/// Runs the directory service until the listener fails.
pub async fn run_directory(listen_addr: &str) -> Result<()> {
    let addr: SocketAddr = listen_addr.parse().map_err(|_| Error::PeerParseError)?;
    let listener = TcpListener::bind(&addr).await?;
    let registry = directory::Directory::new().start();
    directory::listen(listener, registry).await
}
