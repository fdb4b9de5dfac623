//! Content routing over the mesh.
//!
//! Instead of every node fetching from the origin, one non-rendezvous peer is
//! selected at random from the consolidated best-peer list and page requests
//! are relayed to it. The serving side resolves requests through the
//! [OriginFetcher] seam; replies are applied only while their path is still
//! the one being displayed.

use crate::p2p::manager::{Initiate, SendEnvelope};
use crate::p2p::PeerEvent;
use crate::peer_id::PeerId;
use crate::protocol::Envelope;
use crate::rendezvous::{BestPeersUpdated, IdentityChanged};
use crate::util;
use crate::Result;

use crate::metrics::tracker::PeerRecord;

use crate::colored::Colorize;
use tracing::{debug, info, warn};

use actix::{Actor, ActorFutureExt, AsyncContext, Context, Handler, Message, MessageResponse, Recipient, WrapFuture};

use rand::rngs::StdRng;

use futures::Future;

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

/// Resolves a page from the authoritative origin store. The real fetch is
/// external glue; nodes inject an implementation at wiring time.
pub trait OriginFetcher: Send + Sync {
    fn fetch(
        &self,
        repo_coordinates: &str,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send>>;
}

/// Serves pages from a local site directory.
pub struct FsOrigin {
    root: PathBuf,
}

impl FsOrigin {
    pub fn new(root: PathBuf) -> Arc<dyn OriginFetcher> {
        Arc::new(FsOrigin { root })
    }
}

impl OriginFetcher for FsOrigin {
    fn fetch(
        &self,
        _repo_coordinates: &str,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send>> {
        if path.contains("..") {
            let err = std::io::Error::new(std::io::ErrorKind::InvalidInput, "path escapes root");
            return Box::pin(async move { Err(crate::Error::IO(err)) });
        }
        let full = self.root.join(path);
        Box::pin(async move {
            let content = tokio::fs::read_to_string(full).await?;
            Ok(content)
        })
    }
}

pub struct ContentRouter {
    self_id: PeerId,
    rendezvous_ids: std::collections::HashSet<PeerId>,
    sender: Recipient<SendEnvelope>,
    connector: Recipient<Initiate>,
    origin: Arc<dyn OriginFetcher>,
    sink: Option<Recipient<PageLoaded>>,
    best_peers: Vec<PeerRecord>,
    content_peer: Option<PeerId>,
    desired_path: Option<String>,
    repo_coordinates: String,
    rng: StdRng,
}

impl ContentRouter {
    pub fn new(
        self_id: PeerId,
        rendezvous_ids: std::collections::HashSet<PeerId>,
        sender: Recipient<SendEnvelope>,
        connector: Recipient<Initiate>,
        origin: Arc<dyn OriginFetcher>,
        sink: Option<Recipient<PageLoaded>>,
        repo_coordinates: String,
        rng: StdRng,
    ) -> Self {
        ContentRouter {
            self_id,
            rendezvous_ids,
            sender,
            connector,
            origin,
            sink,
            best_peers: vec![],
            content_peer: None,
            desired_path: None,
            repo_coordinates,
            rng,
        }
    }

    /// Filters rendezvous nodes (and self) out of the ranked list and picks
    /// uniformly at random among the rest. An empty remainder clears the
    /// selection and pages fall back to the local origin.
    fn reselect(&mut self) {
        let eligible: Vec<PeerId> = self
            .best_peers
            .iter()
            .filter(|record| {
                !self.rendezvous_ids.contains(&record.peer_id) && record.peer_id != self.self_id
            })
            .map(|record| record.peer_id.clone())
            .collect();
        let selected = util::choose(&mut self.rng, &eligible).cloned();
        if selected != self.content_peer {
            match &selected {
                Some(peer_id) => {
                    info!("[{}] selected content peer {}", "router".green(), peer_id)
                }
                None => debug!("[{}] no eligible content peer", "router".green()),
            }
            self.content_peer = selected;
        }
    }

    fn deliver(&self, path: String, content: String) {
        match &self.sink {
            Some(sink) => {
                let _ = sink.do_send(PageLoaded { path, content });
            }
            None => info!("[{}] page {} loaded ({} bytes)", "router".green(), path, content.len()),
        }
    }

    /// Requests the currently desired path from the selected content peer,
    /// initiating a connection first when none is established. With no
    /// selection the page is resolved locally.
    fn request_current(&mut self, ctx: &mut Context<Self>) {
        let path = match &self.desired_path {
            Some(path) => path.clone(),
            None => return,
        };
        let peer_id = match &self.content_peer {
            Some(peer_id) => peer_id.clone(),
            None => {
                self.fetch_locally(path, ctx);
                return;
            }
        };
        let envelope = Envelope::RequestPage {
            path: path.clone(),
            repo_coordinates: self.repo_coordinates.clone(),
        };
        let sender = self.sender.clone();
        let connector = self.connector.clone();
        ctx.spawn(
            async move {
                match sender.send(SendEnvelope { peer_id: peer_id.clone(), envelope }).await {
                    Ok(Ok(())) => (),
                    _ => {
                        // No channel yet: re-initiate and retry on connect.
                        debug!(
                            "[{}] no channel to content peer {}; initiating",
                            "router".green(),
                            peer_id
                        );
                        let _ = connector.do_send(Initiate { peer_id });
                    }
                }
            }
            .into_actor(self),
        );
    }

    fn fetch_locally(&mut self, path: String, ctx: &mut Context<Self>) {
        let origin = self.origin.clone();
        let repo_coordinates = self.repo_coordinates.clone();
        let fut = async move { origin.fetch(&repo_coordinates, &path).await.map(|c| (path, c)) };
        ctx.spawn(fut.into_actor(self).map(|result, actor, _ctx| match result {
            Ok((path, content)) => actor.deliver(path, content),
            Err(err) => warn!("[{}] local page load failed: {:?}", "router".green(), err),
        }));
    }
}

impl Actor for ContentRouter {
    type Context = Context<Self>;
}

/// Sets the path the node currently wants displayed.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct LoadPage {
    pub path: String,
}

impl Handler<LoadPage> for ContentRouter {
    type Result = ();

    fn handle(&mut self, msg: LoadPage, ctx: &mut Context<Self>) -> Self::Result {
        self.desired_path = Some(msg.path);
        self.request_current(ctx);
    }
}

impl Handler<BestPeersUpdated> for ContentRouter {
    type Result = ();

    fn handle(&mut self, msg: BestPeersUpdated, ctx: &mut Context<Self>) -> Self::Result {
        self.best_peers = msg.peers;
        let previous = self.content_peer.clone();
        self.reselect();
        if self.content_peer != previous && self.desired_path.is_some() {
            self.request_current(ctx);
        }
    }
}

/// An inbound `requestPage` from a peer; resolve via the origin and reply.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct PageRequested {
    pub from: PeerId,
    pub path: String,
    pub repo_coordinates: String,
}

impl Handler<PageRequested> for ContentRouter {
    type Result = ();

    fn handle(&mut self, msg: PageRequested, ctx: &mut Context<Self>) -> Self::Result {
        let origin = self.origin.clone();
        let sender = self.sender.clone();
        ctx.spawn(
            async move {
                match origin.fetch(&msg.repo_coordinates, &msg.path).await {
                    Ok(content) => {
                        let envelope = Envelope::PageContent { path: msg.path, content };
                        match sender.send(SendEnvelope { peer_id: msg.from, envelope }).await {
                            Ok(Ok(())) => (),
                            _ => debug!("[{}] page reply undeliverable", "router".green()),
                        }
                    }
                    Err(err) => {
                        warn!("[{}] origin fetch for {} failed: {:?}", "router".green(), msg.path, err)
                    }
                }
            }
            .into_actor(self),
        );
    }
}

/// An inbound `pageContent` reply.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct PageDelivered {
    pub path: String,
    pub content: String,
}

impl Handler<PageDelivered> for ContentRouter {
    type Result = ();

    fn handle(&mut self, msg: PageDelivered, _ctx: &mut Context<Self>) -> Self::Result {
        // Stale replies for a since-navigated-away path are discarded.
        if self.desired_path.as_deref() != Some(msg.path.as_str()) {
            debug!("[{}] discarding stale page {}", "router".green(), msg.path);
            return;
        }
        self.deliver(msg.path, msg.content);
    }
}

impl Handler<PeerEvent> for ContentRouter {
    type Result = ();

    fn handle(&mut self, msg: PeerEvent, ctx: &mut Context<Self>) -> Self::Result {
        match msg {
            PeerEvent::Connected { peer_id } => {
                if Some(&peer_id) == self.content_peer.as_ref() && self.desired_path.is_some() {
                    self.request_current(ctx);
                }
            }
            PeerEvent::Disconnected { peer_id } => {
                if Some(&peer_id) == self.content_peer.as_ref() {
                    self.content_peer = None;
                    self.reselect();
                }
            }
        }
    }
}

impl Handler<IdentityChanged> for ContentRouter {
    type Result = ();

    fn handle(&mut self, msg: IdentityChanged, _ctx: &mut Context<Self>) -> Self::Result {
        self.self_id = msg.peer_id;
    }
}

/// A resolved page handed to the display layer.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct PageLoaded {
    pub path: String,
    pub content: String,
}

#[cfg(test)]
mod test {
    use super::*;

    use rand::SeedableRng;

    use std::collections::HashSet;

    struct MockMesh {
        sent: Vec<SendEnvelope>,
        initiated: Vec<PeerId>,
        connected: bool,
    }

    impl Actor for MockMesh {
        type Context = Context<Self>;
    }

    impl Handler<SendEnvelope> for MockMesh {
        type Result = Result<()>;

        fn handle(&mut self, msg: SendEnvelope, _ctx: &mut Context<Self>) -> Self::Result {
            if self.connected {
                self.sent.push(msg);
                Ok(())
            } else {
                Err(crate::Error::NoConnection)
            }
        }
    }

    impl Handler<Initiate> for MockMesh {
        type Result = Result<()>;

        fn handle(&mut self, msg: Initiate, _ctx: &mut Context<Self>) -> Self::Result {
            self.initiated.push(msg.peer_id);
            self.connected = true;
            Ok(())
        }
    }

    #[derive(Debug, Clone, Message)]
    #[rtype(result = "MeshLog")]
    struct GetMeshLog;

    #[derive(Debug, Clone, MessageResponse)]
    struct MeshLog {
        sent: Vec<SendEnvelope>,
        initiated: Vec<PeerId>,
    }

    impl Handler<GetMeshLog> for MockMesh {
        type Result = MeshLog;

        fn handle(&mut self, _msg: GetMeshLog, _ctx: &mut Context<Self>) -> Self::Result {
            MeshLog { sent: self.sent.clone(), initiated: self.initiated.clone() }
        }
    }

    struct CannedOrigin;

    impl OriginFetcher for CannedOrigin {
        fn fetch(
            &self,
            _repo_coordinates: &str,
            path: &str,
        ) -> Pin<Box<dyn Future<Output = Result<String>> + Send>> {
            let body = format!("<html>{}</html>", path);
            Box::pin(async move { Ok(body) })
        }
    }

    struct PageCollector {
        pages: Vec<PageLoaded>,
    }

    impl Actor for PageCollector {
        type Context = Context<Self>;
    }

    impl Handler<PageLoaded> for PageCollector {
        type Result = ();

        fn handle(&mut self, msg: PageLoaded, _ctx: &mut Context<Self>) -> Self::Result {
            self.pages.push(msg);
        }
    }

    #[derive(Debug, Clone, Message)]
    #[rtype(result = "Pages")]
    struct GetPages;

    #[derive(Debug, Clone, MessageResponse)]
    struct Pages(Vec<PageLoaded>);

    impl Handler<GetPages> for PageCollector {
        type Result = Pages;

        fn handle(&mut self, _msg: GetPages, _ctx: &mut Context<Self>) -> Self::Result {
            Pages(self.pages.clone())
        }
    }

    fn record(id: &str, bandwidth: f64) -> PeerRecord {
        PeerRecord { peer_id: PeerId::new(id), bandwidth, latency: 1.0, last_update: 0 }
    }

    fn router(
        mesh: &actix::Addr<MockMesh>,
        sink: Option<Recipient<PageLoaded>>,
    ) -> actix::Addr<ContentRouter> {
        let rendezvous: HashSet<PeerId> = vec![PeerId::new("s1")].into_iter().collect();
        ContentRouter::new(
            PeerId::new("self"),
            rendezvous,
            mesh.clone().recipient::<SendEnvelope>(),
            mesh.clone().recipient::<Initiate>(),
            Arc::new(CannedOrigin),
            sink,
            "example/site@main".to_owned(),
            StdRng::seed_from_u64(7),
        )
        .start()
    }

    #[actix_rt::test]
    async fn selection_skips_rendezvous_nodes_and_self() {
        let mesh = MockMesh { sent: vec![], initiated: vec![], connected: true }.start();
        let router = router(&mesh, None);

        router.send(LoadPage { path: "index.html".to_owned() }).await.unwrap();
        router
            .send(BestPeersUpdated {
                peers: vec![record("s1", 900.0), record("self", 800.0), record("a", 100.0)],
            })
            .await
            .unwrap();
        actix_rt::time::sleep(tokio::time::Duration::from_millis(30)).await;

        let log = mesh.send(GetMeshLog).await.unwrap();
        let request = log
            .sent
            .iter()
            .find(|s| matches!(s.envelope, Envelope::RequestPage { .. }))
            .expect("no page request sent");
        assert_eq!(request.peer_id, PeerId::new("a"));
    }

    #[actix_rt::test]
    async fn unreachable_content_peer_is_reinitiated_then_served_on_connect() {
        let mesh = MockMesh { sent: vec![], initiated: vec![], connected: false }.start();
        let router = router(&mesh, None);

        router.send(LoadPage { path: "index.html".to_owned() }).await.unwrap();
        router.send(BestPeersUpdated { peers: vec![record("a", 100.0)] }).await.unwrap();
        actix_rt::time::sleep(tokio::time::Duration::from_millis(30)).await;

        let log = mesh.send(GetMeshLog).await.unwrap();
        assert_eq!(log.initiated, vec![PeerId::new("a")]);

        router.send(PeerEvent::Connected { peer_id: PeerId::new("a") }).await.unwrap();
        actix_rt::time::sleep(tokio::time::Duration::from_millis(30)).await;
        let log = mesh.send(GetMeshLog).await.unwrap();
        assert!(log.sent.iter().any(|s| matches!(s.envelope, Envelope::RequestPage { .. })));
    }

    #[actix_rt::test]
    async fn stale_page_replies_are_discarded() {
        let mesh = MockMesh { sent: vec![], initiated: vec![], connected: true }.start();
        let collector = PageCollector { pages: vec![] }.start();
        let router = router(&mesh, Some(collector.clone().recipient()));

        router.send(LoadPage { path: "contact.html".to_owned() }).await.unwrap();
        router
            .send(PageDelivered {
                path: "index.html".to_owned(),
                content: "<html>old</html>".to_owned(),
            })
            .await
            .unwrap();
        router
            .send(PageDelivered {
                path: "contact.html".to_owned(),
                content: "<html>contact</html>".to_owned(),
            })
            .await
            .unwrap();
        actix_rt::time::sleep(tokio::time::Duration::from_millis(30)).await;

        let Pages(pages) = collector.send(GetPages).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].path, "contact.html");
    }

    #[actix_rt::test]
    async fn empty_selection_falls_back_to_the_local_origin() {
        let mesh = MockMesh { sent: vec![], initiated: vec![], connected: true }.start();
        let collector = PageCollector { pages: vec![] }.start();
        let router = router(&mesh, Some(collector.clone().recipient()));

        // Only rendezvous peers are ranked, so nothing is selectable.
        router.send(BestPeersUpdated { peers: vec![record("s1", 900.0)] }).await.unwrap();
        router.send(LoadPage { path: "index.html".to_owned() }).await.unwrap();
        actix_rt::time::sleep(tokio::time::Duration::from_millis(30)).await;

        let Pages(pages) = collector.send(GetPages).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].content, "<html>index.html</html>");
    }

    #[actix_rt::test]
    async fn serves_page_requests_through_the_origin() {
        let mesh = MockMesh { sent: vec![], initiated: vec![], connected: true }.start();
        let router = router(&mesh, None);

        router
            .send(PageRequested {
                from: PeerId::new("b"),
                path: "legal.html".to_owned(),
                repo_coordinates: "example/site@main".to_owned(),
            })
            .await
            .unwrap();
        actix_rt::time::sleep(tokio::time::Duration::from_millis(30)).await;

        let log = mesh.send(GetMeshLog).await.unwrap();
        let reply = log
            .sent
            .iter()
            .find(|s| matches!(s.envelope, Envelope::PageContent { .. }))
            .expect("no page content sent");
        assert_eq!(reply.peer_id, PeerId::new("b"));
        match &reply.envelope {
            Envelope::PageContent { path, content } => {
                assert_eq!(path, "legal.html");
                assert_eq!(content, "<html>legal.html</html>");
            }
            _ => unreachable!(),
        }
    }
}
