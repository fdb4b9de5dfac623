//! The replicated record store.
//!
//! Local mutations broadcast `contactAdded` / `contactDeleted` to connected
//! peers; newly connected peers are asked for a `fullSync` via `syncRequest`.
//! Inbound record envelopes are applied verbatim.

pub mod contacts;

use crate::p2p::manager::{BroadcastEnvelope, SendEnvelope};
use crate::p2p::PeerEvent;
use crate::peer_id::PeerId;
use crate::protocol::Envelope;
use crate::rendezvous::IdentityChanged;

use self::contacts::Contact;

use crate::colored::Colorize;
use tracing::{debug, info, warn};

use actix::{Actor, Context, Handler, Message, MessageResponse, Recipient};

pub struct RecordStore {
    self_id: PeerId,
    db: sled::Db,
    sender: Recipient<SendEnvelope>,
    broadcaster: Recipient<BroadcastEnvelope>,
}

impl RecordStore {
    pub fn new(
        self_id: PeerId,
        db: sled::Db,
        sender: Recipient<SendEnvelope>,
        broadcaster: Recipient<BroadcastEnvelope>,
    ) -> Self {
        RecordStore { self_id, db, sender, broadcaster }
    }
}

impl Actor for RecordStore {
    type Context = Context<Self>;
}

/// Adds a contact locally and announces it to the mesh.
#[derive(Debug, Clone, Message)]
#[rtype(result = "bool")]
pub struct AddContact {
    pub contact: Contact,
}

impl Handler<AddContact> for RecordStore {
    type Result = bool;

    fn handle(&mut self, msg: AddContact, _ctx: &mut Context<Self>) -> Self::Result {
        match contacts::add_contact(&self.db, &msg.contact) {
            Ok(inserted) => {
                let _ = self.broadcaster.do_send(BroadcastEnvelope {
                    envelope: Envelope::ContactAdded { contact: msg.contact },
                });
                inserted
            }
            Err(err) => {
                warn!("[{}] add failed: {:?}", "store".cyan(), err);
                false
            }
        }
    }
}

/// Deletes a contact locally and announces the deletion.
#[derive(Debug, Clone, Message)]
#[rtype(result = "bool")]
pub struct DeleteContact {
    pub id: String,
}

impl Handler<DeleteContact> for RecordStore {
    type Result = bool;

    fn handle(&mut self, msg: DeleteContact, _ctx: &mut Context<Self>) -> Self::Result {
        match contacts::delete_contact(&self.db, &msg.id) {
            Ok(existed) => {
                let _ = self.broadcaster.do_send(BroadcastEnvelope {
                    envelope: Envelope::ContactDeleted { id: msg.id },
                });
                existed
            }
            Err(err) => {
                warn!("[{}] delete failed: {:?}", "store".cyan(), err);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "ContactList")]
pub struct GetContacts;

#[derive(Debug, Clone, Message)]
#[rtype(result = "ContactList")]
pub struct SearchContacts {
    pub query: String,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct ContactList {
    pub contacts: Vec<Contact>,
}

impl Handler<GetContacts> for RecordStore {
    type Result = ContactList;

    fn handle(&mut self, _msg: GetContacts, _ctx: &mut Context<Self>) -> Self::Result {
        ContactList { contacts: contacts::get_all_contacts(&self.db).unwrap_or_default() }
    }
}

impl Handler<SearchContacts> for RecordStore {
    type Result = ContactList;

    fn handle(&mut self, msg: SearchContacts, _ctx: &mut Context<Self>) -> Self::Result {
        ContactList {
            contacts: contacts::search_contacts(&self.db, &msg.query).unwrap_or_default(),
        }
    }
}

/// A record envelope received from a peer, applied verbatim.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct RecordSync {
    pub from: PeerId,
    pub envelope: Envelope,
}

impl Handler<RecordSync> for RecordStore {
    type Result = ();

    fn handle(&mut self, msg: RecordSync, _ctx: &mut Context<Self>) -> Self::Result {
        match msg.envelope {
            Envelope::ContactAdded { contact } => {
                if let Err(err) = contacts::add_contact(&self.db, &contact) {
                    warn!("[{}] sync add failed: {:?}", "store".cyan(), err);
                }
            }
            Envelope::ContactDeleted { id } => {
                if let Err(err) = contacts::delete_contact(&self.db, &id) {
                    warn!("[{}] sync delete failed: {:?}", "store".cyan(), err);
                }
            }
            Envelope::SyncRequest { .. } => {
                let all = contacts::get_all_contacts(&self.db).unwrap_or_default();
                let _ = self.sender.do_send(SendEnvelope {
                    peer_id: msg.from,
                    envelope: Envelope::FullSync { contacts: all },
                });
            }
            Envelope::FullSync { contacts: received } => {
                info!("[{}] merging {} records from {}", "store".cyan(), received.len(), msg.from);
                for contact in received {
                    if let Err(err) = contacts::add_contact(&self.db, &contact) {
                        warn!("[{}] merge failed: {:?}", "store".cyan(), err);
                    }
                }
            }
            other => debug!("[{}] unexpected envelope: {:?}", "store".cyan(), other),
        }
    }
}

impl Handler<PeerEvent> for RecordStore {
    type Result = ();

    fn handle(&mut self, msg: PeerEvent, _ctx: &mut Context<Self>) -> Self::Result {
        if let PeerEvent::Connected { peer_id } = msg {
            // Ask every fresh peer for its records.
            let _ = self.sender.do_send(SendEnvelope {
                peer_id,
                envelope: Envelope::SyncRequest { peer_id: self.self_id.clone() },
            });
        }
    }
}

impl Handler<IdentityChanged> for RecordStore {
    type Result = ();

    fn handle(&mut self, msg: IdentityChanged, _ctx: &mut Context<Self>) -> Self::Result {
        self.self_id = msg.peer_id;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Result;

    use actix::Addr;

    struct MockMesh {
        sent: Vec<SendEnvelope>,
        broadcast: Vec<BroadcastEnvelope>,
    }

    impl Actor for MockMesh {
        type Context = Context<Self>;
    }

    impl Handler<SendEnvelope> for MockMesh {
        type Result = Result<()>;

        fn handle(&mut self, msg: SendEnvelope, _ctx: &mut Context<Self>) -> Self::Result {
            self.sent.push(msg);
            Ok(())
        }
    }

    impl Handler<BroadcastEnvelope> for MockMesh {
        type Result = ();

        fn handle(&mut self, msg: BroadcastEnvelope, _ctx: &mut Context<Self>) -> Self::Result {
            self.broadcast.push(msg);
        }
    }

    #[derive(Debug, Clone, Message)]
    #[rtype(result = "MeshLog")]
    struct GetMeshLog;

    #[derive(Debug, Clone, MessageResponse)]
    struct MeshLog {
        sent: Vec<SendEnvelope>,
        broadcast: Vec<BroadcastEnvelope>,
    }

    impl Handler<GetMeshLog> for MockMesh {
        type Result = MeshLog;

        fn handle(&mut self, _msg: GetMeshLog, _ctx: &mut Context<Self>) -> Self::Result {
            MeshLog { sent: self.sent.clone(), broadcast: self.broadcast.clone() }
        }
    }

    fn store(mesh: &Addr<MockMesh>) -> Addr<RecordStore> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        RecordStore::new(
            PeerId::new("self"),
            db,
            mesh.clone().recipient::<SendEnvelope>(),
            mesh.clone().recipient::<BroadcastEnvelope>(),
        )
        .start()
    }

    fn contact(id: &str) -> Contact {
        Contact {
            id: id.to_owned(),
            name: format!("name-{}", id),
            email: format!("{}@example.com", id),
            phone: "555-0100".to_owned(),
        }
    }

    #[actix_rt::test]
    async fn local_mutations_broadcast_to_the_mesh() {
        let mesh = MockMesh { sent: vec![], broadcast: vec![] }.start();
        let store = store(&mesh);

        assert!(store.send(AddContact { contact: contact("a1") }).await.unwrap());
        assert!(store.send(DeleteContact { id: "a1".to_owned() }).await.unwrap());

        let log = mesh.send(GetMeshLog).await.unwrap();
        assert!(matches!(log.broadcast[0].envelope, Envelope::ContactAdded { .. }));
        assert!(matches!(log.broadcast[1].envelope, Envelope::ContactDeleted { .. }));
    }

    #[actix_rt::test]
    async fn sync_request_is_answered_with_a_full_sync() {
        let mesh = MockMesh { sent: vec![], broadcast: vec![] }.start();
        let store = store(&mesh);
        store.send(AddContact { contact: contact("a1") }).await.unwrap();

        store
            .send(RecordSync {
                from: PeerId::new("b"),
                envelope: Envelope::SyncRequest { peer_id: PeerId::new("b") },
            })
            .await
            .unwrap();

        let log = mesh.send(GetMeshLog).await.unwrap();
        let reply = &log.sent[0];
        assert_eq!(reply.peer_id, PeerId::new("b"));
        match &reply.envelope {
            Envelope::FullSync { contacts } => assert_eq!(contacts.len(), 1),
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[actix_rt::test]
    async fn inbound_records_are_applied_and_new_peers_are_synced() {
        let mesh = MockMesh { sent: vec![], broadcast: vec![] }.start();
        let store = store(&mesh);

        store
            .send(RecordSync {
                from: PeerId::new("b"),
                envelope: Envelope::FullSync { contacts: vec![contact("a1"), contact("b2")] },
            })
            .await
            .unwrap();
        let list = store.send(GetContacts).await.unwrap();
        assert_eq!(list.contacts.len(), 2);

        store.send(PeerEvent::Connected { peer_id: PeerId::new("c") }).await.unwrap();
        let log = mesh.send(GetMeshLog).await.unwrap();
        assert!(log
            .sent
            .iter()
            .any(|s| matches!(s.envelope, Envelope::SyncRequest { .. }) && s.peer_id == PeerId::new("c")));
    }
}
