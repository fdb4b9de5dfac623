//! Contact record persistence.

use crate::Result;

use zerocopy::{AsBytes, FromBytes, Unaligned};

/// Fixed-width sled key derived from the contact id.
#[derive(Clone, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct Key {
    id: [u8; 32],
}

impl Key {
    pub fn new(contact_id: &str) -> Key {
        let mut id = [0u8; 32];
        let bytes = contact_id.as_bytes();
        let n = bytes.len().min(32);
        id[..n].copy_from_slice(&bytes[..n]);
        Key { id }
    }
}

/// An application record replicated across the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Inserts or replaces a contact. Returns whether the record was new.
pub fn add_contact(db: &sled::Db, contact: &Contact) -> Result<bool> {
    let key = Key::new(&contact.id);
    let encoded = bincode::serialize(contact)?;
    let previous = db.insert(key.as_bytes(), encoded)?;
    Ok(previous.is_none())
}

/// Fetches every stored contact.
pub fn get_all_contacts(db: &sled::Db) -> Result<Vec<Contact>> {
    let mut contacts = vec![];
    for entry in db.iter() {
        let (_, value) = entry?;
        let contact: Contact = bincode::deserialize(value.as_bytes())?;
        contacts.push(contact);
    }
    Ok(contacts)
}

/// Deletes a contact by id. Returns whether a record existed.
pub fn delete_contact(db: &sled::Db, contact_id: &str) -> Result<bool> {
    let key = Key::new(contact_id);
    let previous = db.remove(key.as_bytes())?;
    Ok(previous.is_some())
}

/// Case-insensitive substring search over names and email addresses.
pub fn search_contacts(db: &sled::Db, query: &str) -> Result<Vec<Contact>> {
    let needle = query.to_lowercase();
    let contacts = get_all_contacts(db)?
        .into_iter()
        .filter(|contact| {
            contact.name.to_lowercase().contains(&needle)
                || contact.email.to_lowercase().contains(&needle)
        })
        .collect();
    Ok(contacts)
}

#[cfg(test)]
mod test {
    use super::*;

    fn temp_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn contact(id: &str, name: &str, email: &str) -> Contact {
        Contact {
            id: id.to_owned(),
            name: name.to_owned(),
            email: email.to_owned(),
            phone: "555-0100".to_owned(),
        }
    }

    #[test]
    fn add_get_delete_roundtrip() {
        let db = temp_db();
        let alice = contact("a1", "Alice", "alice@example.com");
        assert!(add_contact(&db, &alice).unwrap());
        // Re-adding the same id is an upsert, not a new record.
        assert!(!add_contact(&db, &alice).unwrap());

        let all = get_all_contacts(&db).unwrap();
        assert_eq!(all, vec![alice]);

        assert!(delete_contact(&db, "a1").unwrap());
        assert!(!delete_contact(&db, "a1").unwrap());
        assert!(get_all_contacts(&db).unwrap().is_empty());
    }

    #[test]
    fn search_matches_name_and_email_case_insensitively() {
        let db = temp_db();
        add_contact(&db, &contact("a1", "Alice", "alice@example.com")).unwrap();
        add_contact(&db, &contact("b2", "Bob", "bob@example.com")).unwrap();
        add_contact(&db, &contact("c3", "Carol", "carol@other.net")).unwrap();

        let hits = search_contacts(&db, "ALICE").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a1");

        let hits = search_contacts(&db, "example.com").unwrap();
        assert_eq!(hits.len(), 2);

        assert!(search_contacts(&db, "nobody").unwrap().is_empty());
    }
}
