use std::path::PathBuf;

/// Default well-known rendezvous identities. Nodes try to claim these in
/// order at startup; the first unclaimed one makes the node a rendezvous
/// node. The ids themselves travel with the role during hand-offs.
pub const DEFAULT_RENDEZVOUS_IDS: [&str; 5] = [
    "550e8400-e29b-41d4-a716-446655440000",
    "6ba7b810-9dad-11d1-80b4-00c04fd430c8",
    "6ba7b810-9dad-11d1-80b4-00c04fd430c9",
    "6ba7b810-9dad-11d1-80b4-00c04fd430ca",
    "6ba7b810-9dad-11d1-80b4-00c04fd430cb",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Address the peer-channel listener binds to.
    pub listen_addr: String,
    /// Address of the rendezvous directory.
    pub directory_addr: String,
    /// The well-known rendezvous identity set.
    pub rendezvous_ids: Vec<String>,
    /// Extra dialable addresses advertised as connectivity candidates; they
    /// affect connectivity success only, never protocol behaviour.
    pub advertised_addrs: Vec<String>,
    /// Cap on the ranked best-peer list.
    pub max_peers: usize,
    /// Where sled databases live; defaults to the platform data dir.
    pub data_dir: Option<String>,
    /// Origin coordinates forwarded with page requests.
    pub repo_coordinates: String,
    /// Local site root served through the origin seam.
    pub site_root: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen_addr: "0.0.0.0:9600".to_owned(),
            directory_addr: "127.0.0.1:9500".to_owned(),
            rendezvous_ids: DEFAULT_RENDEZVOUS_IDS.iter().map(|s| (*s).to_owned()).collect(),
            advertised_addrs: vec![],
            max_peers: 5,
            data_dir: None,
            repo_coordinates: "example/site@main".to_owned(),
            site_root: "./site".to_owned(),
        }
    }
}

impl Settings {
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("peerweave"),
        }
    }
}
