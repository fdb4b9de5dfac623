#[macro_use]
extern crate serde_derive;
extern crate actix_derive;
extern crate colored;

pub mod channel;
pub mod directory;
pub mod metrics;
pub mod p2p;
pub mod peer_id;
pub mod protocol;
pub mod rendezvous;
pub mod router;
pub mod server;
pub mod store;
pub mod util;


use protocol::{DirectoryMsg, Envelope};

#[derive(Debug)]
pub enum Error {
    IO(std::io::Error),
    Sled(sled::Error),
    Bincode(bincode::Error),
    Actix(actix::MailboxError),

    // channel errors
    ChannelError(String),

    // connection errors
    NegotiationFailure(String),
    NoConnection,

    // metrics errors
    MeasurementTimeout,

    // rendezvous errors
    HandoffTimeout,
    HandoffRefused,

    // directory errors
    RegistrationRefused,
    DirectoryClosed,

    /// Error caused by parsing a malformed peer identifier
    PeerParseError,
}

impl std::error::Error for Error {}

impl std::convert::From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IO(error)
    }
}

impl std::convert::From<sled::Error> for Error {
    fn from(error: sled::Error) -> Self {
        Error::Sled(error)
    }
}

impl std::convert::From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Error::Bincode(error)
    }
}

impl std::convert::From<actix::MailboxError> for Error {
    fn from(error: actix::MailboxError) -> Self {
        Error::Actix(error)
    }
}

impl std::convert::From<channel::Error<Envelope>> for Error {
    fn from(error: channel::Error<Envelope>) -> Self {
        Error::ChannelError(format!("{:?}", error))
    }
}

impl std::convert::From<channel::Error<DirectoryMsg>> for Error {
    fn from(error: channel::Error<DirectoryMsg>) -> Self {
        Error::ChannelError(format!("{:?}", error))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
