pub mod node;
pub mod router;
pub mod server;
pub mod settings;

pub use node::{run, NodeHandle};
pub use router::Router;
pub use server::Server;
pub use settings::Settings;
