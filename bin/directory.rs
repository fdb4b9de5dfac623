use tracing_subscriber;

use clap::{App, Arg};

use peerweave::server::node;
use peerweave::Result;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_level(false)
        .with_target(false)
        .without_time()
        .compact()
        .with_max_level(tracing::Level::INFO)
        .init();

    let matches = App::new("peerweave-directory")
        .version("0.1")
        .about("Runs the rendezvous directory")
        .arg(
            Arg::with_name("listen-addr")
                .short("a")
                .long("listen-addr")
                .value_name("LISTEN_ADDR")
                .takes_value(true),
        )
        .get_matches();

    let listen_addr = matches.value_of("listen-addr").unwrap_or("0.0.0.0:9500").to_owned();

    let sys = actix::System::new();
    sys.block_on(async move {
        node::run_directory(&listen_addr).await.unwrap();
    });
    sys.run().unwrap();

    Ok(())
}
