use tracing::info;
use tracing_subscriber;

use clap::{value_t, values_t, App, Arg};

use peerweave::server::{node, Settings};
use peerweave::Result;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_level(false)
        .with_target(false)
        .without_time()
        .compact()
        .with_max_level(tracing::Level::INFO)
        .init();

    let matches = App::new("peerweave")
        .version("0.1")
        .about("Runs a peerweave mesh node")
        .arg(
            Arg::with_name("listen-addr")
                .short("a")
                .long("listen-addr")
                .value_name("LISTEN_ADDR")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("directory-addr")
                .short("d")
                .long("directory-addr")
                .value_name("DIRECTORY_ADDR")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("rendezvous-id")
                .short("r")
                .long("rendezvous-id")
                .value_name("RENDEZVOUS_ID")
                .multiple(true),
        )
        .arg(
            Arg::with_name("advertised-addr")
                .long("advertised-addr")
                .value_name("ADVERTISED_ADDR")
                .multiple(true),
        )
        .arg(
            Arg::with_name("max-peers")
                .long("max-peers")
                .value_name("MAX_PEERS")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("data-dir")
                .long("data-dir")
                .value_name("DATA_DIR")
                .takes_value(true),
        )
        .arg(Arg::with_name("repo").long("repo").value_name("REPO").takes_value(true))
        .arg(
            Arg::with_name("site-root")
                .long("site-root")
                .value_name("SITE_ROOT")
                .takes_value(true),
        )
        .get_matches();

    let mut settings = Settings::default();
    if let Some(listen_addr) = matches.value_of("listen-addr") {
        settings.listen_addr = listen_addr.to_owned();
    }
    if let Some(directory_addr) = matches.value_of("directory-addr") {
        settings.directory_addr = directory_addr.to_owned();
    }
    if matches.is_present("rendezvous-id") {
        settings.rendezvous_ids =
            values_t!(matches.values_of("rendezvous-id"), String).unwrap_or_else(|e| e.exit());
    }
    if matches.is_present("advertised-addr") {
        settings.advertised_addrs =
            values_t!(matches.values_of("advertised-addr"), String).unwrap_or_else(|e| e.exit());
    }
    if matches.is_present("max-peers") {
        settings.max_peers =
            value_t!(matches.value_of("max-peers"), usize).unwrap_or_else(|e| e.exit());
    }
    if let Some(data_dir) = matches.value_of("data-dir") {
        settings.data_dir = Some(data_dir.to_owned());
    }
    if let Some(repo) = matches.value_of("repo") {
        settings.repo_coordinates = repo.to_owned();
    }
    if let Some(site_root) = matches.value_of("site-root") {
        settings.site_root = site_root.to_owned();
    }

    let sys = actix::System::new();
    sys.block_on(async move {
        node::run(settings).await.unwrap();

        let sig = if cfg!(unix) {
            use futures::future::FutureExt;
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt()).unwrap();
            let mut sigterm = signal(SignalKind::terminate()).unwrap();

            futures::select! {
                _ = sigint.recv().fuse() => "SIGINT",
                _ = sigterm.recv().fuse() => "SIGTERM"
            }
        } else {
            tokio::signal::ctrl_c().await.unwrap();
            "Ctrl+C"
        };
        info!("Got {}, stopping...", sig);

        actix::System::current().stop();
    });
    sys.run().unwrap();

    Ok(())
}
