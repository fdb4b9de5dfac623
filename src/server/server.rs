use crate::channel::Channel;
use crate::p2p::manager::{attach_channel, ChannelEstablished, ConnectionManager};
use crate::protocol::Envelope;
use crate::Result;

use tracing::{info, warn};

use actix::Addr;

use tokio::net::TcpListener;

/// Accepts inbound peer channels. The dialling side introduces itself with a
/// `hello` frame before the channel is attached to the connection manager.
pub struct Server {
    listener: TcpListener,
    manager: Addr<ConnectionManager>,
}

impl Server {
    pub fn new(listener: TcpListener, manager: Addr<ConnectionManager>) -> Server {
        Server { listener, manager }
    }

    pub async fn listen(self) -> Result<()> {
        info!("listening for peer channels on {:?}", self.listener.local_addr()?);
        loop {
            let channel: Channel<Envelope> = Channel::accept(&self.listener).await?;
            let manager = self.manager.clone();
            tokio::spawn(async move {
                let (sender, mut receiver) = channel.split();
                match receiver.recv().await {
                    Ok(Some(Envelope::Hello { peer_id })) => {
                        let outbound =
                            attach_channel(peer_id.clone(), sender, receiver, manager.clone());
                        manager.do_send(ChannelEstablished { peer_id, outbound });
                    }
                    other => {
                        warn!("peer channel without hello handshake: {:?}", other);
                    }
                }
            });
        }
    }
}
