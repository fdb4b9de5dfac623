//! Length-delimited, JSON framed duplex channels over TCP.
//!
//! A [Channel] is split into an owned [Sender] and [Receiver] so the two
//! directions can be driven from independent tasks for the lifetime of the
//! connection. Frame order is inherited from the underlying stream, which
//! gives each peer channel the reliable-ordered delivery the overlay assumes.

use futures::prelude::*;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_serde::formats::*;
use tokio_serde::Framed;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

#[derive(Debug)]
pub enum Error<T>
where
    T: for<'de> Deserialize<'de> + Serialize,
{
    IO(std::io::Error),
    ReadError(<Reader<T> as futures::TryStream>::Error),
    WriteError(<Writer<T> as futures::Sink<T>>::Error),
}

pub type Reader<T> = Framed<FramedRead<OwnedReadHalf, LengthDelimitedCodec>, T, T, Json<T, T>>;

pub type Writer<T> = Framed<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>, T, T, Json<T, T>>;

pub struct Receiver<T>
where
    T: for<'de> Deserialize<'de> + Serialize,
{
    reader: Reader<T>,
}

impl<T> Receiver<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Unpin,
{
    pub async fn recv(&mut self) -> Result<Option<T>, Error<T>> {
        Ok(self.reader.try_next().await.map_err(Error::ReadError)?)
    }
}

pub struct Sender<T>
where
    T: for<'de> Deserialize<'de> + Serialize,
{
    writer: Writer<T>,
}

impl<T> Sender<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Unpin,
{
    pub async fn send(&mut self, item: T) -> Result<(), Error<T>> {
        Ok(self.writer.send(item).await.map_err(Error::WriteError)?)
    }
}

pub struct Channel<T> {
    socket: TcpStream,
    ghost: PhantomData<T>,
}

impl<T> Channel<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Unpin,
{
    pub async fn connect(address: &SocketAddr) -> Result<Channel<T>, Error<T>> {
        let socket = TcpStream::connect(&address).await.map_err(Error::IO)?;
        Ok(Channel { socket, ghost: Default::default() })
    }

    pub async fn accept(listener: &TcpListener) -> Result<Channel<T>, Error<T>> {
        let (socket, _) = listener.accept().await.map_err(Error::IO)?;
        Ok(Channel { socket, ghost: Default::default() })
    }

    pub fn split(self) -> (Sender<T>, Receiver<T>) {
        let (read_half, write_half) = self.socket.into_split();

        let reader: FramedRead<OwnedReadHalf, LengthDelimitedCodec> =
            FramedRead::new(read_half, LengthDelimitedCodec::new());
        let reader = Framed::new(reader, Json::default());

        let writer: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec> =
            FramedWrite::new(write_half, LengthDelimitedCodec::new());
        let writer = Framed::new(writer, Json::default());

        (Sender { writer }, Receiver { reader })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[derive(Debug, PartialEq, Deserialize, Serialize)]
    struct Frame(String);

    #[actix_rt::test]
    async fn send_recv_over_owned_halves() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let handle_1 = tokio::spawn(async move {
            let channel: Channel<Frame> =
                Channel::accept(&listener).await.expect("failed to accept connection");
            let (mut sender, mut receiver) = channel.split();

            sender.send(Frame(String::from("123"))).await.unwrap();
            let msg = receiver.recv().await.unwrap();
            assert_eq!(msg, Some(Frame(String::from("321"))));
        });

        let handle_2 = tokio::spawn(async move {
            let channel: Channel<Frame> =
                Channel::connect(&address).await.expect("failed to connect");
            let (mut sender, mut receiver) = channel.split();

            let msg = receiver.recv().await.unwrap();
            assert_eq!(msg, Some(Frame(String::from("123"))));
            sender.send(Frame(String::from("321"))).await.unwrap();
        });

        handle_2.await.unwrap();
        handle_1.await.unwrap();
    }
}
