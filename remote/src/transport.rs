// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Transport abstraction
//!
//! The distribution layer only needs a byte stream with asynchronous
//! read/write and a way to accept new connections; the frame codec copes
//! with partial reads and coalesced writes. [`TcpTransport`] is the
//! production implementation; [`MemTransport`] wires endpoints together
//! in-process for tests and simulations.

use crate::error::Error;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::debug;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// Byte stream between two endpoints.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// Boxed byte stream.
pub type BoxedStream = Box<dyn IoStream>;

/// Accepts incoming connections on one published port.
#[async_trait]
pub trait Listener: Send {
    /// Waits for the next connection.
    async fn accept(&mut self) -> Result<BoxedStream, Error>;

    /// The port this listener is bound to.
    fn local_port(&self) -> u16;
}

/// Factory for connections and listeners.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a connection to `host:port`.
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream, Error>;

    /// Binds a listener on `host:port`; port zero picks a free port.
    async fn listen(&self, host: &str, port: u16) -> Result<Box<dyn Listener>, Error>;
}

/// TCP transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpTransport;

struct TcpListenerAdapter {
    listener: TcpListener,
    port: u16,
}

#[async_trait]
impl Listener for TcpListenerAdapter {
    async fn accept(&mut self) -> Result<BoxedStream, Error> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("Accepted connection from {}.", peer);
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn local_port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream, Error> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    async fn listen(&self, host: &str, port: u16) -> Result<Box<dyn Listener>, Error> {
        let listener = TcpListener::bind((host, port)).await?;
        let port = listener.local_addr()?.port();
        debug!("Listening on port {}.", port);
        Ok(Box::new(TcpListenerAdapter { listener, port }))
    }
}

/// In-process transport connecting endpoints through duplex pipes.
///
/// Clones share one port namespace, so two actor systems handed the same
/// `MemTransport` can reach each other without sockets.
#[derive(Clone, Default)]
pub struct MemTransport {
    inner: Arc<Mutex<MemInner>>,
}

#[derive(Default)]
struct MemInner {
    ports: HashMap<u16, mpsc::UnboundedSender<DuplexStream>>,
    next_port: u16,
}

/// Buffer size of in-memory pipes.
const MEM_PIPE_CAPACITY: usize = 256 * 1024;

struct MemListener {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
    port: u16,
    transport: MemTransport,
}

#[async_trait]
impl Listener for MemListener {
    async fn accept(&mut self) -> Result<BoxedStream, Error> {
        match self.rx.recv().await {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(Error::ConnectionClosed),
        }
    }

    fn local_port(&self) -> u16 {
        self.port
    }
}

impl Drop for MemListener {
    fn drop(&mut self) {
        self.transport.inner.lock().ports.remove(&self.port);
    }
}

#[async_trait]
impl Transport for MemTransport {
    async fn connect(&self, _host: &str, port: u16) -> Result<BoxedStream, Error> {
        let acceptor = self
            .inner
            .lock()
            .ports
            .get(&port)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        let (client, server) = tokio::io::duplex(MEM_PIPE_CAPACITY);
        acceptor
            .send(server)
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        Ok(Box::new(client))
    }

    async fn listen(&self, _host: &str, port: u16) -> Result<Box<dyn Listener>, Error> {
        let mut inner = self.inner.lock();
        let port = if port == 0 {
            loop {
                inner.next_port = inner.next_port.wrapping_add(1).max(49152);
                if !inner.ports.contains_key(&inner.next_port) {
                    break inner.next_port;
                }
            }
        } else {
            if inner.ports.contains_key(&port) {
                return Err(io::Error::from(io::ErrorKind::AddrInUse).into());
            }
            port
        };
        let (tx, rx) = mpsc::unbounded_channel();
        inner.ports.insert(port, tx);
        drop(inner);
        Ok(Box::new(MemListener { rx, port, transport: self.clone() }))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_mem_transport_round_trip() {
        let transport = MemTransport::default();
        let mut listener = transport.listen("mem", 0).await.unwrap();
        let port = listener.local_port();

        let client = tokio::spawn({
            let transport = transport.clone();
            async move {
                let mut stream = transport.connect("mem", port).await.unwrap();
                stream.write_all(b"ping").await.unwrap();
                let mut buf = [0u8; 4];
                stream.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf, b"pong");
            }
        });

        let mut accepted = listener.accept().await.unwrap();
        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        accepted.write_all(b"pong").await.unwrap();
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_mem_transport_port_in_use() {
        let transport = MemTransport::default();
        let _listener = transport.listen("mem", 4000).await.unwrap();
        assert!(transport.listen("mem", 4000).await.is_err());
    }

    #[tokio::test]
    async fn test_mem_transport_connection_refused() {
        let transport = MemTransport::default();
        assert!(transport.connect("mem", 59999).await.is_err());
    }
}
