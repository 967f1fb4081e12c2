//! One task per connection: reads feed the protocol, queued writes drain in
//! order, and other tasks reach the connection only through a command channel.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::error::SessionError;

pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Opens a TCP connection to `host:port`.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream, SessionError> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    info!(host, port, "transport.connected");
    Ok(stream)
}

/// IPv4 address the connection leaves from, as the logon challenge reports
/// it. IPv6 sockets map to their embedded IPv4 address or loopback.
pub fn local_ipv4(stream: &TcpStream) -> Ipv4Addr {
    ipv4_of(stream.local_addr())
}

fn ipv4_of(addr: io::Result<SocketAddr>) -> Ipv4Addr {
    match addr {
        Ok(SocketAddr::V4(addr)) => *addr.ip(),
        Ok(SocketAddr::V6(addr)) => addr.ip().to_ipv4_mapped().unwrap_or(Ipv4Addr::LOCALHOST),
        Err(err) => {
            debug!(%err, "transport.local_addr unavailable");
            Ipv4Addr::LOCALHOST
        }
    }
}

/// Outbound FIFO of encoded chunks. A partially written chunk keeps its
/// unsent tail at the front.
#[derive(Debug, Default)]
pub struct WriteQueue {
    chunks: VecDeque<Vec<u8>>,
    front_offset: usize,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.chunks.push_back(bytes);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Bytes still waiting to be written.
    pub fn pending(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum::<usize>() - self.front_offset
    }

    /// Unsent part of the front chunk; empty when the queue is.
    pub fn front(&self) -> &[u8] {
        self.chunks
            .front()
            .map(|chunk| &chunk[self.front_offset..])
            .unwrap_or(&[])
    }

    pub fn consume(&mut self, written: usize) {
        self.front_offset += written;
        if let Some(chunk) = self.chunks.front() {
            if self.front_offset >= chunk.len() {
                self.chunks.pop_front();
                self.front_offset = 0;
            }
        }
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.front_offset = 0;
    }
}

/// What the protocol wants after handling a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Flush queued writes, then shut the connection down.
    DrainAndClose,
    /// Stop now, discarding queued writes.
    Close,
}

/// Connection-specific logic driven by `TransportLoop`. All methods run on
/// the loop's task and never block.
pub trait Protocol: Send {
    type Outbound: Send;

    fn on_connect(&mut self, _out: &mut WriteQueue) -> Result<(), SessionError> {
        Ok(())
    }

    fn on_read(&mut self, data: &[u8], out: &mut WriteQueue) -> Result<Flow, SessionError>;

    fn encode(&mut self, message: Self::Outbound, out: &mut WriteQueue) -> Result<(), SessionError>;

    /// The peer closed its side.
    fn on_eof(&mut self) -> Result<(), SessionError> {
        Err(SessionError::Closed)
    }
}

#[derive(Debug)]
pub enum Command<M> {
    Send(M),
    DrainAndClose,
    Close,
}

/// Cloneable sender into a running `TransportLoop`.
#[derive(Debug)]
pub struct TransportHandle<M> {
    tx: mpsc::UnboundedSender<Command<M>>,
}

impl<M> Clone for TransportHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> TransportHandle<M> {
    pub fn send(&self, message: M) -> Result<(), SessionError> {
        self.command(Command::Send(message))
    }

    pub fn drain_and_close(&self) -> Result<(), SessionError> {
        self.command(Command::DrainAndClose)
    }

    pub fn close(&self) -> Result<(), SessionError> {
        self.command(Command::Close)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn command(&self, command: Command<M>) -> Result<(), SessionError> {
        self.tx.send(command).map_err(|_| SessionError::Closed)
    }
}

pub struct TransportLoop<S, P: Protocol> {
    stream: S,
    protocol: P,
    commands: mpsc::UnboundedReceiver<Command<P::Outbound>>,
    read_buffer_size: usize,
}

impl<S, P> TransportLoop<S, P>
where
    S: AsyncRead + AsyncWrite + Send,
    P: Protocol,
{
    pub fn new(stream: S, protocol: P) -> (Self, TransportHandle<P::Outbound>) {
        let (tx, commands) = mpsc::unbounded_channel();
        let transport = Self {
            stream,
            protocol,
            commands,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        };
        (transport, TransportHandle { tx })
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Runs until the protocol or a handle closes the connection, handing the
    /// protocol back for inspection. Errors are terminal.
    pub async fn run(self) -> Result<P, SessionError> {
        let Self {
            stream,
            mut protocol,
            mut commands,
            read_buffer_size,
        } = self;
        let (mut reader, mut writer) = tokio::io::split(stream);

        let mut queue = WriteQueue::new();
        let mut buf = vec![0u8; read_buffer_size];
        let mut draining = false;
        let mut commands_open = true;

        protocol.on_connect(&mut queue)?;

        loop {
            if draining && queue.is_empty() {
                debug!("transport.drained");
                writer.shutdown().await?;
                return Ok(protocol);
            }

            tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(Command::Send(message)) => {
                        if draining {
                            debug!("transport.send_after_drain dropped");
                        } else {
                            protocol.encode(message, &mut queue)?;
                        }
                    }
                    Some(Command::DrainAndClose) => {
                        debug!(pending = queue.pending(), "transport.drain_and_close");
                        draining = true;
                    }
                    Some(Command::Close) => {
                        debug!(discarded = queue.pending(), "transport.close");
                        queue.clear();
                        return Ok(protocol);
                    }
                    None => commands_open = false,
                },
                read = reader.read(&mut buf), if !draining => {
                    let n = read?;
                    if n == 0 {
                        debug!("transport.eof");
                        protocol.on_eof()?;
                        return Ok(protocol);
                    }
                    trace!(bytes = n, "transport.read");
                    match protocol.on_read(&buf[..n], &mut queue)? {
                        Flow::Continue => {}
                        Flow::DrainAndClose => draining = true,
                        Flow::Close => return Ok(protocol),
                    }
                }
                written = writer.write(queue.front()), if !queue.is_empty() => {
                    let n = written?;
                    if n == 0 {
                        return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
                    }
                    trace!(bytes = n, "transport.write");
                    queue.consume(n);
                }
            }
        }
    }
}

impl<S, P: Protocol> std::fmt::Debug for TransportLoop<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLoop")
            .field("read_buffer_size", &self.read_buffer_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use proptest::collection::vec;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn local_address_reported_as_ipv4() {
        let v4: SocketAddr = "192.168.4.2:50000".parse().unwrap();
        assert_eq!(ipv4_of(Ok(v4)), Ipv4Addr::new(192, 168, 4, 2));

        let mapped: SocketAddr = "[::ffff:10.0.0.9]:50000".parse().unwrap();
        assert_eq!(ipv4_of(Ok(mapped)), Ipv4Addr::new(10, 0, 0, 9));

        let v6: SocketAddr = "[2001:db8::1]:50000".parse().unwrap();
        assert_eq!(ipv4_of(Ok(v6)), Ipv4Addr::LOCALHOST);
        assert_eq!(
            ipv4_of(Err(io::Error::from(io::ErrorKind::NotConnected))),
            Ipv4Addr::LOCALHOST
        );
    }

    #[tokio::test]
    async fn connected_socket_reports_its_local_address() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (stream, accepted) = tokio::join!(connect("127.0.0.1", port), listener.accept());
        let (_server, peer) = accepted.unwrap();

        let stream = stream.unwrap();
        assert_eq!(std::net::IpAddr::V4(local_ipv4(&stream)), peer.ip());
    }

    #[test]
    fn queue_keeps_partial_tail_at_front() {
        let mut queue = WriteQueue::new();
        queue.push(vec![1, 2, 3]);
        queue.push(Vec::new());
        queue.push(vec![4, 5]);
        assert_eq!(queue.pending(), 5);

        queue.consume(2);
        assert_eq!(queue.front(), &[3]);
        assert_eq!(queue.pending(), 3);

        queue.consume(1);
        assert_eq!(queue.front(), &[4, 5]);
        queue.consume(2);
        assert!(queue.is_empty());
        assert_eq!(queue.front(), &[] as &[u8]);
    }

    proptest! {
        #[test]
        fn partial_writes_preserve_byte_order(
            chunks in vec(vec(any::<u8>(), 0..40), 0..12),
            steps in vec(1usize..17, 1..8),
        ) {
            let mut queue = WriteQueue::new();
            for chunk in &chunks {
                queue.push(chunk.clone());
            }

            let mut written = Vec::new();
            let mut turn = 0;
            while !queue.is_empty() {
                let front = queue.front();
                let n = steps[turn % steps.len()].min(front.len());
                written.extend_from_slice(&front[..n]);
                queue.consume(n);
                turn += 1;
            }
            prop_assert_eq!(written, chunks.concat());
            prop_assert_eq!(queue.pending(), 0);
        }
    }
}
