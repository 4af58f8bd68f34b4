//! # Transport Layer
//!
//! Frame reading/writing over any async byte channel.
//! Provides the network interface for the protocol.
//!
//! Reads are split into a header step and a body step so callers can react
//! to a bad header before a single body byte is consumed. Both steps are
//! cancellation-safe: partial reads stay in the buffer and a decoded header
//! is kept until its body has arrived.

use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{Frame, PacketHeader};
use crate::{HEADER_SIZE, MAX_FRAME_SIZE};

/// Transport connection wrapping a byte channel
pub struct Transport<S = TcpStream> {
    /// The underlying channel
    stream: S,
    /// Bytes read but not yet consumed
    buffer: BytesMut,
    /// Header whose body has not fully arrived yet
    pending: Option<PacketHeader>,
    /// Bytes sent
    bytes_sent: u64,
    /// Bytes received
    bytes_received: u64,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a transport from an existing channel
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(MAX_FRAME_SIZE),
            pending: None,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Get bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Get bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Read and bounds-check the next header.
    ///
    /// An out-of-bounds header is reported before any body byte is read.
    pub async fn read_header(&mut self) -> ProtocolResult<PacketHeader> {
        if let Some(header) = self.pending {
            return Ok(header);
        }

        self.fill(HEADER_SIZE).await?;
        let mut raw = [0u8; HEADER_SIZE];
        self.buffer.copy_to_slice(&mut raw);

        let header = PacketHeader::from_bytes(&raw);
        header.validate()?;

        debug!(
            "Header: size={} type={} seq={}",
            header.total_size, header.msg_type, header.msg_seq
        );
        self.pending = Some(header);
        Ok(header)
    }

    /// Read exactly the body announced by `header`.
    pub async fn read_body(&mut self, header: PacketHeader) -> ProtocolResult<Frame> {
        let len = header.body_len();
        self.fill(len).await?;
        self.pending = None;

        Ok(Frame {
            header,
            body: self.buffer.split_to(len).freeze(),
        })
    }

    /// Receive a complete frame
    pub async fn recv_frame(&mut self) -> ProtocolResult<Frame> {
        let header = self.read_header().await?;
        self.read_body(header).await
    }

    /// Send a frame
    pub async fn send_frame(&mut self, frame: &Frame) -> ProtocolResult<()> {
        let bytes = frame.to_bytes();
        self.stream.write_all(&bytes).await?;
        self.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    /// Shutdown the write side of the channel
    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        self.stream.shutdown().await.map_err(ProtocolError::IoError)
    }

    /// Get a mutable reference to the underlying channel
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Give back the underlying channel
    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn fill(&mut self, needed: usize) -> ProtocolResult<()> {
        while self.buffer.len() < needed {
            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            self.bytes_received += n as u64;
        }
        Ok(())
    }
}

impl Transport<TcpStream> {
    /// Connect to a remote address
    pub async fn connect(addr: SocketAddr) -> ProtocolResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Snapshot the byte counters
    pub fn stats(&self) -> ProtocolResult<TransportStats> {
        Ok(TransportStats {
            peer_addr: self.stream.peer_addr()?,
            local_addr: self.stream.local_addr()?,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
        })
    }
}

/// TCP listener wrapper
pub struct TransportListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TransportListener {
    /// Bind to an address
    pub async fn bind(addr: SocketAddr) -> ProtocolResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Get the local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept a new connection
    pub async fn accept(&self) -> ProtocolResult<(Transport, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Transport::new(stream), addr))
    }
}

/// Transport statistics
#[derive(Debug, Clone)]
pub struct TransportStats {
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl std::fmt::Display for TransportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}: sent={} bytes, recv={} bytes",
            self.local_addr, self.peer_addr, self.bytes_sent, self.bytes_received
        )
    }
}
