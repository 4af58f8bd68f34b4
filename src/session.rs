//! # Server Session
//!
//! Per-connection state machine on the server side:
//!
//! ```text
//! AwaitHeader -> AwaitBody -> Dispatch -> AwaitHeader ...
//!      |             |           |
//!      +-- Stalled <-+-----------+   (framing error)
//!      +-- Closed  <-+-----------+   (channel error)
//! ```
//!
//! A session owns its transport, buffers and checksums exclusively; nothing
//! is shared with other sessions.

use std::mem;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::crypto::{cipher, initial_seed, to_hex};
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{
    EchoPayload, Frame, LoginRequest, LoginResponse, Message, MessageType, PacketHeader,
};
use crate::transport::Transport;

/// Display name used until a login names the peer
const DEFAULT_CLIENT_ID: &str = "default";

/// Session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next 4-byte header
    AwaitHeader,
    /// Header accepted, waiting for its body
    AwaitBody(PacketHeader),
    /// Complete frame ready to be handled
    Dispatch(Frame),
    /// Framing error seen; the channel is no longer read but not closed
    Stalled,
    /// Channel failed or the peer went away
    Closed,
}

impl SessionState {
    /// No further transitions happen from this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stalled | SessionState::Closed)
    }
}

/// Server side of one client channel
pub struct Session<S = TcpStream> {
    transport: Transport<S>,
    state: SessionState,
    /// Submitted username, for display only
    client_id: String,
    username_sum: u8,
    password_sum: u8,
    messages_received: u64,
    messages_sent: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a session waiting for its first header
    pub fn new(transport: Transport<S>) -> Self {
        Self {
            transport,
            state: SessionState::AwaitHeader,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            username_sum: 0,
            password_sum: 0,
            messages_received: 0,
            messages_sent: 0,
        }
    }

    /// Get the current state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Display name of the peer
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Checksums stored at the last login
    pub fn checksums(&self) -> (u8, u8) {
        (self.username_sum, self.password_sum)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Give back the transport, e.g. after the session stalled
    pub fn into_inner(self) -> Transport<S> {
        self.transport
    }

    /// Drive the state machine until it reaches a terminal state.
    pub async fn run(&mut self) -> &SessionState {
        while !self.state.is_terminal() {
            if let Err(e) = self.step().await {
                self.fail(e);
            }
        }
        &self.state
    }

    /// Perform a single transition
    pub async fn step(&mut self) -> ProtocolResult<()> {
        // Closed is the fallback if the transition below errors out
        match mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::AwaitHeader => {
                let header = self.transport.read_header().await?;
                self.state = SessionState::AwaitBody(header);
            }
            SessionState::AwaitBody(header) => {
                let frame = self.transport.read_body(header).await?;
                self.messages_received += 1;
                self.state = SessionState::Dispatch(frame);
            }
            SessionState::Dispatch(frame) => {
                self.dispatch(frame).await?;
                self.state = SessionState::AwaitHeader;
            }
            terminal => self.state = terminal,
        }
        Ok(())
    }

    fn fail(&mut self, e: ProtocolError) {
        if e.is_framing() {
            warn!("[{}] {}; no longer reading this channel", self.client_id, e);
            self.state = SessionState::Stalled;
        } else if matches!(e, ProtocolError::ConnectionClosed) {
            info!("[{}] Peer closed the connection", self.client_id);
            self.state = SessionState::Closed;
        } else {
            error!("[{}] {}", self.client_id, e);
            self.state = SessionState::Closed;
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> ProtocolResult<()> {
        // Bodies are only decoded for request types
        match frame.header.message_type() {
            Ok(MessageType::LoginRequest) => {
                let login = LoginRequest::decode_body(&frame.body)?;
                self.handle_login(frame.seq(), login).await
            }
            Ok(MessageType::EchoRequest) => {
                let echo = EchoPayload::decode_body(&frame.body)?;
                self.handle_echo(frame.seq(), echo).await
            }
            Ok(other) => {
                warn!("[{}] Ignoring {:?} sent by a client", self.client_id, other);
                Ok(())
            }
            Err(e) => {
                warn!("[{}] {}", self.client_id, e);
                Ok(())
            }
        }
    }

    async fn handle_login(&mut self, seq: u8, login: LoginRequest) -> ProtocolResult<()> {
        self.client_id = login.username();
        self.username_sum = login.username_checksum();
        self.password_sum = login.password_checksum();

        let response = if login.is_complete() {
            info!("User: {} has logged on", self.client_id);
            LoginResponse::accepted()
        } else {
            info!(
                "Failed login with username: {:?} and password: {:?}",
                login.username(),
                login.password()
            );
            LoginResponse::rejected()
        };

        self.reply(Message::LoginResponse(response), seq).await
    }

    async fn handle_echo(&mut self, seq: u8, echo: EchoPayload) -> ProtocolResult<()> {
        debug!(
            "Ciphered payload from {}: {}",
            self.client_id,
            to_hex(&echo.data)
        );

        let seed = initial_seed(seq, self.username_sum, self.password_sum);
        let plaintext = cipher(&echo.data, seed);
        info!(
            "{} sent message: {}",
            self.client_id,
            String::from_utf8_lossy(&plaintext)
        );

        // The response carries plaintext; it is never re-enciphered
        self.reply(Message::EchoResponse(EchoPayload::new(plaintext)), seq)
            .await
    }

    async fn reply(&mut self, message: Message, seq: u8) -> ProtocolResult<()> {
        let frame = message.to_frame(seq)?;
        self.transport.send_frame(&frame).await?;
        self.messages_sent += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    type Peer = Transport<DuplexStream>;

    fn spawn_session() -> (Peer, JoinHandle<Session<DuplexStream>>) {
        let (client, server) = tokio::io::duplex(1024);
        let handle = tokio::spawn(async move {
            let mut session = Session::new(Transport::new(server));
            session.run().await;
            session
        });
        (Transport::new(client), handle)
    }

    async fn login(peer: &mut Peer, username: &str, password: &str, seq: u8) -> LoginResponse {
        let request = Message::LoginRequest(LoginRequest::new(username, password));
        peer.send_frame(&request.to_frame(seq).unwrap()).await.unwrap();

        let reply = peer.recv_frame().await.unwrap();
        assert_eq!(reply.seq(), seq);
        match Message::decode(&reply).unwrap() {
            Message::LoginResponse(response) => response,
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    async fn echo(peer: &mut Peer, ciphertext: Vec<u8>, seq: u8) -> Frame {
        let request = Message::EchoRequest(EchoPayload::new(ciphertext));
        peer.send_frame(&request.to_frame(seq).unwrap()).await.unwrap();
        peer.recv_frame().await.unwrap()
    }

    #[tokio::test]
    async fn test_login_accepted() {
        let (mut peer, handle) = spawn_session();

        let response = login(&mut peer, "alice", "pw12", 0).await;
        assert_eq!(response.status_code, LoginResponse::ACCEPTED);

        drop(peer);
        let session = handle.await.unwrap();
        assert_eq!(session.state(), &SessionState::Closed);
        assert_eq!(session.client_id(), "alice");
        assert_eq!(session.checksums(), (0xFE, 0x4A));
    }

    #[tokio::test]
    async fn test_rejected_login_keeps_channel_open() {
        let (mut peer, handle) = spawn_session();

        let response = login(&mut peer, "", "pw12", 0).await;
        assert_eq!(response.status_code, LoginResponse::REJECTED);

        // Still served after the rejection
        let response = login(&mut peer, "alice", "pw12", 1).await;
        assert!(response.is_accepted());

        drop(peer);
        let session = handle.await.unwrap();
        assert_eq!(session.messages_sent(), 2);
    }

    #[tokio::test]
    async fn test_echo_returns_plaintext() {
        let (mut peer, handle) = spawn_session();

        // "A" and "B" give checksums 0x41 and 0x42
        assert!(login(&mut peer, "A", "B", 0).await.is_accepted());

        let seed = initial_seed(0, 0x41, 0x42);
        assert_eq!(seed, 0x00_41_42);
        let reply = echo(&mut peer, cipher(b"hi", seed), 0).await;

        assert_eq!(reply.header.msg_type, MessageType::EchoResponse as u8);
        assert_eq!(reply.seq(), 0);
        assert_eq!(&reply.body[..], &[0, 2, b'h', b'i']);

        drop(peer);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_echo_uses_message_sequence() {
        let (mut peer, handle) = spawn_session();
        assert!(login(&mut peer, "alice", "pw12", 0).await.is_accepted());

        let (u, p) = (0xFE, 0x4A);
        for seq in [1u8, 2, 200] {
            let reply = echo(&mut peer, cipher(b"same text", initial_seed(seq, u, p)), seq).await;
            assert_eq!(reply.seq(), seq);
            assert_eq!(&reply.body[2..], b"same text");
        }

        drop(peer);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_stalls_before_body() {
        let (mut peer, handle) = spawn_session();

        let [hi, lo] = 9999u16.to_be_bytes();
        let stream = peer_stream(&mut peer);
        stream.write_all(&[hi, lo, 2, 0]).await.unwrap();

        let session = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("session should stall without waiting for a body")
            .unwrap();
        assert_eq!(session.state(), &SessionState::Stalled);
        assert_eq!(session.messages_received(), 0);

        // Known edge case: the channel is left open, only reading stopped
        let transport = session.into_inner();
        assert_eq!(transport.bytes_received(), 4);
        stream.write_all(&[0, 4, 2, 1]).await.unwrap();
    }

    #[tokio::test]
    async fn test_undersized_frame_stalls() {
        let (mut peer, handle) = spawn_session();

        let stream = peer_stream(&mut peer);
        stream.write_all(&[0, 3, 2, 0]).await.unwrap();

        let session = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("session should stall on a header shorter than itself")
            .unwrap();
        assert_eq!(session.state(), &SessionState::Stalled);
        assert_eq!(session.messages_received(), 0);
        assert_eq!(session.into_inner().bytes_received(), 4);
    }

    #[tokio::test]
    async fn test_payload_size_mismatch_stalls() {
        let (mut peer, handle) = spawn_session();

        let frame = Frame::new(
            MessageType::EchoRequest,
            0,
            Bytes::from_static(&[0, 50, 1, 2]),
        )
        .unwrap();
        peer.send_frame(&frame).await.unwrap();

        let session = handle.await.unwrap();
        assert_eq!(session.state(), &SessionState::Stalled);
        assert_eq!(session.messages_sent(), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_skipped() {
        let (mut peer, handle) = spawn_session();

        let stream = peer_stream(&mut peer);
        stream.write_all(&[0, 6, 9, 0, 0xAA, 0xBB]).await.unwrap();

        // The next request is still answered and is the first reply we see
        let response = login(&mut peer, "alice", "pw12", 1).await;
        assert!(response.is_accepted());

        drop(peer);
        let session = handle.await.unwrap();
        assert_eq!(session.messages_received(), 2);
        assert_eq!(session.messages_sent(), 1);
    }

    #[tokio::test]
    async fn test_response_types_are_skipped_without_decoding() {
        let (mut peer, handle) = spawn_session();

        // Empty bodies would not decode as a login response or an echo
        let stream = peer_stream(&mut peer);
        stream.write_all(&[0, 4, 1, 0]).await.unwrap();
        stream.write_all(&[0, 4, 3, 0]).await.unwrap();

        let response = tokio::time::timeout(
            Duration::from_secs(1),
            login(&mut peer, "alice", "pw12", 1),
        )
        .await
        .expect("login after a response-typed frame should be answered");
        assert!(response.is_accepted());

        drop(peer);
        let session = handle.await.unwrap();
        assert_eq!(session.state(), &SessionState::Closed);
        assert_eq!(session.messages_received(), 3);
        assert_eq!(session.messages_sent(), 1);
    }

    #[tokio::test]
    async fn test_peer_close_ends_session() {
        let (peer, handle) = spawn_session();
        drop(peer);

        let session = handle.await.unwrap();
        assert_eq!(session.state(), &SessionState::Closed);
        assert_eq!(session.client_id(), DEFAULT_CLIENT_ID);
    }

    fn peer_stream(peer: &mut Peer) -> &mut DuplexStream {
        peer.stream_mut()
    }
}
