//! # Client Connection
//!
//! Client side state machine:
//!
//! ```text
//! Resolving -> Connecting -> LoggingIn -> Established -> Closed
//! ```
//!
//! Once established, one task drives two activities over the same channel:
//! reading echo responses and turning input lines into ciphered echo
//! requests. Both live in a single `select!` loop, so the connection keeps
//! sole ownership of its transport, checksums and sequence counter.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info, warn};

use crate::crypto::{cipher, initial_seed};
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{EchoPayload, Frame, LoginRequest, LoginResponse, Message, MessageType};
use crate::transport::Transport;
use crate::MAX_PAYLOAD_SIZE;

/// Locally supplied login credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Looking up the server address
    Resolving,
    /// Opening the TCP channel
    Connecting,
    /// Login sent or about to be sent, waiting for the verdict
    LoggingIn,
    /// Login accepted, echo traffic flowing
    Established,
    /// Channel shut down
    Closed,
}

/// Things the connection reports to its console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Plaintext returned by the server
    Echo { seq: u8, text: String },
    /// Input line that does not fit in one frame; it was not sent
    LineTooLong { len: usize },
}

/// Client side of the channel
pub struct Connection<S = TcpStream> {
    transport: Transport<S>,
    state: ConnectionState,
    login: LoginRequest,
    username_sum: u8,
    password_sum: u8,
    next_seq: u8,
    /// Echo requests sent but not answered yet
    outstanding: usize,
}

impl Connection<TcpStream> {
    /// Resolve `host:port` and connect to the first address that accepts.
    pub async fn connect(host: &str, port: u16, credentials: &Credentials) -> ProtocolResult<Self> {
        debug!("State {:?}: looking up {}:{}", ConnectionState::Resolving, host, port);
        let addrs: Vec<_> = lookup_host((host, port)).await?.collect();
        if addrs.is_empty() {
            return Err(ProtocolError::Resolve(format!("{}:{}", host, port)));
        }

        let mut last_err = None;
        for addr in addrs {
            debug!("State {:?}: trying {}", ConnectionState::Connecting, addr);
            match Transport::connect(addr).await {
                Ok(transport) => {
                    info!("Connected to server at {}", addr);
                    return Ok(Self::new(transport, credentials));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| ProtocolError::Resolve(format!("{}:{}", host, port))))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established channel; the next step is [`login`](Self::login).
    pub fn new(transport: Transport<S>, credentials: &Credentials) -> Self {
        Self {
            transport,
            state: ConnectionState::LoggingIn,
            login: LoginRequest::new(&credentials.username, &credentials.password),
            username_sum: 0,
            password_sum: 0,
            next_seq: 0,
            outstanding: 0,
        }
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Sequence number the next outgoing message will carry
    pub fn next_seq(&self) -> u8 {
        self.next_seq
    }

    /// Checksums computed from the padded credential fields
    pub fn checksums(&self) -> (u8, u8) {
        (self.username_sum, self.password_sum)
    }

    /// Send the login request and wait for the verdict.
    ///
    /// A rejection shuts the channel down and yields
    /// [`ProtocolError::LoginRejected`].
    pub async fn login(&mut self) -> ProtocolResult<()> {
        self.expect_state(ConnectionState::LoggingIn, ConnectionState::Established)?;

        let result = self.perform_login().await;
        if result.is_err() {
            self.state = ConnectionState::Closed;
        }
        result
    }

    async fn perform_login(&mut self) -> ProtocolResult<()> {
        self.username_sum = self.login.username_checksum();
        self.password_sum = self.login.password_checksum();

        let frame = Message::LoginRequest(self.login.clone()).to_frame(self.take_seq())?;
        self.transport.send_frame(&frame).await?;
        debug!("Login request sent for {}", self.login.username());

        loop {
            let frame = self.transport.recv_frame().await?;
            match frame.header.message_type() {
                Ok(MessageType::LoginResponse) => {}
                Ok(other) => {
                    warn!("Ignoring {:?} before login completed", other);
                    continue;
                }
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            }

            let response = LoginResponse::decode_body(&frame.body)?;
            if response.is_accepted() {
                info!("Login to server successful");
                self.state = ConnectionState::Established;
                return Ok(());
            }
            warn!("Login failed with status: {}", response.status_code);
            self.transport.shutdown().await?;
            return Err(ProtocolError::LoginRejected(response.status_code));
        }
    }

    /// Cipher `text` with the current sequence number and send it.
    ///
    /// Returns the sequence number the request carried.
    pub async fn send_echo(&mut self, text: &[u8]) -> ProtocolResult<u8> {
        if self.state != ConnectionState::Established {
            return Err(ProtocolError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: "EchoRequest".to_string(),
            });
        }
        if text.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: text.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let seq = self.next_seq;
        let seed = initial_seed(seq, self.username_sum, self.password_sum);
        let frame = Message::EchoRequest(EchoPayload::new(cipher(text, seed))).to_frame(seq)?;
        self.transport.send_frame(&frame).await?;

        self.take_seq();
        self.outstanding += 1;
        Ok(seq)
    }

    /// Run the steady state until `input` ends and every request is answered.
    ///
    /// Each non-empty input line becomes one echo request; every response
    /// and skipped line is reported through `on_event`.
    pub async fn run<L, F>(&mut self, input: L, on_event: F) -> ProtocolResult<()>
    where
        L: AsyncBufRead + Unpin,
        F: FnMut(ConnectionEvent),
    {
        self.expect_state(ConnectionState::Established, ConnectionState::Closed)?;

        let mut result = self.steady_state(input, on_event).await;
        if result.is_ok() {
            result = self.transport.shutdown().await;
        }
        self.state = ConnectionState::Closed;
        info!(
            "Connection closed: sent={} bytes, recv={} bytes",
            self.transport.bytes_sent(),
            self.transport.bytes_received()
        );
        result
    }

    async fn steady_state<L, F>(&mut self, input: L, mut on_event: F) -> ProtocolResult<()>
    where
        L: AsyncBufRead + Unpin,
        F: FnMut(ConnectionEvent),
    {
        let mut lines = input.lines();
        let mut input_open = true;

        while input_open || self.outstanding > 0 {
            tokio::select! {
                frame = self.transport.recv_frame() => {
                    self.handle_frame(frame?, &mut on_event)?;
                }
                line = lines.next_line(), if input_open => match line? {
                    Some(line) => self.handle_line(&line, &mut on_event).await?,
                    None => {
                        debug!("Input finished, {} responses outstanding", self.outstanding);
                        input_open = false;
                    }
                },
            }
        }
        Ok(())
    }

    async fn handle_line<F>(&mut self, line: &str, on_event: &mut F) -> ProtocolResult<()>
    where
        F: FnMut(ConnectionEvent),
    {
        if line.is_empty() {
            return Ok(());
        }

        match self.send_echo(line.as_bytes()).await {
            Ok(seq) => {
                debug!("Echo request {} sent ({} bytes)", seq, line.len());
                Ok(())
            }
            Err(ProtocolError::PayloadTooLarge { size, max }) => {
                warn!("Line of {} bytes exceeds the {} byte limit; not sent", size, max);
                on_event(ConnectionEvent::LineTooLong { len: size });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn handle_frame<F>(&mut self, frame: Frame, on_event: &mut F) -> ProtocolResult<()>
    where
        F: FnMut(ConnectionEvent),
    {
        match frame.header.message_type() {
            Ok(MessageType::EchoResponse) => {
                let echo = EchoPayload::decode_body(&frame.body)?;
                self.outstanding = self.outstanding.saturating_sub(1);
                on_event(ConnectionEvent::Echo {
                    seq: frame.seq(),
                    text: String::from_utf8_lossy(&echo.data).into_owned(),
                });
            }
            Ok(other) => warn!("Ignoring unexpected {:?}", other),
            Err(e) => warn!("{}", e),
        }
        Ok(())
    }

    fn take_seq(&mut self) -> u8 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    fn expect_state(&self, expected: ConnectionState, to: ConnectionState) -> ProtocolResult<()> {
        if self.state != expected {
            return Err(ProtocolError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", to),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionState};
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    fn connect_to_session(
        credentials: &Credentials,
    ) -> (Connection<DuplexStream>, JoinHandle<Session<DuplexStream>>) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let handle = tokio::spawn(async move {
            let mut session = Session::new(Transport::new(server));
            session.run().await;
            session
        });
        (Connection::new(Transport::new(client), credentials), handle)
    }

    fn connect_to_peer(
        credentials: &Credentials,
    ) -> (Connection<DuplexStream>, Transport<DuplexStream>) {
        let (client, server) = tokio::io::duplex(1024);
        (
            Connection::new(Transport::new(client), credentials),
            Transport::new(server),
        )
    }

    #[tokio::test]
    async fn test_login_and_echo_through_session() {
        let credentials = Credentials::new("alice", "pw12");
        let (mut conn, handle) = connect_to_session(&credentials);

        conn.login().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Established);
        assert_eq!(conn.next_seq(), 1);

        let mut events = Vec::new();
        conn.run(&b"hi\n\nhello there\n"[..], |e| events.push(e))
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(
            events,
            vec![
                ConnectionEvent::Echo {
                    seq: 1,
                    text: "hi".to_string()
                },
                ConnectionEvent::Echo {
                    seq: 2,
                    text: "hello there".to_string()
                },
            ]
        );

        let session = handle.await.unwrap();
        assert_eq!(session.state(), &SessionState::Closed);
        assert_eq!(session.checksums(), conn.checksums());
    }

    #[tokio::test]
    async fn test_rejected_login_closes() {
        let credentials = Credentials::new("", "pw12");
        let (mut conn, handle) = connect_to_session(&credentials);

        let err = conn.login().await.unwrap_err();
        assert!(matches!(err, ProtocolError::LoginRejected(0)));
        assert_eq!(conn.state(), ConnectionState::Closed);

        // Echo is refused once closed
        assert!(conn.send_echo(b"hi").await.is_err());

        drop(conn);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_wire_traffic_seen_by_server() {
        let credentials = Credentials::new("A", "B");
        let (mut conn, mut server) = connect_to_peer(&credentials);

        let server_task = tokio::spawn(async move {
            let login = server.recv_frame().await.unwrap();
            assert_eq!(login.header.msg_type, MessageType::LoginRequest as u8);
            assert_eq!(login.seq(), 0);
            let reply = Message::LoginResponse(LoginResponse::accepted()).to_frame(0).unwrap();
            server.send_frame(&reply).await.unwrap();

            let request = server.recv_frame().await.unwrap();
            assert_eq!(request.seq(), 1);
            let echo = match Message::decode(&request).unwrap() {
                Message::EchoRequest(echo) => echo,
                other => panic!("unexpected message: {:?}", other),
            };
            assert_ne!(&echo.data[..], b"hi");
            assert_eq!(cipher(&echo.data, initial_seed(1, 0x41, 0x42)), b"hi");

            // Noise the client must skip before the real answer
            let unknown = Frame {
                header: crate::frame::PacketHeader {
                    total_size: 5,
                    msg_type: 42,
                    msg_seq: 1,
                },
                body: bytes::Bytes::from_static(&[0]),
            };
            server.send_frame(&unknown).await.unwrap();

            let reply = Message::EchoResponse(EchoPayload::new(&b"hi"[..]))
                .to_frame(1)
                .unwrap();
            server.send_frame(&reply).await.unwrap();
            server
        });

        conn.login().await.unwrap();
        assert_eq!(conn.checksums(), (0x41, 0x42));

        let mut events = Vec::new();
        conn.run(&b"hi\n"[..], |e| events.push(e)).await.unwrap();
        assert_eq!(
            events,
            vec![ConnectionEvent::Echo {
                seq: 1,
                text: "hi".to_string()
            }]
        );

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_types_are_skipped_without_decoding() {
        let credentials = Credentials::new("A", "B");
        let (mut conn, mut server) = connect_to_peer(&credentials);

        let server_task = tokio::spawn(async move {
            server.recv_frame().await.unwrap();
            // Empty bodies would not decode as a login or echo request
            server.stream_mut().write_all(&[0, 4, 0, 0]).await.unwrap();
            let reply = Message::LoginResponse(LoginResponse::accepted()).to_frame(0).unwrap();
            server.send_frame(&reply).await.unwrap();

            let request = server.recv_frame().await.unwrap();
            server.stream_mut().write_all(&[0, 4, 2, 1]).await.unwrap();
            let reply = Message::EchoResponse(EchoPayload::new(&b"hi"[..]))
                .to_frame(request.seq())
                .unwrap();
            server.send_frame(&reply).await.unwrap();
            server
        });

        conn.login().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Established);

        let mut events = Vec::new();
        conn.run(&b"hi\n"[..], |e| events.push(e)).await.unwrap();
        assert_eq!(
            events,
            vec![ConnectionEvent::Echo {
                seq: 1,
                text: "hi".to_string()
            }]
        );

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_long_line_is_skipped() {
        let credentials = Credentials::new("alice", "pw12");
        let (mut conn, handle) = connect_to_session(&credentials);
        conn.login().await.unwrap();

        let input = format!("{}\nok\n", "x".repeat(MAX_PAYLOAD_SIZE + 1));
        let mut events = Vec::new();
        conn.run(input.as_bytes(), |e| events.push(e)).await.unwrap();

        assert_eq!(
            events,
            vec![
                ConnectionEvent::LineTooLong {
                    len: MAX_PAYLOAD_SIZE + 1
                },
                ConnectionEvent::Echo {
                    seq: 1,
                    text: "ok".to_string()
                },
            ]
        );
        drop(conn);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_largest_payload_round_trips() {
        let credentials = Credentials::new("alice", "pw12");
        let (mut conn, handle) = connect_to_session(&credentials);
        conn.login().await.unwrap();

        let line = "y".repeat(MAX_PAYLOAD_SIZE);
        let mut events = Vec::new();
        conn.run(format!("{}\n", line).as_bytes(), |e| events.push(e))
            .await
            .unwrap();
        assert_eq!(events, vec![ConnectionEvent::Echo { seq: 1, text: line }]);

        drop(conn);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sequence_wraps() {
        let credentials = Credentials::new("alice", "pw12");
        let (mut conn, handle) = connect_to_session(&credentials);
        conn.login().await.unwrap();

        let input: String = (0..300).map(|i| format!("m{}\n", i)).collect();
        let mut events = Vec::new();
        conn.run(input.as_bytes(), |e| events.push(e)).await.unwrap();

        assert_eq!(events.len(), 300);
        assert_eq!(
            events[255],
            ConnectionEvent::Echo {
                seq: 0,
                text: "m255".to_string()
            }
        );
        assert_eq!(
            events[299],
            ConnectionEvent::Echo {
                seq: 44,
                text: "m299".to_string()
            }
        );

        drop(conn);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_requires_login() {
        let credentials = Credentials::new("alice", "pw12");
        let (mut conn, _peer) = connect_to_peer(&credentials);

        let err = conn.run(&b"hi\n"[..], |_| {}).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidStateTransition { .. }));
    }
}
