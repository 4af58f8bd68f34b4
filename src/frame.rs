//! # Message Framing
//!
//! This module handles the wire format for protocol messages:
//! - Fixed 4-byte header carrying the total frame size, type and sequence
//! - Fixed-layout login bodies with null-padded credential fields
//! - Length-prefixed echo bodies
//!
//! ## Frame Format
//!
//! ```text
//! +------------+----------+---------+------------------------+
//! | Total size | Msg type | Msg seq | Body                   |
//! | 2 bytes BE | 1 byte   | 1 byte  | total size - 4 bytes   |
//! +------------+----------+---------+------------------------+
//!
//! LoginRequest  body: username[28] | password[4]
//! LoginResponse body: status_code u16
//! Echo*         body: payload_size u16 | payload[payload_size]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crypto::checksum;
use crate::error::{ProtocolError, ProtocolResult};
use crate::{HEADER_SIZE, MAX_FRAME_SIZE, PASSWORD_LEN, USERNAME_LEN};

/// Login request body size
pub const LOGIN_REQUEST_BODY_SIZE: usize = USERNAME_LEN + PASSWORD_LEN;

/// Login response body size
pub const LOGIN_RESPONSE_BODY_SIZE: usize = 2;

/// Size of the inner payload length field of echo bodies
pub const PAYLOAD_SIZE_FIELD: usize = 2;

/// Message types in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client credentials
    LoginRequest = 0,
    /// Server verdict on the credentials
    LoginResponse = 1,
    /// Ciphered text from the client
    EchoRequest = 2,
    /// Recovered plaintext from the server
    EchoResponse = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::LoginRequest),
            1 => Ok(MessageType::LoginResponse),
            2 => Ok(MessageType::EchoRequest),
            3 => Ok(MessageType::EchoResponse),
            _ => Err(ProtocolError::UnknownMessageType(value)),
        }
    }
}

/// Packet header structure
///
/// The type byte is kept raw so that frames of unknown type can still be
/// read off the wire and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total frame size including the header
    pub total_size: u16,
    /// Raw message type
    pub msg_type: u8,
    /// Sender's sequence number
    pub msg_seq: u8,
}

impl PacketHeader {
    /// Create a header for a body of `body_len` bytes
    pub fn new(msg_type: MessageType, msg_seq: u8, body_len: usize) -> ProtocolResult<Self> {
        let total = HEADER_SIZE + body_len;
        if total > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: MAX_FRAME_SIZE,
            });
        }

        Ok(Self {
            total_size: total as u16,
            msg_type: msg_type as u8,
            msg_seq,
        })
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let size = self.total_size.to_be_bytes();
        [size[0], size[1], self.msg_type, self.msg_seq]
    }

    /// Parse a header from bytes without checking bounds
    pub fn from_bytes(data: &[u8; HEADER_SIZE]) -> Self {
        Self {
            total_size: u16::from_be_bytes([data[0], data[1]]),
            msg_type: data[2],
            msg_seq: data[3],
        }
    }

    /// Check the declared size against the protocol bounds
    pub fn validate(&self) -> ProtocolResult<()> {
        let size = self.total_size as usize;
        if size < HEADER_SIZE {
            return Err(ProtocolError::FrameTooSmall {
                size,
                min: HEADER_SIZE,
            });
        }
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(())
    }

    /// Number of body bytes following the header
    ///
    /// Only meaningful once [`validate`](Self::validate) has passed.
    pub fn body_len(&self) -> usize {
        (self.total_size as usize).saturating_sub(HEADER_SIZE)
    }

    /// Decode the message type
    pub fn message_type(&self) -> ProtocolResult<MessageType> {
        MessageType::try_from(self.msg_type)
    }
}

/// Encode a header into its wire form
pub fn encode_header(header: &PacketHeader) -> [u8; HEADER_SIZE] {
    header.to_bytes()
}

/// Decode and bounds-check a header
pub fn decode_header(data: &[u8; HEADER_SIZE]) -> ProtocolResult<PacketHeader> {
    let header = PacketHeader::from_bytes(data);
    header.validate()?;
    Ok(header)
}

/// Complete protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: PacketHeader,
    /// Body bytes
    pub body: Bytes,
}

impl Frame {
    /// Create a frame, computing the header size from the body
    pub fn new(msg_type: MessageType, msg_seq: u8, body: Bytes) -> ProtocolResult<Self> {
        let header = PacketHeader::new(msg_type, msg_seq, body.len())?;
        Ok(Self { header, body })
    }

    /// Serialize the complete frame to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.total_size());
        buf.put_slice(&self.header.to_bytes());
        buf.put_slice(&self.body);
        buf
    }

    /// Sequence number from the header
    pub fn seq(&self) -> u8 {
        self.header.msg_seq
    }

    /// Total frame size
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Login request with fixed-width, null-padded credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: [u8; USERNAME_LEN],
    pub password: [u8; PASSWORD_LEN],
}

impl LoginRequest {
    /// Pad both fields with NULs, truncating longer input
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: pad_field(username.as_bytes()),
            password: pad_field(password.as_bytes()),
        }
    }

    /// Checksum of the padded username field
    pub fn username_checksum(&self) -> u8 {
        checksum(&self.username, USERNAME_LEN)
    }

    /// Checksum of the padded password field
    pub fn password_checksum(&self) -> u8 {
        checksum(&self.password, PASSWORD_LEN)
    }

    /// Username with padding and surrounding whitespace removed
    pub fn username(&self) -> String {
        trim_field(&self.username)
    }

    /// Password with padding and surrounding whitespace removed
    pub fn password(&self) -> String {
        trim_field(&self.password)
    }

    /// Both fields carry something besides padding
    pub fn is_complete(&self) -> bool {
        !self.username().is_empty() && !self.password().is_empty()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.username);
        buf.put_slice(&self.password);
    }

    pub(crate) fn decode_body(mut body: &[u8]) -> ProtocolResult<Self> {
        if body.len() < LOGIN_REQUEST_BODY_SIZE {
            return Err(ProtocolError::TruncatedBody {
                what: "login request",
                expected: LOGIN_REQUEST_BODY_SIZE,
                actual: body.len(),
            });
        }

        let mut username = [0u8; USERNAME_LEN];
        let mut password = [0u8; PASSWORD_LEN];
        body.copy_to_slice(&mut username);
        body.copy_to_slice(&mut password);
        Ok(Self { username, password })
    }
}

/// Encode a complete login request frame
pub fn encode_login_request(username: &str, password: &str, seq: u8) -> ProtocolResult<BytesMut> {
    Ok(Message::LoginRequest(LoginRequest::new(username, password))
        .to_frame(seq)?
        .to_bytes())
}

/// Login verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginResponse {
    pub status_code: u16,
}

impl LoginResponse {
    pub const ACCEPTED: u16 = 1;
    pub const REJECTED: u16 = 0;

    pub fn accepted() -> Self {
        Self {
            status_code: Self::ACCEPTED,
        }
    }

    pub fn rejected() -> Self {
        Self {
            status_code: Self::REJECTED,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status_code == Self::ACCEPTED
    }

    pub(crate) fn decode_body(mut body: &[u8]) -> ProtocolResult<Self> {
        if body.len() < LOGIN_RESPONSE_BODY_SIZE {
            return Err(ProtocolError::TruncatedBody {
                what: "login response",
                expected: LOGIN_RESPONSE_BODY_SIZE,
                actual: body.len(),
            });
        }
        Ok(Self {
            status_code: body.get_u16(),
        })
    }
}

/// Length-prefixed echo payload
///
/// Ciphertext in a request, plaintext in a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoPayload {
    pub data: Bytes,
}

impl EchoPayload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u16(self.data.len() as u16);
        buf.put_slice(&self.data);
    }

    pub(crate) fn decode_body(body: &Bytes) -> ProtocolResult<Self> {
        if body.len() < PAYLOAD_SIZE_FIELD {
            return Err(ProtocolError::TruncatedBody {
                what: "echo",
                expected: PAYLOAD_SIZE_FIELD,
                actual: body.len(),
            });
        }

        let declared = u16::from_be_bytes([body[0], body[1]]) as usize;
        let available = body.len() - PAYLOAD_SIZE_FIELD;
        if declared > available {
            return Err(ProtocolError::PayloadSizeMismatch {
                declared,
                available,
            });
        }

        Ok(Self {
            data: body.slice(PAYLOAD_SIZE_FIELD..PAYLOAD_SIZE_FIELD + declared),
        })
    }
}

/// Decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    LoginRequest(LoginRequest),
    LoginResponse(LoginResponse),
    EchoRequest(EchoPayload),
    EchoResponse(EchoPayload),
}

impl Message {
    /// Get the message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::LoginRequest(_) => MessageType::LoginRequest,
            Message::LoginResponse(_) => MessageType::LoginResponse,
            Message::EchoRequest(_) => MessageType::EchoRequest,
            Message::EchoResponse(_) => MessageType::EchoResponse,
        }
    }

    /// Build a frame carrying this message
    pub fn to_frame(&self, seq: u8) -> ProtocolResult<Frame> {
        let mut body = BytesMut::new();
        match self {
            Message::LoginRequest(login) => login.encode_body(&mut body),
            Message::LoginResponse(response) => body.put_u16(response.status_code),
            Message::EchoRequest(echo) | Message::EchoResponse(echo) => {
                echo.encode_body(&mut body)
            }
        }
        Frame::new(self.message_type(), seq, body.freeze())
    }

    /// Decode the body of a frame according to its header type
    pub fn decode(frame: &Frame) -> ProtocolResult<Self> {
        match frame.header.message_type()? {
            MessageType::LoginRequest => {
                LoginRequest::decode_body(&frame.body).map(Message::LoginRequest)
            }
            MessageType::LoginResponse => {
                LoginResponse::decode_body(&frame.body).map(Message::LoginResponse)
            }
            MessageType::EchoRequest => {
                EchoPayload::decode_body(&frame.body).map(Message::EchoRequest)
            }
            MessageType::EchoResponse => {
                EchoPayload::decode_body(&frame.body).map(Message::EchoResponse)
            }
        }
    }
}

fn pad_field<const N: usize>(value: &[u8]) -> [u8; N] {
    let mut field = [0u8; N];
    let len = value.len().min(N);
    field[..len].copy_from_slice(&value[..len]);
    field
}

fn trim_field(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}
