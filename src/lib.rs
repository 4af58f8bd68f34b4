//! # LCG Echo Protocol
//!
//! This crate implements a small length-prefixed TCP protocol with:
//! - A fixed 4-byte header (size, type, sequence) in network byte order
//! - A login exchange carrying fixed-width, null-padded credentials
//! - Echo exchanges whose request payload is XOR-ciphered with an LCG keystream
//! - Key material derived from 8-bit credential checksums and the message sequence
//!
//! ## Protocol Overview
//!
//! ```text
//! Client                                   Server
//!   |                                         |
//!   |------- LoginRequest (user, pass) ------>|
//!   |   [Both compute credential checksums]   |
//!   |<------ LoginResponse (status) ----------|
//!   |                                         |
//!   |------- EchoRequest (ciphertext) ------->|
//!   |                 [Server deciphers]      |
//!   |<------ EchoResponse (plaintext) --------|
//!   |                                         |
//! ```
//!
//! ## Security Properties
//!
//! None. The keystream is a linear congruential generator keyed by two 8-bit
//! sums, credentials travel in the clear and the response path is plaintext.
//! The cipher exists to exercise key agreement, not to protect data.

pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod server;
pub mod session;
pub mod transport;

pub use config::Config;
pub use connection::{Connection, ConnectionEvent, ConnectionState, Credentials};
pub use crypto::{checksum, cipher, initial_seed, keystream, next_key, Keystream};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{
    EchoPayload, Frame, LoginRequest, LoginResponse, Message, MessageType, PacketHeader,
};
pub use server::Server;
pub use session::{Session, SessionState};
pub use transport::{Transport, TransportListener, TransportStats};

/// Size of the packet header on the wire
pub const HEADER_SIZE: usize = 4;

/// Maximum total frame size (header + body)
pub const MAX_FRAME_SIZE: usize = 512;

/// Width of the username field in a login request
pub const USERNAME_LEN: usize = 28;

/// Width of the password field in a login request
pub const PASSWORD_LEN: usize = 4;

/// Largest echo payload that fits in a single frame
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE - 2;

/// Default TCP port for both server and client
pub const DEFAULT_PORT: u16 = 12345;
