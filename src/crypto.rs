//! # Keystream Cipher
//!
//! This module provides the key material and stream transform:
//! - 8-bit additive checksums over fixed-width credential fields
//! - Seed derivation from the message sequence and both checksums
//! - A linear congruential keystream
//! - XOR cipher over a payload
//!
//! ## Key Agreement
//!
//! Neither side ever transmits key material. Client and server compute the
//! checksums from the same padded credential fields and read the sequence
//! number from the frame header, so each message can be deciphered on its
//! own without any running cipher state.

/// LCG multiplier
const LCG_MULTIPLIER: u64 = 1_103_515_245;

/// LCG increment
const LCG_INCREMENT: u64 = 12_345;

/// LCG modulus (2^31 - 1)
const LCG_MODULUS: u64 = 0x7FFF_FFFF;

/// Compute the truncated additive checksum of a credential field.
///
/// Sums bytes up to the first NUL or `width` bytes, whichever comes first.
pub fn checksum(field: &[u8], width: usize) -> u8 {
    field
        .iter()
        .take(width)
        .take_while(|&&b| b != 0)
        .fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Build the keystream seed for one message.
pub fn initial_seed(seq: u8, username_sum: u8, password_sum: u8) -> u32 {
    (u32::from(seq) << 16) | (u32::from(username_sum) << 8) | u32::from(password_sum)
}

/// Advance the generator by one step.
pub fn next_key(key: u32) -> u32 {
    ((u64::from(key) * LCG_MULTIPLIER + LCG_INCREMENT) % LCG_MODULUS) as u32
}

/// Finite keystream derived from a seed
///
/// The generator is advanced before each byte is emitted, so the seed itself
/// never shows up in the output. Build a new one from the same seed to
/// replay the stream.
#[derive(Debug, Clone)]
pub struct Keystream {
    state: u32,
    remaining: usize,
}

impl Iterator for Keystream {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.state = next_key(self.state);
        Some((self.state % 256) as u8)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Keystream {}

/// Produce `len` keystream bytes from `seed`.
pub fn keystream(seed: u32, len: usize) -> Keystream {
    Keystream {
        state: seed,
        remaining: len,
    }
}

/// XOR `payload` with the keystream for `seed`.
///
/// Applying it twice with the same seed returns the original bytes.
pub fn cipher(payload: &[u8], seed: u32) -> Vec<u8> {
    payload
        .iter()
        .zip(keystream(seed, payload.len()))
        .map(|(b, k)| b ^ k)
        .collect()
}

/// Uppercase hex rendering used when logging ciphertext
pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
