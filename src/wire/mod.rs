//! Wire package framing.
//!
//! Every message exchanged between servers (replication, fan-out queries,
//! query responses) is wrapped in a fixed 8-byte header followed by an
//! opaque body. This module owns only that header — the body's structure
//! is defined by whichever layer is sending it (replication FIFO entries,
//! query AST/results, …) and is treated here as an opaque byte string.

#[cfg(test)]
mod tests;

use crate::encoding::{self, Decode, Encode, EncodingError};
use thiserror::Error;

/// A package header is always this many bytes, before the body.
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1;

/// Upper bound on a single package body, guarding against a corrupted or
/// malicious length field triggering an oversized allocation.
pub const MAX_BODY_LEN: u32 = 512 * 1024 * 1024;

/// Errors raised while framing or parsing a [`Package`].
#[derive(Debug, Error)]
pub enum WireError {
    /// Encoding/decoding of the header or body failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The declared body length exceeds [`MAX_BODY_LEN`].
    #[error("package body length {0} exceeds limit ({MAX_BODY_LEN})")]
    BodyTooLarge(u32),

    /// The checkbit did not match the expected complement of `tp`.
    #[error("checkbit mismatch: tp={tp:#x} checkbit={checkbit:#x}")]
    BadCheckbit { tp: u8, checkbit: u8 },

    /// Buffer too short to contain a full header.
    #[error("buffer too short for package header ({0} bytes available)")]
    ShortHeader(usize),
}

/// Package type discriminant.
///
/// The concrete set of types is owned by whichever protocol layer builds
/// the package (replication vs. query); this module only needs to frame
/// and unframe, so `tp` is carried as an opaque byte rather than an enum.
pub type PackageType = u8;

/// A single framed wire message: `{length, pid, tp, checkbit, body}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Client/session-assigned package id, echoed back in responses.
    pub pid: u16,
    /// Package type (interpreted by the receiving protocol layer).
    pub tp: PackageType,
    /// Opaque payload.
    pub body: Vec<u8>,
}

impl Package {
    /// Builds a new package for `body` with the given `pid`/`tp`.
    pub fn new(pid: u16, tp: PackageType, body: Vec<u8>) -> Self {
        Self { pid, tp, body }
    }

    /// The checkbit is the one's complement of `tp`; it lets a receiver
    /// immediately reject a misaligned read before parsing the body.
    fn checkbit_for(tp: u8) -> u8 {
        !tp
    }

    /// Serializes this package (header + body) into `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        let body_len = u32::try_from(self.body.len())
            .map_err(|_| WireError::BodyTooLarge(u32::MAX))?;
        if body_len > MAX_BODY_LEN {
            return Err(WireError::BodyTooLarge(body_len));
        }
        body_len.encode_to(buf)?;
        self.pid.encode_to(buf)?;
        self.tp.encode_to(buf)?;
        Self::checkbit_for(self.tp).encode_to(buf)?;
        buf.extend_from_slice(&self.body);
        Ok(())
    }

    /// Serializes this package into a freshly-allocated `Vec<u8>`.
    pub fn to_vec(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.body.len());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Parses one package from the front of `buf`.
    ///
    /// Returns `(package, bytes_consumed)`. Does not require `buf` to
    /// contain exactly one package — trailing bytes are simply not
    /// consumed, so callers can frame a stream by repeatedly calling this
    /// once enough bytes have arrived.
    pub fn parse_from(buf: &[u8]) -> Result<(Self, usize), WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::ShortHeader(buf.len()));
        }
        let mut offset = 0;
        let (body_len, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        if body_len > MAX_BODY_LEN {
            return Err(WireError::BodyTooLarge(body_len));
        }
        let (pid, n) = u16::decode_from(&buf[offset..])?;
        offset += n;
        let (tp, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        let (checkbit, n) = u8::decode_from(&buf[offset..])?;
        offset += n;

        let expected = Self::checkbit_for(tp);
        if checkbit != expected {
            return Err(WireError::BadCheckbit { tp, checkbit });
        }

        let body_len = body_len as usize;
        if buf.len() < offset + body_len {
            return Err(WireError::ShortHeader(buf.len()));
        }
        let body = buf[offset..offset + body_len].to_vec();
        offset += body_len;

        Ok((Self { pid, tp, body }, offset))
    }
}
