use thiserror::Error;

use crate::packets::logon::AuthResult;
use crate::srp::SrpState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("read of {requested} bytes at position {pos} exceeds buffer size {size}")]
    OutOfBounds {
        pos: usize,
        requested: usize,
        size: usize,
    },
    #[error("non-finite float at position {pos}")]
    NonFinite { pos: usize },
    #[error("string at position {pos} is not valid utf-8")]
    InvalidString { pos: usize },
    #[error("string starting at position {pos} has no terminator")]
    Unterminated { pos: usize },
    #[error("{what} of {len} bytes does not fit its length prefix")]
    TooLong { what: &'static str, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("modulus must be positive")]
    InvalidModulus,
    #[error("exponent must be non-negative and fit in 32 bits")]
    InvalidExponent,
    #[error("invalid hex string {0:?}")]
    InvalidHex(String),
    #[error("value needs {needed} bytes, only {capacity} available")]
    Overflow { needed: usize, capacity: usize },
    #[error("cipher key must not be empty")]
    EmptyKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SrpError {
    #[error("handshake step {step} is not valid in state {state:?}")]
    InvalidState { step: &'static str, state: SrpState },
    #[error("logon server rejected the request: {0:?}")]
    Rejected(AuthResult),
    #[error("degenerate srp parameter: {0}")]
    Degenerate(&'static str),
    #[error("server proof does not match")]
    ProofMismatch,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("declared frame size {size} is smaller than its opcode")]
    BadHeader { size: usize },
    #[error("frame of {size} bytes exceeds limit {limit}")]
    Oversize { size: usize, limit: usize },
    #[error("compressed frame of {size} bytes has no size prefix")]
    MissingInflatedSize { size: usize },
    #[error("inflate failed: {0}")]
    Decompress(String),
    #[error("inflate left {remaining} compressed bytes unconsumed")]
    TrailingInput { remaining: usize },
    #[error("inflated {actual} bytes, frame declared {declared}")]
    SizeMismatch { declared: usize, actual: usize },
}

/// Any violation that makes the connection unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Srp(#[from] SrpError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("unexpected command 0x{actual:02x}, expected 0x{expected:02x}")]
    UnexpectedCommand { expected: u8, actual: u8 },
    #[error("malformed {0}")]
    Malformed(&'static str),
}
