//! Protocol core for the realmwire client: SRP6 logon math, the RC4 header
//! crypt, the wire buffer and the incremental world-stream framer.
//!
//! Nothing in here touches a socket. The client crate drives these types from
//! its transport loop.

pub mod capture;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod opcode;
pub mod packets;
pub mod srp;
pub mod wire;

pub use crypto::bignum::{BigInt, Endian};
pub use crypto::session_crypt::SessionCrypt;
pub use error::{CryptoError, FrameError, ProtocolError, SrpError, WireError};
pub use frame::{Frame, FrameMode, FrameReader, WorldPacket};
pub use srp::{Srp6Handshake, SrpState};
pub use wire::buffer::WireBuffer;
pub use wire::guid::PackedGuid;
