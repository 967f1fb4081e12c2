//! Typed packet layouts. Logon packets are raw command-byte records; world
//! packets travel inside frames as `WorldPacket` payloads.

pub mod logon;
pub mod realm;
pub mod world;
