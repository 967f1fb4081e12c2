/// World-session opcodes for client build 15595.
pub struct Opcode;

impl Opcode {
    // Session handshake.
    pub const SMSG_AUTH_CHALLENGE: u16 = 0x4542;
    pub const CMSG_AUTH_SESSION: u16 = 0x0449;
    pub const SMSG_AUTH_RESPONSE: u16 = 0x5DB6;

    // Character selection.
    pub const CMSG_CHAR_ENUM: u16 = 0x0502;
    pub const SMSG_CHAR_ENUM: u16 = 0x10B0;

    // Keepalive.
    pub const CMSG_PING: u16 = 0x444D;
    pub const SMSG_PONG: u16 = 0x4D42;

    /// Set on inbound opcodes whose body is zlib-deflated.
    pub const COMPRESSED_FLAG: u16 = 0x8000;

    pub fn name(opcode: u16) -> Option<&'static str> {
        Some(match opcode & !Self::COMPRESSED_FLAG {
            Self::SMSG_AUTH_CHALLENGE => "SMSG_AUTH_CHALLENGE",
            Self::CMSG_AUTH_SESSION => "CMSG_AUTH_SESSION",
            Self::SMSG_AUTH_RESPONSE => "SMSG_AUTH_RESPONSE",
            Self::CMSG_CHAR_ENUM => "CMSG_CHAR_ENUM",
            Self::SMSG_CHAR_ENUM => "SMSG_CHAR_ENUM",
            Self::CMSG_PING => "CMSG_PING",
            Self::SMSG_PONG => "SMSG_PONG",
            _ => return None,
        })
    }
}
