//! World-session packets exchanged around authentication.

use crate::crypto::bignum::BigInt;
use crate::crypto::digest::Sha1Context;
use crate::error::WireError;
use crate::frame::WorldPacket;
use crate::opcode::Opcode;
use crate::wire::buffer::WireBuffer;

pub const SERVER_CONNECTION_INIT: &str = "WORLD OF WARCRAFT CONNECTION - SERVER TO CLIENT";
pub const CLIENT_CONNECTION_INIT: &str = "WORLD OF WARCRAFT CONNECTION - CLIENT TO SERVER";

const ACCOUNT_LENGTH_BITS: u32 = 12;

/// `SMSG_AUTH_RESPONSE` result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    pub const AUTH_OK: Self = Self(12);
    pub const AUTH_FAILED: Self = Self(13);
    pub const AUTH_REJECT: Self = Self(14);
    pub const AUTH_BAD_SERVER_PROOF: Self = Self(15);
    pub const AUTH_UNAVAILABLE: Self = Self(16);
    pub const AUTH_SYSTEM_ERROR: Self = Self(17);
    pub const AUTH_BILLING_ERROR: Self = Self(18);
    pub const AUTH_BILLING_EXPIRED: Self = Self(19);
    pub const AUTH_VERSION_MISMATCH: Self = Self(20);
    pub const AUTH_UNKNOWN_ACCOUNT: Self = Self(21);
    pub const AUTH_INCORRECT_PASSWORD: Self = Self(22);
    pub const AUTH_SESSION_EXPIRED: Self = Self(23);
    pub const AUTH_SERVER_SHUTTING_DOWN: Self = Self(24);
    pub const AUTH_ALREADY_LOGGING_IN: Self = Self(25);
    pub const AUTH_LOGIN_SERVER_NOT_FOUND: Self = Self(26);
    pub const AUTH_WAIT_QUEUE: Self = Self(27);
    pub const AUTH_BANNED: Self = Self(28);
    pub const AUTH_ALREADY_ONLINE: Self = Self(29);
    pub const AUTH_NO_TIME: Self = Self(30);
    pub const AUTH_DB_BUSY: Self = Self(31);
    pub const AUTH_SUSPENDED: Self = Self(32);
    pub const AUTH_PARENTAL_CONTROL: Self = Self(33);
    pub const AUTH_LOCKED_ENFORCED: Self = Self(34);

    pub fn is_ok(self) -> bool {
        self == Self::AUTH_OK
    }
}

/// Body of a handshake frame: the init string plus its terminator.
pub fn connection_init_body(text: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(text.len() + 1);
    body.extend_from_slice(text.as_bytes());
    body.push(0);
    body
}

/// True when `body` carries `text`, with or without the trailing NUL.
pub fn is_connection_init(body: &[u8], text: &str) -> bool {
    let body = body.strip_suffix(&[0]).unwrap_or(body);
    body == text.as_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthChallenge {
    pub dos_seeds: [u32; 8],
    pub server_seed: u32,
    pub dos_zero_bits: u8,
}

impl AuthChallenge {
    pub fn read(buf: &mut WireBuffer) -> Result<Self, WireError> {
        let mut dos_seeds = [0u32; 8];
        for seed in dos_seeds.iter_mut() {
            *seed = buf.read_u32()?;
        }
        Ok(Self {
            dos_seeds,
            server_seed: buf.read_u32()?,
            dos_zero_bits: buf.read_u8()?,
        })
    }

    pub fn write(&self) -> WorldPacket {
        let mut payload = WireBuffer::with_capacity(8 * 4 + 4 + 1);
        for seed in self.dos_seeds {
            payload.append_u32(seed);
        }
        payload.append_u32(self.server_seed).append_u8(self.dos_zero_bits);
        WorldPacket::new(Opcode::SMSG_AUTH_CHALLENGE, payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub server_id: u32,
    pub battlegroup_id: u32,
    pub login_server_type: u8,
    pub build: u16,
    pub realm_id: u32,
    pub region_id: u32,
    pub client_seed: u32,
    pub digest: [u8; 20],
    pub use_ipv6: bool,
    pub account: String,
}

impl AuthSession {
    /// SHA1(account, u32 0, client seed, server seed, K).
    pub fn compute_digest(
        account: &str,
        client_seed: u32,
        server_seed: u32,
        session_key: &BigInt,
    ) -> [u8; 20] {
        let mut sha = Sha1Context::new();
        sha.update(account)
            .update(&[0u8; 4])
            .update(&client_seed.to_le_bytes())
            .update(&server_seed.to_le_bytes())
            .update(session_key);
        sha.finalize()
    }

    pub fn write(&self) -> Result<WorldPacket, WireError> {
        if self.account.len() >= 1 << ACCOUNT_LENGTH_BITS {
            return Err(WireError::TooLong {
                what: "session account name",
                len: self.account.len(),
            });
        }

        let d = &self.digest;
        let mut payload = WireBuffer::with_capacity(100 + self.account.len());
        payload
            .append_u32(self.server_id)
            .append_u32(self.battlegroup_id)
            .append_u8(self.login_server_type);
        append_digest(&mut payload, d, &[10, 18, 12, 5]);
        payload.append_u64(0);
        append_digest(&mut payload, d, &[15, 9, 19, 4, 7, 16, 3]);
        payload.append_u16(self.build);
        append_digest(&mut payload, d, &[8]);
        payload.append_u32(self.realm_id).append_u8(0);
        append_digest(&mut payload, d, &[17, 6, 0, 1, 11]);
        payload.append_u32(self.client_seed);
        append_digest(&mut payload, d, &[2]);
        payload.append_u32(self.region_id);
        append_digest(&mut payload, d, &[14, 13]);

        // No addon block.
        payload.append_u32(0);
        payload.write_bit(self.use_ipv6);
        payload.write_bits(self.account.len() as u32, ACCOUNT_LENGTH_BITS);
        payload.flush_bits();
        payload.append_string(&self.account);

        Ok(WorldPacket::new(Opcode::CMSG_AUTH_SESSION, payload))
    }

    pub fn read(buf: &mut WireBuffer) -> Result<Self, WireError> {
        let mut digest = [0u8; 20];
        let server_id = buf.read_u32()?;
        let battlegroup_id = buf.read_u32()?;
        let login_server_type = buf.read_u8()?;
        read_digest(buf, &mut digest, &[10, 18, 12, 5])?;
        let _dos_response = buf.read_u64()?;
        read_digest(buf, &mut digest, &[15, 9, 19, 4, 7, 16, 3])?;
        let build = buf.read_u16()?;
        read_digest(buf, &mut digest, &[8])?;
        let realm_id = buf.read_u32()?;
        buf.read_skip(1)?;
        read_digest(buf, &mut digest, &[17, 6, 0, 1, 11])?;
        let client_seed = buf.read_u32()?;
        read_digest(buf, &mut digest, &[2])?;
        let region_id = buf.read_u32()?;
        read_digest(buf, &mut digest, &[14, 13])?;

        let addon_size = buf.read_u32()? as usize;
        buf.read_skip(addon_size)?;
        let use_ipv6 = buf.read_bit()?;
        let account_len = buf.read_bits(ACCOUNT_LENGTH_BITS)? as usize;
        let account = buf.read_string(account_len)?;

        Ok(Self {
            server_id,
            battlegroup_id,
            login_server_type,
            build,
            realm_id,
            region_id,
            client_seed,
            digest,
            use_ipv6,
            account,
        })
    }
}

fn append_digest(buf: &mut WireBuffer, digest: &[u8; 20], order: &[usize]) {
    for &index in order {
        buf.append_u8(digest[index]);
    }
}

fn read_digest(buf: &mut WireBuffer, digest: &mut [u8; 20], order: &[usize]) -> Result<(), WireError> {
    for &index in order {
        digest[index] = buf.read_u8()?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountInfo {
    pub billing_time_remaining: u32,
    pub expansion: u8,
    pub unknown: u32,
    pub active_expansion: u8,
    pub billing_time_rested: u32,
    pub billing_plan_flags: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthResponse {
    pub result: ResponseCode,
    pub account_info: Option<AccountInfo>,
    pub queue_position: Option<u32>,
}

impl AuthResponse {
    pub fn read(buf: &mut WireBuffer) -> Result<Self, WireError> {
        let queued = buf.read_bit()?;
        if queued {
            let _unknown = buf.read_bit()?;
        }
        let has_account_info = buf.read_bit()?;
        buf.reset_bit_pos();

        let account_info = if has_account_info {
            Some(AccountInfo {
                billing_time_remaining: buf.read_u32()?,
                expansion: buf.read_u8()?,
                unknown: buf.read_u32()?,
                active_expansion: buf.read_u8()?,
                billing_time_rested: buf.read_u32()?,
                billing_plan_flags: buf.read_u8()?,
            })
        } else {
            None
        };

        let result = ResponseCode(buf.read_u8()?);
        let queue_position = if queued { Some(buf.read_u32()?) } else { None };

        Ok(Self {
            result,
            account_info,
            queue_position,
        })
    }

    pub fn write(&self) -> WorldPacket {
        let mut payload = WireBuffer::new();
        payload.write_bit(self.queue_position.is_some());
        if self.queue_position.is_some() {
            payload.write_bit(false);
        }
        payload.write_bit(self.account_info.is_some());
        payload.flush_bits();

        if let Some(info) = &self.account_info {
            payload
                .append_u32(info.billing_time_remaining)
                .append_u8(info.expansion)
                .append_u32(info.unknown)
                .append_u8(info.active_expansion)
                .append_u32(info.billing_time_rested)
                .append_u8(info.billing_plan_flags);
        }
        payload.append_u8(self.result.0);
        if let Some(position) = self.queue_position {
            payload.append_u32(position);
        }
        WorldPacket::new(Opcode::SMSG_AUTH_RESPONSE, payload)
    }
}

/// `CMSG_CHAR_ENUM` carries no body.
pub fn char_enum_request() -> WorldPacket {
    WorldPacket::new(Opcode::CMSG_CHAR_ENUM, WireBuffer::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub serial: u32,
    pub latency: u32,
}

impl Ping {
    pub fn write(&self) -> WorldPacket {
        let mut payload = WireBuffer::with_capacity(8);
        payload.append_u32(self.latency).append_u32(self.serial);
        WorldPacket::new(Opcode::CMSG_PING, payload)
    }
}

/// Reads the serial echoed back in `SMSG_PONG`.
pub fn read_pong(buf: &mut WireBuffer) -> Result<u32, WireError> {
    buf.read_u32()
}
