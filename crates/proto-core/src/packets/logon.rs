//! Logon-server packets: one command byte followed by a fixed layout.

use std::io::Cursor;
use std::net::Ipv4Addr;

use binrw::{binrw, BinRead, BinReaderExt, BinWrite};
use bitflags::bitflags;

use crate::error::{ProtocolError, WireError};
use crate::srp::{ClientProof, ServerChallenge};
use crate::wire::buffer::WireBuffer;

/// Logon protocol revision sent in the challenge's error slot.
const PROTOCOL_VERSION: u8 = 6;
/// Bytes of `LogonChallenge` after the size field, excluding the name.
const CHALLENGE_FIXED_SIZE: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthCommand {
    LogonChallenge = 0x00,
    LogonProof = 0x01,
    ReconnectChallenge = 0x02,
    ReconnectProof = 0x03,
    RealmList = 0x10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Ok,
    Banned,
    UnknownAccount,
    AlreadyOnline,
    NoTime,
    Busy,
    BadVersion,
    DownloadFile,
    Suspended,
    ParentalControl,
    LockedEnforced,
    ConversionRequired,
    // Local-only codes, never sent by a server.
    NotStarted,
    InvalidSrp6,
    Disconnected,
    Other(u8),
}

impl From<u8> for AuthResult {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            3 => Self::Banned,
            4 | 5 => Self::UnknownAccount,
            6 => Self::AlreadyOnline,
            7 => Self::NoTime,
            8 => Self::Busy,
            9 => Self::BadVersion,
            10 => Self::DownloadFile,
            12 => Self::Suspended,
            15 => Self::ParentalControl,
            16 => Self::LockedEnforced,
            32 => Self::ConversionRequired,
            253 => Self::NotStarted,
            254 => Self::InvalidSrp6,
            255 => Self::Disconnected,
            other => Self::Other(other),
        }
    }
}

impl AuthResult {
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Banned => 3,
            Self::UnknownAccount => 4,
            Self::AlreadyOnline => 6,
            Self::NoTime => 7,
            Self::Busy => 8,
            Self::BadVersion => 9,
            Self::DownloadFile => 10,
            Self::Suspended => 12,
            Self::ParentalControl => 15,
            Self::LockedEnforced => 16,
            Self::ConversionRequired => 32,
            Self::NotStarted => 253,
            Self::InvalidSrp6 => 254,
            Self::Disconnected => 255,
            Self::Other(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

bitflags! {
    /// Extra authenticators a server may demand after the challenge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityFlags: u8 {
        const PIN = 0x01;
        const MATRIX = 0x02;
        const TOKEN = 0x04;
    }
}

impl SecurityFlags {
    /// Size of the trailing blocks these flags announce.
    fn trailer_len(self) -> usize {
        let mut len = 0;
        if self.contains(Self::PIN) {
            len += 4 + 16;
        }
        if self.contains(Self::MATRIX) {
            len += 4 + 8;
        }
        if self.contains(Self::TOKEN) {
            len += 1;
        }
        len
    }
}

/// Client-side identification sent as the first logon packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonChallenge {
    pub game: String,
    pub version: [u8; 3],
    pub build: u16,
    pub platform: String,
    pub os: String,
    pub country: String,
    pub timezone_bias: u32,
    pub ip: Ipv4Addr,
    pub account: String,
}

/// Four-character codes travel reversed and NUL-padded.
pub fn encode_fourcc(text: &str) -> [u8; 4] {
    let mut out = [0u8; 4];
    for (slot, byte) in out.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    out.reverse();
    out
}

pub fn decode_fourcc(bytes: [u8; 4]) -> String {
    let mut bytes = bytes;
    bytes.reverse();
    bytes
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect()
}

impl LogonChallenge {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let name_len = u8::try_from(self.account.len()).map_err(|_| WireError::TooLong {
            what: "account name",
            len: self.account.len(),
        })?;

        let mut buf = WireBuffer::with_capacity(4 + CHALLENGE_FIXED_SIZE + self.account.len());
        buf.append_u8(AuthCommand::LogonChallenge as u8)
            .append_u8(PROTOCOL_VERSION)
            .append_u16((CHALLENGE_FIXED_SIZE + self.account.len()) as u16)
            .append(&encode_fourcc(&self.game))
            .append(&self.version)
            .append_u16(self.build)
            .append(&encode_fourcc(&self.platform))
            .append(&encode_fourcc(&self.os))
            .append(&encode_fourcc(&self.country))
            .append_u32(self.timezone_bias)
            .append(&self.ip.octets())
            .append_u8(name_len)
            .append_string(&self.account);
        Ok(buf.into_inner())
    }

    /// Reads a challenge including its command byte.
    pub fn decode(buf: &mut WireBuffer) -> Result<Self, ProtocolError> {
        expect_command(buf.read_u8()?, AuthCommand::LogonChallenge)?;
        let _protocol = buf.read_u8()?;
        let size = buf.read_u16()? as usize;
        if size < CHALLENGE_FIXED_SIZE || buf.remaining() < size {
            return Err(ProtocolError::Malformed("logon challenge size"));
        }

        let game = decode_fourcc(read_array(buf)?);
        let version = read_array(buf)?;
        let build = buf.read_u16()?;
        let platform = decode_fourcc(read_array(buf)?);
        let os = decode_fourcc(read_array(buf)?);
        let country = decode_fourcc(read_array(buf)?);
        let timezone_bias = buf.read_u32()?;
        let ip = Ipv4Addr::from(read_array::<4>(buf)?);
        let name_len = buf.read_u8()? as usize;
        let account = buf.read_string(name_len)?;

        Ok(Self {
            game,
            version,
            build,
            platform,
            os,
            country,
            timezone_bias,
            ip,
            account,
        })
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChallengeBody {
    b: [u8; 32],
    #[br(temp)]
    #[bw(calc = g.len() as u8)]
    g_len: u8,
    #[br(count = g_len)]
    g: Vec<u8>,
    #[br(temp)]
    #[bw(calc = n.len() as u8)]
    n_len: u8,
    #[br(count = n_len)]
    n: Vec<u8>,
    salt: [u8; 32],
    version_challenge: [u8; 16],
    security_flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogonChallengeReply {
    Rejected(AuthResult),
    Accepted {
        challenge: ServerChallenge,
        version_challenge: [u8; 16],
        security_flags: SecurityFlags,
    },
}

impl LogonChallengeReply {
    /// Parses a reply from the front of `input`. Returns `None` until the
    /// whole reply has arrived, otherwise the reply and the bytes it used.
    pub fn parse(input: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        let Some(&command) = input.first() else {
            return Ok(None);
        };
        expect_command(command, AuthCommand::LogonChallenge)?;
        if input.len() < 3 {
            return Ok(None);
        }

        let result = AuthResult::from(input[2]);
        if !result.is_ok() {
            return Ok(Some((Self::Rejected(result), 3)));
        }

        let Some(len) = challenge_reply_len(input) else {
            return Ok(None);
        };

        let body: ChallengeBody = Cursor::new(&input[3..len])
            .read_le()
            .map_err(|_| ProtocolError::Malformed("logon challenge reply"))?;
        let reply = Self::Accepted {
            challenge: ServerChallenge {
                b: body.b,
                g: body.g,
                n: body.n,
                salt: body.salt,
            },
            version_challenge: body.version_challenge,
            security_flags: SecurityFlags::from_bits_retain(body.security_flags),
        };
        Ok(Some((reply, len)))
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![AuthCommand::LogonChallenge as u8, 0];
        match self {
            Self::Rejected(result) => out.push(result.code()),
            Self::Accepted {
                challenge,
                version_challenge,
                ..
            } => {
                out.push(AuthResult::Ok.code());
                let body = ChallengeBody {
                    b: challenge.b,
                    g: challenge.g.clone(),
                    n: challenge.n.clone(),
                    salt: challenge.salt,
                    version_challenge: *version_challenge,
                    // Trailing authenticator blocks are never produced here.
                    security_flags: 0,
                };
                out.extend_from_slice(&write_le(&body)?);
            }
        }
        Ok(out)
    }
}

/// Total reply length once enough bytes are present to know it.
fn challenge_reply_len(input: &[u8]) -> Option<usize> {
    let mut need = 3 + 32 + 1;
    let g_len = *input.get(need - 1)? as usize;
    need += g_len + 1;
    let n_len = *input.get(need - 1)? as usize;
    need += n_len + 32 + 16 + 1;
    let flags = SecurityFlags::from_bits_retain(*input.get(need - 1)?);
    need += flags.trailer_len();
    (input.len() >= need).then_some(need)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = 1u8)]
pub struct LogonProof {
    pub a: [u8; 32],
    pub m1: [u8; 20],
    pub crc: [u8; 20],
    pub key_count: u8,
    pub security_flags: u8,
}

impl LogonProof {
    pub fn new(proof: &ClientProof) -> Self {
        Self {
            a: proof.a,
            m1: proof.m1,
            crc: [0u8; 20],
            key_count: 0,
            security_flags: 0,
        }
    }

    pub fn client_proof(&self) -> ClientProof {
        ClientProof {
            a: self.a,
            m1: self.m1,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        write_le(self)
    }

    pub const ENCODED_LEN: usize = 1 + 32 + 20 + 20 + 1 + 1;

    pub fn decode(input: &[u8]) -> Result<Self, ProtocolError> {
        Cursor::new(input)
            .read_le()
            .map_err(|_| ProtocolError::Malformed("logon proof"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct ProofAccepted {
    pub m2: [u8; 20],
    pub account_flags: u32,
    pub survey_id: u32,
    pub login_flags: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonProofReply {
    Rejected(AuthResult),
    Accepted(ProofAccepted),
}

impl LogonProofReply {
    const ACCEPTED_LEN: usize = 2 + 20 + 4 + 4 + 2;

    pub fn parse(input: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        let Some(&command) = input.first() else {
            return Ok(None);
        };
        expect_command(command, AuthCommand::LogonProof)?;
        if input.len() < 2 {
            return Ok(None);
        }

        let result = AuthResult::from(input[1]);
        if !result.is_ok() {
            // Servers pad rejections differently; the connection ends here anyway.
            return Ok(Some((Self::Rejected(result), input.len().min(4))));
        }
        if input.len() < Self::ACCEPTED_LEN {
            return Ok(None);
        }

        let accepted: ProofAccepted = Cursor::new(&input[2..Self::ACCEPTED_LEN])
            .read_le()
            .map_err(|_| ProtocolError::Malformed("logon proof reply"))?;
        Ok(Some((Self::Accepted(accepted), Self::ACCEPTED_LEN)))
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![AuthCommand::LogonProof as u8];
        match self {
            Self::Rejected(result) => out.extend_from_slice(&[result.code(), 3, 0]),
            Self::Accepted(accepted) => {
                out.push(AuthResult::Ok.code());
                out.extend_from_slice(&write_le(accepted)?);
            }
        }
        Ok(out)
    }
}

pub fn realm_list_request() -> [u8; 5] {
    [AuthCommand::RealmList as u8, 0, 0, 0, 0]
}

pub(crate) fn expect_command(actual: u8, expected: AuthCommand) -> Result<(), ProtocolError> {
    if actual != expected as u8 {
        return Err(ProtocolError::UnexpectedCommand {
            expected: expected as u8,
            actual,
        });
    }
    Ok(())
}

fn read_array<const N: usize>(buf: &mut WireBuffer) -> Result<[u8; N], WireError> {
    let mut out = [0u8; N];
    out.copy_from_slice(buf.read_bytes(N)?);
    Ok(out)
}

fn write_le<T>(value: &T) -> Result<Vec<u8>, ProtocolError>
where
    T: for<'a> BinWrite<Args<'a> = ()>,
{
    let mut cursor = Cursor::new(Vec::new());
    value
        .write_le(&mut cursor)
        .map_err(|_| ProtocolError::Malformed("binary layout"))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge() -> LogonChallenge {
        LogonChallenge {
            game: "WoW".to_string(),
            version: [4, 3, 4],
            build: 15595,
            platform: "x86".to_string(),
            os: "Win".to_string(),
            country: "enUS".to_string(),
            timezone_bias: 0x3C,
            ip: Ipv4Addr::new(127, 0, 0, 1),
            account: "TESTUSER".to_string(),
        }
    }

    #[test]
    fn fourcc_is_reversed_and_padded() {
        assert_eq!(encode_fourcc("WoW"), [0, b'W', b'o', b'W']);
        assert_eq!(encode_fourcc("enUS"), *b"SUne");
        assert_eq!(decode_fourcc(encode_fourcc("x86")), "x86");
    }

    #[test]
    fn challenge_layout() {
        let bytes = challenge().encode().unwrap();
        assert_eq!(bytes.len(), 4 + 30 + 8);
        assert_eq!(&bytes[..4], &[0x00, 0x06, 38, 0]);
        assert_eq!(&bytes[4..8], &[0, b'W', b'o', b'W']);
        assert_eq!(&bytes[8..11], &[4, 3, 4]);
        assert_eq!(&bytes[11..13], &15595u16.to_le_bytes());
        assert_eq!(&bytes[29..33], &[127, 0, 0, 1]);
        assert_eq!(bytes[33], 8);
        assert_eq!(&bytes[34..], b"TESTUSER");

        let decoded = LogonChallenge::decode(&mut WireBuffer::from(bytes)).unwrap();
        assert_eq!(decoded, challenge());
    }

    #[test]
    fn challenge_reply_waits_for_all_bytes() {
        let reply = LogonChallengeReply::Accepted {
            challenge: ServerChallenge {
                b: [2u8; 32],
                g: vec![7],
                n: vec![0xB7; 32],
                salt: [3u8; 32],
            },
            version_challenge: [4u8; 16],
            security_flags: SecurityFlags::empty(),
        };
        let bytes = reply.encode().unwrap();
        assert_eq!(bytes.len(), 3 + 32 + 1 + 1 + 1 + 32 + 32 + 16 + 1);

        for cut in 0..bytes.len() {
            assert_eq!(LogonChallengeReply::parse(&bytes[..cut]).unwrap(), None, "cut={cut}");
        }
        let (parsed, used) = LogonChallengeReply::parse(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(parsed, reply);
    }

    #[test]
    fn challenge_reply_skips_security_blocks() {
        let reply = LogonChallengeReply::Accepted {
            challenge: ServerChallenge {
                b: [2u8; 32],
                g: vec![7],
                n: vec![0xB7; 32],
                salt: [3u8; 32],
            },
            version_challenge: [0u8; 16],
            security_flags: SecurityFlags::empty(),
        };
        let mut bytes = reply.encode().unwrap();
        let flags_at = bytes.len() - 1;
        bytes[flags_at] = (SecurityFlags::PIN | SecurityFlags::TOKEN).bits();
        let full = bytes.len() + 21;
        bytes.resize(full, 0xEE);

        assert_eq!(LogonChallengeReply::parse(&bytes[..full - 1]).unwrap(), None);
        let (parsed, used) = LogonChallengeReply::parse(&bytes).unwrap().unwrap();
        assert_eq!(used, full);
        assert!(matches!(
            parsed,
            LogonChallengeReply::Accepted { security_flags, .. }
                if security_flags == SecurityFlags::PIN | SecurityFlags::TOKEN
        ));
    }

    #[test]
    fn challenge_rejection() {
        let (parsed, used) = LogonChallengeReply::parse(&[0x00, 0x00, 0x04]).unwrap().unwrap();
        assert_eq!(parsed, LogonChallengeReply::Rejected(AuthResult::UnknownAccount));
        assert_eq!(used, 3);
    }

    #[test]
    fn wrong_command_is_a_violation() {
        assert_eq!(
            LogonChallengeReply::parse(&[0x01, 0x00]).unwrap_err(),
            ProtocolError::UnexpectedCommand {
                expected: 0x00,
                actual: 0x01
            }
        );
    }

    #[test]
    fn proof_layout() {
        let proof = LogonProof::new(&ClientProof {
            a: [0xAA; 32],
            m1: [0xBB; 20],
        });
        let bytes = proof.encode().unwrap();
        assert_eq!(bytes.len(), LogonProof::ENCODED_LEN);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..33], &[0xAA; 32]);
        assert_eq!(&bytes[33..53], &[0xBB; 20]);
        assert_eq!(&bytes[53..], &[0u8; 22]);
        assert_eq!(LogonProof::decode(&bytes).unwrap(), proof);
    }

    #[test]
    fn proof_reply() {
        let accepted = LogonProofReply::Accepted(ProofAccepted {
            m2: [9u8; 20],
            account_flags: 0x0080_0000,
            survey_id: 0,
            login_flags: 0,
        });
        let bytes = accepted.encode().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(LogonProofReply::parse(&bytes[..31]).unwrap(), None);
        assert_eq!(LogonProofReply::parse(&bytes).unwrap(), Some((accepted, 32)));

        let rejected = LogonProofReply::Rejected(AuthResult::UnknownAccount).encode().unwrap();
        assert_eq!(
            LogonProofReply::parse(&rejected).unwrap(),
            Some((LogonProofReply::Rejected(AuthResult::UnknownAccount), 4))
        );
    }

    #[test]
    fn auth_result_codes() {
        assert_eq!(AuthResult::from(5), AuthResult::UnknownAccount);
        assert_eq!(AuthResult::from(99), AuthResult::Other(99));
        assert_eq!(AuthResult::from(32).code(), 32);
        assert!(AuthResult::from(0).is_ok());
    }
}
