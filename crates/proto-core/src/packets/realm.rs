use bitflags::bitflags;

use super::logon::{expect_command, AuthCommand};
use crate::error::{ProtocolError, WireError};
use crate::wire::buffer::WireBuffer;

const DEFAULT_WORLD_PORT: u16 = 8085;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RealmFlags: u8 {
        const VERSION_MISMATCH = 0x01;
        const OFFLINE = 0x02;
        const SPECIFY_BUILD = 0x04;
        const NEW_PLAYERS = 0x20;
        const RECOMMENDED = 0x40;
        const FULL = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealmBuild {
    pub version: [u8; 3],
    pub build: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealmInfo {
    pub realm_type: u8,
    pub locked: bool,
    pub flags: RealmFlags,
    pub name: String,
    pub address: String,
    pub population: f32,
    pub characters: u8,
    pub timezone: u8,
    pub id: u8,
    pub build: Option<RealmBuild>,
}

impl RealmInfo {
    /// Splits `address` into host and port, defaulting the port when absent.
    pub fn endpoint(&self) -> Result<(String, u16), ProtocolError> {
        match self.address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ProtocolError::Malformed("realm address port"))?;
                Ok((host.to_string(), port))
            }
            None if !self.address.is_empty() => Ok((self.address.clone(), DEFAULT_WORLD_PORT)),
            None => Err(ProtocolError::Malformed("empty realm address")),
        }
    }

    fn read(buf: &mut WireBuffer) -> Result<Self, WireError> {
        let realm_type = buf.read_u8()?;
        let locked = buf.read_u8()? != 0;
        let flags = RealmFlags::from_bits_retain(buf.read_u8()?);
        let name = buf.read_cstring()?;
        let address = buf.read_cstring()?;
        let population = buf.read_f32()?;
        let characters = buf.read_u8()?;
        let timezone = buf.read_u8()?;
        let id = buf.read_u8()?;
        let build = if flags.contains(RealmFlags::SPECIFY_BUILD) {
            let mut version = [0u8; 3];
            version.copy_from_slice(buf.read_bytes(3)?);
            Some(RealmBuild {
                version,
                build: buf.read_u16()?,
            })
        } else {
            None
        };

        Ok(Self {
            realm_type,
            locked,
            flags,
            name,
            address,
            population,
            characters,
            timezone,
            id,
            build,
        })
    }

    fn write(&self, buf: &mut WireBuffer) {
        let mut flags = self.flags;
        flags.set(RealmFlags::SPECIFY_BUILD, self.build.is_some());
        buf.append_u8(self.realm_type)
            .append_u8(u8::from(self.locked))
            .append_u8(flags.bits())
            .append_cstring(&self.name)
            .append_cstring(&self.address)
            .append_f32(self.population)
            .append_u8(self.characters)
            .append_u8(self.timezone)
            .append_u8(self.id);
        if let Some(build) = &self.build {
            buf.append(&build.version).append_u16(build.build);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealmList {
    pub realms: Vec<RealmInfo>,
}

impl RealmList {
    /// Parses a realm list from the front of `input`, or `None` until the
    /// size-prefixed body is complete.
    pub fn parse(input: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        let Some(&command) = input.first() else {
            return Ok(None);
        };
        expect_command(command, AuthCommand::RealmList)?;
        if input.len() < 3 {
            return Ok(None);
        }
        let size = u16::from_le_bytes([input[1], input[2]]) as usize;
        let total = 3 + size;
        if input.len() < total {
            return Ok(None);
        }

        let mut buf = WireBuffer::from_slice(&input[3..total]);
        let _unused = buf.read_u32()?;
        let count = buf.read_u16()?;
        if count == 0 {
            return Err(ProtocolError::Malformed("empty realm list"));
        }
        let realms = (0..count)
            .map(|_| RealmInfo::read(&mut buf))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some((Self { realms }, total)))
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let count = u16::try_from(self.realms.len()).map_err(|_| WireError::TooLong {
            what: "realm list",
            len: self.realms.len(),
        })?;

        let mut body = WireBuffer::new();
        body.append_u32(0).append_u16(count);
        for realm in &self.realms {
            realm.write(&mut body);
        }
        body.append_u8(0x10).append_u8(0x00);

        let size = u16::try_from(body.len()).map_err(|_| WireError::TooLong {
            what: "realm list body",
            len: body.len(),
        })?;
        let mut out = WireBuffer::with_capacity(3 + body.len());
        out.append_u8(AuthCommand::RealmList as u8)
            .append_u16(size)
            .append(body.contents());
        Ok(out.into_inner())
    }

    pub fn find(&self, name: &str) -> Option<&RealmInfo> {
        self.realms.iter().find(|realm| realm.name == name)
    }

    pub fn find_by_id(&self, id: u8) -> Option<&RealmInfo> {
        self.realms.iter().find(|realm| realm.id == id)
    }
}
