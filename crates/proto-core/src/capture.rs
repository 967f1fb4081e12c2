//! PKT 3.1 packet capture, readable by the usual sniff parsers.

use std::io::{self, Write};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::crypto::bignum::{BigInt, Endian};
use crate::frame::{StreamDirection, WorldPacket};
use crate::srp::SESSION_KEY_LENGTH;

const MAGIC: &[u8; 3] = b"PKT";
const FORMAT_VERSION: u16 = 0x0301;
const SNIFFER_ID: u8 = b'W';
const LOCALE: &[u8; 4] = b"enUS";
const CLIENT_MAGIC: u32 = 0x4753_4D43;
const SERVER_MAGIC: u32 = 0x4753_4D53;

pub struct PacketCapture<W: Write> {
    out: W,
    started: Instant,
    connection_id: u32,
}

impl<W: Write> PacketCapture<W> {
    /// Writes the file header immediately.
    pub fn new(mut out: W, build: u32, session_key: &BigInt) -> io::Result<Self> {
        let key = session_key
            .to_array::<SESSION_KEY_LENGTH>(Endian::Little)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let unix_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(0);

        out.write_all(MAGIC)?;
        out.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        out.write_u8(SNIFFER_ID)?;
        out.write_u32::<LittleEndian>(build)?;
        out.write_all(LOCALE)?;
        out.write_all(&key)?;
        out.write_u32::<LittleEndian>(unix_time)?;
        out.write_u32::<LittleEndian>(0)?;
        // No optional header data.
        out.write_u32::<LittleEndian>(0)?;
        out.flush()?;

        Ok(Self {
            out,
            started: Instant::now(),
            connection_id: 0,
        })
    }

    pub fn with_connection_id(mut self, connection_id: u32) -> Self {
        self.connection_id = connection_id;
        self
    }

    pub fn record(&mut self, direction: StreamDirection, packet: &WorldPacket) -> io::Result<()> {
        let tick = self.started.elapsed().as_millis() as u32;
        self.record_at(direction, tick, packet)
    }

    pub fn record_at(
        &mut self,
        direction: StreamDirection,
        tick_ms: u32,
        packet: &WorldPacket,
    ) -> io::Result<()> {
        let body = packet.payload.contents();
        let magic = match direction {
            StreamDirection::ClientToServer => CLIENT_MAGIC,
            StreamDirection::ServerToClient => SERVER_MAGIC,
        };

        self.out.write_u32::<LittleEndian>(magic)?;
        self.out.write_u32::<LittleEndian>(self.connection_id)?;
        self.out.write_u32::<LittleEndian>(tick_ms)?;
        self.out.write_u32::<LittleEndian>(0)?;
        self.out.write_u32::<LittleEndian>(body.len() as u32 + 4)?;
        self.out.write_u32::<LittleEndian>(u32::from(packet.opcode))?;
        self.out.write_all(body)?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> std::fmt::Debug for PacketCapture<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCapture")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}
