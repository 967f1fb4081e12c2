//! Incremental world-stream framing.
//!
//! Inbound server frames carry a 2-byte big-endian size (or 3 bytes when the
//! top bit of the first byte is set) followed by a little-endian u16 opcode.
//! The size covers the opcode. Once the session crypt is keyed every header
//! byte is decrypted as it arrives, so a header split across reads costs
//! nothing extra.

use flate2::{Decompress, FlushDecompress};
use tracing::trace;

use crate::crypto::session_crypt::SessionCrypt;
use crate::error::FrameError;
use crate::opcode::Opcode;
use crate::packets::world::connection_init_body;
use crate::wire::buffer::WireBuffer;

const LARGE_HEADER_FLAG: u8 = 0x80;
const SMALL_HEADER_SIZE: usize = 4;
const LARGE_HEADER_SIZE: usize = 5;
const HANDSHAKE_HEADER_SIZE: usize = 2;
const CLIENT_HEADER_SIZE: usize = 6;
const MAX_LARGE_SIZE: usize = 0x7F_FFFF;
const MAX_SMALL_SIZE: usize = 0x7FFF;

/// Largest body or inflated payload accepted by default.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldPacket {
    pub opcode: u16,
    pub payload: WireBuffer,
}

impl WorldPacket {
    pub fn new(opcode: u16, payload: WireBuffer) -> Self {
        Self { opcode, payload }
    }

    pub fn empty(opcode: u16) -> Self {
        Self::new(opcode, WireBuffer::new())
    }

    pub fn name(&self) -> Option<&'static str> {
        Opcode::name(self.opcode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Body of the unencrypted connection-initialization frame.
    Handshake(Vec<u8>),
    Packet(WorldPacket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// Next frame is the 2-byte-header handshake; switches to `Standard` after it.
    Handshake,
    Standard,
}

/// Which side produced the stream being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    ServerToClient,
    /// 6-byte headers with a u32 opcode. Used by servers and capture tools.
    ClientToServer,
}

pub struct FrameReader {
    direction: StreamDirection,
    mode: FrameMode,
    header: [u8; CLIENT_HEADER_SIZE],
    header_len: usize,
    header_need: usize,
    opcode: u16,
    body: Vec<u8>,
    body_need: usize,
    in_body: bool,
    inflater: Decompress,
    max_frame_size: usize,
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("direction", &self.direction)
            .field("mode", &self.mode)
            .field("header_len", &self.header_len)
            .field("body", &self.body.len())
            .field("body_need", &self.body_need)
            .finish()
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    /// Reader for a client: expects the server handshake first.
    pub fn new() -> Self {
        Self::with_direction(StreamDirection::ServerToClient)
    }

    pub fn with_direction(direction: StreamDirection) -> Self {
        let mut reader = Self {
            direction,
            mode: FrameMode::Handshake,
            header: [0u8; CLIENT_HEADER_SIZE],
            header_len: 0,
            header_need: 0,
            opcode: 0,
            body: Vec::new(),
            body_need: 0,
            in_body: false,
            inflater: Decompress::new(true),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        };
        reader.reset();
        reader
    }

    pub fn with_max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = limit;
        self
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: FrameMode) {
        self.mode = mode;
        self.reset();
    }

    /// True while a frame is partially assembled.
    pub fn is_mid_frame(&self) -> bool {
        self.header_len > 0 || self.in_body
    }

    /// Consumes bytes from the front of `input` until one frame completes or
    /// the input runs out. Call again with the remainder for further frames.
    ///
    /// The crypt is borrowed per call so the caller can key it between frames.
    pub fn next_frame(
        &mut self,
        input: &mut &[u8],
        crypt: &mut SessionCrypt,
    ) -> Result<Option<Frame>, FrameError> {
        if !self.in_body {
            if !self.fill_header(input, crypt) {
                return Ok(None);
            }
            self.begin_body()?;
        }

        let missing = self.body_need - self.body.len();
        let take = missing.min(input.len());
        self.body.extend_from_slice(&input[..take]);
        *input = &input[take..];
        if self.body.len() < self.body_need {
            return Ok(None);
        }

        let frame = self.finish();
        self.reset();
        frame.map(Some)
    }

    /// Drains every complete frame out of `input`.
    pub fn read_all(
        &mut self,
        mut input: &[u8],
        crypt: &mut SessionCrypt,
    ) -> Result<Vec<Frame>, FrameError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame(&mut input, crypt)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn reset(&mut self) {
        self.header_len = 0;
        self.header_need = match (self.mode, self.direction) {
            (FrameMode::Handshake, _) => HANDSHAKE_HEADER_SIZE,
            (FrameMode::Standard, StreamDirection::ServerToClient) => SMALL_HEADER_SIZE,
            (FrameMode::Standard, StreamDirection::ClientToServer) => CLIENT_HEADER_SIZE,
        };
        self.opcode = 0;
        self.body = Vec::new();
        self.body_need = 0;
        self.in_body = false;
    }

    fn fill_header(&mut self, input: &mut &[u8], crypt: &mut SessionCrypt) -> bool {
        while self.header_len < self.header_need {
            let Some((&byte, rest)) = input.split_first() else {
                return false;
            };
            *input = rest;

            let mut byte = [byte];
            if self.mode == FrameMode::Standard {
                crypt.decrypt_recv(&mut byte);
            }
            if self.header_len == 0
                && self.mode == FrameMode::Standard
                && self.direction == StreamDirection::ServerToClient
                && byte[0] & LARGE_HEADER_FLAG != 0
            {
                self.header_need = LARGE_HEADER_SIZE;
            }
            self.header[self.header_len] = byte[0];
            self.header_len += 1;
        }
        true
    }

    fn begin_body(&mut self) -> Result<(), FrameError> {
        let h = &self.header;
        let body_need = match (self.mode, self.direction) {
            (FrameMode::Handshake, _) => h[1] as usize,
            (FrameMode::Standard, StreamDirection::ServerToClient) => {
                let (size, opcode_at) = if self.header_need == LARGE_HEADER_SIZE {
                    let size = ((h[0] & !LARGE_HEADER_FLAG) as usize) << 16
                        | (h[1] as usize) << 8
                        | h[2] as usize;
                    (size, 3)
                } else {
                    (u16::from_be_bytes([h[0], h[1]]) as usize, 2)
                };
                if size < 2 {
                    return Err(FrameError::BadHeader { size });
                }
                self.opcode = u16::from_le_bytes([h[opcode_at], h[opcode_at + 1]]);
                size - 2
            }
            (FrameMode::Standard, StreamDirection::ClientToServer) => {
                let size = u16::from_be_bytes([h[0], h[1]]) as usize;
                if size < 4 {
                    return Err(FrameError::BadHeader { size });
                }
                // Only the low half of the u32 opcode is meaningful.
                self.opcode = u16::from_le_bytes([h[2], h[3]]);
                size - 4
            }
        };

        if body_need > self.max_frame_size {
            return Err(FrameError::Oversize {
                size: body_need,
                limit: self.max_frame_size,
            });
        }
        self.body = Vec::with_capacity(body_need);
        self.body_need = body_need;
        self.in_body = true;
        Ok(())
    }

    fn finish(&mut self) -> Result<Frame, FrameError> {
        let body = std::mem::take(&mut self.body);
        if self.mode == FrameMode::Handshake {
            trace!(size = body.len(), "frame.handshake");
            self.mode = FrameMode::Standard;
            return Ok(Frame::Handshake(body));
        }

        let mut opcode = self.opcode;
        let payload = if opcode & Opcode::COMPRESSED_FLAG != 0 {
            opcode &= !Opcode::COMPRESSED_FLAG;
            self.inflate(&body)?
        } else {
            body
        };
        trace!(opcode, size = payload.len(), "frame.packet");
        Ok(Frame::Packet(WorldPacket::new(opcode, WireBuffer::from(payload))))
    }

    fn inflate(&mut self, body: &[u8]) -> Result<Vec<u8>, FrameError> {
        if body.len() < 4 {
            return Err(FrameError::MissingInflatedSize { size: body.len() });
        }
        let declared = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
        if declared > self.max_frame_size {
            return Err(FrameError::Oversize {
                size: declared,
                limit: self.max_frame_size,
            });
        }

        let input = &body[4..];
        // One spare byte so an overlong stream shows up as a size mismatch.
        let mut out = Vec::with_capacity(declared + 1);
        let before = self.inflater.total_in();
        self.inflater
            .decompress_vec(input, &mut out, FlushDecompress::Sync)
            .map_err(|err| FrameError::Decompress(err.to_string()))?;
        let consumed = (self.inflater.total_in() - before) as usize;

        if out.len() > declared {
            return Err(FrameError::SizeMismatch {
                declared,
                actual: out.len(),
            });
        }
        if consumed < input.len() {
            return Err(FrameError::TrailingInput {
                remaining: input.len() - consumed,
            });
        }
        // All input taken but output short: the deflate stream stalled.
        if out.len() < declared {
            return Err(FrameError::Decompress(format!(
                "stream stalled after {} of {declared} bytes",
                out.len()
            )));
        }
        Ok(out)
    }
}

/// Handshake frame: `[0, len]` followed by the init string and its NUL.
pub fn encode_handshake(text: &str) -> Vec<u8> {
    let body = connection_init_body(text);
    let mut out = Vec::with_capacity(HANDSHAKE_HEADER_SIZE + body.len());
    out.push(0);
    out.push(body.len() as u8);
    out.extend_from_slice(&body);
    out
}

/// Client frame: u16 BE size (body + 4), u32 LE opcode, then the body.
pub fn encode_client_packet(
    packet: &WorldPacket,
    crypt: &mut SessionCrypt,
) -> Result<Vec<u8>, FrameError> {
    let body = packet.payload.contents();
    let size = body.len() + 4;
    if size > u16::MAX as usize {
        return Err(FrameError::Oversize {
            size,
            limit: u16::MAX as usize,
        });
    }

    let mut header = [0u8; CLIENT_HEADER_SIZE];
    header[..2].copy_from_slice(&(size as u16).to_be_bytes());
    header[2..].copy_from_slice(&u32::from(packet.opcode).to_le_bytes());
    crypt.encrypt_send(&mut header);

    let mut out = Vec::with_capacity(CLIENT_HEADER_SIZE + body.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(body);
    Ok(out)
}

/// Server frame, switching to the 3-byte size form past 0x7FFF.
pub fn encode_server_packet(
    packet: &WorldPacket,
    crypt: &mut SessionCrypt,
) -> Result<Vec<u8>, FrameError> {
    let body = packet.payload.contents();
    let size = body.len() + 2;
    let opcode = packet.opcode.to_le_bytes();

    let mut header = Vec::with_capacity(LARGE_HEADER_SIZE);
    if size > MAX_LARGE_SIZE {
        return Err(FrameError::Oversize {
            size,
            limit: MAX_LARGE_SIZE,
        });
    } else if size > MAX_SMALL_SIZE {
        header.push(LARGE_HEADER_FLAG | (size >> 16) as u8);
        header.push((size >> 8) as u8);
        header.push(size as u8);
    } else {
        header.extend_from_slice(&(size as u16).to_be_bytes());
    }
    header.extend_from_slice(&opcode);
    crypt.encrypt_send(&mut header);

    header.extend_from_slice(body);
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::world::SERVER_CONNECTION_INIT;

    fn packet(opcode: u16, body: &[u8]) -> WorldPacket {
        WorldPacket::new(opcode, WireBuffer::from_slice(body))
    }

    #[test]
    fn handshake_then_standard() {
        let mut crypt = SessionCrypt::new();
        let mut reader = FrameReader::new();

        let mut stream = encode_handshake(SERVER_CONNECTION_INIT);
        assert_eq!(&stream[..2], &[0x00, 0x30]);
        stream.extend(encode_server_packet(&packet(0x4542, &[1, 2, 3]), &mut crypt).unwrap());

        let frames = reader.read_all(&stream, &mut crypt).unwrap();
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            Frame::Handshake(body) => assert_eq!(body.len(), 48),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(frames[1], Frame::Packet(packet(0x4542, &[1, 2, 3])));
        assert_eq!(reader.mode(), FrameMode::Standard);
    }

    #[test]
    fn small_header_layout() {
        let mut crypt = SessionCrypt::new();
        let bytes = encode_server_packet(&packet(0x1234, &[0xAA; 3]), &mut crypt).unwrap();
        assert_eq!(&bytes[..4], &[0x00, 0x05, 0x34, 0x12]);
    }

    #[test]
    fn large_header_layout() {
        let mut crypt = SessionCrypt::new();
        let body = vec![0x5A; 0x8000];
        let bytes = encode_server_packet(&packet(0x10B0, &body), &mut crypt).unwrap();
        assert_eq!(&bytes[..5], &[0x80, 0x80, 0x02, 0xB0, 0x10]);

        let mut reader = FrameReader::new();
        reader.set_mode(FrameMode::Standard);
        let frames = reader.read_all(&bytes, &mut crypt).unwrap();
        assert_eq!(frames, vec![Frame::Packet(packet(0x10B0, &body))]);
    }

    #[test]
    fn empty_body_completes_without_more_input() {
        let mut crypt = SessionCrypt::new();
        let mut reader = FrameReader::new();
        reader.set_mode(FrameMode::Standard);

        let mut input: &[u8] = &[0x00, 0x02, 0x42, 0x4D];
        let frame = reader.next_frame(&mut input, &mut crypt).unwrap();
        assert_eq!(frame, Some(Frame::Packet(packet(0x4D42, &[]))));
        assert!(input.is_empty());
        assert!(!reader.is_mid_frame());
    }

    #[test]
    fn undersized_header_is_rejected() {
        let mut crypt = SessionCrypt::new();
        let mut reader = FrameReader::new();
        reader.set_mode(FrameMode::Standard);
        let mut input: &[u8] = &[0x00, 0x01, 0x00, 0x00];
        assert_eq!(
            reader.next_frame(&mut input, &mut crypt).unwrap_err(),
            FrameError::BadHeader { size: 1 }
        );
    }

    #[test]
    fn oversize_is_rejected() {
        let mut crypt = SessionCrypt::new();
        let mut reader = FrameReader::new().with_max_frame_size(16);
        reader.set_mode(FrameMode::Standard);
        let mut input: &[u8] = &[0x00, 0x20, 0x00, 0x00];
        assert_eq!(
            reader.next_frame(&mut input, &mut crypt).unwrap_err(),
            FrameError::Oversize { size: 30, limit: 16 }
        );
    }

    #[test]
    fn compressed_body_needs_size_prefix() {
        let mut crypt = SessionCrypt::new();
        let mut reader = FrameReader::new();
        reader.set_mode(FrameMode::Standard);
        let mut input: &[u8] = &[0x00, 0x04, 0x42, 0xCD, 0x01, 0x00];
        assert_eq!(
            reader.next_frame(&mut input, &mut crypt).unwrap_err(),
            FrameError::MissingInflatedSize { size: 2 }
        );
    }

    #[test]
    fn client_frames_read_back() {
        let mut crypt = SessionCrypt::new();
        let bytes = encode_client_packet(&packet(0x0449, &[9, 8, 7]), &mut crypt).unwrap();
        assert_eq!(&bytes[..6], &[0x00, 0x07, 0x49, 0x04, 0x00, 0x00]);

        let mut reader = FrameReader::with_direction(StreamDirection::ClientToServer);
        reader.set_mode(FrameMode::Standard);
        let frames = reader.read_all(&bytes, &mut crypt).unwrap();
        assert_eq!(frames, vec![Frame::Packet(packet(0x0449, &[9, 8, 7]))]);
    }
}
