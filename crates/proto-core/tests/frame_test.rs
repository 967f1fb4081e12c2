use flate2::{Compress, Compression, FlushCompress};
use proptest::collection::vec;
use proptest::prelude::*;
use realmwire_core::crypto::bignum::{BigInt, Endian};
use realmwire_core::frame::{encode_handshake, encode_server_packet};
use realmwire_core::opcode::Opcode;
use realmwire_core::packets::world::SERVER_CONNECTION_INIT;
use realmwire_core::{Frame, FrameError, FrameMode, FrameReader, SessionCrypt, WireBuffer, WorldPacket};

const K: &str = "390a9930a32d43100df3a72d9350fdc32d893dd83b87b0639fb31b3ded961e77cabed391cf396d05";

fn session_key() -> BigInt {
    BigInt::from_bytes(&hex::decode(K).unwrap(), Endian::Little)
}

fn client_crypt() -> SessionCrypt {
    let mut crypt = SessionCrypt::new();
    crypt.init(&session_key()).unwrap();
    crypt
}

fn server_crypt() -> SessionCrypt {
    let mut crypt = SessionCrypt::new();
    crypt.init_server(&session_key()).unwrap();
    crypt
}

fn server_stream(packets: &[WorldPacket]) -> Vec<u8> {
    let mut crypt = server_crypt();
    let mut stream = encode_handshake(SERVER_CONNECTION_INIT);
    for packet in packets {
        stream.extend(encode_server_packet(packet, &mut crypt).unwrap());
    }
    stream
}

fn decode_chunked(stream: &[u8], chunks: &[usize]) -> Vec<Frame> {
    let mut reader = FrameReader::new();
    let mut crypt = client_crypt();
    let mut frames = Vec::new();
    let mut offset = 0;
    let mut turn = 0;
    while offset < stream.len() {
        let len = chunks[turn % chunks.len()].min(stream.len() - offset);
        let mut input = &stream[offset..offset + len];
        while let Some(frame) = reader.next_frame(&mut input, &mut crypt).unwrap() {
            frames.push(frame);
        }
        assert!(input.is_empty());
        offset += len;
        turn += 1;
    }
    assert!(!reader.is_mid_frame());
    frames
}

fn deflate(stream: &mut Compress, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2 + 64);
    stream
        .compress_vec(data, &mut out, FlushCompress::Sync)
        .unwrap();
    out
}

fn compressed_packet(stream: &mut Compress, opcode: u16, data: &[u8]) -> WorldPacket {
    let mut payload = WireBuffer::new();
    payload.append_u32(data.len() as u32);
    payload.append(&deflate(stream, data));
    WorldPacket::new(opcode | Opcode::COMPRESSED_FLAG, payload)
}

proptest! {
    #[test]
    fn chunking_does_not_change_frames(
        bodies in vec((0u16..0x8000, vec(any::<u8>(), 0..300)), 1..8),
        chunks in vec(1usize..64, 1..16),
    ) {
        let packets: Vec<WorldPacket> = bodies
            .iter()
            .map(|(opcode, body)| WorldPacket::new(*opcode, WireBuffer::from_slice(body)))
            .collect();
        let stream = server_stream(&packets);

        let whole = decode_chunked(&stream, &[stream.len()]);
        let split = decode_chunked(&stream, &chunks);
        let bytewise = decode_chunked(&stream, &[1]);

        prop_assert_eq!(whole.len(), packets.len() + 1);
        prop_assert!(matches!(&whole[0], Frame::Handshake(body) if body.len() == 48));
        for (frame, packet) in whole[1..].iter().zip(&packets) {
            prop_assert_eq!(frame, &Frame::Packet(packet.clone()));
        }
        prop_assert_eq!(&split, &whole);
        prop_assert_eq!(&bytewise, &whole);
    }
}

#[test]
fn large_frames_survive_small_reads() {
    let big = WorldPacket::new(Opcode::SMSG_CHAR_ENUM, WireBuffer::from(vec![0x3C; 0x9000]));
    let small = WorldPacket::empty(Opcode::SMSG_PONG);
    let stream = server_stream(&[big.clone(), small.clone()]);

    let frames = decode_chunked(&stream, &[3, 1, 7]);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[1], Frame::Packet(big));
    assert_eq!(frames[2], Frame::Packet(small));
}

#[test]
fn compressed_frames_share_one_inflate_stream() {
    let mut zlib = Compress::new(Compression::default(), true);
    let first: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    let second = b"second compressed payload, second compressed payload".to_vec();

    let packets = vec![
        compressed_packet(&mut zlib, Opcode::SMSG_CHAR_ENUM, &first),
        WorldPacket::new(Opcode::SMSG_PONG, WireBuffer::from_slice(&[1, 0, 0, 0])),
        compressed_packet(&mut zlib, 0x1234, &second),
    ];
    let frames = decode_chunked(&server_stream(&packets), &[5, 11]);

    assert_eq!(frames.len(), 4);
    assert_eq!(
        frames[1],
        Frame::Packet(WorldPacket::new(Opcode::SMSG_CHAR_ENUM, WireBuffer::from(first)))
    );
    assert_eq!(frames[2], Frame::Packet(packets[1].clone()));
    assert_eq!(
        frames[3],
        Frame::Packet(WorldPacket::new(0x1234, WireBuffer::from(second)))
    );
}

#[test]
fn declared_size_mismatch_is_fatal() {
    let mut zlib = Compress::new(Compression::default(), true);
    let data = vec![0x11u8; 100];
    let mut payload = WireBuffer::new();
    payload.append_u32(99);
    payload.append(&deflate(&mut zlib, &data));
    let packet = WorldPacket::new(Opcode::SMSG_CHAR_ENUM | Opcode::COMPRESSED_FLAG, payload);

    let stream = server_stream(&[packet]);
    let mut reader = FrameReader::new();
    let mut crypt = client_crypt();
    let err = reader.read_all(&stream, &mut crypt).unwrap_err();
    assert!(matches!(
        err,
        FrameError::SizeMismatch { declared: 99, .. } | FrameError::TrailingInput { .. }
    ));
}

#[test]
fn truncated_deflate_stream_is_fatal() {
    let mut zlib = Compress::new(Compression::default(), true);
    let data: Vec<u8> = (0..500u32).map(|i| (i * 7 % 256) as u8).collect();
    let mut compressed = deflate(&mut zlib, &data);
    compressed.truncate(compressed.len() / 2);

    let mut payload = WireBuffer::new();
    payload.append_u32(data.len() as u32).append(&compressed);
    let stream = server_stream(&[WorldPacket::new(
        Opcode::SMSG_CHAR_ENUM | Opcode::COMPRESSED_FLAG,
        payload,
    )]);

    let mut reader = FrameReader::new();
    let mut crypt = client_crypt();
    let err = reader.read_all(&stream, &mut crypt).unwrap_err();
    assert!(matches!(err, FrameError::Decompress(_)), "{err:?}");
}

#[test]
fn garbage_deflate_is_a_decompress_error() {
    let mut payload = WireBuffer::new();
    payload.append_u32(16).append(&[0xFF; 12]);
    let stream = server_stream(&[WorldPacket::new(
        Opcode::SMSG_CHAR_ENUM | Opcode::COMPRESSED_FLAG,
        payload,
    )]);

    let mut reader = FrameReader::new();
    let mut crypt = client_crypt();
    assert!(matches!(
        reader.read_all(&stream, &mut crypt).unwrap_err(),
        FrameError::Decompress(_)
    ));
}

#[test]
fn reader_starts_in_handshake_mode() {
    let reader = FrameReader::new();
    assert_eq!(reader.mode(), FrameMode::Handshake);
}
