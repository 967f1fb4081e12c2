//! In-memory logon and world servers speaking just enough of the protocol
//! to drive the client through its handshakes.

#![allow(dead_code)]

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::SeedableRng;
use realmwire_client::ClientConfig;
use realmwire_core::frame::{encode_handshake, encode_server_packet, StreamDirection};
use realmwire_core::packets::logon::{
    realm_list_request, AuthResult, LogonChallenge, LogonChallengeReply, LogonProof,
    LogonProofReply, ProofAccepted, SecurityFlags,
};
use realmwire_core::packets::realm::{RealmFlags, RealmInfo, RealmList};
use realmwire_core::packets::world::SERVER_CONNECTION_INIT;
use realmwire_core::srp::SrpServer;
use realmwire_core::{BigInt, Endian, Frame, FrameReader, SessionCrypt, WireBuffer, WorldPacket};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const N_LE: &str = "b79b3e2a87823cab8f5ebfbf8eb10108535006298b5badbd5b53e1895e644b89";
pub const K: &str = "390a9930a32d43100df3a72d9350fdc32d893dd83b87b0639fb31b3ded961e77cabed391cf396d05";

pub fn config() -> ClientConfig {
    ClientConfig::from_toml(
        r#"
        [connection]
        host = "127.0.0.1"
        account_name = "testuser"
        password = "password"
        "#,
    )
    .unwrap()
}

pub fn session_key() -> BigInt {
    BigInt::from_bytes(&hex::decode(K).unwrap(), Endian::Little)
}

pub fn realm_list() -> RealmList {
    RealmList {
        realms: vec![RealmInfo {
            realm_type: 1,
            locked: false,
            flags: RealmFlags::empty(),
            name: "Testrealm".to_string(),
            address: "127.0.0.1:8085".to_string(),
            population: 0.5,
            characters: 2,
            timezone: 1,
            id: 1,
            build: None,
        }],
    }
}

/// Reads one logon challenge from the client.
pub async fn read_challenge(stream: &mut DuplexStream) -> LogonChallenge {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let size = u16::from_le_bytes([header[2], header[3]]) as usize;
    let mut body = vec![0u8; size];
    stream.read_exact(&mut body).await.unwrap();

    let mut buf = WireBuffer::from_slice(&header);
    buf.append(&body);
    LogonChallenge::decode(&mut buf).unwrap()
}

/// Plays a full successful logon and returns the session key it derived.
/// Replies are written in `chunk`-byte pieces to exercise reassembly.
pub async fn serve_logon(
    mut stream: DuplexStream,
    password: &str,
    realms: RealmList,
    chunk: usize,
) -> BigInt {
    let challenge = read_challenge(&mut stream).await;
    let mut rng = StdRng::seed_from_u64(7);
    let server = SrpServer::with_rng(
        &challenge.account,
        password,
        &hex::decode(N_LE).unwrap(),
        &[7],
        &mut rng,
    )
    .unwrap();

    let reply = LogonChallengeReply::Accepted {
        challenge: server.challenge().unwrap(),
        version_challenge: [0xBA; 16],
        security_flags: SecurityFlags::empty(),
    };
    write_chunked(&mut stream, &reply.encode().unwrap(), chunk).await;

    let mut proof = [0u8; LogonProof::ENCODED_LEN];
    stream.read_exact(&mut proof).await.unwrap();
    let proof = LogonProof::decode(&proof).unwrap();
    let (session_key, m2) = server.verify_client_proof(&proof.client_proof()).unwrap();
    let reply = LogonProofReply::Accepted(ProofAccepted {
        m2,
        account_flags: 0x0080_0000,
        survey_id: 0,
        login_flags: 0,
    });
    write_chunked(&mut stream, &reply.encode().unwrap(), chunk).await;

    let mut request = [0u8; 5];
    stream.read_exact(&mut request).await.unwrap();
    assert_eq!(request, realm_list_request());
    write_chunked(&mut stream, &realms.encode().unwrap(), chunk).await;

    session_key
}

/// Serves the challenge for `password`, then rejects whatever proof arrives
/// unless it verifies.
pub async fn refuse_proof(mut stream: DuplexStream, password: &str) {
    let challenge = read_challenge(&mut stream).await;
    let mut rng = StdRng::seed_from_u64(11);
    let server = SrpServer::with_rng(
        &challenge.account,
        password,
        &hex::decode(N_LE).unwrap(),
        &[7],
        &mut rng,
    )
    .unwrap();
    let reply = LogonChallengeReply::Accepted {
        challenge: server.challenge().unwrap(),
        version_challenge: [0; 16],
        security_flags: SecurityFlags::empty(),
    };
    stream.write_all(&reply.encode().unwrap()).await.unwrap();

    let mut proof = [0u8; LogonProof::ENCODED_LEN];
    stream.read_exact(&mut proof).await.unwrap();
    let proof = LogonProof::decode(&proof).unwrap();
    assert!(server.verify_client_proof(&proof.client_proof()).is_err());

    let reply = LogonProofReply::Rejected(AuthResult::UnknownAccount);
    stream.write_all(&reply.encode().unwrap()).await.unwrap();
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest).await;
}

/// Answers the challenge with `result` and waits for the client to hang up.
pub async fn reject_logon(mut stream: DuplexStream, result: AuthResult) {
    read_challenge(&mut stream).await;
    let reply = LogonChallengeReply::Rejected(result);
    stream.write_all(&reply.encode().unwrap()).await.unwrap();
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest).await;
}

async fn write_chunked(stream: &mut DuplexStream, bytes: &[u8], chunk: usize) {
    for piece in bytes.chunks(chunk.max(1)) {
        stream.write_all(piece).await.unwrap();
        stream.flush().await.unwrap();
        tokio::task::yield_now().await;
    }
}

/// Server end of a world connection.
pub struct WorldServer {
    stream: DuplexStream,
    reader: FrameReader,
    crypt: SessionCrypt,
    frames: VecDeque<Frame>,
}

impl WorldServer {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            reader: FrameReader::with_direction(StreamDirection::ClientToServer),
            crypt: SessionCrypt::new(),
            frames: VecDeque::new(),
        }
    }

    /// Next client frame, or `None` once the client closed.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.frames.pop_front() {
                return Some(frame);
            }
            let mut buf = [0u8; 512];
            let n = self.stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return None;
            }
            let mut input = &buf[..n];
            while let Some(frame) = self.reader.next_frame(&mut input, &mut self.crypt).unwrap() {
                self.frames.push_back(frame);
            }
        }
    }

    pub async fn next_packet(&mut self) -> WorldPacket {
        match self.next_frame().await {
            Some(Frame::Packet(packet)) => packet,
            other => panic!("expected a packet, got {other:?}"),
        }
    }

    pub async fn send_init(&mut self) {
        let bytes = encode_handshake(SERVER_CONNECTION_INIT);
        self.stream.write_all(&bytes).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn send(&mut self, packet: &WorldPacket) {
        let bytes = encode_server_packet(packet, &mut self.crypt).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }

    pub fn start_crypt(&mut self, session_key: &BigInt) {
        self.crypt.init_server(session_key).unwrap();
    }

    pub fn into_stream(self) -> DuplexStream {
        self.stream
    }
}
