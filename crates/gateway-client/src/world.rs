//! World-server conversation from the connection init strings through
//! `SMSG_AUTH_RESPONSE`, then plain packet delivery.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::RngCore;
use realmwire_core::capture::PacketCapture;
use realmwire_core::error::ProtocolError;
use realmwire_core::frame::{encode_client_packet, encode_handshake, StreamDirection};
use realmwire_core::opcode::Opcode;
use realmwire_core::packets::world::{
    char_enum_request, is_connection_init, AuthChallenge, AuthResponse, AuthSession, ResponseCode,
    CLIENT_CONNECTION_INIT, SERVER_CONNECTION_INIT,
};
use realmwire_core::{BigInt, Frame, FrameReader, SessionCrypt, WireBuffer, WorldPacket};
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::transport::{Flow, Protocol, WriteQueue};

/// Receives every decoded inbound world packet.
pub trait PacketSink: Send {
    fn handle(&mut self, opcode: u16, payload: WireBuffer);
}

impl<F> PacketSink for F
where
    F: FnMut(u16, WireBuffer) + Send,
{
    fn handle(&mut self, opcode: u16, payload: WireBuffer) {
        self(opcode, payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldStage {
    AwaitServerInit,
    AwaitChallenge,
    AwaitResponse,
    Authenticated,
}

/// Fields of `CMSG_AUTH_SESSION` that come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub build: u16,
    pub realm_id: u32,
}

/// Sends accepted before `AUTH_OK`; later ones are dropped.
pub const MAX_PENDING_PACKETS: usize = 256;

pub type CaptureSink = PacketCapture<Box<dyn Write + Send>>;

pub struct WorldSession<S, R> {
    account: String,
    session_key: BigInt,
    params: SessionParams,
    reader: FrameReader,
    crypt: SessionCrypt,
    stage: WorldStage,
    authenticated: Arc<AtomicBool>,
    pending: Vec<WorldPacket>,
    sink: S,
    rng: R,
    capture: Option<CaptureSink>,
}

impl<S: PacketSink, R: RngCore + Send> WorldSession<S, R> {
    pub fn new(account: &str, session_key: BigInt, params: SessionParams, sink: S, rng: R) -> Self {
        Self {
            account: account.to_uppercase(),
            session_key,
            params,
            reader: FrameReader::new(),
            crypt: SessionCrypt::new(),
            stage: WorldStage::AwaitServerInit,
            authenticated: Arc::new(AtomicBool::new(false)),
            pending: Vec::new(),
            sink,
            rng,
            capture: None,
        }
    }

    pub fn with_capture(mut self, capture: CaptureSink) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn stage(&self) -> WorldStage {
        self.stage
    }

    pub fn session_key(&self) -> &BigInt {
        &self.session_key
    }

    /// Shared flag flipped once the server answers `AUTH_OK`.
    pub fn authenticated_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.authenticated)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn send_packet(
        &mut self,
        packet: &WorldPacket,
        out: &mut WriteQueue,
    ) -> Result<(), SessionError> {
        trace!(
            opcode = packet.opcode,
            name = packet.name().unwrap_or("?"),
            size = packet.payload.len(),
            "world.send"
        );
        self.record(StreamDirection::ClientToServer, packet);
        out.push(encode_client_packet(packet, &mut self.crypt)?);
        Ok(())
    }

    fn record(&mut self, direction: StreamDirection, packet: &WorldPacket) {
        if let Some(capture) = self.capture.as_mut() {
            if let Err(err) = capture.record(direction, packet) {
                warn!(%err, "world.capture disabled after write failure");
                self.capture = None;
            }
        }
    }

    fn on_frame(&mut self, frame: Frame, out: &mut WriteQueue) -> Result<(), SessionError> {
        let mut packet = match frame {
            Frame::Handshake(body) => return self.on_server_init(&body),
            Frame::Packet(packet) => packet,
        };
        trace!(
            opcode = packet.opcode,
            name = packet.name().unwrap_or("?"),
            size = packet.payload.len(),
            "world.frame"
        );
        self.record(StreamDirection::ServerToClient, &packet);

        match (self.stage, packet.opcode) {
            (WorldStage::AwaitChallenge, Opcode::SMSG_AUTH_CHALLENGE) => {
                let challenge = AuthChallenge::read(&mut packet.payload)?;
                self.on_auth_challenge(&challenge, out)
            }
            (WorldStage::AwaitResponse, Opcode::SMSG_AUTH_RESPONSE) => {
                let response = AuthResponse::read(&mut packet.payload)?;
                self.on_auth_response(&response, out)?;
                packet.payload.set_rpos(0)?;
                self.sink.handle(packet.opcode, packet.payload);
                Ok(())
            }
            (WorldStage::AwaitServerInit, _) => {
                Err(ProtocolError::Malformed("packet before connection init").into())
            }
            (_, opcode) => {
                self.sink.handle(opcode, packet.payload);
                Ok(())
            }
        }
    }

    fn on_server_init(&mut self, body: &[u8]) -> Result<(), SessionError> {
        if !is_connection_init(body, SERVER_CONNECTION_INIT) {
            return Err(ProtocolError::Malformed("server connection init").into());
        }
        debug!("world.stage server_init");
        self.stage = WorldStage::AwaitChallenge;
        Ok(())
    }

    fn on_auth_challenge(
        &mut self,
        challenge: &AuthChallenge,
        out: &mut WriteQueue,
    ) -> Result<(), SessionError> {
        let client_seed = self.rng.next_u32();
        let digest = AuthSession::compute_digest(
            &self.account,
            client_seed,
            challenge.server_seed,
            &self.session_key,
        );
        let session = AuthSession {
            server_id: 0,
            battlegroup_id: 0,
            login_server_type: 0,
            build: self.params.build,
            realm_id: self.params.realm_id,
            region_id: 0,
            client_seed,
            digest,
            use_ipv6: false,
            account: self.account.clone(),
        };
        let packet = session.write()?;
        self.send_packet(&packet, out)?;

        // Everything after AUTH_SESSION is encrypted both ways.
        self.crypt
            .init(&self.session_key)
            .map_err(ProtocolError::from)?;
        info!(
            server_seed = challenge.server_seed,
            "world.stage auth_session_sent"
        );
        self.stage = WorldStage::AwaitResponse;
        Ok(())
    }

    fn on_auth_response(
        &mut self,
        response: &AuthResponse,
        out: &mut WriteQueue,
    ) -> Result<(), SessionError> {
        if response.queue_position.is_some() || response.result == ResponseCode::AUTH_WAIT_QUEUE {
            info!(position = ?response.queue_position, "world.stage queued");
            return Ok(());
        }
        if response.result != ResponseCode::AUTH_OK {
            warn!(code = response.result.0, "world.stage auth_rejected");
            return Err(SessionError::WorldRejected {
                code: response.result,
            });
        }

        info!(account = %self.account, "world.stage authenticated");
        self.stage = WorldStage::Authenticated;
        self.authenticated.store(true, Ordering::Release);
        self.send_packet(&char_enum_request(), out)?;
        for packet in std::mem::take(&mut self.pending) {
            self.send_packet(&packet, out)?;
        }
        Ok(())
    }
}

impl<S: PacketSink, R: RngCore + Send> Protocol for WorldSession<S, R> {
    type Outbound = WorldPacket;

    fn on_connect(&mut self, out: &mut WriteQueue) -> Result<(), SessionError> {
        out.push(encode_handshake(CLIENT_CONNECTION_INIT));
        debug!("world.stage client_init");
        Ok(())
    }

    fn on_read(&mut self, data: &[u8], out: &mut WriteQueue) -> Result<Flow, SessionError> {
        let mut input = data;
        while let Some(frame) = self.reader.next_frame(&mut input, &mut self.crypt)? {
            self.on_frame(frame, out)?;
        }
        Ok(Flow::Continue)
    }

    fn encode(&mut self, packet: WorldPacket, out: &mut WriteQueue) -> Result<(), SessionError> {
        if self.stage != WorldStage::Authenticated {
            if self.pending.len() >= MAX_PENDING_PACKETS {
                warn!(
                    opcode = packet.opcode,
                    limit = MAX_PENDING_PACKETS,
                    "world.send dropped, backlog full before authentication"
                );
                return Ok(());
            }
            debug!(opcode = packet.opcode, "world.send deferred until authenticated");
            self.pending.push(packet);
            return Ok(());
        }
        self.send_packet(&packet, out)
    }
}

impl<S, R> std::fmt::Debug for WorldSession<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldSession")
            .field("account", &self.account)
            .field("stage", &self.stage)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
