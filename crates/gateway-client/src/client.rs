//! Entry point tying config, logon and world sessions together.

use std::fs::File;
use std::io::{self, BufWriter};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use realmwire_core::capture::PacketCapture;
use realmwire_core::packets::logon::LogonChallenge;
use realmwire_core::packets::realm::RealmInfo;
use realmwire_core::packets::world::Ping;
use realmwire_core::{BigInt, WorldPacket};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::login::{AuthenticatedAccount, LogonSession};
use crate::transport::{self, TransportHandle, TransportLoop};
use crate::world::{CaptureSink, PacketSink, SessionParams, WorldSession};

#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Logs in with the configured account and fetches the realm list.
    pub async fn login(&self) -> Result<AuthenticatedAccount, SessionError> {
        let connection = &self.config.connection;
        let stream = transport::connect(&connection.host, connection.port).await?;
        let local_ip = transport::local_ipv4(&stream);
        self.login_over(stream, local_ip).await
    }

    /// Same as `login` over an already connected stream whose local
    /// address is `local_ip`.
    pub async fn login_over<S>(
        &self,
        stream: S,
        local_ip: Ipv4Addr,
    ) -> Result<AuthenticatedAccount, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let challenge = self.config.logon_challenge(local_ip);
        self.run_logon(stream, challenge, &self.config.connection.password)
            .await
    }

    /// Logs in with explicit credentials and client identity, overriding
    /// the configured account.
    pub async fn send_auth_challenge(
        &self,
        username: &str,
        password: &str,
        platform: &str,
        os: &str,
        country: &str,
        game: &str,
    ) -> Result<AuthenticatedAccount, SessionError> {
        let connection = &self.config.connection;
        let stream = transport::connect(&connection.host, connection.port).await?;
        let challenge = LogonChallenge {
            game: game.to_string(),
            platform: platform.to_string(),
            os: os.to_string(),
            country: country.to_string(),
            account: username.to_uppercase(),
            ..self.config.logon_challenge(transport::local_ipv4(&stream))
        };
        self.run_logon(stream, challenge, password).await
    }

    async fn run_logon<S>(
        &self,
        stream: S,
        challenge: LogonChallenge,
        password: &str,
    ) -> Result<AuthenticatedAccount, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let session = LogonSession::new(challenge, password, StdRng::from_entropy());
        let (transport, _handle) = TransportLoop::new(stream, session);
        let account = transport.run().await?.into_account()?;
        info!(
            account = %account.account,
            realms = account.realms.realms.len(),
            "client.logged_in"
        );
        Ok(account)
    }

    /// Connects to `realm` and starts the world session on its own task.
    pub async fn connect_world<K: PacketSink + 'static>(
        &self,
        account: &AuthenticatedAccount,
        realm: &RealmInfo,
        sink: K,
    ) -> Result<WorldHandle, SessionError> {
        let (host, port) = realm.endpoint()?;
        info!(realm = %realm.name, %host, port, "client.connect_world");
        let stream = transport::connect(&host, port).await?;
        self.connect_world_over(stream, account, realm.id, sink)
    }

    /// Starts the world session over an already connected stream.
    pub fn connect_world_over<S, K>(
        &self,
        stream: S,
        account: &AuthenticatedAccount,
        realm_id: u8,
        sink: K,
    ) -> Result<WorldHandle, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        K: PacketSink + 'static,
    {
        let params = SessionParams {
            build: self.config.client.build,
            realm_id: u32::from(realm_id),
        };
        let mut session = WorldSession::new(
            &account.account,
            account.session_key.clone(),
            params,
            sink,
            StdRng::from_entropy(),
        );
        if let Some(capture) = self.open_capture(&account.session_key)? {
            session = session.with_capture(capture);
        }

        let authenticated = session.authenticated_flag();
        let (transport, handle) = TransportLoop::new(stream, session);
        let transport = transport.with_read_buffer_size(self.config.world.read_buffer_size);
        let task = tokio::spawn(async move {
            let result = transport.run().await.map(|_| ());
            if let Err(err) = &result {
                warn!(%err, "client.world_closed");
            }
            result
        });

        Ok(WorldHandle {
            handle,
            task,
            authenticated,
            session_key: account.session_key.clone(),
        })
    }

    fn open_capture(&self, session_key: &BigInt) -> Result<Option<CaptureSink>, SessionError> {
        let Some(path) = &self.config.world.capture_path else {
            return Ok(None);
        };
        let file = File::create(path)?;
        let out: Box<dyn io::Write + Send> = Box::new(BufWriter::new(file));
        let capture = PacketCapture::new(out, u32::from(self.config.client.build), session_key)?;
        info!(path = %path.display(), "client.capture");
        Ok(Some(capture))
    }
}

/// Owner-side view of a running world session.
#[derive(Debug)]
pub struct WorldHandle {
    handle: TransportHandle<WorldPacket>,
    task: JoinHandle<Result<(), SessionError>>,
    authenticated: Arc<AtomicBool>,
    session_key: BigInt,
}

impl WorldHandle {
    /// Queues a packet. Packets sent before authentication go out after `AUTH_OK`.
    pub fn send(&self, packet: WorldPacket) -> Result<(), SessionError> {
        self.handle.send(packet)
    }

    pub fn ping(&self, serial: u32, latency: u32) -> Result<(), SessionError> {
        self.send(Ping { serial, latency }.write())
    }

    /// A cloneable sender usable from other tasks.
    pub fn sender(&self) -> TransportHandle<WorldPacket> {
        self.handle.clone()
    }

    pub fn close(&self) -> Result<(), SessionError> {
        self.handle.close()
    }

    pub fn drain_and_close(&self) -> Result<(), SessionError> {
        self.handle.drain_and_close()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn session_key(&self) -> &BigInt {
        &self.session_key
    }

    /// Waits for the session task and returns its terminal result.
    pub async fn join(self) -> Result<(), SessionError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(io::Error::new(io::ErrorKind::Other, err).into()),
        }
    }
}
