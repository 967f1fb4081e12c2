//! Logon-server conversation: challenge, proof, realm list.

use std::convert::Infallible;

use rand::RngCore;
use realmwire_core::packets::logon::{
    realm_list_request, LogonChallenge, LogonChallengeReply, LogonProof, LogonProofReply,
};
use realmwire_core::packets::realm::RealmList;
use realmwire_core::srp::Srp6Handshake;
use realmwire_core::{BigInt, Endian};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::transport::{Flow, Protocol, WriteQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonStage {
    AwaitChallenge,
    AwaitProof,
    AwaitRealmList,
    Done,
}

/// Result of a completed logon.
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount {
    pub account: String,
    pub session_key: BigInt,
    pub realms: RealmList,
}

pub struct LogonSession<R> {
    challenge: LogonChallenge,
    handshake: Srp6Handshake,
    stage: LogonStage,
    inbox: Vec<u8>,
    rng: R,
    realms: Option<RealmList>,
}

impl<R: RngCore + Send> LogonSession<R> {
    pub fn new(challenge: LogonChallenge, password: &str, rng: R) -> Self {
        let handshake = Srp6Handshake::new(&challenge.account, password);
        Self {
            challenge,
            handshake,
            stage: LogonStage::AwaitChallenge,
            inbox: Vec::new(),
            rng,
            realms: None,
        }
    }

    pub fn stage(&self) -> LogonStage {
        self.stage
    }

    pub fn is_authenticated(&self) -> bool {
        self.handshake.is_authenticated()
    }

    pub fn session_key(&self) -> Option<&BigInt> {
        self.handshake.session_key()
    }

    /// Consumes a finished session. Fails unless the realm list arrived.
    pub fn into_account(self) -> Result<AuthenticatedAccount, SessionError> {
        let session_key = self.handshake.session_key().cloned();
        match (self.stage, session_key, self.realms) {
            (LogonStage::Done, Some(session_key), Some(realms)) => Ok(AuthenticatedAccount {
                account: self.handshake.account().to_string(),
                session_key,
                realms,
            }),
            _ => Err(SessionError::Closed),
        }
    }

    /// Handles as many complete replies as the inbox holds.
    fn advance(&mut self, out: &mut WriteQueue) -> Result<Flow, SessionError> {
        loop {
            let used = match self.stage {
                LogonStage::AwaitChallenge => match LogonChallengeReply::parse(&self.inbox)? {
                    None => return Ok(Flow::Continue),
                    Some((reply, used)) => {
                        self.on_challenge(reply, out)?;
                        used
                    }
                },
                LogonStage::AwaitProof => match LogonProofReply::parse(&self.inbox)? {
                    None => return Ok(Flow::Continue),
                    Some((reply, used)) => {
                        self.on_proof(reply, out)?;
                        used
                    }
                },
                LogonStage::AwaitRealmList => match RealmList::parse(&self.inbox)? {
                    None => return Ok(Flow::Continue),
                    Some((realms, used)) => {
                        info!(count = realms.realms.len(), "login.stage realm_list");
                        self.realms = Some(realms);
                        self.stage = LogonStage::Done;
                        used
                    }
                },
                LogonStage::Done => {
                    if !self.inbox.is_empty() {
                        warn!(bytes = self.inbox.len(), "login.trailing_bytes");
                    }
                    return Ok(Flow::DrainAndClose);
                }
            };
            self.inbox.drain(..used);
        }
    }

    fn on_challenge(
        &mut self,
        reply: LogonChallengeReply,
        out: &mut WriteQueue,
    ) -> Result<(), SessionError> {
        let (challenge, security_flags) = match reply {
            LogonChallengeReply::Rejected(result) => {
                warn!(?result, "login.stage challenge_rejected");
                return Err(self.handshake.reject(result).into());
            }
            LogonChallengeReply::Accepted {
                challenge,
                security_flags,
                ..
            } => (challenge, security_flags),
        };
        if !security_flags.is_empty() {
            warn!(?security_flags, "login.security_flags unsupported, ignoring");
        }

        self.handshake.receive_challenge(&challenge)?;
        let proof = self.handshake.compute_proof(&mut self.rng)?;
        debug!(a = %hex::encode(proof.a), "login.stage send_proof");
        out.push(LogonProof::new(&proof).encode()?);
        self.stage = LogonStage::AwaitProof;
        Ok(())
    }

    fn on_proof(&mut self, reply: LogonProofReply, out: &mut WriteQueue) -> Result<(), SessionError> {
        let accepted = match reply {
            LogonProofReply::Rejected(result) => {
                warn!(?result, "login.stage proof_rejected");
                return Err(self.handshake.reject(result).into());
            }
            LogonProofReply::Accepted(accepted) => accepted,
        };

        self.handshake.verify_server_proof(&accepted.m2)?;
        if let Some(key) = self.handshake.session_key() {
            debug!(
                key = %hex::encode(key.to_bytes(0, Endian::Little)),
                "login.session_key"
            );
        }
        info!(account = self.handshake.account(), "login.stage authenticated");
        out.push(realm_list_request().to_vec());
        self.stage = LogonStage::AwaitRealmList;
        Ok(())
    }
}

impl<R: RngCore + Send> Protocol for LogonSession<R> {
    type Outbound = Infallible;

    fn on_connect(&mut self, out: &mut WriteQueue) -> Result<(), SessionError> {
        out.push(self.challenge.encode()?);
        self.handshake.challenge_sent()?;
        info!(
            account = %self.challenge.account,
            build = self.challenge.build,
            "login.stage send_challenge"
        );
        Ok(())
    }

    fn on_read(&mut self, data: &[u8], out: &mut WriteQueue) -> Result<Flow, SessionError> {
        if self.stage == LogonStage::Done {
            return Ok(Flow::DrainAndClose);
        }
        self.inbox.extend_from_slice(data);
        self.advance(out)
    }

    fn encode(&mut self, message: Infallible, _out: &mut WriteQueue) -> Result<(), SessionError> {
        match message {}
    }
}

impl<R> std::fmt::Debug for LogonSession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogonSession")
            .field("stage", &self.stage)
            .field("inbox", &self.inbox.len())
            .finish_non_exhaustive()
    }
}
