//! Client side of the SRP6 logon exchange, plus the matching server half
//! used by proxies and test harnesses.
//!
//! Every big number enters a hash as its minimal little-endian export, and
//! every 32-byte field on the wire is little-endian.

use rand::RngCore;
use tracing::debug;

use crate::crypto::bignum::{BigInt, Endian};
use crate::crypto::digest::Sha1Context;
use crate::error::SrpError;
use crate::packets::logon::AuthResult;

const K: u32 = 3;
const PRIVATE_EPHEMERAL_BITS: usize = 19 * 8;
const MAX_EPHEMERAL_ATTEMPTS: usize = 16;

pub const SESSION_KEY_LENGTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrpState {
    Idle,
    ChallengeSent,
    ChallengeReceived,
    ProofComputed,
    Authenticated,
    Failed,
}

/// Parameters from a successful logon challenge reply, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChallenge {
    pub b: [u8; 32],
    pub g: Vec<u8>,
    pub n: Vec<u8>,
    pub salt: [u8; 32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientProof {
    pub a: [u8; 32],
    pub m1: [u8; 20],
}

#[derive(Debug)]
struct Exchange {
    modulus: BigInt,
    generator: BigInt,
    salt: BigInt,
    server_ephemeral: BigInt,
    expected_server_proof: Option<[u8; 20]>,
}

/// Drives `Idle -> ChallengeSent -> ChallengeReceived -> ProofComputed ->
/// Authenticated`. Any error moves to `Failed`, which is terminal.
#[derive(Debug)]
pub struct Srp6Handshake {
    state: SrpState,
    account: String,
    password: String,
    exchange: Option<Exchange>,
    session_key: Option<BigInt>,
}

impl Srp6Handshake {
    /// Credentials are uppercased; the logon server stores them that way.
    pub fn new(account: &str, password: &str) -> Self {
        Self {
            state: SrpState::Idle,
            account: account.to_uppercase(),
            password: password.to_uppercase(),
            exchange: None,
            session_key: None,
        }
    }

    pub fn state(&self) -> SrpState {
        self.state
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SrpState::Authenticated
    }

    /// The 40-byte key `K`, available once authenticated.
    pub fn session_key(&self) -> Option<&BigInt> {
        self.session_key
            .as_ref()
            .filter(|_| self.state == SrpState::Authenticated)
    }

    fn require(&mut self, step: &'static str, state: SrpState) -> Result<(), SrpError> {
        if self.state != state {
            let err = SrpError::InvalidState {
                step,
                state: self.state,
            };
            return Err(self.fail(err));
        }
        Ok(())
    }

    /// Moves to `Failed` and hands the error back for propagation.
    pub fn fail(&mut self, err: SrpError) -> SrpError {
        self.state = SrpState::Failed;
        self.exchange = None;
        self.session_key = None;
        err
    }

    pub fn challenge_sent(&mut self) -> Result<(), SrpError> {
        self.require("challenge_sent", SrpState::Idle)?;
        self.state = SrpState::ChallengeSent;
        Ok(())
    }

    /// Records a non-success logon result.
    pub fn reject(&mut self, result: AuthResult) -> SrpError {
        self.fail(SrpError::Rejected(result))
    }

    pub fn receive_challenge(&mut self, challenge: &ServerChallenge) -> Result<(), SrpError> {
        self.require("receive_challenge", SrpState::ChallengeSent)?;

        let modulus = BigInt::from_bytes(&challenge.n, Endian::Little);
        let generator = BigInt::from_bytes(&challenge.g, Endian::Little);
        let server_ephemeral = BigInt::from_bytes(&challenge.b, Endian::Little);

        if challenge.n.len() > 32 || modulus.num_bits() < 2 {
            return Err(self.fail(SrpError::Degenerate("modulus")));
        }
        if generator.checked_rem(&modulus)?.is_zero() {
            return Err(self.fail(SrpError::Degenerate("generator")));
        }
        if server_ephemeral.checked_rem(&modulus)?.is_zero() {
            return Err(self.fail(SrpError::Degenerate("server ephemeral")));
        }

        self.exchange = Some(Exchange {
            modulus,
            generator,
            salt: BigInt::from_bytes(&challenge.salt, Endian::Little),
            server_ephemeral,
            expected_server_proof: None,
        });
        self.state = SrpState::ChallengeReceived;
        Ok(())
    }

    /// Picks the private ephemeral and derives `A`, `K`, `M1` and the
    /// expected `M2`.
    pub fn compute_proof<R: RngCore + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<ClientProof, SrpError> {
        self.require("compute_proof", SrpState::ChallengeReceived)?;
        match self.derive(rng) {
            Ok((proof, session_key, expected)) => {
                if let Some(exchange) = self.exchange.as_mut() {
                    exchange.expected_server_proof = Some(expected);
                }
                self.session_key = Some(session_key);
                self.state = SrpState::ProofComputed;
                Ok(proof)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn derive<R: RngCore + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<(ClientProof, BigInt, [u8; 20]), SrpError> {
        let exchange = self.exchange.as_ref().ok_or(SrpError::InvalidState {
            step: "compute_proof",
            state: self.state,
        })?;
        let n = &exchange.modulus;
        let g = &exchange.generator;

        let x = calculate_x(&self.account, &self.password, &exchange.salt);

        let (a, public_ephemeral) = pick_ephemeral(rng, |a| Ok(g.mod_exp(a, n)?))?;

        let b = &exchange.server_ephemeral;
        let u = calculate_u(&public_ephemeral, b);

        let k = BigInt::from_u32(K);
        let gx = g.mod_exp(&x, n)?;
        let base = (b + &(&k * &(n - &gx))).checked_rem(n)?;
        let s = base.mod_exp(&(&a + &(&u * &x)), n)?;

        let session_key = calculate_interleaved(&s)?;
        let m1 = calculate_m1(n, g, &self.account, &exchange.salt, &public_ephemeral, b, &session_key);
        let m2 = calculate_m2(&public_ephemeral, &m1, &s);

        debug!(
            "srp.derive A={} u={} K={}",
            public_ephemeral,
            u,
            hex::encode(session_key.to_bytes(0, Endian::Little))
        );

        let proof = ClientProof {
            a: public_ephemeral.to_array::<32>(Endian::Little)?,
            m1: m1.to_array::<20>(Endian::Little)?,
        };
        Ok((proof, session_key, m2))
    }

    pub fn verify_server_proof(&mut self, m2: &[u8; 20]) -> Result<(), SrpError> {
        self.require("verify_server_proof", SrpState::ProofComputed)?;

        let expected = self
            .exchange
            .as_ref()
            .and_then(|exchange| exchange.expected_server_proof);
        if expected.as_ref() != Some(m2) {
            return Err(self.fail(SrpError::ProofMismatch));
        }

        self.exchange = None;
        self.state = SrpState::Authenticated;
        Ok(())
    }
}

/// Draws private ephemerals until `public(a)` is non-zero, giving up after
/// `MAX_EPHEMERAL_ATTEMPTS` draws. `public` must return `A` reduced mod `N`.
fn pick_ephemeral<R, F>(rng: &mut R, mut public: F) -> Result<(BigInt, BigInt), SrpError>
where
    R: RngCore + ?Sized,
    F: FnMut(&BigInt) -> Result<BigInt, SrpError>,
{
    for _ in 0..MAX_EPHEMERAL_ATTEMPTS {
        let a = BigInt::random(PRIVATE_EPHEMERAL_BITS, rng);
        let public_ephemeral = public(&a)?;
        if !public_ephemeral.is_zero() {
            return Ok((a, public_ephemeral));
        }
        debug!("srp.ephemeral degenerate, redrawing");
    }
    Err(SrpError::Degenerate("client ephemeral"))
}

/// `x = SHA1(salt || SHA1(ACCOUNT ":" PASSWORD))`.
pub fn calculate_x(account: &str, password: &str, salt: &BigInt) -> BigInt {
    let mut context = Sha1Context::new();
    let identity = context.update(&format!("{}:{}", account, password)).finalize();
    // Through BigInt on purpose: trailing zero bytes of the identity digest
    // are dropped before hashing, which is what logon servers compute.
    let identity = BigInt::from_bytes(&identity, Endian::Little);

    let x = context.update(salt).update(&identity).finalize();
    BigInt::from_bytes(&x, Endian::Little)
}

pub fn calculate_u(public_ephemeral: &BigInt, server_ephemeral: &BigInt) -> BigInt {
    let u = Sha1Context::new()
        .update(public_ephemeral)
        .update(server_ephemeral)
        .finalize();
    BigInt::from_bytes(&u, Endian::Little)
}

/// Hashes the even and odd bytes of `S` (exported to 32 bytes) separately
/// and interleaves the two digests into the 40-byte session key.
pub fn calculate_interleaved(s: &BigInt) -> Result<BigInt, SrpError> {
    let s = s.to_array::<32>(Endian::Little)?;

    let even: Vec<u8> = s.iter().step_by(2).copied().collect();
    let odd: Vec<u8> = s.iter().skip(1).step_by(2).copied().collect();

    let mut context = Sha1Context::new();
    let even_hash = context.update(&even).finalize();
    let odd_hash = context.update(&odd).finalize();

    let mut session_key = [0u8; SESSION_KEY_LENGTH];
    for (index, (e, o)) in even_hash.iter().zip(odd_hash.iter()).enumerate() {
        session_key[index * 2] = *e;
        session_key[index * 2 + 1] = *o;
    }

    Ok(BigInt::from_bytes(&session_key, Endian::Little))
}

/// `M1 = SHA1((SHA1(N) ^ SHA1(g)) || SHA1(ACCOUNT) || s || A || B || K)`.
pub fn calculate_m1(
    modulus: &BigInt,
    generator: &BigInt,
    account: &str,
    salt: &BigInt,
    public_ephemeral: &BigInt,
    server_ephemeral: &BigInt,
    session_key: &BigInt,
) -> BigInt {
    let mut context = Sha1Context::new();
    let n_hash = context.update(modulus).finalize();
    let g_hash = context.update(generator).finalize();

    let mut xor_hash = [0u8; 20];
    for (index, value) in xor_hash.iter_mut().enumerate() {
        *value = n_hash[index] ^ g_hash[index];
    }
    let t3 = BigInt::from_bytes(&xor_hash, Endian::Little);
    let account_hash = context.update(account).finalize();

    let m1 = context
        .update(&t3)
        .update(&account_hash)
        .update(salt)
        .update(public_ephemeral)
        .update(server_ephemeral)
        .update(session_key)
        .finalize();
    BigInt::from_bytes(&m1, Endian::Little)
}

/// `M2 = SHA1(A || M1 || S)`.
pub fn calculate_m2(public_ephemeral: &BigInt, client_proof: &BigInt, s: &BigInt) -> [u8; 20] {
    Sha1Context::new()
        .update_bignums(&[public_ephemeral, client_proof, s])
        .finalize()
}

/// Server half of the exchange.
#[derive(Debug)]
pub struct SrpServer {
    account: String,
    modulus: BigInt,
    generator: BigInt,
    salt: [u8; 32],
    verifier: BigInt,
    private_ephemeral: BigInt,
    public_ephemeral: BigInt,
}

impl SrpServer {
    pub fn new(
        account: &str,
        password: &str,
        n: &[u8],
        g: &[u8],
        salt: [u8; 32],
        private_ephemeral: BigInt,
    ) -> Result<Self, SrpError> {
        let account = account.to_uppercase();
        let modulus = BigInt::from_bytes(n, Endian::Little);
        let generator = BigInt::from_bytes(g, Endian::Little);

        let x = calculate_x(
            &account,
            &password.to_uppercase(),
            &BigInt::from_bytes(&salt, Endian::Little),
        );
        let verifier = generator.mod_exp(&x, &modulus)?;
        let gb = generator.mod_exp(&private_ephemeral, &modulus)?;
        let public_ephemeral = (&(&BigInt::from_u32(K) * &verifier) + &gb).checked_rem(&modulus)?;

        Ok(Self {
            account,
            modulus,
            generator,
            salt,
            verifier,
            private_ephemeral,
            public_ephemeral,
        })
    }

    pub fn with_rng<R: RngCore + ?Sized>(
        account: &str,
        password: &str,
        n: &[u8],
        g: &[u8],
        rng: &mut R,
    ) -> Result<Self, SrpError> {
        let mut salt = [0u8; 32];
        rng.fill_bytes(&mut salt);
        let private_ephemeral = BigInt::random(PRIVATE_EPHEMERAL_BITS, rng);
        Self::new(account, password, n, g, salt, private_ephemeral)
    }

    pub fn challenge(&self) -> Result<ServerChallenge, SrpError> {
        Ok(ServerChallenge {
            b: self.public_ephemeral.to_array::<32>(Endian::Little)?,
            g: self.generator.to_bytes(0, Endian::Little),
            n: self.modulus.to_bytes(0, Endian::Little),
            salt: self.salt,
        })
    }

    /// Checks the client's `M1`; returns the session key and `M2`.
    pub fn verify_client_proof(&self, proof: &ClientProof) -> Result<(BigInt, [u8; 20]), SrpError> {
        let n = &self.modulus;
        let client_a = BigInt::from_bytes(&proof.a, Endian::Little);
        if client_a.checked_rem(n)?.is_zero() {
            return Err(SrpError::Degenerate("client ephemeral"));
        }

        let u = calculate_u(&client_a, &self.public_ephemeral);
        let vu = self.verifier.mod_exp(&u, n)?;
        let avu = (&client_a * &vu).checked_rem(n)?;
        let s = avu.mod_exp(&self.private_ephemeral, n)?;
        let session_key = calculate_interleaved(&s)?;

        let salt = BigInt::from_bytes(&self.salt, Endian::Little);
        let m1 = calculate_m1(
            n,
            &self.generator,
            &self.account,
            &salt,
            &client_a,
            &self.public_ephemeral,
            &session_key,
        );
        if m1.to_array::<20>(Endian::Little)? != proof.m1 {
            return Err(SrpError::ProofMismatch);
        }

        Ok((session_key, calculate_m2(&client_a, &m1, &s)))
    }
}
