//! Proof Key for Code Exchange (RFC 7636).
//!
//! A [`PkcePair`] is created fresh for every login attempt. The verifier
//! half is a move-only [`PkceVerifier`]: the token exchange takes it by value,
//! so a verifier can be presented to the provider at most once and never
//! outlives its attempt.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{AuthError, Result};

/// Length of the PKCE code verifier in bytes (before base64 encoding).
const PKCE_VERIFIER_BYTES: usize = 32;

/// The only challenge method this engine sends.
pub const CHALLENGE_METHOD_S256: &str = "S256";

/// Secret half of a PKCE pair.
///
/// Deliberately not `Clone`; `Debug` never prints the value.
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// The verifier string sent as `code_verifier`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PkceVerifier([redacted])")
    }
}

/// A verifier with its derived S256 challenge.
#[derive(Debug)]
pub struct PkcePair {
    verifier: PkceVerifier,
    challenge: String,
}

impl PkcePair {
    /// Generate a new pair from the system CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::EntropyUnavailable`] if the CSPRNG fails. The
    /// caller must abort the login attempt; there is no silent retry.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
        rng.fill(&mut bytes).map_err(|_| {
            tracing::error!("system CSPRNG failed while generating a PKCE verifier");
            AuthError::EntropyUnavailable
        })?;

        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = pkce_challenge(&verifier);
        Ok(Self {
            verifier: PkceVerifier(verifier),
            challenge,
        })
    }

    /// The `code_challenge` sent in the authorization URL.
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Always `"S256"`.
    pub fn method(&self) -> &'static str {
        CHALLENGE_METHOD_S256
    }

    /// The verifier, borrowed.
    pub fn verifier(&self) -> &PkceVerifier {
        &self.verifier
    }

    /// Give up the challenge and keep the verifier for the exchange.
    pub fn into_verifier(self) -> PkceVerifier {
        self.verifier
    }
}

/// Derive the PKCE code challenge from a code verifier using SHA-256.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
