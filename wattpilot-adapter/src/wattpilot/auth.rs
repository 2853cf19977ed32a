//! Session secret derivation and the authentication handshake
//!
//! The charger never sees the password. Both sides stretch it with
//! PBKDF2-HMAC-SHA512 salted by the charger serial, keep the first 32
//! base64 characters as the session secret, and the client proves it
//! holds that secret with a two-round SHA-256 chain:
//!
//! ```text
//! hash1 = sha256_hex(token1 + secret)
//! hash  = sha256_hex(token3 + token2 + hash1)
//! ```

use base64::{engine::general_purpose, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Digest, Sha256, Sha512};
use tokio::task::JoinHandle;

use super::messages::AuthReply;

/// PBKDF2 iteration count fixed by the charger firmware
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derived key length in bytes (256 bits)
const DERIVED_KEY_LEN: usize = 32;

/// Length of the base64 prefix kept as the session secret
const SECRET_LEN: usize = 32;

/// Exclusive upper bound for the client nonce
const TOKEN3_BOUND: u128 = 100_000_000_000_000_000_000_000_000_000_000;

/// Shared secret for one connection. Never persisted, never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSecret(String);

impl SessionSecret {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSecret(..)")
    }
}

/// Nonces from an `authRequired` frame plus the serial from `hello`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub serial: String,
    pub token1: String,
    pub token2: String,
}

/// Stretch the password into the session secret.
///
/// CPU-bound; async code goes through [`spawn_derivation`].
pub fn derive_secret(password: &str, serial: &str) -> SessionSecret {
    let mut key = [0u8; DERIVED_KEY_LEN];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), serial.as_bytes(), PBKDF2_ITERATIONS, &mut key);

    let mut encoded = general_purpose::STANDARD.encode(key);
    encoded.truncate(SECRET_LEN);
    SessionSecret(encoded)
}

/// Start [`derive_secret`] on the blocking pool
pub fn spawn_derivation(password: String, serial: String) -> JoinHandle<SessionSecret> {
    tokio::task::spawn_blocking(move || derive_secret(&password, &serial))
}

/// Fresh client nonce: a random integer below 10^32, in decimal
pub fn generate_token3() -> String {
    rand::thread_rng().gen_range(0..TOKEN3_BOUND).to_string()
}

fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// First round: binds the secret to the charger's first nonce
pub fn hash1(token1: &str, secret: &SessionSecret) -> String {
    sha256_hex(&[token1, secret.as_str()])
}

/// Build the `auth` reply for a challenge
pub fn auth_reply(
    token1: &str,
    token2: &str,
    token3: String,
    secret: &SessionSecret,
) -> AuthReply {
    let first = hash1(token1, secret);
    let hash = sha256_hex(&[&token3, token2, &first]);
    AuthReply::new(token3, hash)
}
