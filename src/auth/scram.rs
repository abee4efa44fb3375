//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677) as used by Postgres 10+.
//!
//! Channel binding is not offered; the client always sends the `n,,` GS2
//! header, which servers accept for plain `SCRAM-SHA-256`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// SASL mechanism name announced by the server
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

const GS2_HEADER: &str = "n,,";

/// SCRAM exchange failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScramError {
    /// Server message is malformed or inconsistent with ours
    #[error("invalid server message: {0}")]
    InvalidServerMessage(String),
    /// Server signature did not verify
    #[error("invalid server proof")]
    InvalidServerProof,
    /// Base64 payload could not be decoded
    #[error("base64 error: {0}")]
    Base64(String),
}

/// Values carried from the client-final step to server-final verification
#[derive(Clone, Debug)]
pub struct ScramState {
    expected_server_signature: Vec<u8>,
}

/// One SCRAM-SHA-256 exchange
pub struct ScramClient {
    username: String,
    password: String,
    nonce: String,
}

impl ScramClient {
    /// Start an exchange with a fresh random nonce
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let nonce_bytes: [u8; 24] = rand::thread_rng().gen();
        Self::with_nonce(username, password, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(
        username: impl Into<String>,
        password: impl Into<String>,
        nonce: String,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            nonce,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", self.username, self.nonce)
    }

    /// `client-first-message`
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare())
    }

    /// Consume `server-first-message`, produce `client-final-message`
    pub fn client_final(&self, server_first: &str) -> Result<(String, ScramState), ScramError> {
        let first = ServerFirst::parse(server_first)?;
        if !first.nonce.starts_with(&self.nonce) || first.nonce.len() == self.nonce.len() {
            return Err(ScramError::InvalidServerMessage(
                "server nonce does not extend client nonce".into(),
            ));
        }

        let salt = BASE64
            .decode(first.salt)
            .map_err(|e| ScramError::Base64(e.to_string()))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            first.iterations,
            &mut salted_password,
        );

        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), first.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac(&salted_password, b"Server Key");
        let state = ScramState {
            expected_server_signature: hmac(&server_key, auth_message.as_bytes()),
        };

        Ok((
            format!("{},p={}", without_proof, BASE64.encode(proof)),
            state,
        ))
    }

    /// Verify `server-final-message`
    pub fn verify_server_final(
        &self,
        server_final: &str,
        state: &ScramState,
    ) -> Result<(), ScramError> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ScramError::InvalidServerMessage(err.to_string()));
        }
        let encoded = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or_else(|| ScramError::InvalidServerMessage("missing verifier".into()))?;
        let signature = BASE64
            .decode(encoded)
            .map_err(|e| ScramError::Base64(e.to_string()))?;

        if constant_time_eq(&signature, &state.expected_server_signature) {
            Ok(())
        } else {
            Err(ScramError::InvalidServerProof)
        }
    }
}

struct ServerFirst<'a> {
    nonce: &'a str,
    salt: &'a str,
    iterations: u32,
}

impl<'a> ServerFirst<'a> {
    fn parse(msg: &'a str) -> Result<Self, ScramError> {
        let (mut nonce, mut salt, mut iterations) = (None, None, None);
        for part in msg.split(',') {
            match part.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = Some(v),
                _ => {}
            }
        }

        let missing = || ScramError::InvalidServerMessage("missing field in server-first".into());
        let iterations = iterations
            .ok_or_else(missing)?
            .parse::<u32>()
            .ok()
            .filter(|i| *i > 0)
            .ok_or_else(|| ScramError::InvalidServerMessage("invalid iteration count".into()))?;

        Ok(Self {
            nonce: nonce.filter(|n| !n.is_empty()).ok_or_else(missing)?,
            salt: salt.filter(|s| !s.is_empty()).ok_or_else(missing)?,
            iterations,
        })
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
