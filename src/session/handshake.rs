//! Key-wrap handshake.
//!
//! Exactly two text lines cross the wire before any payload frame:
//!
//! ```text
//! listener  -> initiator   "<e>,<n>\n"               decimal public key
//! initiator -> listener    "<keyLen>:<hex(c)>\n"     c = key^e mod n, n-byte big-endian
//! ```
//!
//! The listener generates a throwaway keypair per connection and unwraps the
//! key with its private exponent. There is no confirmation message; both ends
//! consider the session established once their last step succeeds.
//!
//! State progression:
//!
//! ```text
//! listener:   Init -> KeygenDone -> SessionEstablished
//! initiator:  Init -> AwaitPublicKey -> KeyWrapSent -> SessionEstablished
//! any state:  -> Aborted on malformed input, stream end or keygen failure
//! ```

use crate::crypto::{generate_keypair, PublicKey};
use crate::session::SessionKey;
use crate::transport::{recv_line, send_line};
use crate::utils::{CryptoError, MessengerError, Result, SessionError, MIN_KEY_BITS};
use num_bigint::BigUint;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Which end of the connection a participant plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts connections and generates the keypair
    Listener,
    /// Connects out and chooses the session key
    Initiator,
}

impl Role {
    /// The role on the other end of the stream
    pub fn peer(self) -> Self {
        match self {
            Self::Listener => Self::Initiator,
            Self::Initiator => Self::Listener,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener => f.write_str("listener"),
            Self::Initiator => f.write_str("initiator"),
        }
    }
}

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing exchanged yet
    Init,
    /// Initiator waiting for the listener's public key
    AwaitPublicKey,
    /// Listener has a keypair and has offered its public key
    KeygenDone,
    /// Initiator has sent the wrapped key
    KeyWrapSent,
    /// Both key halves are in place; payload traffic may start
    SessionEstablished,
    /// Terminal failure
    Aborted,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "Init",
            Self::AwaitPublicKey => "AwaitPublicKey",
            Self::KeygenDone => "KeygenDone",
            Self::KeyWrapSent => "KeyWrapSent",
            Self::SessionEstablished => "SessionEstablished",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// The wrapped session key carried by the second handshake line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    /// Length of the unwrapped key material in bytes
    pub key_len: usize,
    /// `key^e mod n`
    pub ciphertext: BigUint,
}

impl WrappedKey {
    /// Render as `"<keyLen>:<hex>"` with the ciphertext padded to `modulus_len` bytes
    pub fn encode(&self, modulus_len: usize) -> String {
        let bytes = self.ciphertext.to_bytes_be();
        let mut padded = vec![0u8; modulus_len.saturating_sub(bytes.len())];
        padded.extend_from_slice(&bytes);
        format!("{}:{}", self.key_len, hex::encode(padded))
    }

    /// Parse a `"<keyLen>:<hex>"` line
    ///
    /// # Errors
    ///
    /// Returns `SessionError::MalformedHandshake` for a missing separator, a
    /// non-numeric or out-of-range length, or invalid hex.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(line)
            .map_err(|_| MessengerError::malformed("wrapped key line is not UTF-8"))?;
        let (len_field, hex_field) = text
            .split_once(':')
            .ok_or_else(|| MessengerError::malformed("wrapped key line has no ':' separator"))?;

        let key_len: usize = len_field
            .trim()
            .parse()
            .map_err(|_| MessengerError::malformed(format!("key length {len_field:?} is not a number")))?;
        if key_len == 0 || key_len > SessionKey::MAX_LEN {
            return Err(MessengerError::malformed(format!(
                "key length {key_len} outside 1..={}",
                SessionKey::MAX_LEN
            )));
        }

        let bytes = hex::decode(hex_field.trim())
            .map_err(|e| MessengerError::malformed(format!("wrapped key is not valid hex: {e}")))?;

        Ok(Self {
            key_len,
            ciphertext: BigUint::from_bytes_be(&bytes),
        })
    }
}

/// Render a public key as `"<e>,<n>"`
pub fn encode_public_key(key: &PublicKey) -> String {
    format!("{},{}", key.exponent(), key.modulus())
}

/// Parse a `"<e>,<n>"` line
///
/// # Errors
///
/// Returns `SessionError::MalformedHandshake` for a missing separator,
/// non-decimal fields or a zero modulus.
pub fn parse_public_key(line: &[u8]) -> Result<PublicKey> {
    let text = std::str::from_utf8(line)
        .map_err(|_| MessengerError::malformed("public key line is not UTF-8"))?;
    let (e_field, n_field) = text
        .split_once(',')
        .ok_or_else(|| MessengerError::malformed("public key line has no ',' separator"))?;

    let e = parse_decimal(e_field, "exponent")?;
    let n = parse_decimal(n_field, "modulus")?;
    PublicKey::new(e, n).map_err(|_| MessengerError::malformed("modulus must be non-zero"))
}

fn parse_decimal(field: &str, name: &str) -> Result<BigUint> {
    let digits = field.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MessengerError::malformed(format!(
            "{name} {field:?} is not a decimal integer"
        )));
    }
    BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| MessengerError::malformed(format!("{name} {field:?} is not a decimal integer")))
}

/// Key material length for a modulus of `modulus_len` bytes
///
/// The wrapped integer must stay below `n`, so it gets at most
/// `modulus_len - 1` bytes, capped at [`SessionKey::MAX_LEN`].
pub fn wrap_key_len(modulus_len: usize) -> usize {
    if modulus_len > 1 {
        (modulus_len - 1).clamp(1, SessionKey::MAX_LEN)
    } else {
        1
    }
}

/// Reject moduli too small to carry the wrapped key
///
/// Below [`MIN_KEY_BITS`] the modulus can fit in a single byte, so a
/// one-byte key may exceed `n` and unwrap to a different value.
///
/// # Errors
///
/// Returns `CryptoError::InvalidParameters` for `key_bits < MIN_KEY_BITS`
pub fn check_key_bits(key_bits: u64) -> Result<()> {
    if key_bits < u64::from(MIN_KEY_BITS) {
        return Err(CryptoError::InvalidParameters {
            reason: format!(
                "a {key_bits}-bit modulus cannot carry a session key (minimum {MIN_KEY_BITS})"
            ),
        }
        .into());
    }
    Ok(())
}

/// One side of the key-wrap handshake
#[derive(Debug)]
pub struct Handshake {
    role: Role,
    state: HandshakeState,
}

impl Handshake {
    /// Handshake for the accepting side
    pub fn listener() -> Self {
        Self {
            role: Role::Listener,
            state: HandshakeState::Init,
        }
    }

    /// Handshake for the connecting side
    pub fn initiator() -> Self {
        Self {
            role: Role::Initiator,
            state: HandshakeState::Init,
        }
    }

    /// This participant's role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the listener side: offer a fresh public key, unwrap the session key
    ///
    /// # Errors
    ///
    /// Any failure leaves the handshake in [`HandshakeState::Aborted`]:
    /// key generation, a closed stream, or a malformed wrapped-key line.
    pub async fn accept<S>(&mut self, stream: &mut S, key_bits: u64) -> Result<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        self.expect(Role::Listener)?;
        let outcome = self.accept_steps(stream, key_bits).await;
        self.finish(outcome)
    }

    /// Run the initiator side: read the public key, send a wrapped random key
    ///
    /// # Errors
    ///
    /// Any failure leaves the handshake in [`HandshakeState::Aborted`]:
    /// a closed stream or a malformed public key line.
    pub async fn initiate<S>(&mut self, stream: &mut S) -> Result<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        self.expect(Role::Initiator)?;
        let outcome = self.initiate_steps(stream).await;
        self.finish(outcome)
    }

    async fn accept_steps<S>(&mut self, stream: &mut S, key_bits: u64) -> Result<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        check_key_bits(key_bits)?;
        let keypair = generate_keypair(key_bits)?;
        self.state = HandshakeState::KeygenDone;

        send_line(stream, &encode_public_key(&keypair.public)).await?;
        log::debug!(
            "Offered {}-byte public key, awaiting wrapped session key",
            keypair.public.modulus_len()
        );

        let line = recv_line(stream)
            .await?
            .ok_or_else(|| MessengerError::stream_closed("handshake (awaiting wrapped key)"))?;
        let wrapped = WrappedKey::parse(&line)?;

        let m = keypair.private.decrypt(&wrapped.ciphertext);
        SessionKey::from_integer(&m, wrapped.key_len)
    }

    async fn initiate_steps<S>(&mut self, stream: &mut S) -> Result<SessionKey>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        self.state = HandshakeState::AwaitPublicKey;

        let line = recv_line(stream)
            .await?
            .ok_or_else(|| MessengerError::stream_closed("handshake (awaiting public key)"))?;
        let public = parse_public_key(&line)?;

        let modulus_len = public.modulus_len();
        let key = SessionKey::generate(wrap_key_len(modulus_len))?;
        let wrapped = WrappedKey {
            key_len: key.len(),
            ciphertext: public.encrypt(&key.to_integer()),
        };

        send_line(stream, &wrapped.encode(modulus_len)).await?;
        self.state = HandshakeState::KeyWrapSent;
        log::debug!("Sent wrapped {}-byte session key", key.len());

        Ok(key)
    }

    fn expect(&self, role: Role) -> Result<()> {
        if self.role != role {
            return Err(SessionError::InvalidState {
                expected: format!("{role} handshake"),
                actual: format!("{} handshake", self.role),
            }
            .into());
        }
        if self.state != HandshakeState::Init {
            return Err(SessionError::InvalidState {
                expected: HandshakeState::Init.to_string(),
                actual: self.state.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn finish(&mut self, outcome: Result<SessionKey>) -> Result<SessionKey> {
        match &outcome {
            Ok(key) => {
                self.state = HandshakeState::SessionEstablished;
                log::debug!("{} handshake established a {}-byte key", self.role, key.len());
            }
            Err(error) => {
                log::warn!(
                    "{} handshake aborted in state {}: {}",
                    self.role,
                    self.state,
                    error
                );
                self.state = HandshakeState::Aborted;
            }
        }
        outcome
    }
}
