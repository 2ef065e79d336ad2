//! Error types and handling for the wrapped-key messenger.
//!
//! Every failure a connection can hit is expressed as a [`MessengerError`].
//! Errors never cross connection boundaries: a handler reports its error with
//! a [`FailureKind`] attached and tears down only its own stream.

use std::fmt;
use thiserror::Error;

/// Result type alias for the messenger library
pub type Result<T> = std::result::Result<T, MessengerError>;

/// Comprehensive error type for all messenger operations
#[derive(Error, Debug, Clone)]
pub enum MessengerError {
    /// Cryptographic operation errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    /// Network and stream errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Handshake and session state errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error for unexpected conditions
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Cryptographic operation errors
#[derive(Error, Debug, Clone)]
pub enum CryptoError {
    /// Symmetric key has the wrong length
    #[error("Invalid key: expected {expected} bytes, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    /// Keypair generation failure
    #[error("Key generation failed: {reason}")]
    KeyGeneration { reason: String },

    /// The public exponent shares a factor with the totient
    #[error("Modular inverse does not exist")]
    NotInvertible,

    /// Encryption operation failure
    #[error("Encryption failed: {reason}")]
    Encryption { reason: String },

    /// Decryption, unpadding or decoding failure
    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },

    /// Invalid cryptographic parameters
    #[error("Invalid crypto parameters: {reason}")]
    InvalidParameters { reason: String },
}

/// Network and stream errors
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    /// Could not bind the listening socket
    #[error("Failed to bind {address}: {reason}")]
    BindFailed { address: String, reason: String },

    /// Could not reach the listener
    #[error("Connection failed to {peer}: {reason}")]
    ConnectionFailed { peer: String, reason: String },

    /// The peer closed the stream while more bytes were expected
    #[error("Stream closed by peer during {during}")]
    StreamClosed { during: String },
}

/// Handshake and session state errors
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Operation attempted in the wrong handshake state
    #[error("Invalid handshake state: expected {expected}, was {actual}")]
    InvalidState { expected: String, actual: String },

    /// The handshake line could not be parsed
    #[error("Malformed handshake line: {reason}")]
    MalformedHandshake { reason: String },
}

/// Configuration and setup errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration serialization error
    #[error("Configuration parse error: {reason}")]
    ParseError { reason: String },

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Wire protocol errors
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Handshake line exceeds the maximum line length
    #[error("Handshake line too long (max: {max} bytes)")]
    LineTooLong { max: usize },
}

/// Coarse classification used when reporting a failed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No coprime public exponent or bad key-size parameters
    KeyGeneration,
    /// Malformed handshake line
    HandshakeFormat,
    /// Peer went away mid-exchange
    StreamClosed,
    /// Bad key, envelope, padding or text encoding
    Cipher,
    /// Frame or line size limit exceeded
    Protocol,
    /// Socket level failure
    Io,
    /// Configuration problem
    Config,
    /// Anything else
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::KeyGeneration => "key-generation",
            Self::HandshakeFormat => "handshake-format",
            Self::StreamClosed => "stream-closed",
            Self::Cipher => "cipher",
            Self::Protocol => "protocol",
            Self::Io => "io",
            Self::Config => "config",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

impl MessengerError {
    /// Creates a new unexpected error with a custom message
    pub fn unexpected<S: Into<String>>(msg: S) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Creates a stream-closed error for the named phase
    pub fn stream_closed<S: Into<String>>(during: S) -> Self {
        Self::Network(NetworkError::StreamClosed {
            during: during.into(),
        })
    }

    /// Creates a malformed-handshake error
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::Session(SessionError::MalformedHandshake {
            reason: reason.into(),
        })
    }

    /// Classify this error for reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Crypto(CryptoError::KeyGeneration { .. })
            | Self::Crypto(CryptoError::NotInvertible)
            | Self::Crypto(CryptoError::InvalidParameters { .. }) => FailureKind::KeyGeneration,
            Self::Crypto(_) => FailureKind::Cipher,
            Self::Session(_) => FailureKind::HandshakeFormat,
            Self::Network(NetworkError::StreamClosed { .. }) => FailureKind::StreamClosed,
            Self::Network(_) | Self::Io(_) => FailureKind::Io,
            Self::Protocol(_) => FailureKind::Protocol,
            Self::Config(_) => FailureKind::Config,
            Self::Unexpected(_) => FailureKind::Other,
        }
    }

    /// Returns true if the peer simply went away
    pub fn is_stream_closed(&self) -> bool {
        self.kind() == FailureKind::StreamClosed
    }

    /// Returns true if this error indicates tampered or mis-keyed traffic
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::Decryption { .. }))
    }
}

impl From<std::io::Error> for MessengerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = MessengerError::Crypto(CryptoError::InvalidKey {
            expected: 16,
            actual: 7,
        });
        assert!(error.to_string().contains("expected 16 bytes, got 7"));
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            MessengerError::from(CryptoError::NotInvertible).kind(),
            FailureKind::KeyGeneration
        );
        assert_eq!(
            MessengerError::malformed("missing ':'").kind(),
            FailureKind::HandshakeFormat
        );
        assert_eq!(
            MessengerError::stream_closed("frame header").kind(),
            FailureKind::StreamClosed
        );
        assert_eq!(
            MessengerError::from(CryptoError::Decryption {
                reason: "bad padding".to_string()
            })
            .kind(),
            FailureKind::Cipher
        );
    }

    #[test]
    fn test_stream_closed() {
        assert!(MessengerError::stream_closed("handshake").is_stream_closed());

        let io_error = MessengerError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(!io_error.is_stream_closed());
        assert_eq!(io_error.kind(), FailureKind::Io);
    }

    #[test]
    fn test_security_violations() {
        let decrypt_error = MessengerError::from(CryptoError::Decryption {
            reason: "bad padding".to_string(),
        });
        assert!(decrypt_error.is_security_violation());

        let closed = MessengerError::stream_closed("frame payload");
        assert!(!closed.is_security_violation());
    }
}
