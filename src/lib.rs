//! # Wrapped-Key Messenger
//!
//! A peer-to-peer socket messenger. The listener generates a small RSA-style
//! keypair for every connection and sends the public half; the initiator
//! wraps a random session key with it. From then on messages travel as
//! AES-128-CBC envelopes inside length-prefixed frames.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wrapkey_messenger::{ConnectionOptions, Listener};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (events, mut notices) = mpsc::unbounded_channel();
//!     let listener = Listener::bind("127.0.0.1:5555", ConnectionOptions::default()).await?;
//!     tokio::spawn(async move {
//!         while let Some(notice) = notices.recv().await {
//!             println!("{notice}");
//!         }
//!     });
//!     listener.run(events).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`crypto`]: prime generation, the public-key primitive and AES-CBC
//! - [`transport`]: handshake lines and length-prefixed payload frames
//! - [`session`]: the key-wrap handshake and the agreed session key
//! - [`app`]: listener and initiator connection handling
//! - [`utils`]: configuration and error handling
//!
//! The small modulus sizes used here are for demonstration; they give no
//! real confidentiality.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod crypto;
pub mod session;
pub mod transport;
pub mod utils;

pub use app::{
    connect, handle_connection, run_initiator, ConnectionOptions, ConnectionStats, Listener,
    SessionEvent,
};
pub use crypto::{generate_keypair, Keypair, PrivateKey, PublicKey};
pub use session::{Handshake, HandshakeState, Role, SessionKey};
pub use utils::{FailureKind, MessengerConfig, MessengerError, Result};

/// Maximum message size in bytes (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default configuration values
pub mod defaults {
    /// Default address to bind or connect to
    pub const DEFAULT_HOST: &str = "127.0.0.1";

    /// Default TCP port
    pub const DEFAULT_PORT: u16 = 5555;

    /// Default modulus size for per-connection keypairs
    pub const DEFAULT_KEY_BITS: u32 = 64;

    /// Default input line that ends the initiator's session
    pub const DEFAULT_QUIT_COMMAND: &str = "quit";
}
