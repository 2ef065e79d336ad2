//! Cryptographic primitives.
//!
//! Prime generation and RSA-style keypairs wrap the session key during the
//! handshake; AES-128-CBC protects every payload frame afterwards.

pub mod keypair;
pub mod prime;
pub mod symmetric;

pub use keypair::*;
pub use prime::{generate_prime, is_prime};
