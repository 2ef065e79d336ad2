//! Session establishment.
//!
//! The handshake turns a fresh byte stream into a shared [`SessionKey`];
//! no payload frame is exchanged before it completes on both ends.

pub mod handshake;
pub mod key;

pub use handshake::{Handshake, HandshakeState, Role, WrappedKey};
pub use key::SessionKey;
