//! Server-held symmetric encryption of message content at rest (AES-256-GCM).
//! The key never leaves the server; clients only ever see plaintext over TLS.

pub mod codec;
pub mod keys;

pub use codec::Codec;
