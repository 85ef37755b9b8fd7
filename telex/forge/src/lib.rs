//! Crate for taking over a TLS 1.2 flow at a Telex station.
//!
//! Once a tagged client random has been detected and the master secret recovered, the station
//! needs record-layer state for a handshake it never saw. This crate derives that state and then
//! encrypts and decrypts application data on the flow.

#![deny(unused_must_use)]

pub mod config;
pub mod errors;
pub mod key_derivation;
pub mod record_codec;
pub mod session;
pub mod station;
pub mod tls;

#[cfg(test)]
mod testsuite;

pub use config::StationConfig;
pub use errors::{ErrorKind, StationError};
pub use session::{forge, ForgedSession, MasterKey, Role, SessionReader, SessionWriter};
pub use station::{CovertTag, SharedSecretProvider, Station};
pub use telex_elligator as elligator;
