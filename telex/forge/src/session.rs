//! Forging TLS 1.2 record-layer state for a connection whose handshake we never took part in.
//!
//! A [`ForgedSession`] holds only what the record layer needs: the directional keys, the two
//! sequence counters, and a buffer for each direction. There is no handshake state to keep
//! consistent, so there is nothing else to fill in.

use crate::{
    config::StationConfig,
    errors::*,
    tls::{
        crypto::{DerivedKeys, RecordProtection},
        is_tls13_cipher_suite, CipherSuite, ClientRandom, SequenceNumber, ServerRandom,
    },
};
use log::debug;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use snafu::ensure;

/// Which end of the TLS connection the station impersonates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Write with the server's keys, and read what the client wrote.
    #[default]
    Server,
    /// Write with the client's keys, and read what the server wrote.
    Client,
}

impl std::ops::Not for Role {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }
}

/// TLS never stores more than 48 bytes of master secret.
pub const MAX_MASTER_KEY_LEN: usize = 48;

/// The master secret of the session being forged. At most [`MAX_MASTER_KEY_LEN`] bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey(SmallVec<[u8; 64]>);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "<MasterKey {} bytes>", self.0.len())
    }
}

impl MasterKey {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        ensure!(
            !bytes.is_empty() && bytes.len() <= MAX_MASTER_KEY_LEN,
            InvalidMasterKeyLengthSnafu {
                actual: bytes.len(),
                max: MAX_MASTER_KEY_LEN,
            }
        );
        Ok(MasterKey(SmallVec::from_slice(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

/// The sequence number of the first record after the handshake. Each side has already sent its
/// Finished message (as record 0) under the new keys.
pub const FIRST_APPLICATION_DATA_SEQUENCE: SequenceNumber = SequenceNumber(1);

/// The read half of a forged session.
#[derive(Debug)]
pub struct SessionReader {
    pub(crate) protection: RecordProtection,
    pub(crate) sequence: SequenceNumber,
    pub(crate) inbound: Vec<u8>,
    pub(crate) peer_closed: bool,
}

impl SessionReader {
    /// The sequence number the next record read will have.
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Ciphertext bytes which were injected but not consumed. This is empty between successful
    /// calls to `decrypt`.
    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// Has the peer sent a close_notify?
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }
}

/// The write half of a forged session.
pub struct SessionWriter {
    pub(crate) protection: RecordProtection,
    pub(crate) sequence: SequenceNumber,
    pub(crate) outbound: Vec<u8>,
    pub(crate) max_fragment_len: usize,
    pub(crate) rng: ring::rand::SystemRandom,
    pub(crate) closed: bool,
}

impl std::fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SessionWriter")
            .field("protection", &self.protection)
            .field("sequence", &self.sequence)
            .field("outbound", &self.outbound.len())
            .field("max_fragment_len", &self.max_fragment_len)
            .field("closed", &self.closed)
            .finish()
    }
}

impl SessionWriter {
    /// The sequence number the next record written will have.
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// Has `shutdown` been called?
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A TLS 1.2 session as it stands just after the handshake, built without running one.
#[derive(Debug)]
pub struct ForgedSession {
    pub(crate) cipher_suite: CipherSuite,
    pub(crate) role: Role,
    pub(crate) client_random: ClientRandom,
    pub(crate) server_random: ServerRandom,
    pub(crate) master_key: MasterKey,
    pub(crate) reader: SessionReader,
    pub(crate) writer: SessionWriter,
}

/// Build a session for `raw_cipher_suite` out of the master key and the two randoms.
///
/// The key block is expanded with the TLS 1.2 PRF, and each direction is keyed according to
/// `config.role()`. Both sequence counters start at [`FIRST_APPLICATION_DATA_SEQUENCE`].
pub fn forge(
    config: &StationConfig,
    raw_cipher_suite: u16,
    client_random: &ClientRandom,
    server_random: &ServerRandom,
    master_key: &MasterKey,
) -> Result<ForgedSession> {
    ensure!(
        !is_tls13_cipher_suite(raw_cipher_suite),
        TLS13IsUnsupportedSnafu {
            suite: raw_cipher_suite
        }
    );
    let cipher_suite = CipherSuite::try_from(raw_cipher_suite)?;
    ensure!(
        config.allows(raw_cipher_suite),
        CipherSuiteNotAllowedSnafu {
            suite: raw_cipher_suite
        }
    );
    let keys = DerivedKeys::derive_from_tls12(
        &cipher_suite,
        master_key.as_bytes(),
        client_random,
        server_random,
    )?;
    let (read_protection, write_protection) = match config.role() {
        Role::Server => (keys.client_to_server, keys.server_to_client),
        Role::Client => (keys.server_to_client, keys.client_to_server),
    };
    debug!(
        "Forged a {:?} session for cipher suite {:04X} ({:?})",
        config.role(),
        raw_cipher_suite,
        cipher_suite.cipher
    );
    Ok(ForgedSession {
        cipher_suite,
        role: config.role(),
        client_random: *client_random,
        server_random: *server_random,
        master_key: master_key.clone(),
        reader: SessionReader {
            protection: read_protection,
            sequence: FIRST_APPLICATION_DATA_SEQUENCE,
            inbound: Vec::new(),
            peer_closed: false,
        },
        writer: SessionWriter {
            protection: write_protection,
            sequence: FIRST_APPLICATION_DATA_SEQUENCE,
            outbound: Vec::new(),
            max_fragment_len: config.max_fragment_len(),
            rng: ring::rand::SystemRandom::new(),
            closed: false,
        },
    })
}

impl ForgedSession {
    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn client_random(&self) -> &ClientRandom {
        &self.client_random
    }

    pub fn server_random(&self) -> &ServerRandom {
        &self.server_random
    }

    pub fn master_key(&self) -> &MasterKey {
        &self.master_key
    }

    pub fn read_sequence(&self) -> SequenceNumber {
        self.reader.sequence()
    }

    pub fn write_sequence(&self) -> SequenceNumber {
        self.writer.sequence()
    }

    pub fn pending_inbound(&self) -> usize {
        self.reader.pending_inbound()
    }

    pub fn pending_outbound(&self) -> usize {
        self.writer.pending_outbound()
    }

    /// Split the session into its two directions, so that reading and writing can proceed on
    /// different threads.
    pub fn into_split(self) -> (SessionReader, SessionWriter) {
        (self.reader, self.writer)
    }
}
