use crate::tls;
use snafu::Snafu;

/// How a [`StationError`] should be treated by the flow layer.
///
/// A tag which fails to decode is not an error at all: it's reported as `None`, and the flow is
/// left alone. Every kind below is fatal to the flow it occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Forging was refused. Nothing was put on the wire.
    InvalidParameter,
    /// The byte streams and the forged session disagree about where records begin and end.
    ProtocolDesync,
    /// A record couldn't be sealed or opened.
    TransformFailure,
}

// None of these errors are retried. The caller should drop the session and reset the flow.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StationError {
    #[snafu(display("{}", source))]
    UnknownCipherSuite {
        source: tls::UnknownCipherSuite,
    },
    #[snafu(display("TLS 1.3 is unsupported (cipher suite {:04X})", suite))]
    TLS13IsUnsupported {
        suite: u16,
    },
    #[snafu(display("Cipher suite {:04X} isn't in the configured allow-list", suite))]
    CipherSuiteNotAllowed {
        suite: u16,
    },
    #[snafu(display(
        "The master key must be between 1 and {} bytes. Got {} bytes.",
        max,
        actual
    ))]
    InvalidMasterKeyLength {
        actual: usize,
        max: usize,
    },
    #[snafu(display("The DH modulus must be greater than 3"))]
    ModulusOutOfRange,
    #[snafu(display("The DH generator must lie in [2, p - 2]"))]
    GeneratorOutOfRange,
    #[snafu(display("The peer's DH public value must lie in [2, p - 2]"))]
    PeerPublicValueOutOfRange,
    #[snafu(display("The DH private exponent must be non-zero"))]
    PrivateKeyOutOfRange,

    #[snafu(display("{} bytes of outbound data were already pending", len))]
    PendingOutbound {
        len: usize,
    },
    #[snafu(display("{} bytes of inbound data were already pending", len))]
    PendingInbound {
        len: usize,
    },
    #[snafu(display("{} bytes of a partial record were left over after decrypting", len))]
    TrailingInbound {
        len: usize,
    },
    #[snafu(display("Mismatched TLS version. Expected {:X}. Got {:X}", expected, actual))]
    TLSVersionMismatch {
        expected: u16,
        actual: u16,
    },
    #[snafu(display("The TLS record with size {} exceeded the valid maximum.", size))]
    RecordTooBig {
        size: usize,
    },
    #[snafu(display("Saw {:?} after the peer's close_notify", header))]
    RecordAfterCloseNotify {
        header: tls::RecordHeader,
    },

    #[snafu(display("Unable to key the record protection for the negotiated cipher"))]
    KeySetupFailed,
    #[snafu(display(
        "Expected record to be at least {} bytes to have a nonce and mac. Actually {} bytes.",
        minimum,
        actual
    ))]
    RecordTooShort {
        actual: usize,
        minimum: usize,
    },
    #[snafu(display("Record with sequence number {} failed to authenticate", sequence_number))]
    BadRecordMac {
        sequence_number: u64,
    },
    #[snafu(display("Unable to seal the record"))]
    SealFailed,
    #[snafu(display("The system random number generator failed"))]
    RandomnessUnavailable,
    #[snafu(display("Expected application data or an alert. Got {:?}", header))]
    UnexpectedRecordType {
        header: tls::RecordHeader,
    },
    #[snafu(display("Alert records must hold exactly 2 bytes. Got {} bytes.", length))]
    InvalidAlert {
        length: usize,
    },
    #[snafu(display("The peer sent an alert: {:?}", alert))]
    SawAlert {
        alert: tls::Alert,
    },
    #[snafu(display("The session has already been shut down"))]
    SessionClosed,
}

impl StationError {
    pub fn kind(&self) -> ErrorKind {
        use StationError::*;
        match self {
            UnknownCipherSuite { .. }
            | TLS13IsUnsupported { .. }
            | CipherSuiteNotAllowed { .. }
            | InvalidMasterKeyLength { .. }
            | ModulusOutOfRange
            | GeneratorOutOfRange
            | PeerPublicValueOutOfRange
            | PrivateKeyOutOfRange => ErrorKind::InvalidParameter,
            PendingOutbound { .. }
            | PendingInbound { .. }
            | TrailingInbound { .. }
            | TLSVersionMismatch { .. }
            | RecordTooBig { .. }
            | RecordAfterCloseNotify { .. } => ErrorKind::ProtocolDesync,
            KeySetupFailed
            | RecordTooShort { .. }
            | BadRecordMac { .. }
            | SealFailed
            | RandomnessUnavailable
            | UnexpectedRecordType { .. }
            | InvalidAlert { .. }
            | SawAlert { .. }
            | SessionClosed => ErrorKind::TransformFailure,
        }
    }
}

impl From<tls::UnknownCipherSuite> for StationError {
    fn from(source: tls::UnknownCipherSuite) -> Self {
        StationError::UnknownCipherSuite { source }
    }
}

pub type Result<T, E = StationError> = std::result::Result<T, E>;

/// Errors from loading a [`crate::config::StationConfig`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("Unable to read {}: {}", path.display(), source))]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Unable to parse the station config: {}", source))]
    Parse {
        source: serde_json::Error,
    },
    #[snafu(display("Unable to parse the DH modulus as hex: {}", source))]
    InvalidModulusHex {
        source: hex::FromHexError,
    },
    #[snafu(display("Invalid DH group: {}", source))]
    InvalidDhGroup {
        source: StationError,
    },
    #[snafu(display("max_fragment_len must be between 1 and {}. Got {}.", max, actual))]
    InvalidFragmentLength {
        actual: usize,
        max: usize,
    },
    #[snafu(display("Unsupported cipher suite {:04X} in the allow-list", suite))]
    UnsupportedAllowedCipherSuite {
        suite: u16,
    },
}
