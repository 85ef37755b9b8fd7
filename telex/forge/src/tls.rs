//! The slice of the TLS 1.2 record layer that a forged session needs.

pub mod crypto;

pub const RECORD_HEADER_LEN: usize = 5;
pub const RECORD_MAX_SIZE: usize = (1 << 14) + 2048;
pub const MAX_FRAGMENT_LEN: usize = 1 << 14;
pub const TLS_VERSION_1_2: u16 = 0x0303;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecordType {
    Handshake,
    ApplicationData,
    ChangeCipherSpec,
    Alert,
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(x: u8) -> Self {
        match x {
            20 => Self::ChangeCipherSpec,
            21 => Self::Alert,
            22 => Self::Handshake,
            23 => Self::ApplicationData,
            _ => RecordType::Other(x),
        }
    }
}

impl From<RecordType> for u8 {
    fn from(x: RecordType) -> Self {
        match x {
            RecordType::ChangeCipherSpec => 20,
            RecordType::Alert => 21,
            RecordType::Handshake => 22,
            RecordType::ApplicationData => 23,
            RecordType::Other(x) => x,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: RecordType,
    pub version: u16,
    pub size: usize,
}

impl RecordHeader {
    /// Parse the header at the start of `buf`, if `buf` is long enough to hold one.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let raw: &[u8; RECORD_HEADER_LEN] = buf.get(0..RECORD_HEADER_LEN)?.try_into().ok()?;
        Some(RecordHeader {
            record_type: RecordType::from(raw[0]),
            version: u16::from_be_bytes([raw[1], raw[2]]),
            size: usize::from(u16::from_be_bytes([raw[3], raw[4]])),
        })
    }

    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        debug_assert!(self.size <= usize::from(u16::MAX));
        let size = (self.size as u16).to_be_bytes();
        let version = self.version.to_be_bytes();
        [
            self.record_type.into(),
            version[0],
            version[1],
            size[0],
            size[1],
        ]
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum AesSize {
    Aes128,
    Aes256,
}

impl From<AesSize> for usize {
    fn from(x: AesSize) -> Self {
        match x {
            AesSize::Aes256 => 32,
            AesSize::Aes128 => 16,
        }
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum CBCMac {
    SHA256,
    SHA1,
}

impl CBCMac {
    pub fn size(&self) -> usize {
        match self {
            CBCMac::SHA1 => 20,
            CBCMac::SHA256 => 32,
        }
    }
}

impl From<CBCMac> for ring::hmac::Algorithm {
    fn from(x: CBCMac) -> Self {
        match x {
            CBCMac::SHA1 => ring::hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            CBCMac::SHA256 => ring::hmac::HMAC_SHA256,
        }
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum AesMode {
    GCM,
    CBC(CBCMac),
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Cipher {
    Aes(AesSize, AesMode),
    ChaCha20Poly1305,
}

impl Cipher {
    /// The size of each direction's MAC key in the key block.
    pub fn mac_key_size(&self) -> usize {
        match self {
            Cipher::Aes(_, AesMode::CBC(mac)) => mac.size(),
            _ => 0,
        }
    }

    /// The size of each direction's bulk encryption key in the key block.
    pub fn key_size(&self) -> usize {
        match self {
            Cipher::Aes(size, _) => (*size).into(),
            Cipher::ChaCha20Poly1305 => 32,
        }
    }

    /// The size of each direction's IV in the key block.
    ///
    /// TLS 1.2 CBC suites send a fresh IV with every record, so nothing from the key block is
    /// needed.
    pub fn fixed_iv_size(&self) -> usize {
        match self {
            Cipher::Aes(_, AesMode::CBC(_)) => 0,
            Cipher::Aes(_, AesMode::GCM) => 4,
            Cipher::ChaCha20Poly1305 => 12,
        }
    }

    pub fn explicit_nonce_size(&self) -> usize {
        match self {
            Cipher::Aes(_, AesMode::GCM) => 8,
            Cipher::Aes(_, AesMode::CBC(_)) => 16,
            Cipher::ChaCha20Poly1305 => 0,
        }
    }

    /// The size of the AEAD tag, or of the MAC for CBC suites.
    pub fn auth_tag_size(&self) -> usize {
        match self {
            Cipher::Aes(_, AesMode::CBC(mac)) => mac.size(),
            Cipher::Aes(_, AesMode::GCM) | Cipher::ChaCha20Poly1305 => 16,
        }
    }

    pub fn key_block_size(&self) -> usize {
        2 * (self.mac_key_size() + self.key_size() + self.fixed_iv_size())
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Prf {
    SHA256,
    SHA384,
}

impl From<Prf> for ring::hmac::Algorithm {
    fn from(x: Prf) -> Self {
        match x {
            Prf::SHA256 => ring::hmac::HMAC_SHA256,
            Prf::SHA384 => ring::hmac::HMAC_SHA384,
        }
    }
}

/// A TLS 1.2 cipher suite. Only the record protection and PRF matter to us, so key exchange and
/// signature algorithms are collapsed together.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct CipherSuite {
    pub cipher: Cipher,
    pub prf_hash: Prf,
    /// The 16-bit cipher suite number, as it appears on the wire
    pub raw: u16,
}

impl From<CipherSuite> for u16 {
    fn from(cs: CipherSuite) -> Self {
        cs.raw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownCipherSuite(pub u16);

impl std::fmt::Display for UnknownCipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Unknown cipher suite: {:04X}", self.0)
    }
}

impl std::error::Error for UnknownCipherSuite {}

const TLS_RSA_WITH_AES_128_CBC_SHA: u16 = 0x002f;
const TLS_DHE_RSA_WITH_AES_128_CBC_SHA: u16 = 0x0033;
const TLS_RSA_WITH_AES_256_CBC_SHA: u16 = 0x0035;
const TLS_DHE_RSA_WITH_AES_256_CBC_SHA: u16 = 0x0039;
const TLS_RSA_WITH_AES_128_CBC_SHA256: u16 = 0x003c;
const TLS_RSA_WITH_AES_256_CBC_SHA256: u16 = 0x003d;
const TLS_DHE_RSA_WITH_AES_128_CBC_SHA256: u16 = 0x0067;
const TLS_DHE_RSA_WITH_AES_256_CBC_SHA256: u16 = 0x006b;
const TLS_RSA_WITH_AES_128_GCM_SHA256: u16 = 0x009c;
const TLS_RSA_WITH_AES_256_GCM_SHA384: u16 = 0x009d;
const TLS_DHE_RSA_WITH_AES_128_GCM_SHA256: u16 = 0x009e;
const TLS_DHE_RSA_WITH_AES_256_GCM_SHA384: u16 = 0x009f;
const TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA: u16 = 0xc009;
const TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA: u16 = 0xc00a;
const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA: u16 = 0xc013;
const TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA: u16 = 0xc014;
const TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256: u16 = 0xc023;
const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256: u16 = 0xc027;
const TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256: u16 = 0xc02b;
const TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384: u16 = 0xc02c;
const TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256: u16 = 0xc02f;
const TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384: u16 = 0xc030;
const TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305: u16 = 0xcca8;
const TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305: u16 = 0xcca9;
const TLS_DHE_RSA_WITH_CHACHA20_POLY1305: u16 = 0xccaa;

/// Every cipher suite that `CipherSuite::try_from` accepts.
pub const SUPPORTED_CIPHER_SUITES: &[u16] = &[
    TLS_RSA_WITH_AES_128_CBC_SHA,
    TLS_DHE_RSA_WITH_AES_128_CBC_SHA,
    TLS_RSA_WITH_AES_256_CBC_SHA,
    TLS_DHE_RSA_WITH_AES_256_CBC_SHA,
    TLS_RSA_WITH_AES_128_CBC_SHA256,
    TLS_RSA_WITH_AES_256_CBC_SHA256,
    TLS_DHE_RSA_WITH_AES_128_CBC_SHA256,
    TLS_DHE_RSA_WITH_AES_256_CBC_SHA256,
    TLS_RSA_WITH_AES_128_GCM_SHA256,
    TLS_RSA_WITH_AES_256_GCM_SHA384,
    TLS_DHE_RSA_WITH_AES_128_GCM_SHA256,
    TLS_DHE_RSA_WITH_AES_256_GCM_SHA384,
    TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
    TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA,
    TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
    TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
    TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256,
    TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256,
    TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305,
    TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305,
    TLS_DHE_RSA_WITH_CHACHA20_POLY1305,
];

/// TLS 1.3 suites live in `0x13XX`. They can't be forged from a TLS 1.2 master secret.
pub fn is_tls13_cipher_suite(raw: u16) -> bool {
    raw >> 8 == 0x13
}

impl TryFrom<u16> for CipherSuite {
    type Error = UnknownCipherSuite;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        use AesMode::*;
        use AesSize::*;
        use Cipher::*;
        use Prf::*;

        let (cipher, prf_hash) = match raw {
            TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305
            | TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305
            | TLS_DHE_RSA_WITH_CHACHA20_POLY1305 => (ChaCha20Poly1305, SHA256),
            TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
            | TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
            | TLS_DHE_RSA_WITH_AES_128_GCM_SHA256
            | TLS_RSA_WITH_AES_128_GCM_SHA256 => (Aes(Aes128, GCM), SHA256),
            TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384
            | TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384
            | TLS_DHE_RSA_WITH_AES_256_GCM_SHA384
            | TLS_RSA_WITH_AES_256_GCM_SHA384 => (Aes(Aes256, GCM), SHA384),
            TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256
            | TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256
            | TLS_DHE_RSA_WITH_AES_128_CBC_SHA256
            | TLS_RSA_WITH_AES_128_CBC_SHA256 => (Aes(Aes128, CBC(CBCMac::SHA256)), SHA256),
            TLS_DHE_RSA_WITH_AES_256_CBC_SHA256 | TLS_RSA_WITH_AES_256_CBC_SHA256 => {
                (Aes(Aes256, CBC(CBCMac::SHA256)), SHA256)
            }
            TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
            | TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA
            | TLS_DHE_RSA_WITH_AES_128_CBC_SHA
            | TLS_RSA_WITH_AES_128_CBC_SHA => (Aes(Aes128, CBC(CBCMac::SHA1)), SHA256),
            TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA
            | TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA
            | TLS_DHE_RSA_WITH_AES_256_CBC_SHA
            | TLS_RSA_WITH_AES_256_CBC_SHA => (Aes(Aes256, CBC(CBCMac::SHA1)), SHA256),
            _ => return Err(UnknownCipherSuite(raw)),
        };
        Ok(CipherSuite {
            cipher,
            prf_hash,
            raw,
        })
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub fn increment(&mut self) {
        // Golang also panics here. It's probably safe for us to do so as well.
        self.0 = self.0.checked_add(1).expect("TLS sequence number overflow");
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ClientRandom(pub [u8; 32]);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ServerRandom(pub [u8; 32]);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    pub const CLOSE_NOTIFY: Alert = Alert {
        level: AlertLevel::Warning,
        description: AlertDescription::CloseNotify,
    };
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AlertLevel {
    Warning,
    Fatal,
    Unsupported(u8),
}

/// We only ever need to recognize `close_notify`. The others are named to make logs readable.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AlertDescription {
    CloseNotify,
    UnexpectedMessage,
    BadRecordMAC,
    RecordOverflow,
    HandshakeFailure,
    DecodeError,
    DecryptError,
    InternalError,
    UserCanceled,
    Other(u8),
}

impl From<u8> for AlertDescription {
    fn from(x: u8) -> Self {
        match x {
            0 => AlertDescription::CloseNotify,
            10 => AlertDescription::UnexpectedMessage,
            20 => AlertDescription::BadRecordMAC,
            22 => AlertDescription::RecordOverflow,
            40 => AlertDescription::HandshakeFailure,
            50 => AlertDescription::DecodeError,
            51 => AlertDescription::DecryptError,
            80 => AlertDescription::InternalError,
            90 => AlertDescription::UserCanceled,
            x => AlertDescription::Other(x),
        }
    }
}

impl From<AlertDescription> for u8 {
    fn from(desc: AlertDescription) -> u8 {
        match desc {
            AlertDescription::CloseNotify => 0,
            AlertDescription::UnexpectedMessage => 10,
            AlertDescription::BadRecordMAC => 20,
            AlertDescription::RecordOverflow => 22,
            AlertDescription::HandshakeFailure => 40,
            AlertDescription::DecodeError => 50,
            AlertDescription::DecryptError => 51,
            AlertDescription::InternalError => 80,
            AlertDescription::UserCanceled => 90,
            AlertDescription::Other(x) => x,
        }
    }
}

impl From<AlertLevel> for u8 {
    fn from(level: AlertLevel) -> u8 {
        match level {
            AlertLevel::Warning => 1,
            AlertLevel::Fatal => 2,
            AlertLevel::Unsupported(x) => x,
        }
    }
}

impl From<u8> for AlertLevel {
    fn from(x: u8) -> Self {
        match x {
            1 => AlertLevel::Warning,
            2 => AlertLevel::Fatal,
            x => AlertLevel::Unsupported(x),
        }
    }
}

impl From<[u8; 2]> for Alert {
    fn from(raw: [u8; 2]) -> Self {
        Alert {
            level: raw[0].into(),
            description: raw[1].into(),
        }
    }
}

impl From<Alert> for [u8; 2] {
    fn from(alert: Alert) -> Self {
        [alert.level.into(), alert.description.into()]
    }
}
