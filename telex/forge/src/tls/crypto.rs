use crate::{
    errors::*,
    tls::{AesMode, AesSize, CBCMac, Cipher, CipherSuite, ClientRandom, Prf, RecordHeader},
    tls::{RecordType, SequenceNumber, ServerRandom, RECORD_HEADER_LEN, TLS_VERSION_1_2},
};
use aes::cipher::{generic_array::GenericArray, KeyInit};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, InnerIvInit};
use ring::rand::SecureRandom;
use smallvec::SmallVec;
use snafu::ensure;
use subtle::ConstantTimeEq;

const AES_BLOCK_SIZE: usize = 16;
const AEAD_TAG_SIZE: usize = 16;

/// The TLS 1.2 PRF: P_hash with seed = label || seed.
pub(crate) fn evaluate_prf(
    prf: Prf,
    mut result: &mut [u8],
    secret: &[u8],
    label: &[u8],
    seed: &[u8],
) {
    let key = ring::hmac::Key::new(prf.into(), secret);
    let initial_ctx = ring::hmac::Context::with_key(&key);
    let mut ctx = initial_ctx.clone();
    ctx.update(label);
    ctx.update(seed);
    let mut a = ctx.sign();
    while !result.is_empty() {
        let mut ctx = initial_ctx.clone();
        ctx.update(a.as_ref());
        ctx.update(label);
        ctx.update(seed);
        let b = ctx.sign();
        let delta = result.len().min(b.as_ref().len());
        result[0..delta].copy_from_slice(&b.as_ref()[0..delta]);
        result = &mut result[delta..];
        let mut ctx = initial_ctx.clone();
        ctx.update(a.as_ref());
        a = ctx.sign();
    }
}

/// An expanded AES key, reused to start a fresh CBC chain for every record.
#[derive(Clone)]
enum RawAesKey {
    Aes128(aes::Aes128),
    Aes256(aes::Aes256),
}

impl RawAesKey {
    fn new(size: AesSize, key_bytes: &[u8]) -> Result<Self> {
        let key = match size {
            AesSize::Aes128 => aes::Aes128::new_from_slice(key_bytes).map(RawAesKey::Aes128),
            AesSize::Aes256 => aes::Aes256::new_from_slice(key_bytes).map(RawAesKey::Aes256),
        };
        key.ok().ok_or(StationError::KeySetupFailed)
    }

    /// CBC-encrypt `data` in place. `data` must already be padded to a whole number of blocks.
    fn cbc_encrypt(&self, iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]) -> Result<()> {
        let iv = GenericArray::from_slice(&iv[..]);
        let len = data.len();
        let sealed = match self {
            RawAesKey::Aes128(key) => cbc::Encryptor::<aes::Aes128>::inner_iv_init(key.clone(), iv)
                .encrypt_padded_mut::<NoPadding>(data, len)
                .map(|_| ()),
            RawAesKey::Aes256(key) => cbc::Encryptor::<aes::Aes256>::inner_iv_init(key.clone(), iv)
                .encrypt_padded_mut::<NoPadding>(data, len)
                .map(|_| ()),
        };
        sealed.ok().ok_or(StationError::SealFailed)
    }

    /// CBC-decrypt `data` in place. Returns `None` if `data` isn't a whole number of blocks.
    fn cbc_decrypt(&self, iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]) -> Option<()> {
        let iv = GenericArray::from_slice(&iv[..]);
        let opened = match self {
            RawAesKey::Aes128(key) => cbc::Decryptor::<aes::Aes128>::inner_iv_init(key.clone(), iv)
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
            RawAesKey::Aes256(key) => cbc::Decryptor::<aes::Aes256>::inner_iv_init(key.clone(), iv)
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
        };
        opened.ok()
    }
}

enum RecordProtectionInner {
    AesCbc {
        aes_key: RawAesKey,
        mac: CBCMac,
        mac_key: ring::hmac::Key,
    },
    AesGcm {
        nonce_prefix: [u8; 4],
        ring_key: ring::aead::LessSafeKey,
    },
    ChaCha20Poly1305 {
        iv: [u8; 12],
        ring_key: ring::aead::LessSafeKey,
    },
}

/// Creates a new GCM nonce for use in TLS 1.2.
///
/// TLS 1.2 uses a 4-byte prefix concatenated with an 8-byte explicit value to construct the GCM
/// nonce.
fn new_gcm_nonce_tls12(nonce_prefix: &[u8; 4], explicit_nonce: &[u8; 8]) -> [u8; 12] {
    let mut nonce = [0; 12];
    nonce[..4].copy_from_slice(nonce_prefix);
    nonce[4..].copy_from_slice(explicit_nonce);
    nonce
}

/// Creates a new nonce by XORing the sequence number into the IV, as ChaCha20Poly1305 does in
/// TLS 1.2.
fn tls_seq_nonce(iv: &[u8; 12], sequence_number: SequenceNumber) -> [u8; 12] {
    let mut nonce = [0; 12];
    nonce[4..12].copy_from_slice(&sequence_number.0.to_be_bytes()[..]);
    for (dst, src) in nonce.iter_mut().zip(iv.iter()) {
        *dst ^= *src;
    }
    nonce
}

/// The TLS 1.2 pseudo-header which is MACed (CBC) or used as AEAD additional data.
pub(crate) fn additional_data(
    seqnum: SequenceNumber,
    record_type: RecordType,
    plaintext_len: usize,
) -> [u8; 13] {
    let mut aad = [0; 13];
    aad[0..8].copy_from_slice(&seqnum.0.to_be_bytes());
    aad[8] = record_type.into();
    aad[9..11].copy_from_slice(&TLS_VERSION_1_2.to_be_bytes());
    aad[11..13].copy_from_slice(&(plaintext_len as u16).to_be_bytes());
    aad
}

fn new_ring_aead_key(
    algorithm: &'static ring::aead::Algorithm,
    key_bytes: &[u8],
) -> Result<ring::aead::LessSafeKey> {
    let key = ring::aead::UnboundKey::new(algorithm, key_bytes)
        .ok()
        .ok_or(StationError::KeySetupFailed)?;
    Ok(ring::aead::LessSafeKey::new(key))
}

/// One direction's record protection: the keys, and how to apply them to a TLS 1.2 record.
pub struct RecordProtection {
    cipher: Cipher,
    inner: RecordProtectionInner,
}

impl std::fmt::Debug for RecordProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "<RecordProtection {:?}>", self.cipher)
    }
}

impl RecordProtection {
    pub fn new_aes_cbc(
        size: AesSize,
        mac: CBCMac,
        mac_key: &[u8],
        key_bytes: &[u8],
    ) -> Result<Self> {
        ensure!(
            key_bytes.len() == usize::from(size) && mac_key.len() == mac.size(),
            KeySetupFailedSnafu
        );
        Ok(RecordProtection {
            cipher: Cipher::Aes(size, AesMode::CBC(mac)),
            inner: RecordProtectionInner::AesCbc {
                aes_key: RawAesKey::new(size, key_bytes)?,
                mac,
                mac_key: ring::hmac::Key::new(mac.into(), mac_key),
            },
        })
    }

    pub fn new_aes_gcm(size: AesSize, nonce_prefix: [u8; 4], key_bytes: &[u8]) -> Result<Self> {
        ensure!(key_bytes.len() == usize::from(size), KeySetupFailedSnafu);
        let algorithm = match size {
            AesSize::Aes128 => &ring::aead::AES_128_GCM,
            AesSize::Aes256 => &ring::aead::AES_256_GCM,
        };
        Ok(RecordProtection {
            cipher: Cipher::Aes(size, AesMode::GCM),
            inner: RecordProtectionInner::AesGcm {
                nonce_prefix,
                ring_key: new_ring_aead_key(algorithm, key_bytes)?,
            },
        })
    }

    pub fn new_chacha20_poly1305(iv: [u8; 12], key: [u8; 32]) -> Result<Self> {
        Ok(RecordProtection {
            cipher: Cipher::ChaCha20Poly1305,
            inner: RecordProtectionInner::ChaCha20Poly1305 {
                iv,
                ring_key: new_ring_aead_key(&ring::aead::CHACHA20_POLY1305, &key[..])?,
            },
        })
    }

    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    /// Protect `plaintext` as a record with sequence number `seq`, and append the whole record
    /// (header included) to `out`.
    ///
    /// If this fails, `out` is left as it was.
    pub fn seal(
        &self,
        seq: SequenceNumber,
        record_type: RecordType,
        plaintext: &[u8],
        rng: &dyn SecureRandom,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let start = out.len();
        let result = self.seal_inner(seq, record_type, plaintext, rng, out);
        if result.is_err() {
            out.truncate(start);
        }
        result
    }

    fn seal_inner(
        &self,
        seq: SequenceNumber,
        record_type: RecordType,
        plaintext: &[u8],
        rng: &dyn SecureRandom,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let aad = additional_data(seq, record_type, plaintext.len());
        let fragment_len = match &self.inner {
            RecordProtectionInner::AesCbc { mac, .. } => {
                let unpadded = plaintext.len() + mac.size() + 1;
                let padded = (unpadded + AES_BLOCK_SIZE - 1) / AES_BLOCK_SIZE * AES_BLOCK_SIZE;
                AES_BLOCK_SIZE + padded
            }
            _ => self.cipher.explicit_nonce_size() + plaintext.len() + AEAD_TAG_SIZE,
        };
        out.reserve(RECORD_HEADER_LEN + fragment_len);
        out.extend_from_slice(
            &RecordHeader {
                record_type,
                version: TLS_VERSION_1_2,
                size: fragment_len,
            }
            .encode(),
        );
        match &self.inner {
            RecordProtectionInner::AesCbc {
                aes_key, mac_key, ..
            } => {
                let mut iv = [0; AES_BLOCK_SIZE];
                rng.fill(&mut iv[..])
                    .ok()
                    .ok_or(StationError::RandomnessUnavailable)?;
                let mut ctx = ring::hmac::Context::with_key(mac_key);
                ctx.update(&aad);
                ctx.update(plaintext);
                let tag = ctx.sign();
                out.extend_from_slice(&iv);
                let body_start = out.len();
                out.extend_from_slice(plaintext);
                out.extend_from_slice(tag.as_ref());
                // Each padding byte, including the length byte itself, holds the padding length.
                let padding_len = AES_BLOCK_SIZE - (out.len() - body_start) % AES_BLOCK_SIZE;
                out.resize(out.len() + padding_len, (padding_len - 1) as u8);
                aes_key.cbc_encrypt(&iv, &mut out[body_start..])?;
            }
            RecordProtectionInner::AesGcm {
                nonce_prefix,
                ring_key,
            } => {
                let explicit_nonce = seq.0.to_be_bytes();
                let nonce = new_gcm_nonce_tls12(nonce_prefix, &explicit_nonce);
                out.extend_from_slice(&explicit_nonce);
                seal_aead(ring_key, nonce, &aad, plaintext, out)?;
            }
            RecordProtectionInner::ChaCha20Poly1305 { iv, ring_key } => {
                let nonce = tls_seq_nonce(iv, seq);
                seal_aead(ring_key, nonce, &aad, plaintext, out)?;
            }
        }
        Ok(())
    }

    /// Authenticate and decrypt a record's fragment in place, returning the plaintext.
    pub fn open<'a>(
        &self,
        seq: SequenceNumber,
        header: &RecordHeader,
        fragment: &'a mut [u8],
    ) -> Result<&'a [u8]> {
        match &self.inner {
            RecordProtectionInner::AesCbc {
                aes_key,
                mac,
                mac_key,
            } => {
                // IV, then at least one block holding the MAC and padding length byte.
                let minimum = AES_BLOCK_SIZE
                    + (mac.size() + 1 + AES_BLOCK_SIZE - 1) / AES_BLOCK_SIZE * AES_BLOCK_SIZE;
                ensure!(
                    fragment.len() >= minimum,
                    RecordTooShortSnafu {
                        actual: fragment.len(),
                        minimum,
                    }
                );
                ensure!(
                    fragment.len() % AES_BLOCK_SIZE == 0,
                    BadRecordMacSnafu {
                        sequence_number: seq.0,
                    }
                );
                let (iv, body) = fragment.split_at_mut(AES_BLOCK_SIZE);
                let mut iv_block = [0; AES_BLOCK_SIZE];
                iv_block.copy_from_slice(iv);
                aes_key
                    .cbc_decrypt(&iv_block, body)
                    .ok_or(StationError::BadRecordMac {
                        sequence_number: seq.0,
                    })?;
                let plaintext_len = cbc_check_padding_and_mac(
                    mac_key,
                    mac.size(),
                    seq,
                    header.record_type,
                    body,
                )
                .ok_or(StationError::BadRecordMac {
                    sequence_number: seq.0,
                })?;
                Ok(&body[..plaintext_len])
            }
            RecordProtectionInner::AesGcm {
                nonce_prefix,
                ring_key,
            } => {
                let minimum = 8 + AEAD_TAG_SIZE;
                ensure!(
                    fragment.len() >= minimum,
                    RecordTooShortSnafu {
                        actual: fragment.len(),
                        minimum,
                    }
                );
                let (explicit_nonce, body) = fragment.split_at_mut(8);
                let mut explicit = [0; 8];
                explicit.copy_from_slice(explicit_nonce);
                let nonce = new_gcm_nonce_tls12(nonce_prefix, &explicit);
                let aad = additional_data(seq, header.record_type, body.len() - AEAD_TAG_SIZE);
                open_aead(ring_key, nonce, &aad, seq, body)
            }
            RecordProtectionInner::ChaCha20Poly1305 { iv, ring_key } => {
                ensure!(
                    fragment.len() >= AEAD_TAG_SIZE,
                    RecordTooShortSnafu {
                        actual: fragment.len(),
                        minimum: AEAD_TAG_SIZE,
                    }
                );
                let nonce = tls_seq_nonce(iv, seq);
                let aad = additional_data(seq, header.record_type, fragment.len() - AEAD_TAG_SIZE);
                open_aead(ring_key, nonce, &aad, seq, fragment)
            }
        }
    }
}

fn seal_aead(
    ring_key: &ring::aead::LessSafeKey,
    nonce: [u8; 12],
    aad: &[u8],
    plaintext: &[u8],
    out: &mut Vec<u8>,
) -> Result<()> {
    let start = out.len();
    out.extend_from_slice(plaintext);
    let tag = ring_key
        .seal_in_place_separate_tag(
            ring::aead::Nonce::assume_unique_for_key(nonce),
            ring::aead::Aad::from(aad),
            &mut out[start..],
        )
        .ok()
        .ok_or(StationError::SealFailed)?;
    out.extend_from_slice(tag.as_ref());
    Ok(())
}

fn open_aead<'a>(
    ring_key: &ring::aead::LessSafeKey,
    nonce: [u8; 12],
    aad: &[u8],
    seq: SequenceNumber,
    body: &'a mut [u8],
) -> Result<&'a [u8]> {
    let plaintext = ring_key
        .open_in_place(
            ring::aead::Nonce::assume_unique_for_key(nonce),
            ring::aead::Aad::from(aad),
            body,
        )
        .ok()
        .ok_or(StationError::BadRecordMac {
            sequence_number: seq.0,
        })?;
    Ok(plaintext)
}

/// Check the padding and MAC of a decrypted CBC record body, returning the plaintext length.
///
/// The padding and MAC comparisons are constant-time, but the HMAC itself still runs over a
/// length that depends on the padding.
fn cbc_check_padding_and_mac(
    mac_key: &ring::hmac::Key,
    mac_size: usize,
    seq: SequenceNumber,
    record_type: RecordType,
    body: &[u8],
) -> Option<usize> {
    let padding_len = usize::from(*body.last()?);
    let mut padding_ok = subtle::Choice::from(u8::from(padding_len + 1 + mac_size <= body.len()));
    let padding_len = if bool::from(padding_ok) { padding_len } else { 0 };
    let padding_start = body.len() - 1 - padding_len;
    for byte in body[padding_start..body.len() - 1].iter() {
        padding_ok &= byte.ct_eq(&(padding_len as u8));
    }
    let plaintext_len = padding_start - mac_size;
    let mut ctx = ring::hmac::Context::with_key(mac_key);
    ctx.update(&additional_data(seq, record_type, plaintext_len));
    ctx.update(&body[..plaintext_len]);
    let expected = ctx.sign();
    let mac_ok = expected
        .as_ref()
        .ct_eq(&body[plaintext_len..padding_start]);
    if bool::from(padding_ok & mac_ok) {
        Some(plaintext_len)
    } else {
        None
    }
}

/// The record protection for both directions of a connection.
pub struct DerivedKeys {
    pub server_to_client: RecordProtection,
    pub client_to_server: RecordProtection,
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "<DerivedKeys>")
    }
}

/// The key block, already cut into its six pieces, in the order in which TLS 1.2 lays them out.
struct KeyBlock {
    bytes: SmallVec<[u8; 128]>,
    mac_len: usize,
    key_len: usize,
    iv_len: usize,
}

impl KeyBlock {
    fn piece(&self, index: usize, len: usize) -> &[u8] {
        let start = 2 * self.mac_len * usize::from(index >= 2)
            + 2 * self.key_len * usize::from(index >= 4)
            + len * (index % 2);
        &self.bytes[start..start + len]
    }
    fn client_mac(&self) -> &[u8] {
        self.piece(0, self.mac_len)
    }
    fn server_mac(&self) -> &[u8] {
        self.piece(1, self.mac_len)
    }
    fn client_key(&self) -> &[u8] {
        self.piece(2, self.key_len)
    }
    fn server_key(&self) -> &[u8] {
        self.piece(3, self.key_len)
    }
    fn client_iv(&self) -> &[u8] {
        self.piece(4, self.iv_len)
    }
    fn server_iv(&self) -> &[u8] {
        self.piece(5, self.iv_len)
    }
}

impl DerivedKeys {
    fn derive_key_block(
        suite: &CipherSuite,
        master_secret: &[u8],
        client_random: &ClientRandom,
        server_random: &ServerRandom,
    ) -> KeyBlock {
        let mut seed = [0; 32 + 32];
        seed[0..32].copy_from_slice(&server_random.0[..]);
        seed[32..64].copy_from_slice(&client_random.0[..]);
        let mut bytes: SmallVec<[u8; 128]> = smallvec::smallvec![0; suite.cipher.key_block_size()];
        evaluate_prf(
            suite.prf_hash,
            &mut bytes[..],
            master_secret,
            b"key expansion",
            &seed[..],
        );
        KeyBlock {
            bytes,
            mac_len: suite.cipher.mac_key_size(),
            key_len: suite.cipher.key_size(),
            iv_len: suite.cipher.fixed_iv_size(),
        }
    }

    pub fn derive_from_tls12(
        suite: &CipherSuite,
        master_secret: &[u8],
        client_random: &ClientRandom,
        server_random: &ServerRandom,
    ) -> Result<DerivedKeys> {
        let block = Self::derive_key_block(suite, master_secret, client_random, server_random);
        Ok(match suite.cipher {
            Cipher::ChaCha20Poly1305 => {
                let iv = |xs: &[u8]| {
                    let mut out = [0; 12];
                    out.copy_from_slice(xs);
                    out
                };
                let key = |xs: &[u8]| {
                    let mut out = [0; 32];
                    out.copy_from_slice(xs);
                    out
                };
                DerivedKeys {
                    server_to_client: RecordProtection::new_chacha20_poly1305(
                        iv(block.server_iv()),
                        key(block.server_key()),
                    )?,
                    client_to_server: RecordProtection::new_chacha20_poly1305(
                        iv(block.client_iv()),
                        key(block.client_key()),
                    )?,
                }
            }
            Cipher::Aes(size, AesMode::GCM) => {
                let prefix = |xs: &[u8]| {
                    let mut out = [0; 4];
                    out.copy_from_slice(xs);
                    out
                };
                DerivedKeys {
                    server_to_client: RecordProtection::new_aes_gcm(
                        size,
                        prefix(block.server_iv()),
                        block.server_key(),
                    )?,
                    client_to_server: RecordProtection::new_aes_gcm(
                        size,
                        prefix(block.client_iv()),
                        block.client_key(),
                    )?,
                }
            }
            Cipher::Aes(size, AesMode::CBC(mac)) => DerivedKeys {
                server_to_client: RecordProtection::new_aes_cbc(
                    size,
                    mac,
                    block.server_mac(),
                    block.server_key(),
                )?,
                client_to_server: RecordProtection::new_aes_cbc(
                    size,
                    mac,
                    block.client_mac(),
                    block.client_key(),
                )?,
            },
        })
    }
}

#[cfg(test)]
impl proptest::prelude::Arbitrary for SequenceNumber {
    type Parameters = ();
    type Strategy = proptest::prelude::BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::prelude::*;
        (0..=0b0011111111111111111111111111111111111111111111111111111111111111_u64)
            .prop_map(SequenceNumber)
            .boxed()
    }
}
