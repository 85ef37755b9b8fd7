//! Turning a detected tag's shared secret into Diffie-Hellman and TLS key material.
//!
//! Both ends of a covert flow run these derivations independently. Nothing here is random: the
//! station and the client have to land on bit-identical keys without exchanging another message.

use crate::{
    errors::*,
    tls::{crypto::evaluate_prf, CipherSuite, ClientRandom, ServerRandom},
};
use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use snafu::ensure;

/// Domain separation string for the private key generator.
pub const PRG_LABEL: &[u8] = b"Telex PRG";
pub const DH_PRIVATE_KEY_BITS: u64 = 1023;
const PRG_OUTPUT_LEN: usize = 128;
const SHA256_OUTPUT_LEN: usize = 32;

/// The 16-byte secret that the key-management side associates with a covert tag.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SharedSecret(pub [u8; 16]);

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "<SharedSecret>")
    }
}

/// A Diffie-Hellman private exponent.
#[derive(Clone, PartialEq, Eq)]
pub struct DhPrivateKey(BigUint);

impl std::fmt::Debug for DhPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "<DhPrivateKey {} bits>", self.0.bits())
    }
}

impl DhPrivateKey {
    pub fn from_biguint(x: BigUint) -> Self {
        DhPrivateKey(x)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn to_bytes_be(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }
}

/// Derive the 1023-bit DH private key for a shared secret.
///
/// This is Krawczyk's PRG, with the shared secret as the PRK and [`PRG_LABEL`] as the context:
/// $`x_0`$ is empty and $`x_{i+1} = \mathrm{HMAC}_{secret}(x_i \| label \| i)`$, where `i` is a
/// 32-bit little-endian counter. The four outputs $`x_1 \ldots x_4`$ are concatenated into a
/// 128-byte big-endian integer. Bit 1022 is then set and bit 1023 cleared, the same convention as
/// OpenSSL's `BN_rand(1023, 0, 0)`, so the result always lies in $`[2^{1022}, 2^{1023})`$.
pub fn derive_dh_private(shared_secret: &SharedSecret) -> DhPrivateKey {
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, &shared_secret.0[..]);
    let mut buf = [0; PRG_OUTPUT_LEN];
    let mut previous: Option<ring::hmac::Tag> = None;
    for (i, chunk) in buf.chunks_exact_mut(SHA256_OUTPUT_LEN).enumerate() {
        let mut ctx = ring::hmac::Context::with_key(&key);
        if let Some(previous) = previous.as_ref() {
            ctx.update(previous.as_ref());
        }
        ctx.update(PRG_LABEL);
        ctx.update(&(i as u32).to_le_bytes());
        let tag = ctx.sign();
        chunk.copy_from_slice(tag.as_ref());
        previous = Some(tag);
    }
    buf[0] |= 0x40;
    buf[0] &= 0x7f;
    DhPrivateKey(BigUint::from_bytes_be(&buf[..]))
}

/// A Diffie-Hellman group: a prime modulus and a generator.
#[derive(Clone, PartialEq, Eq)]
pub struct DhGroup {
    modulus: BigUint,
    generator: BigUint,
}

impl std::fmt::Debug for DhGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "DhGroup {{ modulus: <{} bits>, generator: {} }}",
            self.modulus.bits(),
            self.generator
        )
    }
}

lazy_static! {
    static ref OAKLEY_GROUP_2: DhGroup = DhGroup::from_hex(
        "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74020BBEA63B139B22514A0879\
         8E3404DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B\
         0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF",
    );
    static ref MODP_GROUP_14: DhGroup = DhGroup::from_hex(
        "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74020BBEA63B139B22514A0879\
         8E3404DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B\
         0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF0598DA4836\
         1C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D670C354E4ABC9804\
         F1746C08CA18217C32905E462E36CE3BE39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF6\
         955817183995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
    );
}

impl DhGroup {
    // Only used for the hard-coded RFC groups above.
    fn from_hex(modulus: &str) -> DhGroup {
        DhGroup {
            modulus: BigUint::parse_bytes(modulus.as_bytes(), 16)
                .expect("the RFC group moduli are valid hex"),
            generator: BigUint::from(2_u32),
        }
    }

    /// The 1024-bit MODP group from RFC 2409 (Oakley group 2).
    pub fn oakley_group_2() -> &'static DhGroup {
        &OAKLEY_GROUP_2
    }

    /// The 2048-bit MODP group from RFC 3526 (group 14).
    pub fn modp_group_14() -> &'static DhGroup {
        &MODP_GROUP_14
    }

    /// A custom group. The modulus isn't checked for primality.
    pub fn new(modulus: BigUint, generator: BigUint) -> Result<DhGroup> {
        ensure!(modulus > BigUint::from(3_u32), ModulusOutOfRangeSnafu);
        ensure!(
            in_open_range(&generator, &modulus),
            GeneratorOutOfRangeSnafu
        );
        Ok(DhGroup { modulus, generator })
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// The length of the modulus, and so of every shared secret, in bytes.
    pub fn byte_len(&self) -> usize {
        ((self.modulus.bits() + 7) / 8) as usize
    }

    pub fn compute_shared_secret(
        &self,
        priv_key: &DhPrivateKey,
        peer_public: &BigUint,
    ) -> Result<Vec<u8>> {
        compute_shared_secret(priv_key, &self.modulus, peer_public)
    }

    pub fn compute_public_value(&self, priv_key: &DhPrivateKey) -> Result<BigUint> {
        compute_public_value(priv_key, self)
    }
}

/// Is `1 < x < modulus - 1`?
fn in_open_range(x: &BigUint, modulus: &BigUint) -> bool {
    *x > BigUint::one() && *x < modulus - BigUint::one()
}

/// `peer_public ^ priv_key mod modulus`, as a big-endian byte string left-padded to the length
/// of `modulus`.
///
/// Degenerate inputs are refused rather than exponentiated: the modulus must exceed 3, the peer's
/// value must lie strictly between 1 and `modulus - 1`, and the exponent must be non-zero.
pub fn compute_shared_secret(
    priv_key: &DhPrivateKey,
    modulus: &BigUint,
    peer_public: &BigUint,
) -> Result<Vec<u8>> {
    ensure!(*modulus > BigUint::from(3_u32), ModulusOutOfRangeSnafu);
    ensure!(
        in_open_range(peer_public, modulus),
        PeerPublicValueOutOfRangeSnafu
    );
    ensure!(!priv_key.0.is_zero(), PrivateKeyOutOfRangeSnafu);
    let shared = peer_public.modpow(&priv_key.0, modulus);
    let digits = shared.to_bytes_be();
    let len = ((modulus.bits() + 7) / 8) as usize;
    let mut out = vec![0; len];
    out[len - digits.len()..].copy_from_slice(&digits[..]);
    Ok(out)
}

/// `g ^ priv_key mod p`: the value the mirrored side sends to its peer.
pub fn compute_public_value(priv_key: &DhPrivateKey, group: &DhGroup) -> Result<BigUint> {
    ensure!(!priv_key.0.is_zero(), PrivateKeyOutOfRangeSnafu);
    Ok(group.generator.modpow(&priv_key.0, &group.modulus))
}

/// The TLS 1.2 master secret: `PRF(premaster, "master secret", client_random || server_random)`,
/// truncated to 48 bytes.
pub fn derive_master_secret(
    premaster_secret: &[u8],
    client_random: &ClientRandom,
    server_random: &ServerRandom,
    suite: &CipherSuite,
) -> [u8; 48] {
    let mut seed = [0; 64];
    seed[..32].copy_from_slice(&client_random.0[..]);
    seed[32..].copy_from_slice(&server_random.0[..]);
    let mut out = [0; 48];
    evaluate_prf(
        suite.prf_hash,
        &mut out[..],
        premaster_secret,
        b"master secret",
        &seed[..],
    );
    out
}
