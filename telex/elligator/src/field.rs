//! Arithmetic in the prime field of Curve25519, $`p = 2^{255} - 19`$.
//!
//! None of these operations are constant-time.

use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::{One, Zero};

lazy_static! {
    static ref P: BigUint = (BigUint::one() << 255usize) - BigUint::from(19_u32);
    /// $`(p - 1) / 2`$, the largest "non-negative" field element.
    static ref HALF_P: BigUint = (P.clone() - BigUint::one()) >> 1usize;
    static ref INVERT_EXPONENT: BigUint = P.clone() - BigUint::from(2_u32);
    static ref SQRT_EXPONENT: BigUint = (P.clone() + BigUint::from(3_u32)) >> 3usize;
    static ref SQRT_MINUS_ONE: BigUint =
        BigUint::from(2_u32).modpow(&((P.clone() - BigUint::one()) >> 2usize), &P);
}

/// An element of $`\mathbb{F}_p`$. The wrapped value is always reduced (less than $`p`$).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldElement(BigUint);

impl std::fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "FieldElement({})", hex::encode(self.to_bytes_le()))
    }
}

impl From<u64> for FieldElement {
    fn from(x: u64) -> Self {
        FieldElement::reduce(BigUint::from(x))
    }
}

impl FieldElement {
    pub fn zero() -> Self {
        FieldElement(BigUint::zero())
    }

    pub fn one() -> Self {
        FieldElement(BigUint::one())
    }

    /// Interpret `bytes` as a little-endian integer and reduce it mod $`p`$.
    pub fn from_bytes_le(bytes: &[u8; 32]) -> Self {
        FieldElement::reduce(BigUint::from_bytes_le(&bytes[..]))
    }

    /// Like `from_bytes_le`, but return `None` if the encoded integer isn't already less than
    /// $`p`$.
    pub fn from_canonical_bytes_le(bytes: &[u8; 32]) -> Option<Self> {
        let x = BigUint::from_bytes_le(&bytes[..]);
        if x < *P {
            Some(FieldElement(x))
        } else {
            None
        }
    }

    pub(crate) fn from_biguint(x: BigUint) -> Self {
        FieldElement::reduce(x)
    }

    fn reduce(x: BigUint) -> Self {
        FieldElement(x % &*P)
    }

    /// The 32-byte little-endian encoding of this element.
    pub fn to_bytes_le(&self) -> [u8; 32] {
        let digits = self.0.to_bytes_le();
        let mut out = [0; 32];
        out[..digits.len()].copy_from_slice(&digits[..]);
        out
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Elements above $`(p - 1) / 2`$ are considered negative.
    pub fn is_negative(&self) -> bool {
        self.0 > *HALF_P
    }

    pub(crate) fn exceeds_half_p(x: &BigUint) -> bool {
        *x > *HALF_P
    }

    pub fn add(&self, rhs: &FieldElement) -> FieldElement {
        FieldElement::reduce(&self.0 + &rhs.0)
    }

    pub fn sub(&self, rhs: &FieldElement) -> FieldElement {
        FieldElement::reduce(&self.0 + &*P - &rhs.0)
    }

    pub fn mul(&self, rhs: &FieldElement) -> FieldElement {
        FieldElement::reduce(&self.0 * &rhs.0)
    }

    pub fn square(&self) -> FieldElement {
        self.mul(self)
    }

    pub fn neg(&self) -> FieldElement {
        FieldElement::zero().sub(self)
    }

    /// The multiplicative inverse, via Fermat. The inverse of zero is zero.
    pub fn invert(&self) -> FieldElement {
        FieldElement(self.0.modpow(&INVERT_EXPONENT, &P))
    }

    /// Euler's criterion. Zero counts as a square.
    pub fn is_square(&self) -> bool {
        let legendre = self.0.modpow(&HALF_P, &P);
        legendre.is_zero() || legendre.is_one()
    }

    /// The non-negative square root of `self`, if one exists.
    ///
    /// Since $`p \equiv 5 \pmod 8`$, a candidate root is $`c = a^{(p+3)/8}`$. Either $`c^2 = a`$,
    /// $`c^2 = -a`$ (in which case $`c \sqrt{-1}`$ is a root), or `a` isn't a square.
    pub fn sqrt(&self) -> Option<FieldElement> {
        let candidate = FieldElement(self.0.modpow(&SQRT_EXPONENT, &P));
        let root = if candidate.square() == *self {
            candidate
        } else if candidate.square() == self.neg() {
            candidate.mul(&FieldElement(SQRT_MINUS_ONE.clone()))
        } else {
            return None;
        };
        Some(root.abs())
    }

    /// Pick whichever of `self` and `-self` is non-negative.
    pub fn abs(&self) -> FieldElement {
        if self.is_negative() {
            self.neg()
        } else {
            self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_p_is_2_255_minus_19() {
        let mut expected = [0xff; 32];
        expected[0] = 0xed;
        expected[31] = 0x7f;
        assert_eq!(P.to_bytes_le(), expected.to_vec());
    }

    #[test]
    fn test_sqrt_minus_one() {
        let i = FieldElement(SQRT_MINUS_ONE.clone());
        assert_eq!(i.square(), FieldElement::one().neg());
    }

    #[test]
    fn test_two_is_not_a_square() {
        // The Elligator2 map relies on this.
        assert!(!FieldElement::from(2_u64).is_square());
        assert!(FieldElement::from(4_u64).is_square());
        assert!(FieldElement::zero().is_square());
    }

    #[test]
    fn test_from_bytes_reduces() {
        let p_bytes = {
            let mut xs = [0xff; 32];
            xs[0] = 0xed;
            xs[31] = 0x7f;
            xs
        };
        assert!(FieldElement::from_bytes_le(&p_bytes).is_zero());
        assert_eq!(FieldElement::from_canonical_bytes_le(&p_bytes), None);
    }

    proptest! {
        #[test]
        fn test_square_has_sqrt(bytes in any::<[u8; 32]>()) {
            let x = FieldElement::from_bytes_le(&bytes);
            let root = x.square().sqrt();
            prop_assert_eq!(root, Some(x.abs()));
        }

        #[test]
        fn test_sqrt_squares_back(bytes in any::<[u8; 32]>()) {
            let x = FieldElement::from_bytes_le(&bytes);
            match x.sqrt() {
                Some(root) => {
                    prop_assert!(x.is_square());
                    prop_assert!(!root.is_negative());
                    prop_assert_eq!(root.square(), x);
                }
                None => prop_assert!(!x.is_square()),
            }
        }

        #[test]
        fn test_invert(bytes in any::<[u8; 32]>()) {
            let x = FieldElement::from_bytes_le(&bytes);
            prop_assume!(!x.is_zero());
            prop_assert_eq!(x.mul(&x.invert()), FieldElement::one());
        }

        #[test]
        fn test_add_sub_neg(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let a = FieldElement::from_bytes_le(&a);
            let b = FieldElement::from_bytes_le(&b);
            prop_assert_eq!(a.add(&b).sub(&b), a.clone());
            prop_assert_eq!(a.add(&a.neg()), FieldElement::zero());
        }

        #[test]
        fn test_bytes_roundtrip(bytes in any::<[u8; 32]>()) {
            let x = FieldElement::from_bytes_le(&bytes);
            prop_assert_eq!(FieldElement::from_canonical_bytes_le(&x.to_bytes_le()), Some(x));
        }
    }
}
