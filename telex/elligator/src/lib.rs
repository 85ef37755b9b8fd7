//! Elligator2 over Curve25519.
//!
//! A covert tag is a 32-byte *representative* `r` that looks like uniformly random bytes, but which
//! maps to the x-coordinate of a point on $`y^2 = x^3 + Ax^2 + x`$. Most random strings are still
//! valid representatives, so [`decode`] only rejects the non-canonical half of the input space.
//! Telling tagged flows apart from untagged ones is left to the shared-secret lookup that follows.
//!
//! We use the non-square $`u = 2`$.

use lazy_static::lazy_static;

mod field;

pub use field::FieldElement;

/// The Montgomery coefficient of Curve25519.
pub const CURVE_A: u64 = 486662;

lazy_static! {
    static ref A: FieldElement = FieldElement::from(CURVE_A);
    static ref MINUS_A: FieldElement = A.neg();
    static ref TWO: FieldElement = FieldElement::from(2_u64);
}

/// Mask off bit 255, as required for a representative that lives in a TLS random field.
fn masked_representative(tag: &[u8; 32]) -> num_bigint::BigUint {
    let mut bytes = *tag;
    bytes[31] &= 0x7f;
    num_bigint::BigUint::from_bytes_le(&bytes[..])
}

/// $`x^3 + Ax^2 + x`$
fn curve_rhs(x: &FieldElement) -> FieldElement {
    // x * (x * (x + A) + 1)
    x.mul(&x.mul(&x.add(&A)).add(&FieldElement::one()))
}

/// Is `x` the x-coordinate of some point on Curve25519?
pub fn is_on_curve(x: &FieldElement) -> bool {
    curve_rhs(x).is_square()
}

/// Run the Elligator2 map on a representative.
///
/// Bit 255 of `tag` is ignored. If the remaining integer exceeds $`(p - 1) / 2`$, the tag isn't a
/// canonical representative and `None` is returned. Otherwise the result is always on the curve.
pub fn decode(tag: &[u8; 32]) -> Option<FieldElement> {
    let r = masked_representative(tag);
    if FieldElement::exceeds_half_p(&r) {
        return None;
    }
    let r = FieldElement::from_biguint(r);
    // 1 + 2r^2 is never zero, since -1/2 isn't a square.
    let denominator = FieldElement::one().add(&TWO.mul(&r.square()));
    let v = MINUS_A.mul(&denominator.invert());
    let x = if curve_rhs(&v).is_square() {
        v
    } else {
        v.neg().sub(&A)
    };
    debug_assert!(is_on_curve(&x));
    Some(x)
}

/// Find a representative which [`decode`]s to `x`.
///
/// Each encodable point has two representatives, picked between by `sign_bit`. A point is
/// encodable iff it's on the curve, isn't $`0`$ or $`-A`$, and $`-2x(x + A)`$ is a square. About
/// half of all curve points are not encodable.
///
/// The returned representative is always at most $`(p - 1) / 2`$, so its top two bits are clear.
pub fn encode(x: &FieldElement, sign_bit: bool) -> Option<[u8; 32]> {
    if x.is_zero() || *x == *MINUS_A || !is_on_curve(x) {
        return None;
    }
    let x_plus_a = x.add(&A);
    let r_squared = if sign_bit {
        x_plus_a.neg().mul(&TWO.mul(x).invert())
    } else {
        x.neg().mul(&TWO.mul(&x_plus_a).invert())
    };
    let r = r_squared.sqrt()?;
    Some(r.to_bytes_le())
}
