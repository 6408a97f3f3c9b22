//! Deterministic numerics for consensus
//!
//! - `H(u) = −ln(u)` for `u ∈ (0, 1]`, returned in µ-nats as an integer.
//! - Exact mapping from uniform bit draws to `u`: `u = (n + 1) / 2^bits`.
//! - Safe integer helpers: clamp, saturating add, floor-subtract.
//!
//! ## Determinism
//!
//! Platform `ln` is forbidden on this path: two nodes disagreeing in the last
//! µ-nat would fork the chain. The logarithm is computed in fixed-point
//! big-integer arithmetic with [`FRAC_BITS`] fractional bits (≈96 decimal
//! digits) via the atanh series
//!
//! ```text
//!     ln m = k·ln 2 + 2·atanh((m' − 1)/(m' + 1)),    m = 2^k · m',  m' ∈ [1, 2)
//! ```
//!
//! and the final conversion to µ-nats rounds **half-even**. The precision is
//! part of the consensus definition: changing it moves the last bit of some
//! outputs and breaks cross-node agreement.
//!
//! Reference scale: ψ and Θ are µ-nats (1e-6 natural-log units).

use std::sync::OnceLock;

use num_bigint::BigUint;

use crate::errors::ConsensusError;
use crate::{Hash32, MicroNat, MICRO_SCALE};

/// Fixed-point fractional bits used by the internal `ln`. Consensus-fixed.
pub const FRAC_BITS: u32 = 320;

fn one_fixed() -> BigUint {
    BigUint::from(1u8) << FRAC_BITS
}

/// `ln 2` at [`FRAC_BITS`] precision, computed once as `2·atanh(1/3)`.
fn ln2_fixed() -> &'static BigUint {
    static LN2: OnceLock<BigUint> = OnceLock::new();
    LN2.get_or_init(|| {
        let third = one_fixed() / BigUint::from(3u8);
        atanh_fixed(&third) << 1
    })
}

/// `atanh(z) = Σ z^(2i+1)/(2i+1)` for fixed-point `z ∈ [0, 1/3]`.
///
/// Terms shrink by at least 9× per step, so the loop is bounded by roughly
/// `FRAC_BITS / log2(9)` iterations. All divisions floor; the accumulated
/// error stays far below one µ-nat after conversion.
fn atanh_fixed(z: &BigUint) -> BigUint {
    let z2 = (z * z) >> FRAC_BITS;
    let mut power = z.clone();
    let mut acc = z.clone();
    let mut denom = 3u32;
    loop {
        power = (&power * &z2) >> FRAC_BITS;
        if power == BigUint::default() {
            return acc;
        }
        acc += &power / BigUint::from(denom);
        denom += 2;
    }
}

/// `ln m` at [`FRAC_BITS`] precision for an integer `m ≥ 1`.
fn ln_fixed(m: &BigUint) -> BigUint {
    debug_assert!(*m >= BigUint::from(1u8), "ln domain error");
    let k = m.bits().saturating_sub(1);
    // Mantissa m' = m / 2^k in [1, 2), scaled by 2^FRAC_BITS.
    let mantissa = (m << FRAC_BITS) >> k;
    let one = one_fixed();
    let num = (&mantissa - &one) << FRAC_BITS;
    let z = num / (&mantissa + &one);
    let ln_mantissa = atanh_fixed(&z) << 1;
    ln2_fixed() * BigUint::from(k) + ln_mantissa
}

/// Convert a non-negative fixed-point nat value (scale `2^FRAC_BITS`) to
/// µ-nats with round-half-even.
fn micronats_from_fixed(v: &BigUint) -> MicroNat {
    let scaled = v * BigUint::from(MICRO_SCALE);
    let mut q = &scaled >> FRAC_BITS;
    let rem = scaled - (&q << FRAC_BITS);
    let half = BigUint::from(1u8) << (FRAC_BITS - 1);
    if rem > half || (rem == half && q.bit(0)) {
        q += 1u8;
    }
    u64::try_from(q).unwrap_or(u64::MAX)
}

/// `H(u)` in µ-nats for a draw of `bits` bits: `u = (n + 1) / 2^bits`.
fn h_from_draw(n_plus_one: BigUint, bits: u64) -> MicroNat {
    // H = bits·ln2 − ln(n+1); ln(n+1) ≤ bits·ln2 on the input domain.
    let total = ln2_fixed() * BigUint::from(bits);
    let ln_draw = ln_fixed(&n_plus_one);
    if ln_draw >= total {
        return 0;
    }
    micronats_from_fixed(&(total - ln_draw))
}

/// Map a 32-byte big-endian hash to a uniform `u ∈ (0, 1]` and return `H(u)`
/// in µ-nats.
///
/// Mapping (exact, bias-free): `n = int(hash, big-endian)` in
/// `[0, 2^256 − 1]`, then `u = (n + 1) / 2^256`. The minimal representable
/// `u` is `1/2^256`, so `H` is finite on the whole input domain and
/// `H(1) = 0` exactly.
pub fn h_from_hash256(hash: &Hash32) -> MicroNat {
    let n = BigUint::from_bytes_be(hash);
    h_from_draw(n + 1u8, 256)
}

/// Generalized draw mapping: `u = (n + 1) / 2^bits` for `n ∈ [0, 2^bits − 1]`.
///
/// `bits` must lie in `[1, 256]` and `n` must fit the draw width.
pub fn h_from_qbits(n: u128, bits: u32) -> Result<MicroNat, ConsensusError> {
    if bits == 0 || bits > 256 {
        return Err(ConsensusError::generic("draw bits must be in [1, 256]")
            .with_context("bits", bits.to_string()));
    }
    if bits < 128 && n >> bits != 0 {
        return Err(ConsensusError::generic("draw exceeds bit width")
            .with_context("bits", bits.to_string())
            .with_context("n", n.to_string()));
    }
    Ok(h_from_draw(BigUint::from(n) + 1u8, u64::from(bits)))
}

// ============================================================================
// Integer helpers
// ============================================================================

/// Clamp `value` to `[lo, hi]` (`hi` wins if the bounds are inverted).
#[inline]
pub fn clamp<T: PartialOrd>(value: T, lo: T, hi: T) -> T {
    if value > hi {
        hi
    } else if value < lo {
        lo
    } else {
        value
    }
}

/// Saturating add in µ-nats.
#[inline]
pub fn add_micronats(a: MicroNat, b: MicroNat) -> MicroNat {
    a.saturating_add(b)
}

/// Subtract in µ-nats, flooring at 0.
#[inline]
pub fn sub_micronats(a: MicroNat, b: MicroNat) -> MicroNat {
    a.saturating_sub(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hash whose big-endian value is `n`, for small test draws.
    fn hash_for_high_bits(first: u8, rest: u8) -> Hash32 {
        let mut h = [rest; 32];
        h[0] = first;
        h
    }

    #[test]
    fn h_of_one_is_exactly_zero() {
        // n = 2^256 − 1  ⇒  u = 1  ⇒  H = 0.
        assert_eq!(h_from_hash256(&[0xff; 32]), 0);
    }

    #[test]
    fn h_of_minimal_u_is_256_ln2() {
        // n = 0  ⇒  u = 1/2^256  ⇒  H = 256·ln2 ≈ 177.445678 nats.
        assert_eq!(h_from_hash256(&[0x00; 32]), 177_445_678);
    }

    #[test]
    fn h_of_half_is_ln2() {
        // n + 1 = 2^255  ⇒  u = 1/2.
        let h = hash_for_high_bits(0x7f, 0xff);
        assert_eq!(h_from_hash256(&h), 693_147);
    }

    #[test]
    fn h_of_quarter_is_two_ln2() {
        // n + 1 = 2^254  ⇒  u = 1/4.
        let h = hash_for_high_bits(0x3f, 0xff);
        assert_eq!(h_from_hash256(&h), 1_386_294);
    }

    #[test]
    fn h_of_three_quarters_matches_ln_four_thirds() {
        // n + 1 = 3·2^254  ⇒  u = 3/4  ⇒  H = ln(4/3) ≈ 0.287682 nats.
        let h = hash_for_high_bits(0xbf, 0xff);
        assert_eq!(h_from_hash256(&h), 287_682);
    }

    #[test]
    fn h_is_decreasing_in_u() {
        let ladder = [
            [0x00u8; 32],                     // u minimal
            hash_for_high_bits(0x00, 0xff),   // u ≈ 2^-248
            hash_for_high_bits(0x3f, 0xff),   // u = 1/4
            hash_for_high_bits(0x7f, 0xff),   // u = 1/2
            [0xff; 32],                       // u = 1
        ];
        let hs: Vec<MicroNat> = ladder.iter().map(h_from_hash256).collect();
        for w in hs.windows(2) {
            assert!(w[0] > w[1], "H must strictly decrease as u grows: {hs:?}");
        }
    }

    #[test]
    fn h_is_deterministic() {
        let mut h = [0u8; 32];
        for (i, b) in h.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        assert_eq!(h_from_hash256(&h), h_from_hash256(&h));
    }

    #[test]
    fn qbits_matches_hash_mapping_on_small_widths() {
        // 1-bit draw: n=0 ⇒ u=1/2 ⇒ ln2; n=1 ⇒ u=1 ⇒ 0.
        assert_eq!(h_from_qbits(0, 1).unwrap(), 693_147);
        assert_eq!(h_from_qbits(1, 1).unwrap(), 0);
        // 8-bit draw, n=127 ⇒ u=1/2.
        assert_eq!(h_from_qbits(127, 8).unwrap(), 693_147);
    }

    #[test]
    fn qbits_rejects_bad_domains() {
        assert!(h_from_qbits(0, 0).is_err());
        assert!(h_from_qbits(0, 257).is_err());
        assert!(h_from_qbits(4, 2).is_err());
        assert!(h_from_qbits(3, 2).is_ok());
    }

    #[test]
    fn clamp_and_saturating_helpers() {
        assert_eq!(clamp(5i64, 0, 10), 5);
        assert_eq!(clamp(-5i64, 0, 10), 0);
        assert_eq!(clamp(50i64, 0, 10), 10);
        assert_eq!(add_micronats(u64::MAX, 1), u64::MAX);
        assert_eq!(sub_micronats(3, 5), 0);
        assert_eq!(sub_micronats(5, 3), 2);
    }
}
