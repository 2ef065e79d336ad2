//! Random prime generation by trial division.
//!
//! Primality is decided deterministically by dividing by every integer up to
//! the square root, which keeps the moduli small and the arithmetic easy to
//! follow. It is only practical for the illustrative key sizes this crate uses.

use crate::utils::{CryptoError, Result};
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::rngs::OsRng;

/// Generate a random prime of exactly `bits` bits
///
/// Candidates have their top bit and lowest bit forced on, so every draw is
/// odd and of the requested width. Draws repeat until one passes [`is_prime`].
///
/// # Errors
///
/// Returns `CryptoError::InvalidParameters` when `bits < 2`, since no odd
/// prime fits in fewer than two bits.
pub fn generate_prime(bits: u64) -> Result<BigUint> {
    if bits < 2 {
        return Err(CryptoError::InvalidParameters {
            reason: format!("prime width must be at least 2 bits, got {bits}"),
        }
        .into());
    }

    let mut rng = OsRng;
    let top_bit = BigUint::one() << (bits - 1);
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate |= &top_bit;
        candidate |= BigUint::one();
        if is_prime(&candidate) {
            return Ok(candidate);
        }
    }
}

/// Trial-division primality test
pub fn is_prime(n: &BigUint) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }

    let limit = n.sqrt();
    let mut divisor = two;
    while divisor <= limit {
        if (n % &divisor).is_zero() {
            return false;
        }
        divisor += 1u32;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_primes() {
        let primes: Vec<u32> = (0..60u32)
            .filter(|n| is_prime(&BigUint::from(*n)))
            .collect();
        assert_eq!(
            primes,
            vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59]
        );
    }

    #[test]
    fn test_composites() {
        // 561 is a Carmichael number, 7917 = 3 * 7 * 13 * 29, 65537^2
        for n in [561u64, 7917, 4_295_098_369] {
            assert!(!is_prime(&BigUint::from(n)), "{n} reported prime");
        }
        assert!(is_prime(&BigUint::from(7919u32)));
        assert!(is_prime(&BigUint::from(65537u32)));
    }

    #[test]
    fn test_generate_prime_width() {
        for bits in [2u64, 8, 16, 32] {
            let p = generate_prime(bits).unwrap();
            assert_eq!(p.bits(), bits);
            assert!(is_prime(&p));
        }
    }

    #[test]
    fn test_generate_prime_odd() {
        let p = generate_prime(24).unwrap();
        assert_eq!(&p % 2u32, BigUint::one());
    }

    #[test]
    fn test_degenerate_width_rejected() {
        assert!(generate_prime(0).is_err());
        assert!(generate_prime(1).is_err());
    }
}
