//! Textbook RSA-style keypairs used to wrap a session key.
//!
//! A keypair is `{public: (e, n), private: (d, n)}` with `n = p·q`,
//! `phi = (p-1)(q-1)` and `d = e⁻¹ mod phi`, so that `(m^e)^d ≡ m (mod n)`
//! for every `m < n`. There is no padding scheme; the key only ever wraps a
//! short random integer chosen to be smaller than the modulus.

use crate::crypto::prime::generate_prime;
use crate::utils::{CryptoError, Result};
use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use num_traits::{One, Zero};
use std::fmt;

/// Smallest modulus width for which `bits/4` still yields an odd prime seed
pub const MIN_KEYPAIR_BITS: u64 = 8;

/// Public half of a keypair: exponent `e` and modulus `n`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    e: BigUint,
    n: BigUint,
}

impl PublicKey {
    /// Build a public key from its exponent and modulus
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidParameters` if the modulus is zero
    pub fn new(e: BigUint, n: BigUint) -> Result<Self> {
        if n.is_zero() {
            return Err(CryptoError::InvalidParameters {
                reason: "modulus must be non-zero".to_string(),
            }
            .into());
        }
        Ok(Self { e, n })
    }

    /// Public exponent
    pub fn exponent(&self) -> &BigUint {
        &self.e
    }

    /// Modulus
    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    /// Number of bytes needed to hold the modulus, `ceil(bits(n) / 8)`
    pub fn modulus_len(&self) -> usize {
        usize::try_from((self.n.bits() + 7) / 8).unwrap_or(usize::MAX)
    }

    /// `m^e mod n`
    pub fn encrypt(&self, m: &BigUint) -> BigUint {
        m.modpow(&self.e, &self.n)
    }
}

/// Private half of a keypair: exponent `d` and modulus `n`
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    d: BigUint,
    n: BigUint,
}

impl PrivateKey {
    /// Build a private key from its exponent and modulus
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidParameters` if the modulus is zero
    pub fn new(d: BigUint, n: BigUint) -> Result<Self> {
        if n.is_zero() {
            return Err(CryptoError::InvalidParameters {
                reason: "modulus must be non-zero".to_string(),
            }
            .into());
        }
        Ok(Self { d, n })
    }

    /// Private exponent
    pub fn exponent(&self) -> &BigUint {
        &self.d
    }

    /// Modulus
    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    /// `c^d mod n`
    pub fn decrypt(&self, c: &BigUint) -> BigUint {
        c.modpow(&self.d, &self.n)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("d", &"<redacted>")
            .field("n", &self.n)
            .finish()
    }
}

/// A freshly generated public/private pair
#[derive(Debug, Clone)]
pub struct Keypair {
    /// Shared with the peer
    pub public: PublicKey,
    /// Kept by the generating side
    pub private: PrivateKey,
}

/// Generate a keypair whose modulus is the product of two `bits/2`-bit primes
///
/// The public exponent search starts from a random `bits/4`-bit prime and
/// walks upward in steps of two until it is coprime to `phi` or reaches
/// `phi`. If the walk runs out the modular inverse does not exist and key
/// generation fails.
///
/// # Errors
///
/// * `CryptoError::InvalidParameters` when `bits < MIN_KEYPAIR_BITS`
/// * `CryptoError::KeyGeneration` when no coprime exponent was found
pub fn generate_keypair(bits: u64) -> Result<Keypair> {
    if bits < MIN_KEYPAIR_BITS {
        return Err(CryptoError::InvalidParameters {
            reason: format!("key size must be at least {MIN_KEYPAIR_BITS} bits, got {bits}"),
        }
        .into());
    }

    let p = generate_prime(bits / 2)?;
    let mut q = generate_prime(bits / 2)?;
    // phi = (p-1)(q-1) is only the totient for distinct primes
    while q == p {
        q = generate_prime(bits / 2)?;
    }

    let n = &p * &q;
    let phi = (&p - 1u32) * (&q - 1u32);

    let mut e = generate_prime(bits / 4)?;
    while e < phi {
        if e.gcd(&phi).is_one() {
            break;
        }
        e += 2u32;
    }

    let d = mod_inverse(&e, &phi).map_err(|_| CryptoError::KeyGeneration {
        reason: format!("public exponent search ended at {e} without a coprime value"),
    })?;

    log::debug!("Generated {}-bit keypair (e = {})", n.bits(), e);

    Ok(Keypair {
        public: PublicKey { e, n: n.clone() },
        private: PrivateKey { d, n },
    })
}

/// Extended Euclidean algorithm
///
/// Returns `(gcd, x, y)` such that `a·x + b·y = gcd`, with
/// `extended_gcd(0, b) = (b, 0, 1)`. Inputs are expected to be non-negative.
pub fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut old_r, mut r) = (a.clone(), b.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    let (mut old_t, mut t) = (BigInt::zero(), BigInt::one());

    while !r.is_zero() {
        let quotient = &old_r / &r;

        let next_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, next_r);

        let next_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, next_s);

        let next_t = &old_t - &quotient * &t;
        old_t = std::mem::replace(&mut t, next_t);
    }

    (old_r, old_s, old_t)
}

/// Modular inverse of `e` modulo `phi`
///
/// # Errors
///
/// Returns `CryptoError::NotInvertible` when `gcd(e, phi) ≠ 1`
pub fn mod_inverse(e: &BigUint, phi: &BigUint) -> Result<BigUint> {
    if phi.is_zero() {
        return Err(CryptoError::NotInvertible.into());
    }

    let modulus = BigInt::from(phi.clone());
    let (gcd, x, _) = extended_gcd(&BigInt::from(e.clone()), &modulus);
    if !gcd.is_one() {
        return Err(CryptoError::NotInvertible.into());
    }

    x.mod_floor(&modulus)
        .to_biguint()
        .ok_or_else(|| CryptoError::NotInvertible.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::RandBigInt;
    use rand::rngs::OsRng;

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn test_extended_gcd_bezout() {
        for (a, b) in [(240i64, 46i64), (17, 3120), (35, 64), (1, 1), (12, 18)] {
            let (a, b) = (BigInt::from(a), BigInt::from(b));
            let (g, x, y) = extended_gcd(&a, &b);
            assert_eq!(g, a.gcd(&b));
            assert_eq!(&a * &x + &b * &y, g);
        }
    }

    #[test]
    fn test_extended_gcd_zero_operand() {
        let seven = BigInt::from(7);
        let zero = BigInt::zero();
        assert_eq!(
            extended_gcd(&zero, &seven),
            (seven.clone(), BigInt::zero(), BigInt::one())
        );
        assert_eq!(
            extended_gcd(&seven, &zero),
            (seven.clone(), BigInt::one(), BigInt::zero())
        );
    }

    #[test]
    fn test_mod_inverse() {
        assert_eq!(mod_inverse(&big(3), &big(11)).unwrap(), big(4));
        assert_eq!(mod_inverse(&big(17), &big(3120)).unwrap(), big(2753));
        assert!(mod_inverse(&big(6), &big(9)).is_err());
        assert!(mod_inverse(&big(5), &big(0)).is_err());
    }

    #[test]
    fn test_textbook_keypair() {
        let public = PublicKey::new(big(17), big(3233)).unwrap();
        let private = PrivateKey::new(big(2753), big(3233)).unwrap();

        let c = public.encrypt(&big(65));
        assert_eq!(c, big(2790));
        assert_eq!(private.decrypt(&c), big(65));
        assert_eq!(public.modulus_len(), 2);
    }

    #[test]
    fn test_zero_modulus_rejected() {
        assert!(PublicKey::new(big(3), big(0)).is_err());
        assert!(PrivateKey::new(big(3), big(0)).is_err());
    }

    #[test]
    fn test_keypair_round_trip() {
        let keypair = generate_keypair(64).unwrap();
        let n = keypair.public.modulus().clone();
        assert_eq!(&n, keypair.private.modulus());

        let mut samples = vec![BigUint::zero(), BigUint::one(), &n - 1u32];
        for _ in 0..32 {
            samples.push(OsRng.gen_biguint_below(&n));
        }

        for m in samples {
            let c = keypair.public.encrypt(&m);
            assert_eq!(keypair.private.decrypt(&c), m);
        }
    }

    #[test]
    fn test_small_keypairs_round_trip() {
        for _ in 0..20 {
            let keypair = generate_keypair(16).unwrap();
            let n = keypair.public.modulus().clone();
            let mut m = BigUint::zero();
            while m < n {
                let c = keypair.public.encrypt(&m);
                assert_eq!(keypair.private.decrypt(&c), m);
                m += 97u32;
            }
        }
    }

    #[test]
    fn test_keypair_modulus_width() {
        let keypair = generate_keypair(64).unwrap();
        let bits = keypair.public.modulus().bits();
        assert!((62..=64).contains(&bits), "unexpected modulus width {bits}");
        assert_eq!(keypair.public.modulus_len(), 8);
    }

    #[test]
    fn test_too_small_key_rejected() {
        assert!(generate_keypair(4).is_err());
    }

    #[test]
    fn test_private_key_debug_redacted() {
        let private = PrivateKey::new(big(2753), big(3233)).unwrap();
        let debug = format!("{private:?}");
        assert!(!debug.contains("2753"));
        assert!(debug.contains("redacted"));
    }
}
