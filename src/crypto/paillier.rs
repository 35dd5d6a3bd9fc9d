//! Paillier additively homomorphic encryption
//!
//! Used by the two-party ECDSA protocol to let one party compute on the
//! other party's key share without learning it. The generator is fixed to
//! g = N + 1, so encryption is `(1 + mN) · r^N mod N²`.

use crate::config::MIN_PAILLIER_BITS;
use crate::error::TxError;
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Miller-Rabin rounds; error probability below 2^-80
const MILLER_RABIN_ROUNDS: usize = 40;

const SMALL_PRIMES: [u32; 54] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251, 257,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaillierError {
    KeyTooSmall(u64),
    PlaintextOutOfRange,
    CiphertextOutOfRange,
    NoInverse,
}

impl fmt::Display for PaillierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyTooSmall(bits) => write!(
                f,
                "Paillier modulus of {} bits is below the {}-bit minimum",
                bits, MIN_PAILLIER_BITS
            ),
            Self::PlaintextOutOfRange => write!(f, "Plaintext is not below the modulus"),
            Self::CiphertextOutOfRange => write!(f, "Ciphertext is not below the squared modulus"),
            Self::NoInverse => write!(f, "Key parameters are not invertible"),
        }
    }
}

impl std::error::Error for PaillierError {}

impl From<PaillierError> for TxError {
    fn from(e: PaillierError) -> Self {
        match e {
            PaillierError::KeyTooSmall(_) => TxError::validation(e.to_string()),
            PaillierError::NoInverse => TxError::internal(e.to_string()),
            _ => TxError::crypto_consistency(e.to_string()),
        }
    }
}

// MARK: - Keys

/// Public key: the modulus N
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaillierPublicKey {
    #[serde(with = "crate::serde_bytes::biguint_hex")]
    n: BigUint,
}

/// Ciphertext modulo N²
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(#[serde(with = "crate::serde_bytes::biguint_hex")] pub BigUint);

impl PaillierPublicKey {
    pub fn from_modulus(n: BigUint) -> Result<Self, PaillierError> {
        if n.bits() < MIN_PAILLIER_BITS {
            return Err(PaillierError::KeyTooSmall(n.bits()));
        }
        Ok(Self { n })
    }

    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    pub fn bits(&self) -> u64 {
        self.n.bits()
    }

    fn n_squared(&self) -> BigUint {
        &self.n * &self.n
    }

    /// Enc(m) = (1 + mN) · r^N mod N², r uniform in Z*_N
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        m: &BigUint,
        rng: &mut R,
    ) -> Result<Ciphertext, PaillierError> {
        if m >= &self.n {
            return Err(PaillierError::PlaintextOutOfRange);
        }
        let nn = self.n_squared();
        let r = loop {
            let candidate = rng.gen_biguint_range(&BigUint::one(), &self.n);
            if candidate.gcd(&self.n).is_one() {
                break candidate;
            }
        };
        let gm = (BigUint::one() + m * &self.n) % &nn;
        let rn = r.modpow(&self.n, &nn);
        Ok(Ciphertext((gm * rn) % nn))
    }

    /// Enc(a) ⊕ Enc(b) = Enc(a + b)
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, PaillierError> {
        let nn = self.n_squared();
        self.check_range(a, &nn)?;
        self.check_range(b, &nn)?;
        Ok(Ciphertext((&a.0 * &b.0) % nn))
    }

    /// Enc(a)^k = Enc(k · a)
    pub fn mul_scalar(&self, c: &Ciphertext, k: &BigUint) -> Result<Ciphertext, PaillierError> {
        let nn = self.n_squared();
        self.check_range(c, &nn)?;
        Ok(Ciphertext(c.0.modpow(k, &nn)))
    }

    fn check_range(&self, c: &Ciphertext, nn: &BigUint) -> Result<(), PaillierError> {
        if c.0.is_zero() || &c.0 >= nn {
            return Err(PaillierError::CiphertextOutOfRange);
        }
        Ok(())
    }
}

impl fmt::Debug for PaillierPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaillierPublicKey({} bits)", self.n.bits())
    }
}

/// Secret key: λ = lcm(p-1, q-1) and μ = λ⁻¹ mod N
#[derive(Clone)]
pub struct PaillierSecretKey {
    public: PaillierPublicKey,
    lambda: BigUint,
    mu: BigUint,
}

impl PaillierSecretKey {
    /// Generates a key whose modulus has `bits` bits
    pub fn generate<R: RngCore + CryptoRng>(bits: u64, rng: &mut R) -> Result<Self, PaillierError> {
        if bits < MIN_PAILLIER_BITS {
            return Err(PaillierError::KeyTooSmall(bits));
        }
        loop {
            let p = generate_prime(bits / 2, rng);
            let q = generate_prime(bits - bits / 2, rng);
            if p == q {
                continue;
            }
            let n = &p * &q;
            if n.bits() != bits {
                continue;
            }
            let lambda = (&p - 1u32).lcm(&(&q - 1u32));
            // With g = N + 1, L(g^λ mod N²) = λ mod N
            let mu = match (&lambda % &n).modinv(&n) {
                Some(mu) => mu,
                None => continue,
            };
            return Ok(Self {
                public: PaillierPublicKey::from_modulus(n)?,
                lambda,
                mu,
            });
        }
    }

    pub fn public_key(&self) -> &PaillierPublicKey {
        &self.public
    }

    /// m = L(c^λ mod N²) · μ mod N, with L(u) = (u - 1) / N
    pub fn decrypt(&self, c: &Ciphertext) -> Result<BigUint, PaillierError> {
        let n = &self.public.n;
        let nn = self.public.n_squared();
        self.public.check_range(c, &nn)?;
        let u = c.0.modpow(&self.lambda, &nn);
        if u.is_zero() {
            return Err(PaillierError::CiphertextOutOfRange);
        }
        let l = (u - 1u32) / n;
        Ok((l * &self.mu) % n)
    }
}

impl Drop for PaillierSecretKey {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl PaillierSecretKey {
    /// Overwrites λ and μ in place with zero limbs
    fn wipe(&mut self) {
        wipe_biguint(&mut self.lambda);
        wipe_biguint(&mut self.mu);
    }
}

/// Refills the value's existing limb buffer with zeros before it shrinks
fn wipe_biguint(value: &mut BigUint) {
    let words = value.bits().div_ceil(32) as usize;
    value.assign_from_slice(&vec![0u32; words]);
}

impl fmt::Debug for PaillierSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaillierSecretKey([REDACTED], {:?})", self.public)
    }
}

// MARK: - Primes

/// Random prime with exactly `bits` bits
pub fn generate_prime<R: RngCore + CryptoRng>(bits: u64, rng: &mut R) -> BigUint {
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(bits - 2, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, rng) {
            return candidate;
        }
    }
}

/// Small-prime sieve followed by Miller-Rabin
pub fn is_probable_prime<R: RngCore + CryptoRng>(n: &BigUint, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    for &p in SMALL_PRIMES.iter() {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }
    if n.is_even() {
        return n == &two;
    }

    let n_minus_one = n - 1u32;
    let mut d = n_minus_one.clone();
    let mut s = 0u32;
    while d.is_even() {
        d >>= 1;
        s += 1;
    }

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn test_key() -> PaillierSecretKey {
        PaillierSecretKey::generate(MIN_PAILLIER_BITS, &mut OsRng).unwrap()
    }

    #[test]
    fn test_primality() {
        let mut rng = OsRng;
        assert!(is_probable_prime(&BigUint::from(257u32), &mut rng));
        assert!(is_probable_prime(&BigUint::from(7919u32), &mut rng));
        assert!(!is_probable_prime(&BigUint::from(7917u32), &mut rng));
        // Carmichael number
        assert!(!is_probable_prime(&BigUint::from(561u32), &mut rng));
        // 2^127 - 1
        let m127 = (BigUint::one() << 127u32) - 1u32;
        assert!(is_probable_prime(&m127, &mut rng));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let sk = test_key();
        assert_eq!(sk.public_key().bits(), MIN_PAILLIER_BITS);
        let m = BigUint::from(123_456_789u64);
        let c = sk.public_key().encrypt(&m, &mut OsRng).unwrap();
        assert_eq!(sk.decrypt(&c).unwrap(), m);
    }

    #[test]
    fn test_homomorphic_operations() {
        let sk = test_key();
        let pk = sk.public_key();
        let a = BigUint::from(1_000u32);
        let b = BigUint::from(2_345u32);
        let ca = pk.encrypt(&a, &mut OsRng).unwrap();
        let cb = pk.encrypt(&b, &mut OsRng).unwrap();

        let sum = pk.add(&ca, &cb).unwrap();
        assert_eq!(sk.decrypt(&sum).unwrap(), &a + &b);

        let k = BigUint::from(77u32);
        let scaled = pk.mul_scalar(&ca, &k).unwrap();
        assert_eq!(sk.decrypt(&scaled).unwrap(), &a * &k);
    }

    #[test]
    fn test_rejects_small_keys_and_bad_input() {
        assert_eq!(
            PaillierSecretKey::generate(512, &mut OsRng).unwrap_err(),
            PaillierError::KeyTooSmall(512)
        );
        let sk = test_key();
        let n = sk.public_key().modulus().clone();
        assert!(sk.public_key().encrypt(&n, &mut OsRng).is_err());
        assert!(sk.decrypt(&Ciphertext(BigUint::zero())).is_err());
    }

    #[test]
    fn test_secret_key_wipe_clears_lambda_and_mu() {
        let mut sk = test_key();
        let public = sk.public_key().clone();
        assert!(!sk.lambda.is_zero());
        sk.wipe();
        assert!(sk.lambda.is_zero());
        assert!(sk.mu.is_zero());
        // The public half is untouched
        assert_eq!(sk.public_key(), &public);
    }

    #[test]
    fn test_wipe_biguint_zeroes_value() {
        let mut value = BigUint::from_bytes_be(&[0xa5; 97]);
        wipe_biguint(&mut value);
        assert!(value.is_zero());
        let mut empty = BigUint::zero();
        wipe_biguint(&mut empty);
        assert!(empty.is_zero());
    }

    #[test]
    fn test_public_key_serde() {
        let sk = test_key();
        let json = serde_json::to_string(sk.public_key()).unwrap();
        let back: PaillierPublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, sk.public_key());
    }
}
