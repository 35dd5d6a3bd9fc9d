//! Arithmetic modulo the secp256k1 group order
//!
//! [`Scalar`] is always fully reduced. Secret values that outlive a single
//! computation are held as [`SecretScalar`], whose byte encoding is wiped on
//! drop.

use crate::crypto::curve::{to_fixed_32, CURVE};
use crate::error::{TxError, TxResult};
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Integer modulo n
#[derive(Clone, PartialEq, Eq)]
pub struct Scalar(BigUint);

impl Scalar {
    pub fn zero() -> Self {
        Scalar(BigUint::zero())
    }

    pub fn one() -> Self {
        Scalar(BigUint::one())
    }

    /// Parses 32 big-endian bytes, rejecting values >= n
    pub fn from_bytes(bytes: &[u8; 32]) -> TxResult<Self> {
        let value = BigUint::from_bytes_be(bytes);
        if value >= CURVE.n {
            return Err(TxError::serialization("Scalar is not below the group order"));
        }
        Ok(Scalar(value))
    }

    /// Interprets arbitrary bytes as an integer and reduces it mod n
    pub fn from_bytes_reduced(bytes: &[u8]) -> Self {
        Scalar(BigUint::from_bytes_be(bytes) % &CURVE.n)
    }

    pub fn from_biguint(value: &BigUint) -> Self {
        Scalar(value % &CURVE.n)
    }

    pub fn from_u64(value: u64) -> Self {
        Scalar(BigUint::from(value) % &CURVE.n)
    }

    /// Uniform non-zero scalar
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let candidate = rng.gen_biguint_below(&CURVE.n);
            if !candidate.is_zero() {
                return Scalar(candidate);
            }
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        to_fixed_32(&self.0)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// True when the value is above n/2
    pub fn is_high(&self) -> bool {
        self.0 > CURVE.half_n
    }

    /// Multiplicative inverse via Fermat; zero has none
    pub fn invert(&self) -> TxResult<Scalar> {
        if self.is_zero() {
            return Err(TxError::internal("Attempted to invert zero scalar"));
        }
        let exp = &CURVE.n - 2u32;
        Ok(Scalar(self.0.modpow(&exp, &CURVE.n)))
    }

    /// Negates when `flag` is set
    pub fn negate_if(&self, flag: bool) -> Scalar {
        if flag {
            -self
        } else {
            self.clone()
        }
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar({})", hex::encode(self.to_bytes()))
    }
}

impl<'a> Add<&'a Scalar> for &'a Scalar {
    type Output = Scalar;

    fn add(self, rhs: &'a Scalar) -> Scalar {
        Scalar((&self.0 + &rhs.0) % &CURVE.n)
    }
}

impl<'a> Sub<&'a Scalar> for &'a Scalar {
    type Output = Scalar;

    fn sub(self, rhs: &'a Scalar) -> Scalar {
        Scalar(((&self.0 + &CURVE.n) - &rhs.0) % &CURVE.n)
    }
}

impl<'a> Mul<&'a Scalar> for &'a Scalar {
    type Output = Scalar;

    fn mul(self, rhs: &'a Scalar) -> Scalar {
        Scalar((&self.0 * &rhs.0) % &CURVE.n)
    }
}

impl<'a> Neg for &'a Scalar {
    type Output = Scalar;

    fn neg(self) -> Scalar {
        if self.0.is_zero() {
            return Scalar::zero();
        }
        Scalar(&CURVE.n - &self.0)
    }
}

/// Secret scalar whose encoding is zeroized on drop
#[derive(Clone)]
pub struct SecretScalar(Zeroizing<[u8; 32]>);

impl SecretScalar {
    pub fn new(scalar: &Scalar) -> Self {
        SecretScalar(Zeroizing::new(scalar.to_bytes()))
    }

    /// Parses a non-zero scalar below n
    pub fn from_bytes(bytes: &[u8; 32]) -> TxResult<Self> {
        let scalar = Scalar::from_bytes(bytes)?;
        if scalar.is_zero() {
            return Err(TxError::validation("Secret scalar must not be zero"));
        }
        Ok(SecretScalar(Zeroizing::new(*bytes)))
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::new(&Scalar::random(rng))
    }

    /// Materializes the value for arithmetic. The copy is an ordinary
    /// `Scalar` and is not wiped on drop.
    pub fn expose(&self) -> Scalar {
        Scalar(BigUint::from_bytes_be(&self.0[..]))
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        self.0.clone()
    }
}

impl PartialEq for SecretScalar {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for SecretScalar {}

impl fmt::Debug for SecretScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretScalar([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_rejects_out_of_range() {
        let n_bytes = to_fixed_32(&CURVE.n);
        assert!(Scalar::from_bytes(&n_bytes).is_err());
        assert!(SecretScalar::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_inverse() {
        let a = Scalar::random(&mut OsRng);
        let inv = a.invert().unwrap();
        assert_eq!(&a * &inv, Scalar::one());
        assert!(Scalar::zero().invert().is_err());
    }

    #[test]
    fn test_negation_and_subtraction() {
        let a = Scalar::from_u64(5);
        let b = Scalar::from_u64(7);
        assert_eq!(&(&a - &b) + &b, a);
        assert_eq!(&a + &(-&a), Scalar::zero());
        assert!((-&Scalar::one()).is_high());
        assert!(!Scalar::one().is_high());
    }

    #[test]
    fn test_reduction_of_wide_input() {
        let wide = [0xffu8; 32];
        let reduced = Scalar::from_bytes_reduced(&wide);
        let expected = BigUint::from_bytes_be(&wide) - &CURVE.n;
        assert_eq!(reduced.as_biguint(), &expected);
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SecretScalar::random(&mut OsRng);
        assert_eq!(format!("{:?}", secret), "SecretScalar([REDACTED])");
        assert_eq!(secret.expose().to_bytes(), *secret.to_bytes());
    }
}
