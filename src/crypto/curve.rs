//! secp256k1 group arithmetic
//!
//! Points are kept in Jacobian coordinates while computing and converted to
//! affine only at the edges. Formulas:
//! - addition: add-2007-bl
//! - doubling: dbl-2009-l (a = 0)
//!
//! Scalar multiplication is a Montgomery ladder. The scalar is first moved
//! to `k + n` or `k + 2n`, whichever has bit 256 set, so the ladder always
//! starts from `(P, 2P)` and runs the same 256 steps. Each step is one
//! complete addition and one doubling; swaps and special cases are
//! resolved with `subtle` masks instead of branches, so the sequence of
//! field operations does not depend on the scalar.
//!
//! Reference: https://hyperelliptic.org/EFD/g1p/auto-shortw-jacobian-0.html

use crate::error::{TxError, TxResult};
use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use subtle::{Choice, ConditionallySelectable};

// MARK: - Domain Parameters

/// Fixed secp256k1 domain parameters
pub struct CurveParams {
    /// Field prime
    pub p: BigUint,
    /// Group order
    pub n: BigUint,
    /// Curve constant in y^2 = x^3 + b
    pub b: BigUint,
    pub gx: BigUint,
    pub gy: BigUint,
    /// Half the group order, used for low-s checks
    pub half_n: BigUint,
    /// (p + 1) / 4, square root exponent since p = 3 mod 4
    sqrt_exp: BigUint,
    /// p - 2, Fermat inverse exponent
    p_minus_2: BigUint,
}

const P_BYTES: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xfe, 0xff, 0xff, 0xfc, 0x2f,
];
const N_BYTES: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
    0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b,
    0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];
const GX_BYTES: [u8; 32] = [
    0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac,
    0x55, 0xa0, 0x62, 0x95, 0xce, 0x87, 0x0b, 0x07,
    0x02, 0x9b, 0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9,
    0x59, 0xf2, 0x81, 0x5b, 0x16, 0xf8, 0x17, 0x98,
];
const GY_BYTES: [u8; 32] = [
    0x48, 0x3a, 0xda, 0x77, 0x26, 0xa3, 0xc4, 0x65,
    0x5d, 0xa4, 0xfb, 0xfc, 0x0e, 0x11, 0x08, 0xa8,
    0xfd, 0x17, 0xb4, 0x48, 0xa6, 0x85, 0x54, 0x19,
    0x9c, 0x47, 0xd0, 0x8f, 0xfb, 0x10, 0xd4, 0xb8,
];

lazy_static! {
    pub static ref CURVE: CurveParams = {
        let p = BigUint::from_bytes_be(&P_BYTES);
        let n = BigUint::from_bytes_be(&N_BYTES);
        let half_n = &n >> 1u32;
        let sqrt_exp = (&p + 1u32) >> 2u32;
        let p_minus_2 = &p - 2u32;
        CurveParams {
            b: BigUint::from(7u32),
            gx: BigUint::from_bytes_be(&GX_BYTES),
            gy: BigUint::from_bytes_be(&GY_BYTES),
            p,
            n,
            half_n,
            sqrt_exp,
            p_minus_2,
        }
    };
}

/// Ladder steps below the fixed top bit of `k + n` / `k + 2n`
const SCALAR_BITS: u64 = 256;

#[cfg(test)]
thread_local! {
    static FIELD_MULS: std::cell::Cell<u64> = std::cell::Cell::new(0);
    static LADDER_STEPS: std::cell::Cell<u64> = std::cell::Cell::new(0);
}

// MARK: - Field Arithmetic (mod p)

fn fadd(a: &BigUint, b: &BigUint) -> BigUint {
    (a + b) % &CURVE.p
}

fn fsub(a: &BigUint, b: &BigUint) -> BigUint {
    ((a + &CURVE.p) - (b % &CURVE.p)) % &CURVE.p
}

fn fmul(a: &BigUint, b: &BigUint) -> BigUint {
    #[cfg(test)]
    FIELD_MULS.with(|c| c.set(c.get() + 1));
    (a * b) % &CURVE.p
}

fn fsqr(a: &BigUint) -> BigUint {
    fmul(a, a)
}

fn fmul_small(a: &BigUint, k: u32) -> BigUint {
    (a * k) % &CURVE.p
}

/// Field inverse via Fermat's little theorem; the inverse of zero is zero.
pub fn field_inverse(a: &BigUint) -> BigUint {
    a.modpow(&CURVE.p_minus_2, &CURVE.p)
}

/// Square root in the field, if one exists
pub fn field_sqrt(a: &BigUint) -> Option<BigUint> {
    let root = a.modpow(&CURVE.sqrt_exp, &CURVE.p);
    if fsqr(&root) == a % &CURVE.p {
        Some(root)
    } else {
        None
    }
}

/// Right-hand side of the curve equation, x^3 + 7
fn curve_rhs(x: &BigUint) -> BigUint {
    fadd(&fmul(&fsqr(x), x), &CURVE.b)
}

// MARK: - Affine Points

/// Point in affine coordinates, or the point at infinity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinePoint {
    pub x: BigUint,
    pub y: BigUint,
    infinity: bool,
}

impl AffinePoint {
    /// Builds a point and checks it satisfies the curve equation
    pub fn new(x: BigUint, y: BigUint) -> TxResult<Self> {
        let point = Self { x, y, infinity: false };
        if !point.is_on_curve() {
            return Err(TxError::serialization("Point is not on secp256k1"));
        }
        Ok(point)
    }

    pub fn infinity() -> Self {
        Self {
            x: BigUint::zero(),
            y: BigUint::zero(),
            infinity: true,
        }
    }

    pub fn generator() -> Self {
        Self {
            x: CURVE.gx.clone(),
            y: CURVE.gy.clone(),
            infinity: false,
        }
    }

    /// Recovers the point with the given x coordinate and y parity
    pub fn decompress(x: &BigUint, odd_y: bool) -> TxResult<Self> {
        if x >= &CURVE.p {
            return Err(TxError::serialization("x coordinate exceeds field size"));
        }
        let y = field_sqrt(&curve_rhs(x))
            .ok_or_else(|| TxError::serialization("x coordinate is not on secp256k1"))?;
        let y = if y.bit(0) == odd_y { y } else { &CURVE.p - y };
        Ok(Self {
            x: x.clone(),
            y,
            infinity: false,
        })
    }

    /// BIP340 lift_x: the point with even y
    pub fn lift_x(x: &BigUint) -> TxResult<Self> {
        Self::decompress(x, false)
    }

    pub fn is_infinity(&self) -> bool {
        self.infinity
    }

    pub fn is_on_curve(&self) -> bool {
        if self.infinity {
            return true;
        }
        if self.x >= CURVE.p || self.y >= CURVE.p {
            return false;
        }
        fsqr(&self.y) == curve_rhs(&self.x)
    }

    pub fn has_odd_y(&self) -> bool {
        !self.infinity && self.y.bit(0)
    }

    pub fn negate(&self) -> Self {
        if self.infinity {
            return self.clone();
        }
        Self {
            x: self.x.clone(),
            y: fsub(&BigUint::zero(), &self.y),
            infinity: false,
        }
    }

    pub fn to_jacobian(&self) -> JacobianPoint {
        if self.infinity {
            return JacobianPoint::infinity();
        }
        JacobianPoint {
            x: self.x.clone(),
            y: self.y.clone(),
            z: BigUint::one(),
        }
    }

    /// Big-endian 32-byte x coordinate
    pub fn x_bytes(&self) -> [u8; 32] {
        to_fixed_32(&self.x)
    }

    pub fn y_bytes(&self) -> [u8; 32] {
        to_fixed_32(&self.y)
    }
}

/// Left-pads a value below 2^256 to 32 big-endian bytes
pub fn to_fixed_32(value: &BigUint) -> [u8; 32] {
    to_fixed(value)
}

fn to_fixed<const N: usize>(value: &BigUint) -> [u8; N] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; N];
    let len = bytes.len().min(N);
    out[N - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    out
}

// MARK: - Jacobian Points

/// Point in Jacobian coordinates (X/Z^2, Y/Z^3); Z = 0 is infinity
#[derive(Debug, Clone)]
pub struct JacobianPoint {
    pub x: BigUint,
    pub y: BigUint,
    pub z: BigUint,
}

impl JacobianPoint {
    pub fn infinity() -> Self {
        Self {
            x: BigUint::one(),
            y: BigUint::one(),
            z: BigUint::zero(),
        }
    }

    pub fn is_infinity(&self) -> bool {
        self.z.is_zero()
    }

    pub fn to_affine(&self) -> AffinePoint {
        if self.is_infinity() {
            return AffinePoint::infinity();
        }
        let z_inv = field_inverse(&self.z);
        let z_inv2 = fsqr(&z_inv);
        let z_inv3 = fmul(&z_inv2, &z_inv);
        AffinePoint {
            x: fmul(&self.x, &z_inv2),
            y: fmul(&self.y, &z_inv3),
            infinity: false,
        }
    }

    /// add-2007-bl, with the doubling and infinity cases handled by branches
    pub fn add(&self, other: &JacobianPoint) -> JacobianPoint {
        if self.is_infinity() {
            return other.clone();
        }
        if other.is_infinity() {
            return self.clone();
        }
        let (sum, h, r) = self.add_formula(other);
        if h.is_zero() {
            // Same x: either the same point or inverses
            return if r.is_zero() {
                self.double()
            } else {
                JacobianPoint::infinity()
            };
        }
        sum
    }

    /// Addition for the ladder: every case computes the same formulas and
    /// the result is picked by mask.
    fn add_complete(&self, other: &JacobianPoint) -> JacobianPoint {
        let (sum, h, r) = self.add_formula(other);
        let doubled = self.double();

        let same_x = Choice::from(u8::from(h.is_zero()));
        let same_y = Choice::from(u8::from(r.is_zero()));
        let self_infinite = Choice::from(u8::from(self.is_infinity()));
        let other_infinite = Choice::from(u8::from(other.is_infinity()));

        let out = JacobianPoint::select(&sum, &JacobianPoint::infinity(), same_x & !same_y);
        let out = JacobianPoint::select(&out, &doubled, same_x & same_y);
        let out = JacobianPoint::select(&out, self, other_infinite);
        JacobianPoint::select(&out, other, self_infinite)
    }

    /// Generic add-2007-bl; also returns `h` and `r` so callers can detect
    /// the cases the formula does not cover.
    fn add_formula(&self, other: &JacobianPoint) -> (JacobianPoint, BigUint, BigUint) {
        let z1z1 = fsqr(&self.z);
        let z2z2 = fsqr(&other.z);
        let u1 = fmul(&self.x, &z2z2);
        let u2 = fmul(&other.x, &z1z1);
        let s1 = fmul(&fmul(&self.y, &other.z), &z2z2);
        let s2 = fmul(&fmul(&other.y, &self.z), &z1z1);

        let h = fsub(&u2, &u1);
        let r = fmul_small(&fsub(&s2, &s1), 2);

        let i = fsqr(&fmul_small(&h, 2));
        let j = fmul(&h, &i);
        let v = fmul(&u1, &i);

        let x3 = fsub(&fsub(&fsqr(&r), &j), &fmul_small(&v, 2));
        let y3 = fsub(
            &fmul(&r, &fsub(&v, &x3)),
            &fmul_small(&fmul(&s1, &j), 2),
        );
        let z3 = fmul(
            &fsub(&fsub(&fsqr(&fadd(&self.z, &other.z)), &z1z1), &z2z2),
            &h,
        );

        (JacobianPoint { x: x3, y: y3, z: z3 }, h, r)
    }

    /// dbl-2009-l. Infinity maps to Z = 0 again; secp256k1 has no point of
    /// order two, so no other input needs special handling.
    pub fn double(&self) -> JacobianPoint {
        let a = fsqr(&self.x);
        let b = fsqr(&self.y);
        let c = fsqr(&b);
        let d = fmul_small(&fsub(&fsub(&fsqr(&fadd(&self.x, &b)), &a), &c), 2);
        let e = fmul_small(&a, 3);
        let f = fsqr(&e);

        let x3 = fsub(&f, &fmul_small(&d, 2));
        let y3 = fsub(&fmul(&e, &fsub(&d, &x3)), &fmul_small(&c, 8));
        let z3 = fmul_small(&fmul(&self.y, &self.z), 2);

        JacobianPoint { x: x3, y: y3, z: z3 }
    }

    /// Montgomery ladder over a fixed 257-bit window
    pub fn scalar_mult(&self, k: &BigUint) -> JacobianPoint {
        let k = ladder_scalar(k);
        let mut r0 = self.clone();
        let mut r1 = self.double();

        for i in (0..SCALAR_BITS).rev() {
            let bit = Choice::from(u8::from(k.bit(i)));
            JacobianPoint::conditional_swap(&mut r0, &mut r1, bit);
            r1 = r0.add_complete(&r1);
            r0 = r0.double();
            JacobianPoint::conditional_swap(&mut r0, &mut r1, bit);
            #[cfg(test)]
            LADDER_STEPS.with(|c| c.set(c.get() + 1));
        }
        r0
    }

    fn to_words(&self) -> [[u8; 32]; 3] {
        [to_fixed(&self.x), to_fixed(&self.y), to_fixed(&self.z)]
    }

    fn from_words(words: &[[u8; 32]; 3]) -> Self {
        Self {
            x: BigUint::from_bytes_be(&words[0]),
            y: BigUint::from_bytes_be(&words[1]),
            z: BigUint::from_bytes_be(&words[2]),
        }
    }

    /// `b` when `choice` is set, otherwise `a`
    fn select(a: &JacobianPoint, b: &JacobianPoint, choice: Choice) -> JacobianPoint {
        let left = a.to_words();
        let right = b.to_words();
        let mut out = [[0u8; 32]; 3];
        for (o, (l, r)) in out
            .iter_mut()
            .flatten()
            .zip(left.iter().flatten().zip(right.iter().flatten()))
        {
            *o = u8::conditional_select(l, r, choice);
        }
        JacobianPoint::from_words(&out)
    }

    fn conditional_swap(a: &mut JacobianPoint, b: &mut JacobianPoint, choice: Choice) {
        let mut left = a.to_words();
        let mut right = b.to_words();
        for (l, r) in left.iter_mut().flatten().zip(right.iter_mut().flatten()) {
            u8::conditional_swap(l, r, choice);
        }
        *a = JacobianPoint::from_words(&left);
        *b = JacobianPoint::from_words(&right);
    }
}

/// `k mod n` shifted by `n` or `2n` so that bit 256 is set and bits above it
/// are clear. Both candidates are computed and one is picked by mask.
fn ladder_scalar(k: &BigUint) -> BigUint {
    let k = k % &CURVE.n;
    let plus_n = &k + &CURVE.n;
    let plus_2n = &plus_n + &CURVE.n;
    let short = Choice::from(u8::from(!plus_n.bit(SCALAR_BITS)));

    let a: [u8; 33] = to_fixed(&plus_n);
    let b: [u8; 33] = to_fixed(&plus_2n);
    let mut out = [0u8; 33];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = u8::conditional_select(x, y, short);
    }
    BigUint::from_bytes_be(&out)
}

// MARK: - Group Operations

/// P + Q
pub fn add(p: &AffinePoint, q: &AffinePoint) -> AffinePoint {
    p.to_jacobian().add(&q.to_jacobian()).to_affine()
}

/// 2P
pub fn double(p: &AffinePoint) -> AffinePoint {
    p.to_jacobian().double().to_affine()
}

/// kP
pub fn scalar_mult(p: &AffinePoint, k: &BigUint) -> AffinePoint {
    p.to_jacobian().scalar_mult(k).to_affine()
}

/// kG
pub fn scalar_base_mult(k: &BigUint) -> AffinePoint {
    scalar_mult(&AffinePoint::generator(), k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(hex: &str) -> BigUint {
        BigUint::parse_bytes(hex.as_bytes(), 16).unwrap()
    }

    #[test]
    fn test_generator_on_curve() {
        assert!(AffinePoint::generator().is_on_curve());
        assert!(!AffinePoint {
            x: CURVE.gx.clone(),
            y: &CURVE.gy + 1u32,
            infinity: false
        }
        .is_on_curve());
    }

    #[test]
    fn test_domain_constants() {
        let two_256 = BigUint::one() << 256u32;
        assert_eq!(CURVE.p, &two_256 - (BigUint::one() << 32u32) - 977u32);
        assert_eq!(CURVE.n.bits(), 256);
        assert_eq!(&CURVE.half_n * 2u32 + 1u32, CURVE.n);
        assert_eq!(
            CURVE.n,
            big("FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141")
        );
    }

    #[test]
    fn test_double_matches_add() {
        let g = AffinePoint::generator();
        let two_g = double(&g);
        assert_eq!(add(&g, &g), two_g);
        assert_eq!(
            two_g.x,
            big("C6047F9441ED7D6D3045406E95C07CD85C778E4B8CEF3CA7ABAC09B95C709EE5")
        );
        assert_eq!(
            two_g.y,
            big("1AE168FEA63DC339A3C58419466CEAEEF7F632653266D0E1236431A950CFE52A")
        );
    }

    #[test]
    fn test_scalar_base_mult_small_multiples() {
        let three_g = scalar_base_mult(&BigUint::from(3u32));
        assert_eq!(
            three_g.x,
            big("F9308A019258C31049344F85F89D5229B531C845836F99B08601F113BCE036F9")
        );
        let g = AffinePoint::generator();
        assert_eq!(three_g, add(&double(&g), &g));
    }

    #[test]
    fn test_order_gives_infinity() {
        assert!(scalar_base_mult(&CURVE.n).is_infinity());
        let n_minus_1 = &CURVE.n - 1u32;
        assert_eq!(scalar_base_mult(&n_minus_1), AffinePoint::generator().negate());
    }

    #[test]
    fn test_add_inverse_is_infinity() {
        let g = AffinePoint::generator();
        assert!(add(&g, &g.negate()).is_infinity());
        assert_eq!(add(&g, &AffinePoint::infinity()), g);
        assert_eq!(add(&AffinePoint::infinity(), &g), g);
    }

    #[test]
    fn test_scalar_mult_distributes() {
        let a = big("1234567890ABCDEF1234567890ABCDEF");
        let b = big("FEDCBA0987654321FEDCBA0987654321");
        let lhs = scalar_base_mult(&(&a + &b));
        let rhs = add(&scalar_base_mult(&a), &scalar_base_mult(&b));
        assert_eq!(lhs, rhs);

        let ab = (&a * &b) % &CURVE.n;
        assert_eq!(scalar_mult(&scalar_base_mult(&a), &b), scalar_base_mult(&ab));
    }

    fn ladder_cost(k: &BigUint) -> (u64, u64) {
        LADDER_STEPS.with(|c| c.set(0));
        FIELD_MULS.with(|c| c.set(0));
        AffinePoint::generator().to_jacobian().scalar_mult(k);
        (LADDER_STEPS.with(|c| c.get()), FIELD_MULS.with(|c| c.get()))
    }

    #[test]
    fn test_ladder_cost_is_independent_of_scalar() {
        let baseline = ladder_cost(&BigUint::one());
        assert_eq!(baseline.0, SCALAR_BITS);

        let scalars = [
            &CURVE.n - 1u32,
            BigUint::zero(),
            BigUint::from(2u32),
            BigUint::one() << 255u32,
            &CURVE.half_n + 1u32,
            big("15bafcb56279dbfd985d4d17cdaf9bbfc6701b628f9fb00d6d1e0d2cb503ede3"),
        ];
        for k in &scalars {
            assert_eq!(ladder_cost(k), baseline, "k = {:x}", k);
        }
    }

    #[test]
    fn test_ladder_scalar_fixes_top_bit() {
        for k in [
            BigUint::zero(),
            BigUint::one(),
            &CURVE.n - 1u32,
            BigUint::one() << 200u32,
        ] {
            let shifted = ladder_scalar(&k);
            assert!(shifted.bit(256));
            assert_eq!(shifted.bits(), 257);
            assert_eq!(&shifted % &CURVE.n, k);
        }
    }

    #[test]
    fn test_ladder_edge_scalars() {
        let g = AffinePoint::generator();
        assert!(scalar_base_mult(&BigUint::zero()).is_infinity());
        assert_eq!(scalar_base_mult(&BigUint::one()), g);
        assert_eq!(scalar_base_mult(&BigUint::from(2u32)), double(&g));
        assert_eq!(scalar_base_mult(&(&CURVE.n + 5u32)), scalar_base_mult(&BigUint::from(5u32)));
        assert_eq!(scalar_base_mult(&(&CURVE.n - 2u32)), double(&g).negate());
        assert!(scalar_mult(&AffinePoint::infinity(), &BigUint::from(9u32)).is_infinity());
    }

    #[test]
    fn test_complete_addition_cases() {
        let g = AffinePoint::generator().to_jacobian();
        let inf = JacobianPoint::infinity();
        let neg = AffinePoint::generator().negate().to_jacobian();

        assert_eq!(g.add_complete(&g).to_affine(), g.double().to_affine());
        assert!(g.add_complete(&neg).is_infinity());
        assert_eq!(g.add_complete(&inf).to_affine(), g.to_affine());
        assert_eq!(inf.add_complete(&g).to_affine(), g.to_affine());
        assert!(inf.add_complete(&inf).is_infinity());
        assert!(inf.double().is_infinity());
    }

    #[test]
    fn test_decompress_both_parities() {
        let g = AffinePoint::generator();
        let even = AffinePoint::decompress(&g.x, false).unwrap();
        let odd = AffinePoint::decompress(&g.x, true).unwrap();
        assert_eq!(even, g);
        assert_eq!(odd, g.negate());
        // x = 5 has no square root for x^3 + 7
        assert!(AffinePoint::decompress(&BigUint::from(5u32), false).is_err());
    }
}
