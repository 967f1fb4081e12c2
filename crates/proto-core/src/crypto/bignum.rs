use std::fmt;
use std::ops::{Add, AddAssign, Mul, MulAssign, Sub, SubAssign};

use num_bigint::{BigInt as NumBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};
use rand::RngCore;

use crate::error::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Arbitrary-precision signed integer used by the SRP6 exchange.
///
/// Arithmetic returns fresh values. Only the `*Assign` operators mutate the
/// receiver. Byte import/export works on the magnitude.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BigInt(NumBigInt);

impl BigInt {
    pub fn zero() -> Self {
        Self(NumBigInt::zero())
    }

    pub fn from_u32(value: u32) -> Self {
        Self(NumBigInt::from(value))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(NumBigInt::from(value))
    }

    pub fn from_bytes(bytes: &[u8], endian: Endian) -> Self {
        match endian {
            Endian::Little => Self(NumBigInt::from_bytes_le(Sign::Plus, bytes)),
            Endian::Big => Self(NumBigInt::from_bytes_be(Sign::Plus, bytes)),
        }
    }

    /// Parses a big-endian hex string, optionally prefixed with `0x` or `-`.
    pub fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let trimmed = text.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);

        let value = NumBigInt::parse_bytes(digits.as_bytes(), 16)
            .ok_or_else(|| CryptoError::InvalidHex(text.to_string()))?;
        Ok(Self(if negative { -value } else { value }))
    }

    pub fn set_hex_str(&mut self, text: &str) -> Result<(), CryptoError> {
        *self = Self::from_hex(text)?;
        Ok(())
    }

    /// Fills `self` with `num_bits` random bits, the top one always set.
    pub fn set_rand<R: RngCore + ?Sized>(&mut self, num_bits: usize, rng: &mut R) {
        *self = Self::random(num_bits, rng);
    }

    pub fn random<R: RngCore + ?Sized>(num_bits: usize, rng: &mut R) -> Self {
        if num_bits == 0 {
            return Self::zero();
        }

        let len = num_bits.div_ceil(8);
        let excess = len * 8 - num_bits;
        let mut bytes = vec![0u8; len];
        rng.fill_bytes(&mut bytes);
        if let Some(top) = bytes.last_mut() {
            *top &= 0xFF >> excess;
            *top |= 0x80 >> excess;
        }
        Self::from_bytes(&bytes, Endian::Little)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn num_bits(&self) -> usize {
        self.0.bits() as usize
    }

    pub fn num_bytes(&self) -> usize {
        self.num_bits().div_ceil(8)
    }

    /// Low 32 bits of the magnitude.
    pub fn as_dword(&self) -> u32 {
        let bytes = self.to_bytes(4, Endian::Little);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Exports the magnitude, zero-padded on the most significant side up to
    /// `min_size`. Zero with `min_size == 0` exports no bytes.
    pub fn to_bytes(&self, min_size: usize, endian: Endian) -> Vec<u8> {
        let mut bytes = if self.is_zero() {
            Vec::new()
        } else {
            self.0.magnitude().to_bytes_le()
        };
        if bytes.len() < min_size {
            bytes.resize(min_size, 0);
        }
        if endian == Endian::Big {
            bytes.reverse();
        }
        bytes
    }

    /// Exports into exactly `N` bytes, failing if the value does not fit.
    pub fn to_array<const N: usize>(&self, endian: Endian) -> Result<[u8; N], CryptoError> {
        let bytes = self.to_bytes(N, endian);
        if bytes.len() > N {
            return Err(CryptoError::Overflow {
                needed: bytes.len(),
                capacity: N,
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Uppercase big-endian hex, the way the logon server logs these values.
    pub fn to_hex_str(&self) -> String {
        self.0.to_str_radix(16).to_uppercase()
    }

    pub fn to_dec_str(&self) -> String {
        self.0.to_str_radix(10)
    }

    pub fn checked_div(&self, divisor: &BigInt) -> Result<BigInt, CryptoError> {
        if divisor.is_zero() {
            return Err(CryptoError::DivisionByZero);
        }
        Ok(Self(&self.0 / &divisor.0))
    }

    /// Truncating remainder; the result takes the sign of `self`.
    pub fn checked_rem(&self, divisor: &BigInt) -> Result<BigInt, CryptoError> {
        if divisor.is_zero() {
            return Err(CryptoError::DivisionByZero);
        }
        Ok(Self(&self.0 % &divisor.0))
    }

    /// `self ^ exponent mod modulus`, always in `[0, modulus)`.
    ///
    /// Left-to-right square-and-multiply over the exponent bytes. Operands may
    /// alias each other.
    pub fn mod_exp(&self, exponent: &BigInt, modulus: &BigInt) -> Result<BigInt, CryptoError> {
        if !modulus.0.is_positive() {
            return Err(CryptoError::InvalidModulus);
        }
        if exponent.is_negative() {
            return Err(CryptoError::InvalidExponent);
        }

        let m = &modulus.0;
        let base = self.0.mod_floor(m);
        let mut result = NumBigInt::one().mod_floor(m);

        for byte in exponent.to_bytes(0, Endian::Big) {
            for shift in (0..8).rev() {
                result = (&result * &result).mod_floor(m);
                if (byte >> shift) & 1 == 1 {
                    result = (&result * &base).mod_floor(m);
                }
            }
        }

        Ok(Self(result))
    }

    /// Plain power without reduction.
    pub fn exp(&self, exponent: &BigInt) -> Result<BigInt, CryptoError> {
        let power = exponent.0.to_u32().ok_or(CryptoError::InvalidExponent)?;
        Ok(Self(self.0.pow(power)))
    }

    pub fn as_inner(&self) -> &NumBigInt {
        &self.0
    }
}

impl From<NumBigInt> for BigInt {
    fn from(value: NumBigInt) -> Self {
        Self(value)
    }
}

impl From<BigInt> for NumBigInt {
    fn from(value: BigInt) -> Self {
        value.0
    }
}

impl From<u32> for BigInt {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_str())
    }
}

macro_rules! forward_binop {
    ($imp:ident, $method:ident, $assign:ident, $assign_method:ident) => {
        impl $imp<&BigInt> for &BigInt {
            type Output = BigInt;

            fn $method(self, rhs: &BigInt) -> BigInt {
                BigInt((&self.0).$method(&rhs.0))
            }
        }

        impl $imp for BigInt {
            type Output = BigInt;

            fn $method(self, rhs: BigInt) -> BigInt {
                BigInt(self.0.$method(rhs.0))
            }
        }

        impl $assign<&BigInt> for BigInt {
            fn $assign_method(&mut self, rhs: &BigInt) {
                self.0.$assign_method(&rhs.0);
            }
        }
    };
}

forward_binop!(Add, add, AddAssign, add_assign);
forward_binop!(Sub, sub, SubAssign, sub_assign);
forward_binop!(Mul, mul, MulAssign, mul_assign);

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn n() -> BigInt {
        BigInt::from_hex("894B645E89E1535BBDAD5B8B290650530801B18EBFBF5E8FAB3C82872A3E9BB7")
            .unwrap()
    }

    #[test]
    fn mod_exp_small_values() {
        let r = BigInt::from_u32(4)
            .mod_exp(&BigInt::from_u32(13), &BigInt::from_u32(497))
            .unwrap();
        assert_eq!(r, BigInt::from_u32(445));
    }

    #[test]
    fn mod_exp_zero_exponent_is_one_reduced() {
        let r = BigInt::from_u32(7)
            .mod_exp(&BigInt::zero(), &BigInt::from_u32(5))
            .unwrap();
        assert_eq!(r, BigInt::from_u32(1));

        let r = BigInt::from_u32(7)
            .mod_exp(&BigInt::zero(), &BigInt::from_u32(1))
            .unwrap();
        assert!(r.is_zero());
    }

    #[test]
    fn mod_exp_normalizes_negative_base() {
        let base = &BigInt::zero() - &BigInt::from_u32(3);
        let r = base.mod_exp(&BigInt::from_u32(1), &BigInt::from_u32(7)).unwrap();
        assert_eq!(r, BigInt::from_u32(4));
    }

    #[test]
    fn mod_exp_accepts_aliased_operands() {
        let x = BigInt::from_u32(9);
        // 9^9 mod 9
        assert!(x.mod_exp(&x, &x).unwrap().is_zero());

        let m = n();
        let a = BigInt::from_u32(7);
        let by_alias = a.mod_exp(&a, &m).unwrap();
        let copy = a.clone();
        assert_eq!(by_alias, a.mod_exp(&copy, &m).unwrap());
    }

    #[test]
    fn mod_exp_matches_num_bigint() {
        let m = n();
        let base = BigInt::from_hex("123456789ABCDEF0FEDCBA9876543210").unwrap();
        let exp = BigInt::from_hex("EF6D7A946179533A2C1F0B0A0D12D1E").unwrap();
        let ours = base.mod_exp(&exp, &m).unwrap();
        let theirs = base.as_inner().modpow(exp.as_inner(), m.as_inner());
        assert_eq!(ours, BigInt::from(theirs));
    }

    #[test]
    fn mod_exp_rejects_bad_modulus() {
        let one = BigInt::from_u32(1);
        assert_eq!(
            one.mod_exp(&one, &BigInt::zero()),
            Err(CryptoError::InvalidModulus)
        );
        let negative = &BigInt::zero() - &BigInt::from_u32(5);
        assert_eq!(one.mod_exp(&one, &negative), Err(CryptoError::InvalidModulus));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let one = BigInt::from_u32(1);
        assert_eq!(one.checked_div(&BigInt::zero()), Err(CryptoError::DivisionByZero));
        assert_eq!(one.checked_rem(&BigInt::zero()), Err(CryptoError::DivisionByZero));
        assert_eq!(
            BigInt::from_u32(17).checked_rem(&BigInt::from_u32(5)).unwrap(),
            BigInt::from_u32(2)
        );
    }

    #[test]
    fn export_pads_on_most_significant_side() {
        let v = BigInt::from_u32(0x0102);
        assert_eq!(v.to_bytes(4, Endian::Little), vec![0x02, 0x01, 0x00, 0x00]);
        assert_eq!(v.to_bytes(4, Endian::Big), vec![0x00, 0x00, 0x01, 0x02]);
        assert_eq!(v.to_bytes(0, Endian::Little), vec![0x02, 0x01]);
        assert!(BigInt::zero().to_bytes(0, Endian::Little).is_empty());
    }

    #[test]
    fn to_array_rejects_values_that_do_not_fit() {
        let v = BigInt::from_u64(0x0102_0304_0506);
        assert_eq!(
            v.to_array::<4>(Endian::Little),
            Err(CryptoError::Overflow {
                needed: 6,
                capacity: 4
            })
        );
        assert_eq!(
            v.to_array::<8>(Endian::Big).unwrap(),
            [0, 0, 1, 2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn hex_rendering_is_uppercase_big_endian() {
        let v = BigInt::from_bytes(&[0xB7, 0x9B, 0x3E], Endian::Little);
        assert_eq!(v.to_hex_str(), "3E9BB7");
        assert_eq!(v.to_string(), "3E9BB7");
        assert_eq!(BigInt::from_hex("0x3e9bb7").unwrap(), v);
        assert_eq!(v.to_dec_str(), "4103095");
        assert!(matches!(
            BigInt::from_hex("xyz"),
            Err(CryptoError::InvalidHex(_))
        ));
    }

    #[test]
    fn set_rand_sets_top_bit() {
        let mut rng = StdRng::seed_from_u64(7);
        for bits in [1usize, 7, 8, 9, 32, 152] {
            let mut v = BigInt::zero();
            v.set_rand(bits, &mut rng);
            assert_eq!(v.num_bits(), bits, "bits={bits}");
        }
    }

    #[test]
    fn as_dword_takes_low_bits() {
        let v = BigInt::from_u64(0x1122_3344_5566_7788);
        assert_eq!(v.as_dword(), 0x5566_7788);
        assert_eq!(BigInt::zero().as_dword(), 0);
    }

    #[test]
    fn compound_assignment_mutates_in_place() {
        let mut v = BigInt::from_u32(10);
        v += &BigInt::from_u32(5);
        v *= &BigInt::from_u32(2);
        v -= &BigInt::from_u32(40);
        assert!(v.is_negative());
        assert_eq!(v.to_dec_str(), "-10");
    }

    #[test]
    fn exp_is_unreduced_power() {
        let v = BigInt::from_u32(2).exp(&BigInt::from_u32(100)).unwrap();
        assert_eq!(v.num_bits(), 101);
        assert_eq!(
            BigInt::from_u32(2).exp(&BigInt::from_u64(u64::MAX)),
            Err(CryptoError::InvalidExponent)
        );
    }
}
