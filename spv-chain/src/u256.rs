//! 256-bit unsigned integer for targets and chain work

use std::cmp::Ordering;
use std::fmt;

/// Unsigned 256-bit integer, little-endian 64-bit limbs
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct U256([u64; 4]);

impl U256 {
    /// Zero
    pub const ZERO: U256 = U256([0; 4]);
    /// One
    pub const ONE: U256 = U256([1, 0, 0, 0]);
    /// 2^256 - 1
    pub const MAX: U256 = U256([u64::MAX; 4]);

    /// From a 64-bit value
    pub const fn from_u64(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }

    /// From 32 little-endian bytes (the byte order of a hash in memory)
    pub fn from_le_bytes(bytes: &[u8; 32]) -> Self {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            *limb = u64::from_le_bytes(buf);
        }
        U256(limbs)
    }

    /// Big-endian bytes
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, limb) in self.0.iter().rev().enumerate() {
            out[i * 8..i * 8 + 8].copy_from_slice(&limb.to_be_bytes());
        }
        out
    }

    /// Whether the value is zero
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }

    /// Number of significant bits
    pub fn bits(&self) -> u32 {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return 64 * i as u32 + 64 - self.0[i].leading_zeros();
            }
        }
        0
    }

    /// Lowest 64 bits
    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    fn bit(&self, index: u32) -> bool {
        (self.0[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    fn set_bit(&mut self, index: u32) {
        self.0[(index / 64) as usize] |= 1 << (index % 64);
    }

    /// Addition, `None` on overflow
    pub fn checked_add(self, rhs: U256) -> Option<U256> {
        let mut out = [0u64; 4];
        let mut carry = false;
        for (i, limb) in out.iter_mut().enumerate() {
            let (sum, c1) = self.0[i].overflowing_add(rhs.0[i]);
            let (sum, c2) = sum.overflowing_add(carry as u64);
            *limb = sum;
            carry = c1 || c2;
        }
        if carry {
            None
        } else {
            Some(U256(out))
        }
    }

    /// Addition clamped at [`U256::MAX`]
    pub fn saturating_add(self, rhs: U256) -> U256 {
        self.checked_add(rhs).unwrap_or(U256::MAX)
    }

    fn wrapping_sub(self, rhs: U256) -> U256 {
        let mut out = [0u64; 4];
        let mut borrow = false;
        for (i, limb) in out.iter_mut().enumerate() {
            let (diff, b1) = self.0[i].overflowing_sub(rhs.0[i]);
            let (diff, b2) = diff.overflowing_sub(borrow as u64);
            *limb = diff;
            borrow = b1 || b2;
        }
        U256(out)
    }

    /// Subtraction, `None` on underflow
    pub fn checked_sub(self, rhs: U256) -> Option<U256> {
        if self < rhs {
            None
        } else {
            Some(self.wrapping_sub(rhs))
        }
    }

    /// Multiplication by a 64-bit value, `None` on overflow
    pub fn checked_mul_u64(self, rhs: u64) -> Option<U256> {
        let mut out = [0u64; 4];
        let mut carry: u128 = 0;
        for (i, limb) in out.iter_mut().enumerate() {
            let product = self.0[i] as u128 * rhs as u128 + carry;
            *limb = product as u64;
            carry = product >> 64;
        }
        if carry != 0 {
            None
        } else {
            Some(U256(out))
        }
    }

    /// Division by a 64-bit value, `None` when dividing by zero
    pub fn checked_div_u64(self, rhs: u64) -> Option<U256> {
        if rhs == 0 {
            return None;
        }
        let mut out = [0u64; 4];
        let mut rem: u128 = 0;
        for i in (0..4).rev() {
            let cur = (rem << 64) | self.0[i] as u128;
            out[i] = (cur / rhs as u128) as u64;
            rem = cur % rhs as u128;
        }
        Some(U256(out))
    }

    /// Division, `None` when dividing by zero
    pub fn checked_div(self, rhs: U256) -> Option<U256> {
        if rhs.is_zero() {
            return None;
        }
        let mut quotient = U256::ZERO;
        let mut rem = U256::ZERO;
        for i in (0..self.bits()).rev() {
            let carried_out = rem.bit(255);
            rem = rem.shl_bits(1);
            if self.bit(i) {
                rem.0[0] |= 1;
            }
            if carried_out || rem >= rhs {
                rem = rem.wrapping_sub(rhs);
                quotient.set_bit(i);
            }
        }
        Some(quotient)
    }

    /// Left shift; shifts of 256 or more give zero
    pub fn shl_bits(self, shift: u32) -> U256 {
        if shift >= 256 {
            return U256::ZERO;
        }
        let limbs = (shift / 64) as usize;
        let bits = shift % 64;
        let mut out = [0u64; 4];
        for i in (limbs..4).rev() {
            out[i] = self.0[i - limbs] << bits;
            if bits > 0 && i > limbs {
                out[i] |= self.0[i - limbs - 1] >> (64 - bits);
            }
        }
        U256(out)
    }

    /// Right shift; shifts of 256 or more give zero
    pub fn shr_bits(self, shift: u32) -> U256 {
        if shift >= 256 {
            return U256::ZERO;
        }
        let limbs = (shift / 64) as usize;
        let bits = shift % 64;
        let mut out = [0u64; 4];
        for i in 0..(4 - limbs) {
            out[i] = self.0[i + limbs] >> bits;
            if bits > 0 && i + limbs + 1 < 4 {
                out[i] |= self.0[i + limbs + 1] << (64 - bits);
            }
        }
        U256(out)
    }
}

impl std::ops::Not for U256 {
    type Output = U256;

    fn not(self) -> U256 {
        U256([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.to_be_bytes());
        let trimmed = hex.trim_start_matches('0');
        write!(f, "0x{}", if trimmed.is_empty() { "0" } else { trimmed })
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U256({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shifts() {
        let one = U256::ONE;
        assert_eq!(one.shl_bits(255).bits(), 256);
        assert_eq!(one.shl_bits(255).shr_bits(255), one);
        assert_eq!(U256::from_u64(0xff).shl_bits(60).shr_bits(56), U256::from_u64(0xff0));
        assert_eq!(one.shl_bits(256), U256::ZERO);
    }

    #[test]
    fn test_ordering_across_limbs() {
        assert!(U256::ONE.shl_bits(64) > U256::from_u64(u64::MAX));
        assert!(U256::MAX > U256::ONE.shl_bits(255));
    }

    #[test]
    fn test_add_sub() {
        let a = U256::from_u64(u64::MAX);
        let b = a.checked_add(U256::ONE).unwrap();
        assert_eq!(b, U256::ONE.shl_bits(64));
        assert_eq!(b.checked_sub(U256::ONE), Some(a));
        assert_eq!(U256::ZERO.checked_sub(U256::ONE), None);
        assert_eq!(U256::MAX.checked_add(U256::ONE), None);
    }

    #[test]
    fn test_mul_div() {
        let x = U256::from_u64(0x1234_5678_9abc).shl_bits(100);
        let y = x.checked_mul_u64(1_000).unwrap();
        assert_eq!(y.checked_div_u64(1_000), Some(x));
        assert_eq!(y.checked_div(U256::from_u64(1_000)), Some(x));
        assert_eq!(U256::MAX.checked_mul_u64(2), None);
        assert_eq!(x.checked_div(U256::ZERO), None);
    }

    #[test]
    fn test_div_large_divisor() {
        let d = U256::ONE.shl_bits(255);
        assert_eq!(U256::MAX.checked_div(d), Some(U256::ONE));
        assert_eq!((!d).checked_div(d.checked_add(U256::ONE).unwrap()), Some(U256::ZERO));
    }

    #[test]
    fn test_display() {
        assert_eq!(U256::from_u64(255).to_string(), "0xff");
        assert_eq!(U256::ZERO.to_string(), "0x0");
    }
}
