//! 17.14 signed fixed-point arithmetic.
//!
//! The MLFQ governor keeps `recent_cpu` and `load_avg` in two's-complement
//! fixed point with a 14-bit fraction, carried in an `i64`. Conversion back
//! to integers rounds half away from zero. Products and quotients go
//! through `i128` intermediates so the governor's multiply-then-divide
//! formulas cannot overflow.

use core::ops::{Add, Neg, Sub};

/// Number of fraction bits.
const FRAC_BITS: u32 = 14;

/// The fixed-point representation of 1.
const UNIT: i64 = 1 << FRAC_BITS;

/// A 17.14 fixed-point number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fixed(i64);

impl Fixed {
    /// Zero.
    pub const ZERO: Fixed = Fixed(0);

    /// One.
    pub const ONE: Fixed = Fixed(UNIT);

    /// Convert an integer to fixed point.
    pub const fn from_int(n: i64) -> Fixed {
        Fixed(n << FRAC_BITS)
    }

    /// Rebuild from raw bits (for storage in atomics).
    pub const fn from_raw(raw: i64) -> Fixed {
        Fixed(raw)
    }

    /// Raw bit pattern.
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Convert to integer, rounding half away from zero.
    pub const fn to_int(self) -> i64 {
        if self.0 >= 0 {
            (self.0 + UNIT / 2) >> FRAC_BITS
        } else {
            -((-self.0 + UNIT / 2) >> FRAC_BITS)
        }
    }

    /// Convert to integer, truncating toward zero.
    pub const fn to_int_trunc(self) -> i64 {
        self.0 / UNIT
    }

    /// Fixed × fixed.
    pub fn mul(self, rhs: Fixed) -> Fixed {
        Fixed(((self.0 as i128 * rhs.0 as i128) >> FRAC_BITS) as i64)
    }

    /// Fixed ÷ fixed.
    pub fn div(self, rhs: Fixed) -> Fixed {
        Fixed((((self.0 as i128) << FRAC_BITS) / rhs.0 as i128) as i64)
    }

    /// Fixed × integer.
    pub fn mul_int(self, n: i64) -> Fixed {
        Fixed((self.0 as i128 * n as i128) as i64)
    }

    /// Fixed ÷ integer.
    pub fn div_int(self, n: i64) -> Fixed {
        Fixed(self.0 / n)
    }

    /// Fixed + integer.
    pub const fn add_int(self, n: i64) -> Fixed {
        Fixed(self.0 + (n << FRAC_BITS))
    }

    /// Fixed − integer.
    pub const fn sub_int(self, n: i64) -> Fixed {
        Fixed(self.0 - (n << FRAC_BITS))
    }
}

impl Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

impl Neg for Fixed {
    type Output = Fixed;
    fn neg(self) -> Fixed {
        Fixed(-self.0)
    }
}
