//! Fixed-point decimal arithmetic for market math.
//!
//! Every monetary quantity flows through [`Dec`], a non-negative base-10
//! fixed-point value with 40 fractional digits backed by `U256`. Products and
//! quotients widen through `U512` and truncate back to 40 digits, so results
//! match big-decimal truncation exactly. `f64` appears only in log rendering,
//! never in position arithmetic.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub};
use std::str::FromStr;

use alloy::primitives::{U256, U512};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Fractional digits carried by every [`Dec`].
pub const FRACTIONAL_DIGITS: u32 = 40;

/// 10^40, the scale factor of [`Dec`].
const SCALE: U256 = U256::from_limbs([
    13_399_722_918_938_673_152,
    7_145_508_105_175_220_139,
    29,
    0,
]);

/// Power of 10 as `U256`.
#[inline]
pub fn pow10(exp: u32) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

#[inline]
fn widen(v: U256) -> U512 {
    U512::from(v)
}

#[inline]
fn narrow(v: U512) -> U256 {
    if v > widen(U256::MAX) {
        U256::MAX
    } else {
        v.to::<U256>()
    }
}

/// Non-negative fixed-point decimal, 40 fractional digits, truncate rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Dec(U256);

impl Dec {
    pub const ZERO: Dec = Dec(U256::ZERO);
    pub const ONE: Dec = Dec(SCALE);
    pub const MAX: Dec = Dec(U256::MAX);

    /// Whole-number constructor.
    pub fn from_int(n: u64) -> Self {
        Dec(U256::from(n) * SCALE)
    }

    /// Convert a raw chain mantissa with the given decimals into a `Dec`.
    ///
    /// `from_mantissa(1_500_000, 6)` is 1.5. Digits beyond the 40th are
    /// truncated.
    pub fn from_mantissa(raw: U256, decimals: u32) -> Self {
        if decimals <= FRACTIONAL_DIGITS {
            Dec(narrow(widen(raw) * widen(pow10(FRACTIONAL_DIGITS - decimals))))
        } else {
            Dec(raw / pow10(decimals - FRACTIONAL_DIGITS))
        }
    }

    /// Truncate to a raw mantissa with the given decimals.
    pub fn to_mantissa(self, decimals: u32) -> U256 {
        if decimals <= FRACTIONAL_DIGITS {
            self.0 / pow10(FRACTIONAL_DIGITS - decimals)
        } else {
            narrow(widen(self.0) * widen(pow10(decimals - FRACTIONAL_DIGITS)))
        }
    }

    /// Truncate to an integer.
    pub fn to_int(self) -> U256 {
        self.0 / SCALE
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_sub(self, rhs: Dec) -> Option<Dec> {
        self.0.checked_sub(rhs.0).map(Dec)
    }

    pub fn saturating_sub(self, rhs: Dec) -> Dec {
        Dec(self.0.saturating_sub(rhs.0))
    }

    pub fn min(self, rhs: Dec) -> Dec {
        if self <= rhs {
            self
        } else {
            rhs
        }
    }

    pub fn max(self, rhs: Dec) -> Dec {
        if self >= rhs {
            self
        } else {
            rhs
        }
    }

    /// Lossy conversion for display and log fields only.
    pub fn to_f64(self) -> f64 {
        self.to_string().parse().unwrap_or(f64::INFINITY)
    }
}

impl Add for Dec {
    type Output = Dec;

    fn add(self, rhs: Dec) -> Dec {
        Dec(self.0 + rhs.0)
    }
}

impl AddAssign for Dec {
    fn add_assign(&mut self, rhs: Dec) {
        self.0 += rhs.0;
    }
}

impl Sub for Dec {
    type Output = Dec;

    /// Panics on underflow. State mutations that may legitimately underflow
    /// go through [`Dec::saturating_sub`].
    fn sub(self, rhs: Dec) -> Dec {
        Dec(self.0 - rhs.0)
    }
}

impl Mul for Dec {
    type Output = Dec;

    fn mul(self, rhs: Dec) -> Dec {
        Dec(narrow(widen(self.0) * widen(rhs.0) / widen(SCALE)))
    }
}

impl Div for Dec {
    type Output = Dec;

    /// Division by zero yields `Dec::MAX`; callers guard where zero is a
    /// meaningful case.
    fn div(self, rhs: Dec) -> Dec {
        if rhs.0.is_zero() {
            return Dec::MAX;
        }
        Dec(narrow(widen(self.0) * widen(SCALE) / widen(rhs.0)))
    }
}

impl fmt::Display for Dec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let int = self.0 / SCALE;
        let frac = self.0 % SCALE;
        if frac.is_zero() {
            return write!(f, "{int}");
        }
        let digits = format!("{:0>width$}", frac.to_string(), width = FRACTIONAL_DIGITS as usize);
        write!(f, "{}.{}", int, digits.trim_end_matches('0'))
    }
}

impl FromStr for Dec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, r)) => (i, r),
            None => (s, ""),
        };
        let valid = |p: &str| p.chars().all(|c| c.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty()) || !valid(int_part) || !valid(frac_part) {
            return Err(Error::InvalidDecimal(s.to_string()));
        }

        let mut value = if int_part.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(int_part, 10)
                .map_err(|_| Error::InvalidDecimal(s.to_string()))?
        };
        value = value
            .checked_mul(SCALE)
            .ok_or_else(|| Error::InvalidDecimal(s.to_string()))?;

        // Fractional digits beyond the scale truncate.
        let frac = &frac_part[..frac_part.len().min(FRACTIONAL_DIGITS as usize)];
        if !frac.is_empty() {
            let digits = U256::from_str_radix(frac, 10)
                .map_err(|_| Error::InvalidDecimal(s.to_string()))?;
            let shifted = digits * pow10(FRACTIONAL_DIGITS - frac.len() as u32);
            value = value
                .checked_add(shifted)
                .ok_or_else(|| Error::InvalidDecimal(s.to_string()))?;
        }
        Ok(Dec(value))
    }
}

impl Serialize for Dec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Dec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
