use std::convert::{Infallible, TryFrom};
use std::error;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul, Sub};

pub const COIN: u64 = 1_0000_0000;
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// A type-safe representation of some nonnegative amount of Bitcoin.
///
/// A Satoshis can only be constructed from an integer that is within the valid monetary
/// range of `{0..MAX_MONEY}` (where `MAX_MONEY` = 21,000,000 × 10⁸ satoshis). Arithmetic
/// returns `None` rather than leaving that range.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Eq, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Satoshis(u64);

impl Satoshis {
    /// Returns the identity `Satoshis`
    pub const ZERO: Self = Satoshis(0);

    /// Returns this Satoshis as a u64.
    pub fn into_u64(self) -> u64 {
        self.0
    }

    /// Creates a Satoshis from a u64.
    ///
    /// Returns an error if the amount is outside the range `{0..MAX_MONEY}`.
    pub fn from_u64(amount: u64) -> Result<Self, ()> {
        if (0..=MAX_MONEY).contains(&amount) {
            Ok(Satoshis(amount))
        } else {
            Err(())
        }
    }

    /// Creates a constant Satoshis from a u64.
    ///
    /// Panics: if the amount is outside the range `{0..MAX_MONEY}`.
    pub const fn const_from_u64(amount: u64) -> Self {
        assert!(amount <= MAX_MONEY); // contains is not const
        Satoshis(amount)
    }

    /// Reads a Satoshis from an unsigned 64-bit little-endian integer.
    ///
    /// Returns an error if the amount is outside the range `{0..MAX_MONEY}`.
    pub fn from_u64_le_bytes(bytes: [u8; 8]) -> Result<Self, ()> {
        Satoshis::from_u64(u64::from_le_bytes(bytes))
    }

    /// Returns this Satoshis encoded as an unsigned 64-bit little-endian integer.
    pub fn to_u64_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Returns whether or not this `Satoshis` is the zero value.
    pub fn is_zero(&self) -> bool {
        self == &Satoshis::ZERO
    }

    /// Returns whether or not this `Satoshis` is positive.
    pub fn is_positive(&self) -> bool {
        self > &Satoshis::ZERO
    }

    /// Subtracts `rhs`, clamping at zero.
    pub fn saturating_sub(self, rhs: Satoshis) -> Satoshis {
        Satoshis(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Satoshis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Satoshis> for u64 {
    fn from(n: Satoshis) -> Self {
        n.0
    }
}

impl From<&Satoshis> for u64 {
    fn from(n: &Satoshis) -> Self {
        n.0
    }
}

impl TryFrom<u64> for Satoshis {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Satoshis::from_u64(value)
    }
}

impl Add<Satoshis> for Satoshis {
    type Output = Option<Satoshis>;

    fn add(self, rhs: Satoshis) -> Option<Satoshis> {
        Satoshis::from_u64(self.0.checked_add(rhs.0)?).ok()
    }
}

impl Add<Satoshis> for Option<Satoshis> {
    type Output = Self;

    fn add(self, rhs: Satoshis) -> Option<Satoshis> {
        self.and_then(|lhs| lhs + rhs)
    }
}

impl Sub<Satoshis> for Satoshis {
    type Output = Option<Satoshis>;

    fn sub(self, rhs: Satoshis) -> Option<Satoshis> {
        Satoshis::from_u64(self.0.checked_sub(rhs.0)?).ok()
    }
}

impl Sub<Satoshis> for Option<Satoshis> {
    type Output = Self;

    fn sub(self, rhs: Satoshis) -> Option<Satoshis> {
        self.and_then(|lhs| lhs - rhs)
    }
}

impl Mul<u64> for Satoshis {
    type Output = Option<Self>;

    fn mul(self, rhs: u64) -> Option<Satoshis> {
        Satoshis::from_u64(self.0.checked_mul(rhs)?).ok()
    }
}

impl Sum<Satoshis> for Option<Satoshis> {
    fn sum<I: Iterator<Item = Satoshis>>(iter: I) -> Self {
        iter.fold(Some(Satoshis::ZERO), |acc, a| acc? + a)
    }
}

impl<'a> Sum<&'a Satoshis> for Option<Satoshis> {
    fn sum<I: Iterator<Item = &'a Satoshis>>(iter: I) -> Self {
        iter.fold(Some(Satoshis::ZERO), |acc, a| acc? + *a)
    }
}

/// A type for balance violations in amount addition and subtraction
/// (overflow and underflow of allowed ranges)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BalanceError {
    Overflow,
    Underflow,
}

impl error::Error for BalanceError {}

impl fmt::Display for BalanceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self {
            BalanceError::Overflow => {
                write!(
                    f,
                    "Satoshis addition resulted in a value outside the valid range."
                )
            }
            BalanceError::Underflow => write!(
                f,
                "Satoshis subtraction resulted in a value outside the valid range."
            ),
        }
    }
}

impl From<Infallible> for BalanceError {
    fn from(_value: Infallible) -> Self {
        unreachable!()
    }
}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing {
    use proptest::prelude::prop_compose;

    use super::{Satoshis, MAX_MONEY};

    prop_compose! {
        pub fn arb_satoshis()(amt in 0u64..MAX_MONEY) -> Satoshis {
            Satoshis::from_u64(amt).unwrap()
        }
    }
}
