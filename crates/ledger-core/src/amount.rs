use std::{fmt, iter::Sum, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::constants::AMOUNT_SCALE;

/// Fixed-point, non-negative quantity of coin with two decimal places.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    pub const fn whole(units: u64) -> Self {
        Self(units * AMOUNT_SCALE)
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / AMOUNT_SCALE, self.0 % AMOUNT_SCALE)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        Amount(iter.map(|a| a.0).sum())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid amount {0:?}: expected a non-negative number with at most two decimals")]
pub struct ParseAmountError(String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAmountError(s.to_string());
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        let whole: u64 = whole.parse().map_err(|_| err())?;
        let frac: u64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().map_err(|_| err())? * 10,
            _ => frac.parse().map_err(|_| err())?,
        };
        whole
            .checked_mul(AMOUNT_SCALE)
            .and_then(|m| m.checked_add(frac))
            .map(Amount)
            .ok_or_else(err)
    }
}
