use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantity must not be empty")]
    Empty,
    #[error("invalid number in quantity '{0}'")]
    InvalidNumber(String),
    #[error("unknown suffix '{suffix}' in quantity '{input}'")]
    UnknownSuffix { input: String, suffix: String },
    #[error("quantity '{0}' is out of range")]
    OutOfRange(String),
}

/// A Kubernetes resource quantity (`500m`, `2`, `4Gi`, `1e3`), stored in
/// thousandths of the base unit so CPU millicores stay exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    millis: i64,
}

impl Quantity {
    pub const ZERO: Quantity = Quantity { millis: 0 };

    pub fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// Whole base units (cores, bytes, devices).
    pub fn from_value(value: i64) -> Self {
        Self {
            millis: value.saturating_mul(1000),
        }
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Value in whole base units, truncated toward zero.
    pub fn value(&self) -> i64 {
        self.millis / 1000
    }

    /// Value in base units as a float, e.g. cores for CPU.
    pub fn as_f64(&self) -> f64 {
        self.millis as f64 / 1000.0
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }
}

impl Add for Quantity {
    type Output = Quantity;
    fn add(self, rhs: Self) -> Self::Output {
        Quantity {
            millis: self.millis.saturating_add(rhs.millis),
        }
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Self) {
        self.millis = self.millis.saturating_add(rhs.millis);
    }
}

impl Sub for Quantity {
    type Output = Quantity;
    fn sub(self, rhs: Self) -> Self::Output {
        Quantity {
            millis: self.millis.saturating_sub(rhs.millis),
        }
    }
}

impl std::iter::Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

/// Multiplier of a suffix as `numerator / denominator` of the base unit.
fn suffix_scale(input: &str, suffix: &str) -> Result<(i128, i128), QuantityError> {
    let scale = match suffix {
        "" => (1, 1),
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1_000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => {
            // Decimal exponent form: 1e3, 5E-2
            let exp = suffix
                .strip_prefix(['e', 'E'])
                .and_then(|e| e.parse::<i32>().ok())
                .ok_or_else(|| QuantityError::UnknownSuffix {
                    input: input.to_string(),
                    suffix: suffix.to_string(),
                })?;
            if exp.abs() > 18 {
                return Err(QuantityError::OutOfRange(input.to_string()));
            }
            let pow = 10i128.pow(exp.unsigned_abs());
            if exp >= 0 { (pow, 1) } else { (1, pow) }
        }
    };
    Ok(scale)
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, body) = match input.as_bytes()[0] {
            b'-' => (true, &input[1..]),
            b'+' => (false, &input[1..]),
            _ => (false, input),
        };
        let split = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(split);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }
        if fraction.len() > 18 {
            return Err(QuantityError::OutOfRange(input.to_string()));
        }
        let digits: i128 = format!("{}{}", whole, fraction)
            .parse()
            .map_err(|_| QuantityError::InvalidNumber(input.to_string()))?;
        let fraction_scale = 10i128.pow(fraction.len() as u32);

        let (num, den) = suffix_scale(input, suffix)?;
        let numerator = digits
            .checked_mul(num)
            .and_then(|v| v.checked_mul(1000))
            .ok_or_else(|| QuantityError::OutOfRange(input.to_string()))?;
        let denominator = fraction_scale * den;
        // Sub-milli precision rounds up, as the API server does.
        let millis = (numerator + denominator - 1) / denominator;
        let millis = i64::try_from(millis).map_err(|_| QuantityError::OutOfRange(input.to_string()))?;

        Ok(Quantity {
            millis: if negative { -millis } else { millis },
        })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 == 0 {
            write!(f, "{}", self.millis / 1000)
        } else {
            write!(f, "{}m", self.millis)
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct QuantityVisitor;

impl<'de> Visitor<'de> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a quantity string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
        Ok(Quantity::from_value(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
        i64::try_from(v)
            .map(Quantity::from_value)
            .map_err(|_| E::custom("quantity out of range"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quantity, E> {
        Ok(Quantity::from_millis((v * 1000.0).ceil() as i64))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}
