//! Exact decimal numbers
//!
//! Literals keep the precision they were written with: `1.50` stays `1.50`.
//! Arithmetic is exact for add/sub/mul; division is exact when the quotient
//! terminates and otherwise rounds half-even at [`MAX_SCALE`] fractional
//! digits. Every operation is checked: `None` means the result does not fit.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Maximum number of fractional digits a computed value may carry.
pub const MAX_SCALE: u32 = 28;

#[derive(Debug, Clone, Copy)]
pub struct Decimal {
    mantissa: i128,
    scale: u32,
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

impl Decimal {
    pub const ZERO: Decimal = Decimal {
        mantissa: 0,
        scale: 0,
    };

    pub const ONE: Decimal = Decimal {
        mantissa: 1,
        scale: 0,
    };

    pub fn new(mantissa: i128, scale: u32) -> Self {
        Self { mantissa, scale }
    }

    pub fn from_i64(value: i64) -> Self {
        Self::new(value as i128, 0)
    }

    /// Parse `-?[0-9]+(\.[0-9]+)?`. Exponent notation is rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if body.contains('.') && (frac_part.is_empty() || !frac_part.bytes().all(|b| b.is_ascii_digit())) {
            return None;
        }

        let mut mantissa: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)?
                .checked_add((b - b'0') as i128)?;
        }
        if negative {
            mantissa = -mantissa;
        }
        Some(Self::new(mantissa, frac_part.len() as u32))
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa < 0
    }

    pub fn is_integer(&self) -> bool {
        match pow10(self.scale) {
            Some(p) => self.mantissa % p == 0,
            None => self.mantissa == 0,
        }
    }

    /// Integral value as `i64`, or `None` when fractional or out of range.
    pub fn to_i64(&self) -> Option<i64> {
        if !self.is_integer() {
            return None;
        }
        let whole = self.mantissa / pow10(self.scale)?;
        i64::try_from(whole).ok()
    }

    pub fn neg(&self) -> Self {
        Self::new(-self.mantissa, self.scale)
    }

    fn rescale(&self, scale: u32) -> Option<i128> {
        debug_assert!(scale >= self.scale);
        self.mantissa.checked_mul(pow10(scale - self.scale)?)
    }

    fn aligned(&self, other: &Decimal) -> Option<(i128, i128, u32)> {
        let scale = self.scale.max(other.scale);
        Some((self.rescale(scale)?, other.rescale(scale)?, scale))
    }

    pub fn checked_add(&self, other: &Decimal) -> Option<Decimal> {
        let (a, b, scale) = self.aligned(other)?;
        Some(Self::new(a.checked_add(b)?, scale))
    }

    pub fn checked_sub(&self, other: &Decimal) -> Option<Decimal> {
        let (a, b, scale) = self.aligned(other)?;
        Some(Self::new(a.checked_sub(b)?, scale))
    }

    pub fn checked_mul(&self, other: &Decimal) -> Option<Decimal> {
        let mantissa = self.mantissa.checked_mul(other.mantissa)?;
        Self::new(mantissa, self.scale + other.scale).reduced_to(MAX_SCALE)
    }

    /// Truncated remainder; the sign follows the dividend.
    pub fn checked_rem(&self, other: &Decimal) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        let (a, b, scale) = self.aligned(other)?;
        Some(Self::new(a % b, scale))
    }

    /// Long division, one fractional digit per step. Stops as soon as the
    /// quotient is exact at or past the ideal scale, otherwise rounds
    /// half-even at [`MAX_SCALE`] or at the last digit that still fits.
    pub fn checked_div(&self, other: &Decimal) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        // a / b == (ma * 10^sb) / (mb * 10^sa)
        let numerator = self.mantissa.checked_mul(pow10(other.scale)?)?;
        let denominator = other.mantissa.checked_mul(pow10(self.scale)?)?;
        let negative = (numerator < 0) != (denominator < 0);
        let n = numerator.checked_abs()?;
        let d = denominator.checked_abs()?;

        let ideal = self.scale.saturating_sub(other.scale);
        let mut q = n / d;
        let mut r = n % d;
        let mut scale = 0;
        loop {
            if r == 0 && scale >= ideal {
                break;
            }
            let next = q.checked_mul(10).and_then(|q| q.checked_add(9));
            let (Some(_), Some(shifted)) = (next, r.checked_mul(10)) else {
                break;
            };
            if scale == MAX_SCALE {
                break;
            }
            q = q * 10 + shifted / d;
            r = shifted % d;
            scale += 1;
        }

        if r != 0 {
            let rest = d - r;
            if r > rest || (r == rest && q % 2 == 1) {
                q = q.checked_add(1)?;
            }
        }
        Some(Self::new(if negative { -q } else { q }, scale))
    }

    /// Integral exponents only; a negative exponent divides.
    pub fn checked_pow(&self, exponent: &Decimal) -> Option<Decimal> {
        let exp = exponent.to_i64()?;
        if exp == 0 {
            return Some(Decimal::ONE);
        }
        if self.is_zero() {
            return if exp > 0 { Some(Decimal::ZERO) } else { None };
        }
        if *self == Decimal::ONE {
            return Some(Decimal::ONE);
        }
        if *self == Decimal::ONE.neg() {
            return Some(if exp % 2 == 0 { Decimal::ONE } else { Decimal::ONE.neg() });
        }

        let mut base = *self;
        let mut remaining = exp.unsigned_abs();
        let mut result = Decimal::ONE;
        while remaining > 0 {
            if remaining & 1 == 1 {
                result = result.checked_mul(&base)?;
            }
            remaining >>= 1;
            if remaining > 0 {
                base = base.checked_mul(&base)?;
            }
        }
        if exp < 0 {
            Decimal::ONE.checked_div(&result)
        } else {
            Some(result)
        }
    }

    /// Round half-even down to `max_scale` fractional digits if needed.
    fn reduced_to(self, max_scale: u32) -> Option<Decimal> {
        if self.scale <= max_scale {
            return Some(self);
        }
        let divisor = pow10(self.scale - max_scale)?;
        let mut q = self.mantissa / divisor;
        let r = (self.mantissa % divisor).abs();
        let twice = r.checked_mul(2)?;
        if twice > divisor || (twice == divisor && q % 2 != 0) {
            q += self.mantissa.signum();
        }
        Some(Self::new(q, max_scale))
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.aligned(other) {
            Some((a, b, _)) => a.cmp(&b),
            // Only reachable with enormous scale gaps; fall back to sign and integral part.
            None => {
                let a = self.mantissa / pow10(self.scale.min(38)).unwrap_or(1);
                let b = other.mantissa / pow10(other.scale.min(38)).unwrap_or(1);
                a.cmp(&b)
                    .then(self.mantissa.signum().cmp(&other.mantissa.signum()))
            }
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        if self.mantissa < 0 {
            f.write_str("-")?;
        }
        let scale = self.scale as usize;
        if scale == 0 {
            return f.write_str(&digits);
        }
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
        } else {
            digits
        };
        let split = padded.len() - scale;
        write!(f, "{}.{}", &padded[..split], &padded[split..])
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal::from_i64(value)
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Decimal::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid decimal '{}'", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(text: &str) -> Decimal {
        Decimal::parse(text).unwrap()
    }

    #[test]
    fn test_parse_keeps_literal_scale() {
        assert_eq!(d("1.50").to_string(), "1.50");
        assert_eq!(d("-0.05").to_string(), "-0.05");
        assert_eq!(d("42").to_string(), "42");
        assert!(Decimal::parse("1.").is_none());
        assert!(Decimal::parse("1e5").is_none());
        assert!(Decimal::parse("").is_none());
    }

    #[test]
    fn test_addition_is_exact() {
        assert_eq!(d("0.1").checked_add(&d("0.2")).unwrap().to_string(), "0.3");
        assert_eq!(d("1.5").checked_sub(&d("2")).unwrap().to_string(), "-0.5");
    }

    #[test]
    fn test_equality_ignores_trailing_zeros() {
        assert_eq!(d("1.0"), d("1"));
        assert!(d("2.5") > d("2.49"));
        assert!(d("-3") < d("0"));
    }

    #[test]
    fn test_division() {
        assert_eq!(d("6").checked_div(&d("2")).unwrap().to_string(), "3");
        assert_eq!(d("1").checked_div(&d("4")).unwrap().to_string(), "0.25");
        assert_eq!(
            d("1").checked_div(&d("3")).unwrap().to_string(),
            "0.3333333333333333333333333333"
        );
        assert_eq!(
            d("2").checked_div(&d("3")).unwrap().to_string(),
            "0.6666666666666666666666666667"
        );
        assert!(d("1").checked_div(&d("0")).is_none());
        assert_eq!(d("1.50").checked_div(&d("1")).unwrap().to_string(), "1.50");
        assert_eq!(d("-1").checked_div(&d("8")).unwrap().to_string(), "-0.125");
    }

    #[test]
    fn test_large_dividend_keeps_the_digits_that_fit() {
        let third = d("100000000000").checked_div(&d("3")).unwrap();
        assert_eq!(third.to_string(), format!("33333333333.{}", "3".repeat(27)));

        let two_thirds = d("200000000000").checked_div(&d("3")).unwrap();
        assert_eq!(two_thirds.to_string(), format!("66666666666.{}7", "6".repeat(26)));
    }

    #[test]
    fn test_pow_and_rem() {
        assert_eq!(d("2").checked_pow(&d("10")).unwrap().to_string(), "1024");
        assert_eq!(d("2").checked_pow(&d("-2")).unwrap().to_string(), "0.25");
        assert!(d("2").checked_pow(&d("0.5")).is_none());
        assert_eq!(d("3").checked_pow(&d("5")).unwrap().to_string(), "243");
        assert_eq!(d("1.5").checked_pow(&d("2")).unwrap().to_string(), "2.25");
        assert_eq!(d("7").checked_rem(&d("3")).unwrap().to_string(), "1");
        assert_eq!(d("-7").checked_rem(&d("3")).unwrap().to_string(), "-1");
    }

    #[test]
    fn test_pow_with_huge_exponents_terminates() {
        let huge = d("100000000000000");
        assert_eq!(d("1").checked_pow(&huge), Some(Decimal::ONE));
        assert_eq!(d("-1").checked_pow(&d("100000000000001")), Some(Decimal::ONE.neg()));
        assert_eq!(d("0").checked_pow(&huge), Some(Decimal::ZERO));
        assert_eq!(d("5").checked_pow(&d("0")), Some(Decimal::ONE));
        assert!(d("0").checked_pow(&d("-1")).is_none());
        assert!(d("2").checked_pow(&huge).is_none());
        assert!(d("2").checked_pow(&huge.neg()).is_none());
    }

    #[test]
    fn test_integer_checks() {
        assert!(d("3.00").is_integer());
        assert_eq!(d("3.00").to_i64(), Some(3));
        assert_eq!(d("2.5").to_i64(), None);
    }
}
