//! Exact decimal ⇄ rational conversion.
//!
//! Coordinates enter as decimal text (or as `f64` printed with its shortest
//! round-trip representation) and are parsed into [`BigRational`] without any
//! binary rounding, so `-179.1` is exactly `-1791/10`.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use thiserror::Error;

/// Fractional digits kept when a value has no terminating decimal expansion.
pub const MAX_FRACTION_DIGITS: usize = 20;

#[derive(Error, Debug, PartialEq)]
pub enum RationalError {
    #[error("not a decimal number: {0:?}")]
    InvalidDecimal(String),
    #[error("coordinate is not finite: {0}")]
    NotFinite(f64),
}

fn pow10(exp: u32) -> BigInt {
    num_traits::pow(BigInt::from(10u32), exp as usize)
}

/// Parse decimal text such as `-179.125` or `1.5e-3` exactly.
pub fn parse_decimal(text: &str) -> Result<BigRational, RationalError> {
    let invalid = || RationalError::InvalidDecimal(text.to_string());
    let trimmed = text.trim();

    let (mantissa, exponent) = match trimmed.find(['e', 'E']) {
        Some(pos) => {
            let exp: i32 = trimmed[pos + 1..].parse().map_err(|_| invalid())?;
            (&trimmed[..pos], exp)
        }
        None => (trimmed, 0),
    };

    let (negative, unsigned) = match mantissa.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
    };

    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let digits = format!("{int_part}{frac_part}");
    let numer = BigInt::parse_bytes(digits.as_bytes(), 10).ok_or_else(invalid)?;
    let scale = exponent - frac_part.len() as i32;
    let mut value = if scale >= 0 {
        BigRational::from_integer(numer * pow10(scale as u32))
    } else {
        BigRational::new(numer, pow10(scale.unsigned_abs()))
    };
    if negative {
        value = -value;
    }
    Ok(value)
}

/// Exact rational for the decimal that `value` prints as.
pub fn from_f64(value: f64) -> Result<BigRational, RationalError> {
    if !value.is_finite() {
        return Err(RationalError::NotFinite(value));
    }
    parse_decimal(&value.to_string())
}

pub fn from_u64(value: u64) -> BigRational {
    BigRational::from_integer(BigInt::from(value))
}

/// Render `value` as decimal text.
///
/// Exact whenever the expansion terminates within [`MAX_FRACTION_DIGITS`];
/// otherwise rounded half away from zero at that digit.
pub fn to_decimal_string(value: &BigRational) -> String {
    let scale = pow10(MAX_FRACTION_DIGITS as u32);
    let half = BigRational::new(BigInt::one(), BigInt::from(2u32));
    let scaled = (value.abs() * BigRational::from_integer(scale) + half)
        .floor()
        .to_integer();
    if scaled.is_zero() {
        return "0".to_string();
    }

    let digits = scaled.to_string();
    let (int_digits, frac_digits) = if digits.len() > MAX_FRACTION_DIGITS {
        digits.split_at(digits.len() - MAX_FRACTION_DIGITS)
    } else {
        ("", digits.as_str())
    };
    let frac = format!("{frac_digits:0>width$}", width = MAX_FRACTION_DIGITS);
    let frac = frac.trim_end_matches('0');
    let int = if int_digits.is_empty() { "0" } else { int_digits };

    let sign = if value.is_negative() { "-" } else { "" };
    if frac.is_empty() {
        format!("{sign}{int}")
    } else {
        format!("{sign}{int}.{frac}")
    }
}

pub fn to_f64(value: &BigRational) -> f64 {
    // to_decimal_string always yields a valid float literal
    to_decimal_string(value).parse().unwrap_or(f64::NAN)
}
