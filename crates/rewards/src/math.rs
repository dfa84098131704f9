// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Exact base-10 arithmetic over decimal strings.
//!
//! Amounts travel through the indexer as strings (JSON maps, TEXT columns) and are only
//! ever combined here, so long-running cumulative sums never pick up binary floating
//! point drift. Results are normalized: no exponent, no trailing fractional zeros.

use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use thiserror::Error;

/// Fractional digits kept by [div] when the quotient does not terminate.
pub const DIVISION_SCALE: i64 = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecimalError {
    #[error("invalid decimal value: {0:?}")]
    Invalid(String),

    #[error("division by zero: {0} / 0")]
    DivisionByZero(String),
}

/// Parse a plain decimal string (`"-12.340"`, `"7"`). Exponent notation is rejected.
pub fn parse(value: &str) -> Result<BigDecimal, DecimalError> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut parts = digits.splitn(2, '.');
    let int_part = parts.next().unwrap_or_default();
    let frac_part = parts.next();

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let valid = match frac_part {
        Some(frac) => all_digits(int_part) && all_digits(frac),
        None => all_digits(int_part),
    };
    if !valid {
        return Err(DecimalError::Invalid(value.to_string()));
    }

    BigDecimal::from_str(trimmed).map_err(|_| DecimalError::Invalid(value.to_string()))
}

/// Render a value in canonical plain form.
pub fn format(value: &BigDecimal) -> String {
    if value.is_zero() {
        return "0".to_string();
    }
    value.normalized().to_plain_string()
}

pub fn plus(a: &str, b: &str) -> Result<String, DecimalError> {
    Ok(format(&(parse(a)? + parse(b)?)))
}

pub fn minus(a: &str, b: &str) -> Result<String, DecimalError> {
    Ok(format(&(parse(a)? - parse(b)?)))
}

pub fn times(a: &str, b: &str) -> Result<String, DecimalError> {
    Ok(format(&(parse(a)? * parse(b)?)))
}

/// Quotient rounded half-up to [DIVISION_SCALE] fractional digits.
pub fn div(a: &str, b: &str) -> Result<String, DecimalError> {
    let divisor = parse(b)?;
    if divisor.is_zero() {
        return Err(DecimalError::DivisionByZero(a.to_string()));
    }
    let quotient = parse(a)? / divisor;
    Ok(format(&quotient.with_scale_round(DIVISION_SCALE, RoundingMode::HalfUp)))
}

pub fn is_zero(value: &str) -> Result<bool, DecimalError> {
    Ok(parse(value)?.is_zero())
}

/// Sum any number of decimal strings, starting from zero.
pub fn sum<'a, I>(values: I) -> Result<String, DecimalError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut total = BigDecimal::zero();
    for value in values {
        total += parse(value)?;
    }
    Ok(format(&total))
}

/// Arithmetic mean of the given values, `None` when there are none.
pub fn mean<'a, I>(values: I) -> Result<Option<String>, DecimalError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut total = BigDecimal::zero();
    let mut count = 0u64;
    for value in values {
        total += parse(value)?;
        count += 1;
    }
    if count == 0 {
        return Ok(None);
    }
    div(&format(&total), &count.to_string()).map(Some)
}

/// Add `amount` into `slot`, treating a missing entry as zero.
pub fn accumulate(slot: &mut String, amount: &str) -> Result<(), DecimalError> {
    let current = if slot.is_empty() { "0" } else { slot.as_str() };
    *slot = plus(current, amount)?;
    Ok(())
}
