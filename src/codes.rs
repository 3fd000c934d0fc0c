//! Random token and numeric code generation.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, Rng, RngCore};
use subtle::ConstantTimeEq;

/// Bytes of entropy behind a link token.
const TOKEN_BYTES: usize = 32;

/// Codes up to this many digits are drawn as a single uniform integer.
const UNIFORM_CODE_MAX_DIGITS: usize = 8;

/// Create a URL-safe link token carrying 256 bits of entropy.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate link token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Create a decimal code of exactly `length` digits.
///
/// Up to 8 digits the code is uniform over `[10^(L-1), 10^L - 1]`, so it never
/// starts with a zero. Longer codes are built from raw random words and cut to
/// length; they may start with a zero.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_numeric_code(length: usize) -> Result<String> {
    if length == 0 {
        return Ok(String::new());
    }
    if length <= UNIFORM_CODE_MAX_DIGITS {
        let exponent = u32::try_from(length - 1).context("code length out of range")?;
        let low = 10u32.pow(exponent);
        let high = low.saturating_mul(10);
        return Ok(OsRng.gen_range(low..high).to_string());
    }

    let mut digits = String::with_capacity(length + 20);
    while digits.len() < length {
        let mut word = [0u8; 8];
        OsRng
            .try_fill_bytes(&mut word)
            .context("failed to generate numeric code")?;
        // Drop the leading digit of each word; it is biased toward 1.
        let rendered = u64::from_le_bytes(word).to_string();
        digits.push_str(rendered.get(1..).unwrap_or_default());
    }
    digits.truncate(length);
    Ok(digits)
}

/// Compare two secrets without leaking the position of the first mismatch.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
