//! Default quantity parsing and canonical formatting
//!
//! Defaults are configured as plain integers: CPU in millicores, memory in
//! bytes. They are rendered the way the API server canonicalizes resource
//! quantities, so a patched Pod reads back exactly like one written by hand:
//!
//! - CPU: decimal SI, `100` → `100m`, `1000` → `1`, `2500` → `2500m`
//! - Memory: binary SI, `134217728` → `128Mi`, `1536` → `1536`
//!
//! Memory magnitudes below 1024 cannot carry a binary suffix and fall back to
//! decimal SI (`1000` → `1k`), matching apimachinery.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Error returned when a configured default is not an integer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid quantity '{input}': expected an integer")]
pub struct QuantityError {
    /// The rejected input
    pub input: String,
}

/// Decimal SI suffixes indexed by power of 1000, starting at 10^-3
const DECIMAL_SUFFIXES: [&str; 8] = ["m", "", "k", "M", "G", "T", "P", "E"];

/// Binary SI suffixes indexed by power of 1024
const BINARY_SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

fn parse_integer(input: &str) -> Result<i64, QuantityError> {
    input.trim().parse::<i64>().map_err(|_| QuantityError {
        input: input.to_string(),
    })
}

/// Parse a millicore count into a decimal SI CPU quantity
pub fn cpu_from_millis(input: &str) -> Result<Quantity, QuantityError> {
    let millis = parse_integer(input)?;
    Ok(Quantity(format_decimal(millis, 0)))
}

/// Parse a byte count into a binary SI memory quantity
pub fn memory_from_bytes(input: &str) -> Result<Quantity, QuantityError> {
    let bytes = parse_integer(input)?;
    Ok(Quantity(format_binary(bytes)))
}

/// Format `value × 1000^(scale - 1)` with the largest exact decimal suffix.
///
/// `scale` indexes into [`DECIMAL_SUFFIXES`]: 0 means the value is in milli
/// units, 1 means whole units.
fn format_decimal(value: i64, scale: usize) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let negative = value < 0;
    let mut mantissa = value.unsigned_abs();
    let mut index = scale;
    while mantissa % 1000 == 0 && index + 1 < DECIMAL_SUFFIXES.len() {
        mantissa /= 1000;
        index += 1;
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}{mantissa}{}", DECIMAL_SUFFIXES[index])
}

fn format_binary(value: i64) -> String {
    if value.unsigned_abs() < 1024 {
        return format_decimal(value, 1);
    }

    let negative = value < 0;
    let mut mantissa = value.unsigned_abs();
    let mut index = 0;
    while mantissa % 1024 == 0 && index + 1 < BINARY_SUFFIXES.len() {
        mantissa /= 1024;
        index += 1;
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}{mantissa}{}", BINARY_SUFFIXES[index])
}
