//! Kubernetes resource quantity parsing

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use modelship_common::{Error, Result};

const BINARY_SUFFIXES: &[&str] = &["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: &[&str] = &["n", "u", "m", "k", "M", "G", "T", "P", "E"];

/// Parse a quantity string such as `500m`, `1.5Gi` or `1e3`.
///
/// Accepts the Kubernetes serialization format: a non-negative decimal
/// number followed by an optional binary suffix, decimal suffix, or
/// decimal exponent.
pub fn parse_quantity(raw: &str) -> Result<Quantity> {
    let s = raw.trim();
    let invalid = || Error::validation_for(raw, "malformed resource quantity");

    let number_end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '+'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(number_end);

    let digits = number.trim_start_matches('+');
    if digits.is_empty() || digits == "." || digits.matches('.').count() > 1 || digits.contains('+') {
        return Err(invalid());
    }

    let suffix_ok = suffix.is_empty()
        || BINARY_SUFFIXES.contains(&suffix)
        || DECIMAL_SUFFIXES.contains(&suffix)
        || is_exponent(suffix);
    if !suffix_ok {
        return Err(invalid());
    }

    Ok(Quantity(s.to_string()))
}

fn is_exponent(suffix: &str) -> bool {
    let Some(rest) = suffix.strip_prefix(['e', 'E']) else {
        return false;
    };
    let rest = rest.strip_prefix(['+', '-']).unwrap_or(rest);
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}
