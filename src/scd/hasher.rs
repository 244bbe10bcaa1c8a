//! Attribute fingerprinting for SCD2 change detection.
//!
//! The fingerprint is a change detector, not a security boundary. It only has
//! to be deterministic across runs and sensitive to every hashed attribute.

use alloy::primitives::{hex, keccak256};

use crate::db::models::PoolAttributes;

/// Separates top-level attributes (ASCII unit separator).
const FIELD_SEP: char = '\u{1f}';

/// Separates items inside a token list (ASCII record separator).
const ITEM_SEP: char = '\u{1e}';

/// Compute the attribute fingerprint of a pool.
///
/// Field order is fixed: protocol_slug, chain, symbol, underlying_tokens,
/// reward_tokens, tvl_usd, apy, apy_base, apy_reward, pool_old. Missing
/// values normalize to the empty string, so `None` and `""` hash the same.
///
/// # Returns
/// Keccak-256 of the canonical encoding as 64 lowercase hex characters
pub fn attribute_hash(attrs: &PoolAttributes) -> String {
    let canonical = canonical_encoding(attrs);
    hex::encode(keccak256(canonical.as_bytes()))
}

fn canonical_encoding(attrs: &PoolAttributes) -> String {
    let fields = [
        attrs.protocol_slug.clone(),
        attrs.chain.clone(),
        attrs.symbol.clone(),
        join_items(&attrs.underlying_tokens),
        join_items(&attrs.reward_tokens),
        fmt_number(attrs.tvl_usd),
        fmt_number(attrs.apy),
        fmt_number(attrs.apy_base),
        fmt_number(attrs.apy_reward),
        attrs.pool_old.clone().unwrap_or_default(),
    ];

    let mut out = String::with_capacity(fields.iter().map(|f| f.len() + 1).sum());
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(FIELD_SEP);
        }
        out.push_str(field);
    }
    out
}

fn join_items(items: &[String]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(ITEM_SEP);
        }
        out.push_str(item);
    }
    out
}

/// Shortest round-trip decimal form. `-0.0` folds into `0`.
fn fmt_number(value: Option<f64>) -> String {
    match value {
        Some(v) if v == 0.0 => "0".to_string(),
        Some(v) => v.to_string(),
        None => String::new(),
    }
}
