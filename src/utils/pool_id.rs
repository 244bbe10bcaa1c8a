//! Pool identifier utilities.
//!
//! DeFiLlama pools carry a UUID `pool` id plus a legacy `pool_old` string that
//! usually embeds the on-chain address, e.g. `0xabc...-ethereum` or
//! `curve-0xabc...`.

/// Extract the on-chain address from a legacy `pool_old` identifier.
///
/// Splits on `-` and returns the first segment starting with `0x`, looking at
/// the first two segments only. Falls back to the input unchanged.
///
/// # Example
/// ```ignore
/// assert_eq!(clean_pool_old("0xabc-ethereum"), "0xabc");
/// assert_eq!(clean_pool_old("curve-0xabc"), "0xabc");
/// assert_eq!(clean_pool_old("lido-steth"), "lido-steth");
/// ```
pub fn clean_pool_old(pool_old: &str) -> String {
    let mut parts = pool_old.split('-');
    let first = parts.next();
    let second = parts.next();

    [first, second]
        .into_iter()
        .flatten()
        .find(|segment| segment.starts_with("0x"))
        .unwrap_or(pool_old)
        .to_string()
}
