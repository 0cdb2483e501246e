/// Fixed prefix for every cache key (spec.md 6: `weather:<tok1>:<tok2>...`).
const KEY_PREFIX: &str = "weather";

/// Deterministic, idempotent transform from a free-form locality string to
/// a cache key (spec.md 4.2).
///
/// Trims the input, collapses internal whitespace runs to a single space,
/// then splits on any of space/comma/slash/hyphen. The resulting tokens,
/// in order, are joined under `KEY_PREFIX`.
pub fn normalize_region(region: &str) -> String {
    let collapsed = region
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let tokens: Vec<&str> = collapsed
        .split(|c| matches!(c, ' ' | ',' | '/' | '-'))
        .filter(|tok| !tok.is_empty())
        .collect();

    let mut key = String::from(KEY_PREFIX);
    for token in tokens {
        key.push(':');
        key.push_str(token);
    }
    key
}
