use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;

/// Generates a human-readable order number of the form `ORD-YYYYMMDD-XXXXXX`, where the suffix is six random
/// upper-case hex digits. Uniqueness is enforced by storage; callers regenerate on collision.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("ORD-{}-{suffix:06X}", now.format("%Y%m%d"))
}

pub fn is_valid_order_number(s: &str) -> bool {
    Regex::new(r"^ORD-\d{8}-[0-9A-F]{6}$").map(|re| re.is_match(s)).unwrap_or(false)
}
