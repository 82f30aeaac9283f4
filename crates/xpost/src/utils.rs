use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

#[inline]
pub fn capture_group_1<'a>(re: &Regex, input: &'a str) -> Option<&'a str> {
    re.captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[inline]
pub fn capture_group_1_owned(re: &Regex, input: &str) -> Option<String> {
    capture_group_1(re, input).map(ToOwned::to_owned)
}

/// Milliseconds since the unix epoch, saturating to 0 on a clock before 1970.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Shorten a secret for log output, keeping a short prefix.
pub fn redact(secret: &str) -> String {
    const VISIBLE: usize = 4;
    let prefix: String = secret.chars().take(VISIBLE).collect();
    if secret.chars().count() <= VISIBLE {
        "****".to_string()
    } else {
        format!("{prefix}****")
    }
}

/// Length of `s` in UTF-16 code units, which is how the platform counts characters.
#[inline]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}
