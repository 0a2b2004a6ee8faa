use lazy_regex::lazy_regex;
use sha2::{Digest, Sha256};

use super::{Record, BODY, DATE, NUMBER};

/// Returned when no code or number can be derived.
pub const NOT_AVAILABLE: &str = "N/A";

/// Characters of the message body that feed the identity digest.
const IDENTITY_BODY_CHARS: usize = 100;

/// Hex characters of the digest kept in the identity.
const IDENTITY_DIGEST_LEN: usize = 16;

static RE_TELEGRAM_CODE: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"Telegram code\s+(\d{4,8})");

static RE_BARE_DIGITS: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)\b(\d{4,8})\b");
static RE_CODE_LABEL: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)code[\s:]+(\d{4,8})");
static RE_OTP_LABEL: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)OTP[\s:]+(\d{4,8})");
static RE_VERIFICATION_LABEL: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?i)verification[\s:]+(\d{4,8})");
static RE_ZH_LABEL: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)密码[\s:]+(\d{4,8})");
static RE_KO_LABEL: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)코드[\s:]+(\d{4,8})");
static RE_RU_LABEL: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)код[\s:]+(\d{4,8})");

// Unicode digit class, so non-ASCII numerals survive cleaning
static RE_NON_DIGIT: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\D");

// Order matters: the first pattern that matches wins.
fn fallback_patterns() -> [&'static regex::Regex; 7] {
    [
        &*RE_BARE_DIGITS,
        &*RE_CODE_LABEL,
        &*RE_OTP_LABEL,
        &*RE_VERIFICATION_LABEL,
        &*RE_ZH_LABEL,
        &*RE_KO_LABEL,
        &*RE_RU_LABEL,
    ]
}

fn first_capture(re: &regex::Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Pull the one-time code out of an SMS body.
///
/// A "Telegram code" match takes priority over any digit run that appears
/// earlier in the text. Returns [`NOT_AVAILABLE`] when nothing matches.
pub fn extract_otp(text: &str) -> String {
    if text.is_empty() {
        return NOT_AVAILABLE.to_string();
    }

    if let Some(code) = first_capture(&RE_TELEGRAM_CODE, text) {
        return code;
    }

    fallback_patterns()
        .into_iter()
        .find_map(|re| first_capture(re, text))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Normalize a phone number to `+<digits>` when it has at least ten digits.
/// Shorter inputs are returned unchanged.
pub fn clean_phone_number(raw: &str) -> String {
    if raw.is_empty() {
        return NOT_AVAILABLE.to_string();
    }

    let digits = RE_NON_DIGIT.replace_all(raw, "");
    if digits.chars().count() >= 10 {
        format!("+{digits}")
    } else {
        raw.to_string()
    }
}

/// Dedup key for a record: timestamp, raw number and a digest of the body.
///
/// The digest is SHA-256 so keys survive restarts and match what is
/// already in the state file.
pub fn compute_identity(record: &Record) -> String {
    let date = record.text_lossy(DATE).unwrap_or_default();
    let number = record.text_lossy(NUMBER).unwrap_or_default();

    if record.field_count() <= BODY {
        return format!("{date}_{number}");
    }

    let body = record.text_lossy(BODY).unwrap_or_default();
    let head: String = body.chars().take(IDENTITY_BODY_CHARS).collect();

    let mut hasher = Sha256::new();
    hasher.update(head.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    format!("{date}_{number}_{}", &digest[..IDENTITY_DIGEST_LEN])
}
