use tracing::{debug, error};

use super::extract::{clean_phone_number, extract_otp, NOT_AVAILABLE};
use super::{FieldError, Record, BODY, DATE, NUMBER, ROUTE, SERVICE};

const UNKNOWN: &str = "Unknown";
const DIVIDER: &str = "━━━━━━━━━━━━━━━━━━━";

fn escape(text: &str) -> String {
    html_escape::encode_quoted_attribute(text).into_owned()
}

/// Telegram HTML has no `<br>`; a bare newline is the line break.
fn normalize_line_breaks(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// First word of the route. Only string routes name a country.
fn country_from_route(record: &Record) -> &str {
    record
        .str_field(ROUTE)
        .and_then(|route| route.split_whitespace().next())
        .unwrap_or(UNKNOWN)
}

fn render(record: &Record, footer: &str) -> Result<String, FieldError> {
    let date = record.text(DATE)?.unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let number = record
        .text(NUMBER)?
        .map(|raw| clean_phone_number(&raw))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let service = record.text(SERVICE)?.unwrap_or_else(|| UNKNOWN.to_string());
    let body = record.text(BODY)?.unwrap_or_default();

    let country = country_from_route(record);
    let otp = extract_otp(&body);

    let safe_number = escape(&number);
    let safe_otp = escape(&otp);
    let safe_service = escape(&service);
    let safe_country = escape(country);
    let safe_date = escape(&date);
    let safe_body = normalize_line_breaks(&escape(&body));
    let safe_footer = escape(footer);

    Ok(format!(
        "💎 <b>PREMIUM OTP ALERT</b> 💎\n\
         <i>Instant • Secure • Verified</i>\n\
         {DIVIDER}\n\
         📞 <b>Number</b> <code>{safe_number}</code>\n\
         🔐 <b>OTP CODE</b> 🔥 <code>{safe_otp}</code> 🔥\n\
         🏷 <b>Service</b> <b>{safe_service}</b>\n\
         🌍 <b>Country</b> <b>{safe_country}</b>\n\
         🕒 <b>Received At</b> <code>{safe_date}</code>\n\
         {DIVIDER}\n\
         💬 <b>Message Content</b>\n\
         <i>{safe_body}</i>\n\
         {DIVIDER}\n\
         ⚡ <b>{safe_footer}</b>"
    ))
}

/// Render a record into the HTML notification body.
///
/// Returns `None` when the record cannot be rendered; the failure is logged
/// and the caller should skip the cycle.
pub fn format_message(record: &Record, footer: &str) -> Option<String> {
    match render(record, footer) {
        Ok(text) => {
            debug!("Formatted notification ({} chars)", text.chars().count());
            Some(text)
        }
        Err(e) => {
            error!("Error formatting message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const FOOTER: &str = "POWERED BY TEST";

    #[test]
    fn test_usa_route_scenario() {
        let record = Record::new(vec![
            json!("2024-01-01 10:00:00"),
            json!("USA Route"),
            json!("1234567890"),
            json!("WhatsApp"),
            json!("Telegram code 482910"),
        ]);
        let text = format_message(&record, FOOTER).unwrap();

        assert!(text.contains("<code>482910</code>"));
        assert!(text.contains("<code>+1234567890</code>"));
        assert!(text.contains("<b>Country</b> <b>USA</b>"));
        assert!(text.contains("<b>Service</b> <b>WhatsApp</b>"));
        assert!(text.contains("<code>2024-01-01 10:00:00</code>"));
        assert!(text.contains("<i>Telegram code 482910</i>"));
        assert!(text.ends_with("⚡ <b>POWERED BY TEST</b>"));
    }

    #[test]
    fn test_escapes_markup() {
        let record = Record::new(vec![
            json!("2024-01-01 10:00:00"),
            json!("<UK> & co"),
            json!("447700900123"),
            json!("A\"B'C"),
            json!("<b>1234</b> & more"),
        ]);
        let text = format_message(&record, FOOTER).unwrap();

        assert!(text.contains("<b>&lt;UK&gt;</b>"));
        assert!(text.contains("A&quot;B"));
        assert!(!text.contains("B'C"));
        assert!(text.contains("<i>&lt;b&gt;1234&lt;/b&gt; &amp; more</i>"));
        assert!(!text.contains("<b>1234</b>"));
    }

    #[test]
    fn test_line_breaks_normalized() {
        let record = Record::new(vec![
            json!("2024-01-01 10:00:00"),
            json!("DE"),
            json!("4915123456789"),
            json!("Bank"),
            json!("line one\r\nline two\rline three"),
        ]);
        let text = format_message(&record, FOOTER).unwrap();
        assert!(text.contains("<i>line one\nline two\nline three</i>"));
        assert!(!text.contains('\r'));
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let record = Record::new(vec![json!("2024-01-01 10:00:00"), json!("   "), Value::Null]);
        let text = format_message(&record, FOOTER).unwrap();

        assert!(text.contains("<b>Number</b> <code>N/A</code>"));
        assert!(text.contains("<code>N/A</code> 🔥"));
        assert!(text.contains("<b>Service</b> <b>Unknown</b>"));
        assert!(text.contains("<b>Country</b> <b>Unknown</b>"));
        assert!(text.contains("<i></i>"));
    }

    #[test]
    fn test_non_string_route_is_unknown_country() {
        for route in [json!(42), json!(true), json!(["USA"])] {
            let record = Record::new(vec![
                json!("2024-01-01 10:00:00"),
                route,
                json!("1234567890"),
                json!("WhatsApp"),
                json!("Telegram code 482910"),
            ]);
            let text = format_message(&record, FOOTER).unwrap();
            assert!(text.contains("<b>Country</b> <b>Unknown</b>"));
        }
    }

    #[test]
    fn test_unrenderable_field_yields_none() {
        let record = Record::new(vec![
            json!("2024-01-01 10:00:00"),
            json!("USA"),
            json!("1234567890"),
            json!({"nested": true}),
            json!("Telegram code 482910"),
        ]);
        assert!(format_message(&record, FOOTER).is_none());
    }
}
