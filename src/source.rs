use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use lazy_regex::lazy_regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::config::PanelConfig;
use crate::sms::Record;

/// Per-request timeout for the panel
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Rows requested per poll
const PAGE_LENGTH: u32 = 25;

/// Columns declared to the table endpoint
const COLUMNS: usize = 7;

/// Raw body characters kept for diagnostics on a decode failure
const EXCERPT_CHARS: usize = 500;

/// Prefix of the totals row the panel appends to every page
const SUMMARY_ROW_PREFIX: &str = "0,0,0,";

static RE_DATE_PREFIX: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"^\d{4}-\d{2}-\d{2}");

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(StatusCode),

    #[error("JSON decode error: {source}")]
    MalformedJson {
        source: serde_json::Error,
        excerpt: String,
    },
}

/// Something that can produce the newest SMS record.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the newest valid record, or `None` when there is nothing to relay.
    async fn fetch_latest(&self) -> Result<Option<Record>, FetchError>;
}

/// Query parameters for the panel's table endpoint.
///
/// Covers the whole local calendar day, first page only, newest first.
/// The endpoint rejects requests that deviate from this layout.
pub fn build_query(now: &DateTime<Local>) -> Vec<(String, String)> {
    let today = now.format("%Y-%m-%d").to_string();
    let mut params: Vec<(String, String)> = Vec::with_capacity(64);
    let mut push = |key: &str, value: String| params.push((key.to_string(), value));

    push("fdate1", format!("{today} 00:00:00"));
    push("fdate2", format!("{today} 23:59:59"));
    for key in [
        "frange", "fnum", "fcli", "fgdate", "fgmonth", "fgrange", "fgnumber", "fgcli",
    ] {
        push(key, String::new());
    }
    push("fg", "0".to_string());
    push("sEcho", "1".to_string());
    push("iColumns", COLUMNS.to_string());
    push("sColumns", ",".repeat(COLUMNS - 1));
    push("iDisplayStart", "0".to_string());
    push("iDisplayLength", PAGE_LENGTH.to_string());

    for i in 0..COLUMNS {
        push(&format!("mDataProp_{i}"), i.to_string());
        push(&format!("sSearch_{i}"), String::new());
        push(&format!("bRegex_{i}"), "false".to_string());
        push(&format!("bSearchable_{i}"), "true".to_string());
        push(&format!("bSortable_{i}"), "true".to_string());
    }

    push("sSearch", String::new());
    push("bRegex", "false".to_string());
    push("iSortCol_0", "0".to_string());
    push("sSortDir_0", "desc".to_string());
    push("iSortingCols", "1".to_string());
    push("_", now.timestamp_millis().to_string());

    params
}

/// A row is a candidate when it has at least five columns and a dated,
/// non-summary first column.
fn is_candidate_row(row: &Value) -> bool {
    let Some(fields) = row.as_array() else {
        return false;
    };
    if fields.len() < 5 {
        return false;
    }
    match fields[0].as_str() {
        Some(first) => {
            !first.is_empty()
                && !first.starts_with(SUMMARY_ROW_PREFIX)
                && RE_DATE_PREFIX.is_match(first)
        }
        None => false,
    }
}

/// Parse a panel response body and pick the newest valid record.
pub fn select_newest(body: &str) -> Result<Option<Record>, FetchError> {
    let data: Value = serde_json::from_str(body).map_err(|source| FetchError::MalformedJson {
        source,
        excerpt: body.chars().take(EXCERPT_CHARS).collect(),
    })?;

    let rows = match data.get("aaData").and_then(Value::as_array) {
        Some(rows) if !rows.is_empty() => rows,
        _ => {
            debug!("No data found in response");
            return Ok(None);
        }
    };

    let mut candidates: Vec<(chrono::NaiveDateTime, Record)> = rows
        .iter()
        .filter(|row| is_candidate_row(row))
        .filter_map(|row| {
            let record = Record::new(row.as_array()?.clone());
            match record.timestamp() {
                Some(ts) => Some((ts, record)),
                None => {
                    debug!("Skipping row with unparseable timestamp: {}", row);
                    None
                }
            }
        })
        .collect();

    if candidates.is_empty() {
        debug!("No valid SMS rows found");
        return Ok(None);
    }

    // Stable sort keeps panel order among equal timestamps
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(candidates.into_iter().next().map(|(_, record)| record))
}

/// HTTP client for the SMS panel's CDR table.
pub struct PanelClient {
    client: reqwest::Client,
    url: String,
}

impl PanelClient {
    pub fn new(config: &PanelConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(
            header::REFERER,
            HeaderValue::from_str(&config.referer).context("Invalid referer")?,
        );
        let mut cookie = HeaderValue::from_str(&format!("PHPSESSID={}", config.session_id))
            .context("Invalid session id")?;
        cookie.set_sensitive(true);
        headers.insert(header::COOKIE, cookie);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("Failed to build panel HTTP client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl RecordSource for PanelClient {
    async fn fetch_latest(&self) -> Result<Option<Record>, FetchError> {
        let params = build_query(&Local::now());
        debug!("Fetching {} ({} params)", self.url, params.len());

        let response = self.client.get(&self.url).query(&params).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status));
        }

        let body = response.text().await?;
        select_newest(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_query_covers_current_day() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).single().unwrap();
        let params = build_query(&now);

        assert_eq!(param(&params, "fdate1"), Some("2024-03-09 00:00:00"));
        assert_eq!(param(&params, "fdate2"), Some("2024-03-09 23:59:59"));
        assert_eq!(param(&params, "_"), Some(now.timestamp_millis().to_string().as_str()));
    }

    #[test]
    fn test_query_paging_and_sort() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).single().unwrap();
        let params = build_query(&now);

        assert_eq!(param(&params, "iDisplayStart"), Some("0"));
        assert_eq!(param(&params, "iDisplayLength"), Some("25"));
        assert_eq!(param(&params, "iColumns"), Some("7"));
        assert_eq!(param(&params, "sColumns"), Some(",,,,,,"));
        assert_eq!(param(&params, "iSortCol_0"), Some("0"));
        assert_eq!(param(&params, "sSortDir_0"), Some("desc"));
        assert_eq!(param(&params, "iSortingCols"), Some("1"));
        assert_eq!(param(&params, "fg"), Some("0"));
        assert_eq!(param(&params, "sEcho"), Some("1"));
    }

    #[test]
    fn test_query_declares_every_column() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).single().unwrap();
        let params = build_query(&now);

        for i in 0..7 {
            assert_eq!(param(&params, &format!("mDataProp_{i}")), Some(i.to_string().as_str()));
            assert_eq!(param(&params, &format!("sSearch_{i}")), Some(""));
            assert_eq!(param(&params, &format!("bRegex_{i}")), Some("false"));
            assert_eq!(param(&params, &format!("bSearchable_{i}")), Some("true"));
            assert_eq!(param(&params, &format!("bSortable_{i}")), Some("true"));
        }
        assert_eq!(param(&params, "mDataProp_7"), None);
        assert_eq!(params.len(), 10 + 6 + 7 * 5 + 6);
        assert_eq!(params.first().map(|(k, _)| k.as_str()), Some("fdate1"));
        assert_eq!(params.last().map(|(k, _)| k.as_str()), Some("_"));
    }

    #[test]
    fn test_select_newest_picks_latest_timestamp() {
        let body = json!({
            "aaData": [
                ["2024-01-01 09:00:00", "USA", "111", "A", "old"],
                ["2024-01-01 11:30:00", "USA", "222", "B", "newest"],
                ["2024-01-01 10:00:00", "USA", "333", "C", "middle"],
            ]
        })
        .to_string();

        let record = select_newest(&body).unwrap().unwrap();
        assert_eq!(record.text(4).unwrap().as_deref(), Some("newest"));
    }

    #[test]
    fn test_select_newest_filters_invalid_rows() {
        let body = json!({
            "aaData": [
                ["0,0,0,2024-01-02 23:00:00", "x", "x", "x", "summary"],
                ["not a date", "USA", "1", "A", "bad date"],
                ["2024-01-02 22:00:00", "USA", "1", "A"],
                "2024-01-02 22:00:00",
                [20240102, "USA", "1", "A", "numeric date"],
                ["", "USA", "1", "A", "empty"],
                ["2024-01-01 08:00:00", "USA", "1234567890", "A", "valid"],
            ]
        })
        .to_string();

        let record = select_newest(&body).unwrap().unwrap();
        assert_eq!(record.text(4).unwrap().as_deref(), Some("valid"));
    }

    #[test]
    fn test_select_newest_drops_partial_timestamps() {
        let body = json!({
            "aaData": [
                ["2024-01-02", "USA", "1", "A", "date only"],
                ["2024-01-01 08:00:00", "USA", "2", "B", "full"],
            ]
        })
        .to_string();

        let record = select_newest(&body).unwrap().unwrap();
        assert_eq!(record.text(4).unwrap().as_deref(), Some("full"));
    }

    #[test]
    fn test_select_newest_empty_cases() {
        assert!(select_newest(r#"{"aaData": []}"#).unwrap().is_none());
        assert!(select_newest(r#"{"sEcho": 1}"#).unwrap().is_none());
        assert!(select_newest(r#"{"aaData": [["0,0,0,", 1, 2, 3, 4]]}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_select_newest_malformed_json() {
        let body = format!("<html>{}</html>", "x".repeat(1000));
        match select_newest(&body) {
            Err(FetchError::MalformedJson { excerpt, .. }) => {
                assert_eq!(excerpt.chars().count(), 500);
                assert!(excerpt.starts_with("<html>"));
            }
            other => panic!("expected MalformedJson, got {:?}", other),
        }
    }
}
