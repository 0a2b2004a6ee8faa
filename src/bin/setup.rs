//! OTP relay setup wizard.
//!
//! Prompts for the bot token, destination chats and panel session on the
//! terminal and writes a ready-to-run `config.toml` to the project root
//! (`OTP_RELAY_ROOT`, or the current directory).

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const DEFAULT_PANEL_URL: &str = "http://213.32.24.208/ints/client/res/data_smscdr.php";
const DEFAULT_STATE_FILE: &str = "state.json";
const DEFAULT_INTERVAL: u64 = 10;

// ── Config formatting ──────────────────────────────────────────────────────────

struct ConfigParams<'a> {
    bot_token: &'a str,
    chat_ids: &'a str,
    session_id: &'a str,
    panel_url: &'a str,
    state_file: &'a str,
    check_interval_secs: u64,
}

/// TOML basic-string escaping for values typed by the user.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Produces a valid config.toml string. Extracted so it can be unit-tested.
fn format_config(p: &ConfigParams<'_>) -> String {
    let chats: Vec<String> = p
        .chat_ids
        .split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(quote)
        .collect();
    let chats_str = chats.join(", ");

    // Leave the session out of the file when it will come from PHPSESSID
    let session_line = if p.session_id.is_empty() {
        "# session_id = \"...\"  (or set PHPSESSID)".to_owned()
    } else {
        format!("session_id = {}", quote(p.session_id))
    };

    let bot_token = quote(p.bot_token);
    let panel_url = quote(p.panel_url);
    let state_file = quote(p.state_file);
    let interval = p.check_interval_secs;

    format!(
        r#"[panel]
url = {panel_url}
{session_line}

[telegram]
bot_token = {bot_token}
chat_ids = [{chats_str}]

[buttons]
# developer_url = "https://t.me/..."
# numbers_url_1 = "https://t.me/..."
# numbers_url_2 = "https://t.me/..."
# support_url_1 = "https://t.me/..."
# support_url_2 = "https://t.me/..."

[relay]
check_interval_secs = {interval}
error_backoff_secs = 30
state_file = {state_file}
"#
    )
}

// ── Prompts ────────────────────────────────────────────────────────────────────

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut buf = String::new();
    io::stdin().read_line(&mut buf)?;
    Ok(buf.trim().to_owned())
}

fn or_default(s: String, default: &str) -> String {
    if s.is_empty() {
        default.to_owned()
    } else {
        s
    }
}

fn run_cli(project_root: &Path) -> Result<()> {
    println!("=== OTP Relay Setup ===\n");

    let bot_token = read_line("Telegram bot token: ")?;
    let chat_ids = read_line("Destination chat IDs (comma-separated): ")?;
    let session_id = read_line("Panel PHPSESSID (empty to use the environment): ")?;
    let panel_url = or_default(
        read_line(&format!("Panel data URL [{DEFAULT_PANEL_URL}]: "))?,
        DEFAULT_PANEL_URL,
    );
    let state_file = or_default(
        read_line(&format!("State file [{DEFAULT_STATE_FILE}]: "))?,
        DEFAULT_STATE_FILE,
    );
    let interval = read_line(&format!("Check interval in seconds [{DEFAULT_INTERVAL}]: "))?;
    let check_interval_secs = if interval.is_empty() {
        DEFAULT_INTERVAL
    } else {
        interval
            .parse()
            .with_context(|| format!("Not a number of seconds: {interval}"))?
    };

    let config = format_config(&ConfigParams {
        bot_token: &bot_token,
        chat_ids: &chat_ids,
        session_id: &session_id,
        panel_url: &panel_url,
        state_file: &state_file,
        check_interval_secs,
    });

    let config_path = project_root.join("config.toml");
    std::fs::write(&config_path, &config)
        .with_context(|| format!("Could not write {}", config_path.display()))?;

    println!("\n✓  config.toml saved to {}", config_path.display());
    println!("   Run the relay with:  cargo run");
    Ok(())
}

fn main() -> Result<()> {
    let project_root =
        PathBuf::from(std::env::var("OTP_RELAY_ROOT").unwrap_or_else(|_| ".".to_string()));
    run_cli(&project_root)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
