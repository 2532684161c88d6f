//! Status lines printed by the import command on stdout.
//!
//! ```text
//! progress 40 Extracting media
//! message Creating database
//! meta site_id=12
//! ```

use serde_json::Value;

/// One recognised stdout line.
#[derive(Clone, Debug, PartialEq)]
pub enum StatusLine {
    /// `progress <0-100> [message]`; values above 100 are clamped.
    Progress { percent: u8, message: Option<String> },
    /// `message <text>`
    Message(String),
    /// `meta <key>=<value>`
    Meta { key: String, value: Value },
}

/// Parse a stdout line. Unrecognised or malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<StatusLine> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb {
        "progress" => {
            let (number, message) = match rest.split_once(char::is_whitespace) {
                Some((number, message)) => (number, Some(message.trim())),
                None => (rest, None),
            };
            let percent: u64 = number.parse().ok()?;
            Some(StatusLine::Progress {
                percent: percent.min(100) as u8,
                message: message.filter(|m| !m.is_empty()).map(str::to_string),
            })
        }
        "message" if !rest.is_empty() => Some(StatusLine::Message(rest.to_string())),
        "meta" => {
            let (key, value) = rest.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some(StatusLine::Meta {
                key: key.to_string(),
                value: meta_value(key, value.trim()),
            })
        }
        _ => None,
    }
}

fn meta_value(key: &str, raw: &str) -> Value {
    if key == "site_id"
        && let Ok(id) = raw.parse::<i64>()
    {
        return Value::from(id);
    }
    Value::from(raw)
}
