//! Uppercase token substitution for cluster headers and run-script settings blocks.
//!
//! Keys are stored uppercased and matched exactly, as whole words (`[A-Za-z0-9_]` delimits
//! a word), in a single left-to-right pass. `walltime` in `#PBS -l walltime=WALLTIME` stays. Longer keys are tried first, and substituted values are
//! never rescanned, so a value that happens to contain another key stays as written.
//! Unknown placeholders are left alone.

use std::fmt;

use serde_json::Number;

/// How values are written into the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    /// Cluster headers: values go in verbatim
    Literal,
    /// Run scripts: text values are double-quoted, numbers are bare
    Shell,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl TokenValue {
    fn quoted(&self, quoting: Quoting) -> String {
        match (self, quoting) {
            (TokenValue::Text(text), Quoting::Shell) => format!("\"{text}\""),
            (value, _) => value.to_string(),
        }
    }
}

impl fmt::Display for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenValue::Text(text) => write!(f, "{text}"),
            TokenValue::Integer(value) => write!(f, "{value}"),
            // whole hours print as `24`, not `24.0`
            TokenValue::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                write!(f, "{}", *value as i64)
            }
            TokenValue::Float(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for TokenValue {
    fn from(value: &str) -> TokenValue {
        TokenValue::Text(value.to_string())
    }
}

impl From<String> for TokenValue {
    fn from(value: String) -> TokenValue {
        TokenValue::Text(value)
    }
}

impl From<u32> for TokenValue {
    fn from(value: u32) -> TokenValue {
        TokenValue::Integer(i64::from(value))
    }
}

impl From<i64> for TokenValue {
    fn from(value: i64) -> TokenValue {
        TokenValue::Integer(value)
    }
}

impl From<f64> for TokenValue {
    fn from(value: f64) -> TokenValue {
        TokenValue::Float(value)
    }
}

impl From<&Number> for TokenValue {
    fn from(value: &Number) -> TokenValue {
        match value.as_i64() {
            Some(integer) => TokenValue::Integer(integer),
            None => TokenValue::Float(value.as_f64().unwrap_or_default()),
        }
    }
}

/// Ordered token table. Keys are stored uppercased; inserting an existing key replaces
/// its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenTable {
    entries: Vec<(String, TokenValue)>,
}

impl TokenTable {
    pub fn new() -> TokenTable {
        TokenTable::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<TokenValue>) {
        let key = key.to_ascii_uppercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&TokenValue> {
        let key = key.to_ascii_uppercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Later tables win on shared keys
    pub fn merge(&mut self, other: &TokenTable) {
        for (key, value) in &other.entries {
            self.insert(key, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TokenValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Keys longest first, ties alphabetical
    fn match_order(&self) -> Vec<&(String, TokenValue)> {
        let mut ordered: Vec<_> = self.entries.iter().filter(|(k, _)| !k.is_empty()).collect();
        ordered.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        ordered
    }
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Substitute every whole-word occurrence of each uppercased key in `template`
pub fn render(template: &str, tokens: &TokenTable, quoting: Quoting) -> String {
    let ordered = tokens.match_order();
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        let at_boundary = i == 0 || !is_word_byte(bytes[i - 1]);
        let hit = if at_boundary {
            ordered.iter().find(|(key, _)| {
                let end = i + key.len();
                end <= bytes.len()
                    && &bytes[i..end] == key.as_bytes()
                    && (end == bytes.len() || !is_word_byte(bytes[end]))
            })
        } else {
            None
        };
        match hit {
            Some((key, value)) => {
                out.push_str(&template[copied..i]);
                out.push_str(&value.quoted(quoting));
                i += key.len();
                copied = i;
            }
            None => i += 1,
        }
    }
    out.push_str(&template[copied..]);
    out
}

/// `KEY=value` lines for the run script, text values quoted
pub fn settings_block(tokens: &TokenTable) -> String {
    tokens
        .iter()
        .map(|(key, value)| format!("{key}={}", value.quoted(Quoting::Shell)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replace every line ending in `marker` with `block`. Returns `None` if no line carries
/// the marker.
pub fn splice_at_marker(template: &str, marker: &str, block: &str) -> Option<String> {
    let mut found = false;
    let mut out = String::with_capacity(template.len() + block.len());
    for line in template.split_inclusive('\n') {
        let (content, newline) = match line.strip_suffix('\n') {
            Some(content) => (content, "\n"),
            None => (line, ""),
        };
        if content.trim_end().ends_with(marker) {
            found = true;
            out.push_str(block);
            out.push_str(newline);
        } else {
            out.push_str(line);
        }
    }
    found.then_some(out)
}
