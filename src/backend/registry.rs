// src/backend/registry.rs

//! Minimal reader for the prefix's per-user registry file and argument
//! builder for `reg add`.
//!
//! Only string and dword values are understood; everything else is kept as
//! raw text so that unknown entries never break a read.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::fs::FileSystem;

pub const USER_REGISTRY_FILE: &str = "user.reg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    Sz(String),
    Dword(u32),
    /// Any other type, as written in the file after `=`.
    Raw(String),
}

impl RegValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegValue::Sz(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dword(&self) -> Option<u32> {
        match self {
            RegValue::Dword(v) => Some(*v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            RegValue::Dword(_) => "REG_DWORD",
            _ => "REG_SZ",
        }
    }
}

impl fmt::Display for RegValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegValue::Sz(s) | RegValue::Raw(s) => f.write_str(s),
            RegValue::Dword(v) => write!(f, "{v}"),
        }
    }
}

/// Parsed registry file. Key paths and value names compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStore {
    keys: BTreeMap<String, BTreeMap<String, RegValue>>,
}

impl RegistryStore {
    pub fn get(&self, key: &str, name: &str) -> Option<&RegValue> {
        self.keys
            .get(&normalize_key(key))?
            .get(&name.to_lowercase())
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.keys.contains_key(&normalize_key(key))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Strip the hive prefix, collapse separators and lowercase.
fn normalize_key(key: &str) -> String {
    let key = key.replace("\\\\", "\\");
    let lower = key.trim_matches('\\').to_lowercase();
    for hive in ["hkcu\\", "hkey_current_user\\"] {
        if let Some(rest) = lower.strip_prefix(hive) {
            return rest.to_string();
        }
    }
    lower
}

/// Parse the text of a `user.reg` file.
pub fn parse_registry(contents: &str) -> RegistryStore {
    let mut store = RegistryStore::default();
    let mut current: Option<String> = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            current = rest.find(']').map(|end| normalize_key(&rest[..end]));
            if let Some(key) = &current {
                store.keys.entry(key.clone()).or_default();
            }
            continue;
        }

        let Some(key) = current.as_ref() else {
            continue;
        };
        if let Some((name, value)) = parse_value_line(line) {
            store
                .keys
                .entry(key.clone())
                .or_default()
                .insert(name.to_lowercase(), value);
        }
    }

    store
}

fn parse_value_line(line: &str) -> Option<(String, RegValue)> {
    let (name, rest) = if let Some(rest) = line.strip_prefix('@') {
        (String::new(), rest)
    } else {
        let (name, consumed) = parse_quoted(line)?;
        (name, &line[consumed..])
    };
    let raw = rest.trim_start().strip_prefix('=')?.trim();

    let value = if raw.starts_with('"') {
        RegValue::Sz(parse_quoted(raw)?.0)
    } else if let Some(hex) = raw.strip_prefix("dword:") {
        u32::from_str_radix(hex, 16)
            .map(RegValue::Dword)
            .unwrap_or_else(|_| RegValue::Raw(raw.to_string()))
    } else {
        RegValue::Raw(raw.to_string())
    };
    Some((name, value))
}

/// Parse a leading double-quoted string with `\\` and `\"` escapes.
/// Returns the unescaped text and the number of bytes consumed.
fn parse_quoted(s: &str) -> Option<(String, usize)> {
    let body = s.strip_prefix('"')?;
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, next) = chars.next()?;
                match next {
                    'n' => out.push('\n'),
                    '0' => out.push('\0'),
                    other => out.push(other),
                }
            }
            '"' => return Some((out, i + 2)),
            other => out.push(other),
        }
    }
    None
}

/// Read `<prefix>/user.reg`; a missing or unreadable file is an empty store.
pub fn read_user_registry(fs: &dyn FileSystem, prefix: &Path) -> RegistryStore {
    let path = prefix.join(USER_REGISTRY_FILE);
    match fs.read_to_string(&path) {
        Ok(contents) => parse_registry(&contents),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no readable user registry");
            RegistryStore::default()
        }
    }
}

/// Arguments for `wine reg add` writing one value (after the runtime executable).
pub fn reg_add_args(key: &str, name: &str, value: &RegValue) -> Vec<String> {
    vec![
        "reg".to_string(),
        "add".to_string(),
        key.to_string(),
        "/v".to_string(),
        name.to_string(),
        "/t".to_string(),
        value.type_name().to_string(),
        "/d".to_string(),
        value.to_string(),
        "/f".to_string(),
    ]
}
