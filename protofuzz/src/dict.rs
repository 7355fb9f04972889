//! Extras Dictionary (spec §4.2, C4): a user-supplied token dictionary
//! consumed by mutator operators 15-16.

use std::fs;
use std::path::Path;

use thiserror::Error;

const DEFAULT_MAX_KEYWORD_LEN: usize = 1024;

#[derive(Debug, Clone)]
pub struct DictEntry {
    pub data: Vec<u8>,
    pub len: usize,
    pub hit_count: u32,
}

impl DictEntry {
    fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        DictEntry {
            data,
            len,
            hit_count: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum DictError {
    #[error("dictionary file not found: {0}")]
    NotFound(String),
    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
}

/// Parse a dictionary file: lines of `NAME[@LEVEL]="VALUE"`. Blank lines and
/// lines starting with `#` are skipped. Entries whose `@LEVEL` exceeds
/// `dict_level` are dropped silently. `VALUE` supports `\\`, `\"`, `\xNN`
/// escapes; every other byte must be printable ASCII (32-127). An entry
/// whose decoded length exceeds `max_keyword_len` fails the whole file.
pub fn load_extras_file(
    path: &Path,
    dict_level: u32,
    max_keyword_len: Option<usize>,
) -> Result<Vec<DictEntry>, DictError> {
    let max_keyword_len = max_keyword_len.unwrap_or(DEFAULT_MAX_KEYWORD_LEN);
    let text = fs::read_to_string(path)
        .map_err(|_| DictError::NotFound(path.display().to_string()))?;

    let path_display = path.display().to_string();
    let mut entries = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (name_part, value_part) = split_name_value(line).ok_or_else(|| DictError::Parse {
            path: path_display.clone(),
            line: line_no,
            message: "expected NAME[@LEVEL]=\"VALUE\"".to_string(),
        })?;

        let level = parse_level(name_part).map_err(|message| DictError::Parse {
            path: path_display.clone(),
            line: line_no,
            message,
        })?;
        if level > dict_level {
            continue;
        }

        let decoded = decode_value(value_part).map_err(|message| DictError::Parse {
            path: path_display.clone(),
            line: line_no,
            message,
        })?;

        if decoded.len() > max_keyword_len {
            return Err(DictError::Parse {
                path: path_display.clone(),
                line: line_no,
                message: format!(
                    "keyword length {} exceeds ceiling {}",
                    decoded.len(),
                    max_keyword_len
                ),
            });
        }

        entries.push(DictEntry::new(decoded));
    }

    Ok(entries)
}

/// Split `NAME[@LEVEL]="VALUE"` into the name(+level) part and the quoted
/// value's inner contents.
fn split_name_value(line: &str) -> Option<(&str, &str)> {
    let eq = line.find('=')?;
    let name_part = line[..eq].trim();
    let rest = line[eq + 1..].trim();
    let inner = rest.strip_prefix('"')?.strip_suffix('"')?;
    Some((name_part, inner))
}

fn parse_level(name_part: &str) -> Result<u32, String> {
    match name_part.split_once('@') {
        None => Ok(0),
        Some((_, level_str)) => level_str
            .parse::<u32>()
            .map_err(|_| format!("invalid @LEVEL: {:?}", level_str)),
    }
}

fn decode_value(value: &str) -> Result<Vec<u8>, String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            if i + 1 >= bytes.len() {
                return Err("trailing backslash".to_string());
            }
            match bytes[i + 1] {
                b'\\' => {
                    out.push(b'\\');
                    i += 2;
                }
                b'"' => {
                    out.push(b'"');
                    i += 2;
                }
                b'x' => {
                    if i + 3 >= bytes.len() {
                        return Err("truncated \\xNN escape".to_string());
                    }
                    let hex = std::str::from_utf8(&bytes[i + 2..i + 4])
                        .map_err(|_| "invalid \\xNN escape".to_string())?;
                    let value = u8::from_str_radix(hex, 16)
                        .map_err(|_| format!("invalid \\xNN escape: {:?}", hex))?;
                    out.push(value);
                    i += 4;
                }
                other => {
                    return Err(format!("unsupported escape: \\{}", other as char));
                }
            }
        } else {
            if !(32..=127).contains(&b) {
                return Err(format!("non-printable byte {:#04x} outside an escape", b));
            }
            out.push(b);
            i += 1;
        }
    }
    Ok(out)
}
