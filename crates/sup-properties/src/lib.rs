//! # Supervisor Properties
//!
//! Reader for line-oriented `key=value` properties files, such as the
//! `info.properties` file written into every installed app's directory.
//!
//! Lines are trimmed; empty lines and lines starting with `#` or `!` are
//! ignored.  The first `=` on a line separates the key from the value,
//! and both are trimmed of surrounding whitespace.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use sup_common::{Error, Result};

/// Looks up the value for a key in a properties file.
///
/// Returns NotFound if the file does not exist or the key is absent,
/// and an I/O error for any other read failure.
pub fn get_value_for_key(path: impl AsRef<Path>, key: &str) -> Result<String> {
    let path = path.as_ref();

    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::not_found(format!("properties file '{}'", path.display()))
        } else {
            Error::from(e)
        }
    })?;

    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line?;

        if let Some((k, v)) = parse_line(&line) {
            if k == key {
                return Ok(v.to_string());
            }
        }
    }

    Err(Error::not_found(format!(
        "key '{key}' in '{}'",
        path.display()
    )))
}

/// Splits one properties line into a key/value pair.
///
/// Returns None for blank lines and comments.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();

    if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
        return None;
    }

    let (key, value) = line.split_once('=')?;

    Some((key.trim(), value.trim()))
}
