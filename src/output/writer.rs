//! Sourceable environment file writer
//!
//! Each entry becomes one line, `export NAME='value'` (or bare
//! `NAME='value'`). Values are single-quoted so comma-separated lists and
//! shell metacharacters survive `source` verbatim. The file is written to a
//! temporary sibling and renamed into place, so readers never observe a
//! partially written artifact.

use crate::error::{AutoconfError, IoResultExt, Result};
use crate::nccl::DerivedConfig;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Writes a [`DerivedConfig`] as a shell environment file
#[derive(Debug, Clone, Copy)]
pub struct ConfigWriter {
    export: bool,
}

impl Default for ConfigWriter {
    fn default() -> Self {
        Self { export: true }
    }
}

impl ConfigWriter {
    /// Create a writer; `export` prefixes each line with `export `
    pub fn new(export: bool) -> Self {
        Self { export }
    }

    /// Render the file contents without touching disk
    pub fn render(&self, config: &DerivedConfig) -> Result<String> {
        let mut out = String::new();
        for (name, value) in config.iter() {
            validate_name(name)?;
            validate_value(name, value)?;
            if self.export {
                out.push_str("export ");
            }
            out.push_str(name);
            out.push('=');
            out.push_str(&shell_quote(value));
            out.push('\n');
        }
        Ok(out)
    }

    /// Atomically write `config` to `destination`
    ///
    /// On any failure the destination is left untouched.
    pub fn write(&self, config: &DerivedConfig, destination: &Path) -> Result<()> {
        let contents = self.render(config)?;
        atomic_write(destination, contents.as_bytes())?;
        info!(path = %destination.display(), entries = config.len(), "environment file written");
        Ok(())
    }
}

/// Write `data` to a temp file next to `destination`, then rename over it
pub(crate) fn atomic_write(destination: &Path, data: &[u8]) -> Result<()> {
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    // Dropping the temp file on an early return removes it
    let mut tmp = tempfile::Builder::new()
        .prefix(".nccl-autoconf-")
        .tempfile_in(parent)
        .with_write_path(destination)?;
    debug!(tmp = %tmp.path().display(), "staging artifact");

    tmp.write_all(data).with_write_path(destination)?;
    tmp.as_file().sync_all().with_write_path(destination)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .with_write_path(destination)?;
    }

    tmp.persist(destination)
        .map_err(|e| AutoconfError::write(destination, e.error))?;
    Ok(())
}

/// Read an environment file back into ordered `(name, value)` pairs
///
/// Accepts the format produced by [`ConfigWriter`], with or without the
/// `export` prefix. Blank lines and `#` comments are skipped.
pub fn read_artifact(path: &Path) -> Result<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path).with_path(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            parse_line(line).ok_or_else(|| {
                AutoconfError::invalid_entry(
                    format!("{}:{}", path.display(), n + 1),
                    "expected NAME='value'",
                )
            })
        })
        .collect()
}

/// Single-quote a value for POSIX shells
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
    let (name, raw) = line.split_once('=')?;
    if validate_name(name).is_err() {
        return None;
    }
    Some((name.to_string(), shell_unquote(raw)?))
}

/// Inverse of [`shell_quote`], also accepting unquoted words
fn shell_unquote(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '\'') => quoted = false,
            (true, c) => out.push(c),
            (false, '\'') => quoted = true,
            (false, '\\') => out.push(chars.next()?),
            (false, c) => out.push(c),
        }
    }

    if quoted {
        None
    } else {
        Some(out)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AutoconfError::invalid_entry(name, "not a valid shell variable name"))
    }
}

fn validate_value(name: &str, value: &str) -> Result<()> {
    if value.contains(|c: char| matches!(c, '\n' | '\r' | '\0')) {
        return Err(AutoconfError::invalid_entry(
            name,
            "value contains a newline or NUL byte",
        ));
    }
    Ok(())
}
