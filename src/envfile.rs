//! `.env`-style `KEY=VALUE` file loading.
//!
//! A thin external collaborator: the core never reads this file directly,
//! the CLI dispatcher loads it before the process environment is consulted
//! for configuration or spec interpolation. A missing file is not an error.

use std::fs;
use std::path::Path;

/// Load `KEY=VALUE` pairs from `path` into the process environment.
///
/// Lines starting with `#` and blank lines are skipped. A missing file is
/// silently ignored, per spec.
pub fn load(path: &Path) -> anyhow::Result<()> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        let mut value = value.trim();

        if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
            || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
        {
            value = &value[1..value.len() - 1];
        }

        if !key.is_empty() {
            // SAFETY: director runs single-threaded at this point (before
            // any reconciliation work begins), so mutating the process
            // environment here cannot race with a reader on another thread.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_ignored() {
        let result = load(Path::new("/nonexistent/path/to/.env"));
        assert!(result.is_ok());
    }

    #[test]
    fn loads_simple_pairs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "FOO=bar").unwrap();
        writeln!(file, "QUOTED=\"hello world\"").unwrap();
        writeln!(file).unwrap();

        load(file.path()).unwrap();

        assert_eq!(std::env::var("FOO").unwrap(), "bar");
        assert_eq!(std::env::var("QUOTED").unwrap(), "hello world");
    }
}
