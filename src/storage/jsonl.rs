//! JSON-lines files
//!
//! One record per line. Appends go through `O_APPEND` as a single write of a
//! complete line followed by `sync_data`; a torn trailing line left by a
//! crash is ignored on read and truncated away by the next append. Callers
//! serialize writers per file.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Append one record
pub fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut line = serde_json::to_vec(record).context("Failed to serialize record")?;
    line.push(b'\n');

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    truncate_torn_tail(&mut file)?;
    file.write_all(&line)
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    file.sync_data()?;
    Ok(())
}

/// Read every complete record; a missing file reads as empty
pub fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let complete = match raw.rfind('\n') {
        Some(idx) => &raw[..=idx],
        None => "",
    };
    if complete.len() < raw.len() {
        tracing::warn!(path = %path.display(), "ignoring torn trailing record");
    }

    let mut records = Vec::new();
    for (lineno, line) in complete.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => bail!("{}:{}: corrupt record: {}", path.display(), lineno + 1, e),
        }
    }
    Ok(records)
}

/// Replace the whole file atomically (write-then-rename)
pub fn rewrite_lines<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record).context("Failed to serialize record")?;
        buffer.push(b'\n');
    }

    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut file = File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(&buffer)?;
        file.sync_data()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn truncate_torn_tail(file: &mut File) -> Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut contents = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    let keep = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |idx| idx + 1);
    file.set_len(keep as u64)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        n: u32,
    }

    #[test]
    fn test_append_and_read_in_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("log.jsonl");
        for n in 0..3 {
            append_line(&path, &Entry { n }).unwrap();
        }
        let entries: Vec<Entry> = read_lines(&path).unwrap();
        assert_eq!(entries, vec![Entry { n: 0 }, Entry { n: 1 }, Entry { n: 2 }]);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let temp = TempDir::new().unwrap();
        let entries: Vec<Entry> = read_lines(&temp.path().join("absent.jsonl")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_torn_tail_is_ignored_then_repaired() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("log.jsonl");
        append_line(&path, &Entry { n: 1 }).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"n\":").unwrap();
        drop(file);

        let entries: Vec<Entry> = read_lines(&path).unwrap();
        assert_eq!(entries, vec![Entry { n: 1 }]);

        append_line(&path, &Entry { n: 2 }).unwrap();
        let entries: Vec<Entry> = read_lines(&path).unwrap();
        assert_eq!(entries, vec![Entry { n: 1 }, Entry { n: 2 }]);
    }

    #[test]
    fn test_corrupt_middle_line_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("log.jsonl");
        fs::write(&path, "{\"n\":1}\nnot json\n{\"n\":2}\n").unwrap();
        assert!(read_lines::<Entry>(&path).is_err());
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("log.jsonl");
        append_line(&path, &Entry { n: 1 }).unwrap();
        rewrite_lines(&path, &[Entry { n: 7 }]).unwrap();
        let entries: Vec<Entry> = read_lines(&path).unwrap();
        assert_eq!(entries, vec![Entry { n: 7 }]);
    }
}
