use crate::error::Result;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Position in the log already handed out and processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchCursor {
    pub offset: u64,
    /// Identity of the file the offset refers to, when the platform has one.
    file_id: Option<u64>,
}

/// One complete line and the offset just past its newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailLine {
    pub text: String,
    pub end_offset: u64,
}

/// Incremental reader over an append-only file.
///
/// Only complete lines are returned. The cursor moves when the caller
/// commits a line, so a line that failed to process is read again next time.
pub struct LogTail {
    path: PathBuf,
    cursor: WatchCursor,
}

impl LogTail {
    /// Start at the current end of file. A missing file starts at zero so
    /// that everything written once it appears is seen.
    pub async fn open_at_end(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let cursor = match tokio::fs::metadata(&path).await {
            Ok(meta) => WatchCursor {
                offset: meta.len(),
                file_id: file_id(&meta),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("{} does not exist yet, waiting for it", path.display());
                WatchCursor::default()
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!("Tailing {} from offset {}", path.display(), cursor.offset);
        Ok(Self { path, cursor })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> WatchCursor {
        self.cursor
    }

    /// Complete lines appended since the cursor. A trailing fragment with no
    /// newline yet is left for a later call.
    pub async fn read_new_lines(&mut self) -> Result<Vec<TailLine>> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let id = file_id(&meta);
        if meta.len() < self.cursor.offset || (self.cursor.file_id.is_some() && id != self.cursor.file_id) {
            tracing::info!("{} was rotated, reading from the start", self.path.display());
            self.cursor.offset = 0;
        }
        self.cursor.file_id = id;

        if meta.len() == self.cursor.offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.cursor.offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;

        let mut lines = Vec::new();
        let mut start = 0usize;
        while let Some(pos) = buf[start..].iter().position(|&b| b == b'\n') {
            let raw = &buf[start..start + pos];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            start += pos + 1;
            lines.push(TailLine {
                text: String::from_utf8_lossy(raw).into_owned(),
                end_offset: self.cursor.offset + start as u64,
            });
        }

        Ok(lines)
    }

    /// Mark everything up to and including `line` as processed.
    pub fn commit(&mut self, line: &TailLine) {
        self.cursor.offset = line.end_offset;
    }
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn append(path: &Path, data: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(data.as_bytes()).unwrap();
    }

    async fn drain(tail: &mut LogTail) -> Vec<String> {
        let lines = tail.read_new_lines().await.unwrap();
        for line in &lines {
            tail.commit(line);
        }
        lines.into_iter().map(|l| l.text).collect()
    }

    #[tokio::test]
    async fn test_starts_at_end_of_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("xlogfile");
        append(&path, "old game\n");

        let mut tail = LogTail::open_at_end(&path).await.unwrap();
        assert_eq!(tail.cursor().offset, 9);
        assert!(drain(&mut tail).await.is_empty());

        append(&path, "new game\n");
        assert_eq!(drain(&mut tail).await, vec!["new game"]);
    }

    #[tokio::test]
    async fn test_partial_line_is_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("xlogfile");
        append(&path, "");
        let mut tail = LogTail::open_at_end(&path).await.unwrap();

        append(&path, "first\nsec");
        assert_eq!(drain(&mut tail).await, vec!["first"]);
        assert_eq!(tail.cursor().offset, 6);

        append(&path, "ond\r\n");
        assert_eq!(drain(&mut tail).await, vec!["second"]);
    }

    #[tokio::test]
    async fn test_uncommitted_lines_are_read_again() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("xlogfile");
        append(&path, "");
        let mut tail = LogTail::open_at_end(&path).await.unwrap();

        append(&path, "a\nb\n");
        let lines = tail.read_new_lines().await.unwrap();
        tail.commit(&lines[0]);

        let again = tail.read_new_lines().await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].text, "b");
        assert_eq!(again[0].end_offset, 4);
    }

    #[tokio::test]
    async fn test_file_created_after_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("xlogfile");

        let mut tail = LogTail::open_at_end(&path).await.unwrap();
        assert!(drain(&mut tail).await.is_empty());

        append(&path, "first game\n");
        assert_eq!(drain(&mut tail).await, vec!["first game"]);
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("xlogfile");
        append(&path, "a fairly long first line\n");
        let mut tail = LogTail::open_at_end(&path).await.unwrap();

        std::fs::write(&path, "short\n").unwrap();
        assert_eq!(drain(&mut tail).await, vec!["short"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_replaced_file_is_read_from_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("xlogfile");
        append(&path, "one\n");
        let mut tail = LogTail::open_at_end(&path).await.unwrap();

        // Keep the old inode alive so the new file cannot reuse it
        let rotated = dir.path().join("xlogfile.1");
        std::fs::rename(&path, &rotated).unwrap();
        append(&path, "two\nthree\n");

        assert_eq!(drain(&mut tail).await, vec!["two", "three"]);
    }
}
