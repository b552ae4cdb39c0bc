//! File operations for LanShare.
//!
//! This module handles:
//! - Reducing sender-supplied names to a safe base name
//! - Picking a collision-free destination in the download directory
//! - Writing received payload and tracking how much arrived

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Reduce a sender-supplied name to its final path component.
///
/// Both `/` and `\` are treated as separators so names produced on any
/// platform are stripped. Returns `None` if nothing usable remains.
///
/// # Examples
///
/// ```
/// use lanshare_core::file::base_name;
///
/// assert_eq!(base_name("../../etc/passwd"), Some("passwd"));
/// assert_eq!(base_name(r"C:\Users\me\notes.txt"), Some("notes.txt"));
/// assert_eq!(base_name(".."), None);
/// ```
#[must_use]
pub fn base_name(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return None;
    }
    Some(base)
}

/// Name for the `counter`-th collision: `stem_N.ext`.
fn suffixed_name(name: &str, counter: u32) -> String {
    if counter == 0 {
        return name.to_string();
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map_or_else(|| name.to_string(), |s| s.to_string_lossy().into_owned());
    match path.extension() {
        Some(ext) => format!("{stem}_{counter}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{counter}"),
    }
}

/// Create a new file for `name` inside `dir` without overwriting anything.
///
/// Tries `name`, then `stem_1.ext`, `stem_2.ext`, ... Each attempt uses
/// exclusive creation, so concurrent callers never receive the same path.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or a candidate fails
/// for a reason other than already existing.
pub async fn create_unique_destination(dir: &Path, name: &str) -> io::Result<(PathBuf, File)> {
    tokio::fs::create_dir_all(dir).await?;

    for counter in 0..=u32::MAX {
        let candidate = dir.join(suffixed_name(name, counter));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {name} in {}", dir.display()),
    ))
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Writer for received payload.
///
/// Whatever was written stays on disk when the writer is dropped early;
/// partial files are never removed.
#[derive(Debug)]
pub struct FileWriter {
    /// Output file path
    pub output_path: PathBuf,
    /// Declared total file size
    pub expected_size: u64,
    /// Bytes written so far
    pub bytes_written: u64,
    file: File,
}

impl FileWriter {
    /// Create a writer for `name` in `dir`, picking a free destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be created.
    pub async fn create_unique(dir: &Path, name: &str, expected_size: u64) -> io::Result<Self> {
        let (output_path, file) = create_unique_destination(dir, name).await?;
        Ok(Self {
            output_path,
            expected_size,
            bytes_written: 0,
            file,
        })
    }

    /// Bytes still missing from the declared size.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.expected_size.saturating_sub(self.bytes_written)
    }

    /// Whether the declared size has been reached.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.bytes_written >= self.expected_size
    }

    /// Append a chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flush buffered data to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be synced.
    pub async fn finalize(mut self) -> io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_base_name_strips_directories() {
        assert_eq!(base_name("report.pdf"), Some("report.pdf"));
        assert_eq!(base_name("a/b/c.txt"), Some("c.txt"));
        assert_eq!(base_name("../../etc/passwd"), Some("passwd"));
        assert_eq!(base_name("dir\\file.bin"), Some("file.bin"));
        assert_eq!(base_name("/absolute/path.txt"), Some("path.txt"));
    }

    #[test]
    fn test_base_name_rejects_unusable() {
        assert_eq!(base_name(""), None);
        assert_eq!(base_name("."), None);
        assert_eq!(base_name(".."), None);
        assert_eq!(base_name("dir/"), None);
        assert_eq!(base_name("a\0b"), None);
    }

    #[test]
    fn test_suffixed_name() {
        assert_eq!(suffixed_name("report.pdf", 0), "report.pdf");
        assert_eq!(suffixed_name("report.pdf", 1), "report_1.pdf");
        assert_eq!(suffixed_name("archive.tar.gz", 2), "archive.tar_2.gz");
        assert_eq!(suffixed_name("README", 3), "README_3");
        assert_eq!(suffixed_name(".bashrc", 1), ".bashrc_1");
    }

    #[tokio::test]
    async fn test_unique_destination_appends_counter() {
        let dir = TempDir::new().unwrap();

        let (first, _) = create_unique_destination(dir.path(), "data.bin").await.unwrap();
        let (second, _) = create_unique_destination(dir.path(), "data.bin").await.unwrap();
        let (third, _) = create_unique_destination(dir.path(), "data.bin").await.unwrap();

        assert_eq!(first, dir.path().join("data.bin"));
        assert_eq!(second, dir.path().join("data_1.bin"));
        assert_eq!(third, dir.path().join("data_2.bin"));
    }

    #[tokio::test]
    async fn test_unique_destination_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");

        let (path, _) = create_unique_destination(&nested, "x.txt").await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_concurrent_destinations_distinct() {
        let dir = TempDir::new().unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let dir = dir.path().to_path_buf();
                tokio::spawn(async move {
                    create_unique_destination(&dir, "same.txt").await.unwrap().0
                })
            })
            .collect();

        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap());
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 8);
    }

    #[tokio::test]
    async fn test_file_writer_tracks_progress() {
        let dir = TempDir::new().unwrap();
        let mut writer = FileWriter::create_unique(dir.path(), "out.bin", 10)
            .await
            .unwrap();

        writer.write_chunk(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(writer.remaining(), 6);
        assert!(!writer.is_complete());

        writer.write_chunk(&[5, 6, 7, 8, 9, 10]).await.unwrap();
        assert!(writer.is_complete());

        let path = writer.finalize().await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), (1..=10).collect::<Vec<u8>>());
    }
}
