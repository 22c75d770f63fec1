//! Zip fallback for oversized attachments.

use std::fs::File;
use std::io::{self, BufWriter, Write as _};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::SendError;

/// A zip of one source file in a private temp folder, removed on drop.
#[derive(Debug)]
pub struct TempArchive {
    path: PathBuf,
    _dir: TempDir,
}

impl TempArchive {
    /// Archive path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attachment name, `<stem>.zip`.
    #[must_use]
    pub fn file_name(&self) -> String {
        crate::message::display_name(&self.path)
    }

    /// Archive size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be stat'ed.
    pub fn size(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn create(source: &Path) -> Result<Self, SendError> {
        let stem = source
            .file_stem()
            .map_or_else(|| "attachment".into(), |s| s.to_string_lossy().into_owned());
        let entry = crate::message::display_name(source);

        let dir = tempfile::Builder::new().prefix("pdfpost-").tempdir()?;
        let archive = Self {
            path: dir.path().join(format!("{stem}.zip")),
            _dir: dir,
        };

        let mut input = File::open(source)?;
        let large = input.metadata()?.len() >= u64::from(u32::MAX);
        let mut zip = ZipWriter::new(BufWriter::new(File::create(&archive.path)?));
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .large_file(large);
        zip.start_file(entry, options)?;
        io::copy(&mut input, &mut zip)?;
        zip.finish()?.flush()?;

        Ok(archive)
    }
}

/// Zips `source` on the blocking pool.
///
/// # Errors
///
/// Returns an error if the source cannot be read or the archive written.
pub async fn compress_to_temp(source: &Path) -> Result<TempArchive, SendError> {
    let source = source.to_path_buf();
    tokio::task::spawn_blocking(move || TempArchive::create(&source))
        .await
        .map_err(|e| SendError::Io(io::Error::other(e)))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[tokio::test]
    async fn test_zip_contains_source_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan 01.pdf");
        let data = vec![b'A'; 512 * 1024];
        std::fs::write(&source, &data).unwrap();

        let archive = compress_to_temp(&source).await.unwrap();
        assert_eq!(archive.file_name(), "scan 01.zip");
        assert!(archive.size().unwrap() < 64 * 1024);

        let mut zip = zip::ZipArchive::new(File::open(archive.path()).unwrap()).unwrap();
        let mut entry = zip.by_name("scan 01.pdf").unwrap();
        let mut unpacked = Vec::new();
        entry.read_to_end(&mut unpacked).unwrap();
        assert_eq!(unpacked, data);

        let path = archive.path().to_path_buf();
        let folder = path.parent().unwrap().file_name().unwrap().to_string_lossy().into_owned();
        assert!(folder.starts_with("pdfpost-"), "{folder}");
        drop(entry);
        drop(zip);
        drop(archive);
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = compress_to_temp(&dir.path().join("gone.pdf")).await.unwrap_err();
        assert!(matches!(err, SendError::Io(_)));
    }
}
