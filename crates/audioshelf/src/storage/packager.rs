//! Bundles a job's transcoded outputs and cover art into one archive.

use std::fs::File;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::StorageError;

fn archive_err(path: &Path) -> impl FnOnce(zip::result::ZipError) -> StorageError + '_ {
    move |source| StorageError::Archive {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes `outputs`, in order, plus `cover` (if present) to `archive`, all at
/// the archive root. Only the files named are packaged, so leftovers of an
/// earlier attempt in the same directory stay out. An archive from an earlier
/// attempt is replaced, never appended to. Returns the number of entries
/// written.
pub fn package(outputs: &[PathBuf], cover: Option<&Path>, archive: &Path) -> Result<usize, StorageError> {
    let mut inputs = outputs.to_vec();
    if let Some(cover) = cover.filter(|c| c.is_file()) {
        inputs.push(cover.to_path_buf());
    }

    let tmp = {
        let mut name = archive.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    };

    let file = File::create(&tmp).map_err(|e| StorageError::WriteFile {
        path: tmp.clone(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for input in &inputs {
        let Some(name) = input.file_name().and_then(|n| n.to_str()) else {
            log::warn!("Skipping non UTF-8 file name {}", input.display());
            continue;
        };
        log::debug!("Adding to archive: {}", name);

        zip.start_file(name, options).map_err(archive_err(&tmp))?;
        let mut src = File::open(input).map_err(|e| StorageError::ReadFile {
            path: input.clone(),
            source: e,
        })?;
        std::io::copy(&mut src, &mut zip).map_err(|e| StorageError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
    }

    zip.finish().map_err(archive_err(&tmp))?;

    std::fs::rename(&tmp, archive).map_err(|e| StorageError::MoveFile {
        from: tmp.clone(),
        to: archive.to_path_buf(),
        source: e,
    })?;

    log::info!("Packaged {} file(s) into {}", inputs.len(), archive.display());
    Ok(inputs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn entry_names(archive: &Path) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn write(dir: &Path, name: &str, body: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_package_flat_with_cover() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("mp3");
        std::fs::create_dir(&out).unwrap();
        let outputs = vec![
            write(&out, "001 - One.mp3", b"one"),
            write(&out, "002 - Two.mp3", b"two"),
        ];
        let cover = write(tmp.path(), "cover.jpg", b"jpeg");
        let archive = tmp.path().join("audiobook.zip");

        let count = package(&outputs, Some(&cover), &archive).unwrap();

        assert_eq!(count, 3);
        assert_eq!(
            entry_names(&archive),
            vec!["001 - One.mp3", "002 - Two.mp3", "cover.jpg"]
        );
        assert!(!tmp.path().join("audiobook.zip.tmp").exists());

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut body = String::new();
        zip.by_name("001 - One.mp3").unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "one");
    }

    #[test]
    fn test_package_ignores_unlisted_leftovers() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("mp3");
        std::fs::create_dir(&out).unwrap();
        // A whole-file output from a run that had no chapter metadata.
        write(&out, "audiobook.mp3", b"whole");
        write(&out, "002 - Two.partial.mp3", b"half");
        let outputs = vec![
            write(&out, "001 - One.mp3", b"one"),
            write(&out, "002 - Two.mp3", b"two"),
        ];
        let archive = tmp.path().join("audiobook.zip");

        package(&outputs, None, &archive).unwrap();

        assert_eq!(entry_names(&archive), vec!["001 - One.mp3", "002 - Two.mp3"]);
    }

    #[test]
    fn test_repackage_replaces_archive() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("mp3");
        std::fs::create_dir(&out).unwrap();
        let archive = tmp.path().join("audiobook.zip");
        package(&[write(&out, "old.mp3", b"old")], None, &archive).unwrap();

        let new = write(&out, "new.mp3", b"new");
        package(&[new], Some(&tmp.path().join("cover.jpg")), &archive).unwrap();

        assert_eq!(entry_names(&archive), vec!["new.mp3"]);
    }

    #[test]
    fn test_missing_output_fails() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("audiobook.zip");
        let err = package(&[tmp.path().join("gone.mp3")], None, &archive).unwrap_err();
        assert!(matches!(err, StorageError::ReadFile { .. }));
        assert!(!archive.exists());
    }
}
