use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::MorbError;

fn archive_error(err: impl std::fmt::Display) -> MorbError {
    MorbError::ReleaseArchive(err.to_string())
}

/// Extracts every entry of `zip_path` below `target_dir`, refusing entries
/// whose path would leave it.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, MorbError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| MorbError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(archive_error)?;

    let mut files = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(archive_error)?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(MorbError::ReleaseArchive(format!(
                    "entry {:?} escapes the extraction directory",
                    entry.name()
                )));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| MorbError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| MorbError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| MorbError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| MorbError::Filesystem(err.to_string()))?;
        files += 1;
    }
    Ok(files)
}

/// Reads every entry once so that a truncated or corrupt archive fails before
/// anything is extracted.
pub fn validate_zip(zip_path: &Path) -> Result<(), MorbError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| MorbError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(archive_error)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(archive_error)?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink()).map_err(archive_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_nested_entries() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("morlab-6.0.zip");
        build_zip(
            &zip_path,
            &[
                ("morlab-6.0/README.md", b"readme"),
                ("morlab-6.0/src/ml_ct_ss_bt.m", b"function x"),
            ],
        );
        validate_zip(&zip_path).unwrap();
        let target = temp.path().join("out");
        assert_eq!(extract_zip(&zip_path, &target).unwrap(), 2);
        assert_eq!(
            fs::read(target.join("morlab-6.0/src/ml_ct_ss_bt.m")).unwrap(),
            b"function x"
        );
    }

    #[test]
    fn rejects_traversal() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("evil.zip");
        build_zip(&zip_path, &[("../outside.txt", b"x")]);
        let target = temp.path().join("out");
        assert_matches!(
            extract_zip(&zip_path, &target),
            Err(MorbError::ReleaseArchive(_))
        );
        assert!(!temp.path().join("outside.txt").exists());
    }

    #[test]
    fn rejects_non_zip() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("broken.zip");
        fs::write(&zip_path, b"not a zip").unwrap();
        assert_matches!(validate_zip(&zip_path), Err(MorbError::ReleaseArchive(_)));
    }
}
