// backuptool/src/backup/archive.rs
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::backup::dump::DumpArtifact;
use crate::errors::{AppError, Result};

/// A compressed archive wrapping exactly one dump file.
#[derive(Debug, Clone)]
pub struct ArchiveArtifact {
    pub path: PathBuf,
    pub origin_name: String,
}

impl ArchiveArtifact {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.origin_name)
    }
}

fn write_single_entry_zip(dump_path: &Path, zip_path: &Path, entry_name: &str) -> Result<()> {
    let out = File::create(zip_path)?;
    let mut writer = ZipWriter::new(out);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));
    writer.start_file(entry_name, options)?;
    let mut input = File::open(dump_path)?;
    io::copy(&mut input, &mut writer)?;
    writer.finish()?;
    Ok(())
}

/// Compresses a validated dump into a single-entry zip next to it and removes
/// the plaintext original. The dump must never persist uncompressed longer
/// than necessary, so the original is deleted on the failure path as well;
/// archive failures are local-disk or permission problems that a retry will
/// not fix.
pub async fn archive_dump(artifact: DumpArtifact) -> Result<ArchiveArtifact> {
    let zip_path = artifact.path.with_extension("zip");
    let origin_name = artifact
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::Config(format!("dump has no file name: {}", artifact.path.display())))?
        .to_string();

    let dump_path = artifact.path.clone();
    let zip_dest = zip_path.clone();
    let entry = origin_name.clone();
    let result = tokio::task::spawn_blocking(move || {
        write_single_entry_zip(&dump_path, &zip_dest, &entry)
    })
    .await
    .map_err(|e| AppError::Config(format!("blocking archive task failed: {e}")))?;

    match result {
        Ok(()) => {
            tokio::fs::remove_file(&artifact.path).await?;
            tracing::info!(archive = %zip_path.display(), "dump archived");
            Ok(ArchiveArtifact {
                path: zip_path,
                origin_name,
            })
        }
        Err(e) => {
            if tokio::fs::try_exists(&zip_path).await.unwrap_or(false) {
                let _ = tokio::fs::remove_file(&zip_path).await;
            }
            tokio::fs::remove_file(&artifact.path).await?;
            Err(AppError::ArchiveFailed {
                path: artifact.path,
                reason: e.to_string(),
            })
        }
    }
}

/// Re-ingests an operator-supplied archive for the deployment flow.
///
/// The archive must contain exactly one `.sql` entry; anything else is an
/// input error. Returns the path of the extracted dump.
pub fn extract_single_sql(archive_path: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    let sql_indices: Vec<usize> = (0..archive.len())
        .filter(|&i| {
            archive
                .by_index(i)
                .map(|f| f.name().ends_with(".sql"))
                .unwrap_or(false)
        })
        .collect();

    match sql_indices.as_slice() {
        [] => Err(AppError::InputValidation(format!(
            "archive {} contains no .sql entry",
            archive_path.display()
        ))),
        [index] => {
            let mut entry = archive.by_index(*index)?;
            let entry_name = entry
                .enclosed_name()
                .and_then(|p| p.file_name().map(|n| n.to_os_string()))
                .ok_or_else(|| {
                    AppError::InputValidation(format!(
                        "archive {} has an unsafe entry name",
                        archive_path.display()
                    ))
                })?;
            std::fs::create_dir_all(dest_dir)?;
            let dest = dest_dir.join(entry_name);
            let mut out = File::create(&dest)?;
            io::copy(&mut entry, &mut out)?;
            Ok(dest)
        }
        _ => Err(AppError::InputValidation(format!(
            "archive {} contains more than one .sql entry; supply an archive with a single dump",
            archive_path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn make_dump(dir: &Path, name: &str, content: &str) -> DumpArtifact {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        DumpArtifact {
            path: path.clone(),
            size_bytes: content.len() as u64,
            created_at: Local::now(),
        }
    }

    #[tokio::test]
    async fn archive_has_one_entry_and_plaintext_is_gone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dump = make_dump(dir.path(), "app_20240101_000000.sql", "CREATE TABLE t (id int);");
        let dump_path = dump.path.clone();

        let archive = archive_dump(dump).await?;
        assert!(archive.path.ends_with("app_20240101_000000.zip"));
        assert!(!dump_path.exists());

        let zip = ZipArchive::new(File::open(&archive.path)?)?;
        assert_eq!(zip.len(), 1);
        assert_eq!(archive.origin_name, "app_20240101_000000.sql");
        Ok(())
    }

    #[tokio::test]
    async fn extracting_single_sql_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dump = make_dump(dir.path(), "shop_20240101_000000.sql", "INSERT INTO x VALUES (1);");
        let archive = archive_dump(dump).await?;

        let out_dir = dir.path().join("extract");
        let extracted = extract_single_sql(&archive.path, &out_dir)?;
        let content = std::fs::read_to_string(extracted)?;
        assert_eq!(content, "INSERT INTO x VALUES (1);");
        Ok(())
    }

    #[test]
    fn multi_entry_archive_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let zip_path = dir.path().join("double.zip");
        let mut writer = ZipWriter::new(File::create(&zip_path)?);
        let options = SimpleFileOptions::default();
        writer.start_file("a.sql", options)?;
        io::copy(&mut "select 1;".as_bytes(), &mut writer)?;
        writer.start_file("b.sql", options)?;
        io::copy(&mut "select 2;".as_bytes(), &mut writer)?;
        writer.finish()?;

        let err = extract_single_sql(&zip_path, dir.path()).unwrap_err();
        assert!(matches!(err, AppError::InputValidation(_)));
        Ok(())
    }

    #[test]
    fn archive_without_sql_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let zip_path = dir.path().join("none.zip");
        let mut writer = ZipWriter::new(File::create(&zip_path)?);
        writer.start_file("readme.txt", SimpleFileOptions::default())?;
        io::copy(&mut "hi".as_bytes(), &mut writer)?;
        writer.finish()?;

        let err = extract_single_sql(&zip_path, dir.path()).unwrap_err();
        assert!(matches!(err, AppError::InputValidation(_)));
        Ok(())
    }
}
