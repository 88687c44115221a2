// backuptool/src/backup/validate.rs
use std::io::Read;
use std::path::Path;

use crate::backup::dump::DumpArtifact;
use crate::config::BackupTarget;
use crate::errors::{AppError, Result};

/// How much of the dump head is inspected for structural keywords.
const LEADING_BYTES: usize = 8192;

fn has_structural_keyword(target: &BackupTarget, leading: &str) -> bool {
    let lowered = leading.to_lowercase();
    target
        .engine
        .structural_keywords()
        .iter()
        .any(|kw| lowered.contains(kw))
}

/// Reads the first `max_bytes` of a file off the runtime threads.
pub async fn read_leading(path: &Path, max_bytes: usize) -> Result<String> {
    let path = path.to_path_buf();
    let bytes = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(max_bytes);
        std::fs::File::open(&path)?
            .take(max_bytes as u64)
            .read_to_end(&mut buf)?;
        Ok(buf)
    })
    .await
    .map_err(|e| AppError::Config(format!("blocking read task failed: {e}")))??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Checks that a dump looks complete: big enough, and containing at least
/// one structural marker for its engine. Dump tools can exit 0 while writing
/// a truncated or empty file (disk full, connection dropped mid-stream), so
/// this is the only defense before the plaintext original is discarded.
///
/// A rejected artifact is deleted; the caller must not touch it afterwards.
pub async fn validate_dump(
    artifact: &DumpArtifact,
    target: &BackupTarget,
    min_size: u64,
) -> Result<()> {
    if artifact.size_bytes <= min_size {
        let reason = format!(
            "size {} bytes is at or below the {} byte minimum",
            artifact.size_bytes, min_size
        );
        tracing::error!(file = %artifact.path.display(), %reason, "dump rejected");
        tokio::fs::remove_file(&artifact.path).await?;
        return Err(AppError::ValidationRejected {
            path: artifact.path.clone(),
            reason,
        });
    }

    let leading = read_leading(&artifact.path, LEADING_BYTES).await?;
    if !has_structural_keyword(target, &leading) {
        let reason = format!(
            "no {} structural keywords found in the leading content",
            target.engine.label()
        );
        tracing::error!(file = %artifact.path.display(), %reason, "dump rejected");
        tokio::fs::remove_file(&artifact.path).await?;
        return Err(AppError::ValidationRejected {
            path: artifact.path.clone(),
            reason,
        });
    }

    tracing::info!(
        file = %artifact.path.display(),
        size = artifact.size_bytes,
        "dump validated"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineKind;
    use chrono::Local;

    fn target(engine: EngineKind) -> BackupTarget {
        BackupTarget {
            engine,
            name: "shop".into(),
            host: "127.0.0.1".into(),
            port: engine.default_port(),
            user: "admin".into(),
            password: "pw".into(),
        }
    }

    fn artifact_for(path: &Path) -> DumpArtifact {
        DumpArtifact {
            path: path.to_path_buf(),
            size_bytes: std::fs::metadata(path).unwrap().len(),
            created_at: Local::now(),
        }
    }

    #[tokio::test]
    async fn undersized_dump_is_rejected_and_deleted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shop_20240101_000000.sql");
        std::fs::write(&path, "CREATE TABLE t (id int);")?;

        let err = validate_dump(&artifact_for(&path), &target(EngineKind::Postgres), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationRejected { .. }));
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn large_dump_without_keywords_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shop_20240101_000000.sql");
        std::fs::write(&path, "-- filler\n".repeat(300))?;

        let err = validate_dump(&artifact_for(&path), &target(EngineKind::Postgres), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationRejected { .. }));
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn valid_postgres_dump_passes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shop_20240101_000000.sql");
        let mut content = String::from("SET search_path = public;\nCREATE TABLE orders (id int);\n");
        content.push_str(&"-- padding\n".repeat(200));
        std::fs::write(&path, content)?;

        validate_dump(&artifact_for(&path), &target(EngineKind::Postgres), 1024).await?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn mysql_keywords_match_case_insensitively() {
        let t = target(EngineKind::MySql);
        assert!(has_structural_keyword(&t, "DROP TABLE x;\nINSERT INTO x VALUES (1);"));
        assert!(has_structural_keyword(&t, ") ENGINE=InnoDB DEFAULT CHARSET=utf8;"));
        assert!(!has_structural_keyword(&t, "-- nothing of note"));
    }
}
