// backuptool/src/deploy/mod.rs
pub mod machine;
pub mod restore;
pub mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backup::archive::extract_single_sql;
use crate::backup::validate::read_leading;
use crate::context::AppContext;
use crate::deploy::machine::{transition, DeployInput, Effect};
use crate::deploy::restore::{check_database_exists, restore_dump, RestoreRequest};
use crate::deploy::session::DeploymentSession;
use crate::errors::{AppError, Result};

/// How much of the dump head the deployment flow reads for engine sniffing
/// and the statement check.
const SNIFF_BYTES: usize = 16 * 1024;

/// Result of driving one operator input through the workflow, including any
/// follow-up transitions triggered by side effects.
#[derive(Debug)]
pub struct FlowOutcome {
    pub session: DeploymentSession,
    pub messages: Vec<String>,
}

fn required<T: Clone>(field: &Option<T>, name: &str) -> Result<T> {
    field
        .clone()
        .ok_or_else(|| AppError::InputValidation(format!("session is missing the {name}")))
}

fn build_request(session: &DeploymentSession, overwrite: bool) -> Result<RestoreRequest> {
    let dump = required(&session.dump, "dump")?;
    Ok(RestoreRequest {
        dump_path: dump.path,
        engine: required(&session.engine, "engine")?,
        host: required(&session.host, "host")?,
        port: required(&session.port, "port")?,
        dbname: required(&session.dbname, "database name")?,
        user: required(&session.username, "user name")?,
        password: required(&session.password, "password")?,
        overwrite,
    })
}

/// Drives deployment sessions: resolves operator-supplied dumps, feeds
/// inputs to the transition function and executes the effects it returns.
pub struct DeploymentFlow {
    ctx: Arc<AppContext>,
}

impl DeploymentFlow {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        DeploymentFlow { ctx }
    }

    /// Opens a new session and returns its first prompt.
    pub fn start(&self) -> (DeploymentSession, String) {
        let session = DeploymentSession::new();
        let prompt = session.prompt_for(session.state);
        tracing::info!(session = %session.id, "deployment session opened");
        (session, prompt)
    }

    /// Turns an operator-supplied reference (a path, or the name of a stored
    /// archive) into a `DumpSupplied` input. Zip archives are unpacked next
    /// to themselves and the extracted dump is marked temporary so the
    /// session cleans it up.
    pub async fn prepare_dump(&self, reference: &str) -> Result<DeployInput> {
        let located = self.locate(reference).await?;

        let (path, temporary) =
            if located.extension().is_some_and(|ext| ext == "zip") {
                let archive = located.clone();
                let dest = located
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .to_path_buf();
                let extracted =
                    tokio::task::spawn_blocking(move || extract_single_sql(&archive, &dest))
                        .await
                        .map_err(|e| {
                            AppError::Config(format!("blocking extract task failed: {e}"))
                        })??;
                (extracted, true)
            } else {
                (located, false)
            };

        let leading_content = read_leading(&path, SNIFF_BYTES).await?;
        Ok(DeployInput::DumpSupplied {
            path,
            leading_content,
            temporary,
        })
    }

    /// Finds the referenced dump: an existing path wins, otherwise the dump
    /// root is searched one database directory deep for the name, with
    /// `.zip` and `.sql` tried as fallback extensions.
    async fn locate(&self, reference: &str) -> Result<PathBuf> {
        let direct = PathBuf::from(reference);
        if tokio::fs::try_exists(&direct).await.unwrap_or(false) {
            return Ok(direct);
        }

        let candidates = [
            reference.to_string(),
            format!("{reference}.zip"),
            format!("{reference}.sql"),
        ];
        let mut dirs = tokio::fs::read_dir(&self.ctx.config.dumps_dir).await?;
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            for candidate in &candidates {
                let path = entry.path().join(candidate);
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Ok(path);
                }
            }
        }

        Err(AppError::InputValidation(format!(
            "no stored dump named '{reference}' was found under {}",
            self.ctx.config.dumps_dir.display()
        )))
    }

    /// Applies one input and runs every effect to quiescence. Effects that
    /// produce a result (existence check, restore) are fed straight back in,
    /// so a single operator input can carry the session through several
    /// states.
    pub async fn handle(&self, session: DeploymentSession, input: DeployInput) -> FlowOutcome {
        let mut step = transition(session, input);
        let mut messages = Vec::new();

        loop {
            let mut follow_up = None;
            for effect in std::mem::take(&mut step.effects) {
                match effect {
                    Effect::Prompt(text) => messages.push(text),
                    Effect::Warn(text) => {
                        tracing::warn!(session = %step.session.id, "{text}");
                        messages.push(text);
                    }
                    Effect::CheckDatabaseExists => {
                        follow_up = Some(self.run_existence_check(&step.session).await);
                    }
                    Effect::ExecuteRestore => {
                        follow_up = Some(self.run_restore(&step.session).await);
                    }
                    Effect::PurgeSessionMaterial => self.purge(&step.session).await,
                }
            }

            match follow_up {
                Some(next) => step = transition(step.session, next),
                None => break,
            }
        }

        FlowOutcome {
            session: step.session,
            messages,
        }
    }

    async fn run_existence_check(&self, session: &DeploymentSession) -> DeployInput {
        let request = match build_request(session, false) {
            Ok(request) => request,
            Err(e) => return DeployInput::ExistenceFailed(e.to_string()),
        };
        match check_database_exists(&request).await {
            Ok(exists) => DeployInput::ExistenceResult(exists),
            Err(e) => {
                tracing::error!(session = %session.id, error = %e, "existence check failed");
                DeployInput::ExistenceFailed(e.to_string())
            }
        }
    }

    async fn run_restore(&self, session: &DeploymentSession) -> DeployInput {
        let request = match build_request(session, session.overwrite_confirmed) {
            Ok(request) => request,
            Err(e) => return DeployInput::RestoreFailed(e.to_string()),
        };
        match restore_dump(&request, &self.ctx.config.quarantine_dir).await {
            Ok(()) => DeployInput::RestoreSucceeded,
            Err(e) => {
                tracing::error!(session = %session.id, error = %e, "restore failed");
                DeployInput::RestoreFailed(e.to_string())
            }
        }
    }

    /// Removes the extracted dump of a finished session. Operator-named
    /// stored dumps are left alone.
    async fn purge(&self, session: &DeploymentSession) {
        let Some(dump) = &session.dump else { return };
        if !dump.temporary {
            return;
        }
        match tokio::fs::remove_file(&dump.path).await {
            Ok(()) => tracing::debug!(file = %dump.path.display(), "temporary dump removed"),
            Err(e) => {
                tracing::warn!(file = %dump.path.display(), error = %e, "failed to remove temporary dump");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, EngineKind};
    use crate::deploy::session::DumpRef;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn context_with_dumps_dir(dir: &Path) -> Arc<AppContext> {
        let config = AppConfig {
            targets: Vec::new(),
            dumps_dir: dir.to_path_buf(),
            quarantine_dir: dir.join("errors"),
            min_dump_size: 1024,
            dump_interval: StdDuration::from_secs(3600),
            remote_disk: None,
            file_exchange: None,
        };
        Arc::new(AppContext::new(config).unwrap())
    }

    #[test]
    fn request_requires_every_field() {
        let mut session = DeploymentSession::new();
        session.dump = Some(DumpRef {
            path: PathBuf::from("/dumps/shop/shop.sql"),
            temporary: false,
        });
        session.engine = Some(EngineKind::Postgres);
        session.host = Some("10.0.0.1".into());
        session.port = Some(5432);
        session.dbname = Some("shop".into());
        session.username = Some("postgres".into());

        let err = build_request(&session, false).unwrap_err();
        assert!(err.to_string().contains("password"));

        session.password = Some("pw".into());
        let request = build_request(&session, true).unwrap();
        assert!(request.overwrite);
        assert_eq!(request.dbname, "shop");
    }

    #[tokio::test]
    async fn stored_dump_is_found_by_name_with_extension_fallback() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_dir = dir.path().join("shop");
        std::fs::create_dir_all(&db_dir)?;
        let mut content = String::from("SET search_path = public;\nCREATE TABLE t (id int);\n");
        content.push_str(&"-- pad\n".repeat(10));
        std::fs::write(db_dir.join("shop_20240101_000000.sql"), &content)?;

        let flow = DeploymentFlow::new(context_with_dumps_dir(dir.path()));
        let located = flow.locate("shop_20240101_000000").await?;
        assert!(located.ends_with("shop/shop_20240101_000000.sql"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_dump_name_is_an_input_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let flow = DeploymentFlow::new(context_with_dumps_dir(dir.path()));
        let err = flow.locate("nope").await.unwrap_err();
        assert!(matches!(err, AppError::InputValidation(_)));
        Ok(())
    }

    #[tokio::test]
    async fn prepared_zip_is_extracted_and_marked_temporary() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_dir = dir.path().join("shop");
        std::fs::create_dir_all(&db_dir)?;

        let dump = crate::backup::dump::DumpArtifact {
            path: db_dir.join("shop_20240101_000000.sql"),
            size_bytes: 0,
            created_at: chrono::Local::now() - Duration::hours(1),
        };
        std::fs::write(&dump.path, "CREATE TABLE t (id int);\nINSERT INTO t VALUES (1);\n")?;
        let archive = crate::backup::archive::archive_dump(dump).await?;

        let flow = DeploymentFlow::new(context_with_dumps_dir(dir.path()));
        let input = flow.prepare_dump(archive.path.to_str().unwrap()).await?;
        match input {
            DeployInput::DumpSupplied {
                path,
                leading_content,
                temporary,
            } => {
                assert!(temporary);
                assert!(path.ends_with("shop_20240101_000000.sql"));
                assert!(leading_content.contains("CREATE TABLE"));
            }
            other => panic!("unexpected input: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn purge_removes_only_temporary_dumps() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let kept = dir.path().join("kept.sql");
        let extracted = dir.path().join("extracted.sql");
        std::fs::write(&kept, "select 1;")?;
        std::fs::write(&extracted, "select 1;")?;

        let flow = DeploymentFlow::new(context_with_dumps_dir(dir.path()));

        let mut session = DeploymentSession::new();
        session.dump = Some(DumpRef {
            path: kept.clone(),
            temporary: false,
        });
        flow.purge(&session).await;
        assert!(kept.exists());

        session.dump = Some(DumpRef {
            path: extracted.clone(),
            temporary: true,
        });
        flow.purge(&session).await;
        assert!(!extracted.exists());
        Ok(())
    }
}
