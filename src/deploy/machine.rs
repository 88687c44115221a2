// backuptool/src/deploy/machine.rs
//
// The deployment workflow as a pure transition function. All I/O (subprocess
// calls, file deletion) is described by the returned effects and executed by
// the caller, so every transition here is unit-testable without touching a
// database or the filesystem.

use std::path::PathBuf;

use crate::config::EngineKind;
use crate::deploy::session::{DeployState, DeploymentSession, DumpRef};

/// Ordered keyword sets for engine sniffing. MySQL markers are checked
/// first; the first family whose set matches wins.
const MYSQL_MARKERS: &[&str] = &["/*!40101 set", "-- mysql dump", "engine=innodb", "lock tables"];
const POSTGRES_MARKERS: &[&str] = &[
    "create schema",
    "set search_path",
    "create sequence",
    "copy public.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionConfidence {
    Matched,
    Fallback,
}

/// Coarse engine sniffing over the dump's leading content. When neither
/// keyword set matches the dump is assumed to be PostgreSQL; the caller is
/// told via the confidence so it can log a warning. This heuristic is
/// deliberately best-effort rather than a hard failure.
pub fn detect_engine(leading: &str) -> (EngineKind, DetectionConfidence) {
    let lowered = leading.to_lowercase();
    if MYSQL_MARKERS.iter().any(|kw| lowered.contains(kw)) {
        (EngineKind::MySql, DetectionConfidence::Matched)
    } else if POSTGRES_MARKERS.iter().any(|kw| lowered.contains(kw)) {
        (EngineKind::Postgres, DetectionConfidence::Matched)
    } else {
        (EngineKind::Postgres, DetectionConfidence::Fallback)
    }
}

fn contains_statements(content: &str) -> bool {
    let lowered = content.to_lowercase();
    lowered.contains("create table") || lowered.contains("insert into")
}

pub fn validate_host(input: &str) -> Result<String, &'static str> {
    let host = input.trim();
    let parts: Vec<&str> = host.split('.').collect();
    let valid = parts.len() == 4
        && parts.iter().all(|p| {
            !p.is_empty()
                && p.chars().all(|c| c.is_ascii_digit())
                && p.parse::<u32>().is_ok_and(|n| n <= 255)
        });
    if valid {
        Ok(host.to_string())
    } else {
        Err("Invalid host address. Use the form X.X.X.X with each part between 0 and 255.")
    }
}

pub fn validate_port(input: &str) -> Result<u16, &'static str> {
    let port = input.trim();
    if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = port.parse::<u32>() {
            if (1..=65535).contains(&n) {
                return Ok(n as u16);
            }
        }
    }
    Err("Invalid port. Enter a number between 1 and 65535.")
}

/// Database names end up interpolated into admin statements, so they are
/// held to identifier characters only.
pub fn validate_db_name(input: &str) -> Result<String, &'static str> {
    let name = input.trim();
    if name.is_empty() {
        return Err("The database name must not be empty.");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("The database name may only contain letters, digits, '_' and '-'.");
    }
    Ok(name.to_string())
}

pub fn validate_username(input: &str) -> Result<String, &'static str> {
    let name = input.trim();
    if name.is_empty() {
        return Err("The user name must not be empty.");
    }
    Ok(name.to_string())
}

/// Operator or environment input driving one transition.
#[derive(Debug, Clone)]
pub enum DeployInput {
    /// A resolved dump: its path plus enough leading content for sniffing.
    DumpSupplied {
        path: PathBuf,
        leading_content: String,
        temporary: bool,
    },
    /// Free text for whichever entry state the session is in.
    Text(String),
    Back,
    Cancel,
    ConfirmOverwrite,
    DeclineOverwrite,
    ExistenceResult(bool),
    ExistenceFailed(String),
    RestoreSucceeded,
    RestoreFailed(String),
    Retry,
}

/// Side effects the caller must execute after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Prompt(String),
    Warn(String),
    CheckDatabaseExists,
    ExecuteRestore,
    PurgeSessionMaterial,
}

#[derive(Debug)]
pub struct Step {
    pub session: DeploymentSession,
    pub effects: Vec<Effect>,
}

fn stay(session: DeploymentSession, message: String) -> Step {
    Step {
        effects: vec![Effect::Prompt(message)],
        session,
    }
}

fn advance(mut session: DeploymentSession, next: DeployState, prompt: String) -> Step {
    session
        .remember_prompt(session.state, session.prompt_for(session.state));
    session.state = next;
    session.remember_prompt(next, prompt.clone());
    Step {
        effects: vec![Effect::Prompt(prompt)],
        session,
    }
}

/// Applies one input to the session. Preconditions of every state are
/// guaranteed by construction: a state is only entered once the fields its
/// action needs are populated, and back-navigation never skips forward.
pub fn transition(mut session: DeploymentSession, input: DeployInput) -> Step {
    if session.state.is_terminal() {
        let text = session.state.default_prompt().to_string();
        return stay(session, text);
    }

    match input {
        DeployInput::Cancel => {
            session.state = DeployState::Cancelled;
            session.clear_secrets();
            Step {
                effects: vec![
                    Effect::PurgeSessionMaterial,
                    Effect::Prompt(DeployState::Cancelled.default_prompt().to_string()),
                ],
                session,
            }
        }

        DeployInput::Back => match session.state.previous() {
            Some(prev) => {
                session.state = prev;
                let prompt = session.prompt_for(prev);
                stay(session, prompt)
            }
            None => {
                let prompt = session.prompt_for(session.state);
                stay(session, prompt)
            }
        },

        DeployInput::DumpSupplied {
            path,
            leading_content,
            temporary,
        } if session.state == DeployState::SelectingDump => {
            if !contains_statements(&leading_content) {
                return stay(
                    session,
                    "The dump is empty or contains no tables/data. Send another dump.".to_string(),
                );
            }

            let (engine, confidence) = detect_engine(&leading_content);
            let mut effects = Vec::new();
            if confidence == DetectionConfidence::Fallback {
                effects.push(Effect::Warn(format!(
                    "Could not determine the dump engine; assuming {}.",
                    engine.label()
                )));
            }

            session.dump = Some(DumpRef { path, temporary });
            session.engine = Some(engine);

            let prompt = format!(
                "Dump accepted ({}). {}",
                engine.label(),
                DeployState::EnteringHost.default_prompt()
            );
            let mut step = advance(session, DeployState::EnteringHost, prompt);
            effects.append(&mut step.effects);
            step.effects = effects;
            step
        }

        DeployInput::Text(text) => match session.state {
            DeployState::EnteringHost => match validate_host(&text) {
                Ok(host) => {
                    session.host = Some(host);
                    advance(
                        session,
                        DeployState::EnteringPort,
                        DeployState::EnteringPort.default_prompt().to_string(),
                    )
                }
                Err(msg) => stay(session, msg.to_string()),
            },
            DeployState::EnteringPort => match validate_port(&text) {
                Ok(port) => {
                    session.port = Some(port);
                    advance(
                        session,
                        DeployState::EnteringDatabaseName,
                        DeployState::EnteringDatabaseName.default_prompt().to_string(),
                    )
                }
                Err(msg) => stay(session, msg.to_string()),
            },
            DeployState::EnteringDatabaseName => match validate_db_name(&text) {
                Ok(name) => {
                    session.dbname = Some(name);
                    advance(
                        session,
                        DeployState::EnteringUsername,
                        DeployState::EnteringUsername.default_prompt().to_string(),
                    )
                }
                Err(msg) => stay(session, msg.to_string()),
            },
            DeployState::EnteringUsername => match validate_username(&text) {
                Ok(name) => {
                    session.username = Some(name);
                    advance(
                        session,
                        DeployState::EnteringPassword,
                        DeployState::EnteringPassword.default_prompt().to_string(),
                    )
                }
                Err(msg) => stay(session, msg.to_string()),
            },
            DeployState::EnteringPassword => {
                session.password = Some(text);
                session.state = DeployState::CheckingExistence;
                Step {
                    effects: vec![Effect::CheckDatabaseExists],
                    session,
                }
            }
            DeployState::AwaitingOverwriteConfirmation => {
                match text.trim().to_lowercase().as_str() {
                    "yes" | "y" => transition(session, DeployInput::ConfirmOverwrite),
                    "no" | "n" => transition(session, DeployInput::DeclineOverwrite),
                    _ => stay(
                        session,
                        "Please answer 'yes' or 'no'. Overwrite the database?".to_string(),
                    ),
                }
            }
            _ => {
                let prompt = session.prompt_for(session.state);
                stay(session, prompt)
            }
        },

        DeployInput::ExistenceResult(exists)
            if session.state == DeployState::CheckingExistence =>
        {
            if exists {
                let dbname = session.dbname.clone().unwrap_or_default();
                session.state = DeployState::AwaitingOverwriteConfirmation;
                let prompt = format!(
                    "Database {dbname} already exists. Overwrite it? All data will be lost."
                );
                session.remember_prompt(DeployState::AwaitingOverwriteConfirmation, prompt.clone());
                stay(session, prompt)
            } else {
                session.state = DeployState::Executing;
                Step {
                    effects: vec![Effect::ExecuteRestore],
                    session,
                }
            }
        }

        DeployInput::ExistenceFailed(stderr)
            if session.state == DeployState::CheckingExistence =>
        {
            session.state = DeployState::EnteringPassword;
            session.clear_secrets();
            let prompt = format!(
                "Could not check the destination database: {stderr}\n{}",
                DeployState::EnteringPassword.default_prompt()
            );
            stay(session, prompt)
        }

        DeployInput::ConfirmOverwrite
            if session.state == DeployState::AwaitingOverwriteConfirmation =>
        {
            session.overwrite_confirmed = true;
            session.state = DeployState::Executing;
            Step {
                effects: vec![Effect::ExecuteRestore],
                session,
            }
        }

        DeployInput::DeclineOverwrite
            if session.state == DeployState::AwaitingOverwriteConfirmation =>
        {
            // Not a cancel: the operator may simply want a different name.
            session.overwrite_confirmed = false;
            session.state = DeployState::EnteringDatabaseName;
            let prompt = session.prompt_for(DeployState::EnteringDatabaseName);
            stay(session, prompt)
        }

        DeployInput::RestoreSucceeded if session.state == DeployState::Executing => {
            let summary = format!(
                "Dump deployed successfully to {}:{}/{}.",
                session.host.as_deref().unwrap_or("?"),
                session.port.map(|p| p.to_string()).unwrap_or_default(),
                session.dbname.as_deref().unwrap_or("?"),
            );
            session.state = DeployState::Done;
            session.clear_secrets();
            Step {
                effects: vec![Effect::PurgeSessionMaterial, Effect::Prompt(summary)],
                session,
            }
        }

        DeployInput::RestoreFailed(error) if session.state == DeployState::Executing => {
            session.state = DeployState::Failed;
            stay(
                session,
                format!("Deployment failed: {error}\nRetry from password entry or cancel."),
            )
        }

        DeployInput::Retry if session.state == DeployState::Failed => {
            session.state = DeployState::EnteringPassword;
            session.clear_secrets();
            let prompt = session.prompt_for(DeployState::EnteringPassword);
            stay(session, prompt)
        }

        _ => {
            let prompt = session.prompt_for(session.state);
            stay(session, prompt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG_DUMP_HEAD: &str =
        "SET search_path = public;\nCREATE TABLE orders (id int);\nINSERT INTO orders VALUES (1);";

    fn supplied_dump() -> DeployInput {
        DeployInput::DumpSupplied {
            path: PathBuf::from("/dumps/shop/shop_20240101_000000.sql"),
            leading_content: PG_DUMP_HEAD.to_string(),
            temporary: false,
        }
    }

    fn session_at_password() -> DeploymentSession {
        let mut step = transition(DeploymentSession::new(), supplied_dump());
        for text in ["192.168.1.10", "5432", "shop", "postgres"] {
            step = transition(step.session, DeployInput::Text(text.into()));
        }
        assert_eq!(step.session.state, DeployState::EnteringPassword);
        step.session
    }

    #[test]
    fn host_validation_accepts_only_dotted_quads() {
        assert!(validate_host("0.0.0.0").is_ok());
        assert!(validate_host("255.255.255.255").is_ok());
        assert!(validate_host(" 10.0.0.1 ").is_ok());
        assert!(validate_host("256.0.0.1").is_err());
        assert!(validate_host("10.0.0").is_err());
        assert!(validate_host("10.0.0.1.2").is_err());
        assert!(validate_host("10.0.0.-1").is_err());
        assert!(validate_host("example.com").is_err());
        assert!(validate_host("10..0.1").is_err());
    }

    #[test]
    fn port_validation_bounds() {
        assert_eq!(validate_port("1"), Ok(1));
        assert_eq!(validate_port("65535"), Ok(65535));
        assert_eq!(validate_port(" 5432 "), Ok(5432));
        assert!(validate_port("0").is_err());
        assert!(validate_port("65536").is_err());
        assert!(validate_port("-1").is_err());
        assert!(validate_port("abc").is_err());
        assert!(validate_port("").is_err());
    }

    #[test]
    fn mysql_markers_win_over_postgres() {
        let (engine, confidence) =
            detect_engine("-- MySQL dump 10.13\nCREATE TABLE x (id int) ENGINE=InnoDB;");
        assert_eq!(engine, EngineKind::MySql);
        assert_eq!(confidence, DetectionConfidence::Matched);
    }

    #[test]
    fn unknown_content_falls_back_to_postgres_with_warning() {
        let (engine, confidence) = detect_engine("SELECT 1;");
        assert_eq!(engine, EngineKind::Postgres);
        assert_eq!(confidence, DetectionConfidence::Fallback);

        let input = DeployInput::DumpSupplied {
            path: PathBuf::from("/dumps/x.sql"),
            leading_content: "create table t (id int);".to_string(),
            temporary: false,
        };
        let step = transition(DeploymentSession::new(), input);
        assert_eq!(step.session.state, DeployState::EnteringHost);
        assert!(step
            .effects
            .iter()
            .any(|e| matches!(e, Effect::Warn(msg) if msg.contains("assuming"))));
    }

    #[test]
    fn dump_without_statements_is_rejected_in_place() {
        let input = DeployInput::DumpSupplied {
            path: PathBuf::from("/dumps/x.sql"),
            leading_content: "-- empty header only".to_string(),
            temporary: false,
        };
        let step = transition(DeploymentSession::new(), input);
        assert_eq!(step.session.state, DeployState::SelectingDump);
        assert!(step.session.dump.is_none());
    }

    #[test]
    fn invalid_host_reprompts_same_state() {
        let step = transition(DeploymentSession::new(), supplied_dump());
        let step = transition(step.session, DeployInput::Text("not-an-ip".into()));
        assert_eq!(step.session.state, DeployState::EnteringHost);
        assert!(step.session.host.is_none());
    }

    #[test]
    fn password_entry_triggers_existence_check() {
        let session = session_at_password();
        let step = transition(session, DeployInput::Text("hunter2".into()));
        assert_eq!(step.session.state, DeployState::CheckingExistence);
        assert_eq!(step.effects, vec![Effect::CheckDatabaseExists]);
    }

    #[test]
    fn declining_overwrite_returns_to_dbname_with_host_kept() {
        let session = session_at_password();
        let step = transition(session, DeployInput::Text("hunter2".into()));
        let step = transition(step.session, DeployInput::ExistenceResult(true));
        assert_eq!(
            step.session.state,
            DeployState::AwaitingOverwriteConfirmation
        );

        let step = transition(step.session, DeployInput::Text("no".into()));
        assert_eq!(step.session.state, DeployState::EnteringDatabaseName);
        assert_eq!(step.session.host.as_deref(), Some("192.168.1.10"));
        assert_eq!(step.session.port, Some(5432));
        assert!(!step.session.overwrite_confirmed);
    }

    #[test]
    fn confirming_overwrite_executes_with_flag_set() {
        let session = session_at_password();
        let step = transition(session, DeployInput::Text("hunter2".into()));
        let step = transition(step.session, DeployInput::ExistenceResult(true));
        let step = transition(step.session, DeployInput::ConfirmOverwrite);
        assert_eq!(step.session.state, DeployState::Executing);
        assert!(step.session.overwrite_confirmed);
        assert_eq!(step.effects, vec![Effect::ExecuteRestore]);
    }

    #[test]
    fn missing_database_skips_confirmation() {
        let session = session_at_password();
        let step = transition(session, DeployInput::Text("hunter2".into()));
        let step = transition(step.session, DeployInput::ExistenceResult(false));
        assert_eq!(step.session.state, DeployState::Executing);
        assert!(!step.session.overwrite_confirmed);
        assert_eq!(step.effects, vec![Effect::ExecuteRestore]);
    }

    #[test]
    fn success_purges_password_and_material() {
        let session = session_at_password();
        let step = transition(session, DeployInput::Text("hunter2".into()));
        let step = transition(step.session, DeployInput::ExistenceResult(false));
        let step = transition(step.session, DeployInput::RestoreSucceeded);
        assert_eq!(step.session.state, DeployState::Done);
        assert!(step.session.password.is_none());
        assert!(step.effects.contains(&Effect::PurgeSessionMaterial));
    }

    #[test]
    fn failure_offers_retry_from_password_only() {
        let session = session_at_password();
        let step = transition(session, DeployInput::Text("hunter2".into()));
        let step = transition(step.session, DeployInput::ExistenceResult(false));
        let step = transition(step.session, DeployInput::RestoreFailed("syntax error".into()));
        assert_eq!(step.session.state, DeployState::Failed);

        let step = transition(step.session, DeployInput::Retry);
        assert_eq!(step.session.state, DeployState::EnteringPassword);
        assert!(step.session.password.is_none());
        // Host, port, name and user survive for the retry.
        assert!(step.session.host.is_some());
        assert!(step.session.dbname.is_some());
        assert!(step.session.username.is_some());
    }

    #[test]
    fn back_returns_to_previous_prompt() {
        let step = transition(DeploymentSession::new(), supplied_dump());
        let step = transition(step.session, DeployInput::Text("10.0.0.1".into()));
        assert_eq!(step.session.state, DeployState::EnteringPort);

        let step = transition(step.session, DeployInput::Back);
        assert_eq!(step.session.state, DeployState::EnteringHost);
        assert!(matches!(
            step.effects.as_slice(),
            [Effect::Prompt(text)] if text.contains("Dump accepted")
        ));
    }

    #[test]
    fn cancel_clears_password_from_any_state() {
        let session = session_at_password();
        let step = transition(session, DeployInput::Text("hunter2".into()));
        let step = transition(step.session, DeployInput::Cancel);
        assert_eq!(step.session.state, DeployState::Cancelled);
        assert!(step.session.password.is_none());
        assert!(step.effects.contains(&Effect::PurgeSessionMaterial));
    }
}
