// backuptool/src/deploy/session.rs
use std::collections::HashMap;
use std::path::PathBuf;

use uuid::Uuid;

use crate::config::EngineKind;

/// States of the interactive deployment workflow, linear with back-edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeployState {
    SelectingDump,
    EnteringHost,
    EnteringPort,
    EnteringDatabaseName,
    EnteringUsername,
    EnteringPassword,
    CheckingExistence,
    AwaitingOverwriteConfirmation,
    Executing,
    Done,
    Failed,
    Cancelled,
}

impl DeployState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployState::Done | DeployState::Cancelled)
    }

    /// The state a "back" input returns to. Only the entry states have a
    /// back-edge; confirmation and execution are driven by their own inputs.
    pub fn previous(&self) -> Option<DeployState> {
        match self {
            DeployState::EnteringHost => Some(DeployState::SelectingDump),
            DeployState::EnteringPort => Some(DeployState::EnteringHost),
            DeployState::EnteringDatabaseName => Some(DeployState::EnteringPort),
            DeployState::EnteringUsername => Some(DeployState::EnteringDatabaseName),
            DeployState::EnteringPassword => Some(DeployState::EnteringUsername),
            _ => None,
        }
    }

    pub fn default_prompt(&self) -> &'static str {
        match self {
            DeployState::SelectingDump => {
                "Send a dump file (.sql or .zip) or the name of a stored archive."
            }
            DeployState::EnteringHost => "Enter the destination host address (X.X.X.X).",
            DeployState::EnteringPort => {
                "Enter the database port (e.g. 5432 for PostgreSQL, 3306 for MySQL)."
            }
            DeployState::EnteringDatabaseName => "Enter the destination database name.",
            DeployState::EnteringUsername => {
                "Enter the database user name (a superuser such as postgres is recommended)."
            }
            DeployState::EnteringPassword => "Enter the password for the database connection.",
            DeployState::AwaitingOverwriteConfirmation => {
                "The destination database already exists. Overwrite it? All data will be lost."
            }
            DeployState::CheckingExistence => "Checking the destination database...",
            DeployState::Executing => "Deploying the dump, please wait...",
            DeployState::Done => "Deployment finished.",
            DeployState::Failed => "Deployment failed.",
            DeployState::Cancelled => "Deployment cancelled.",
        }
    }
}

/// Reference to the dump being deployed. Temporary dumps (extracted from an
/// operator-supplied archive) are deleted when the session ends.
#[derive(Debug, Clone)]
pub struct DumpRef {
    pub path: PathBuf,
    pub temporary: bool,
}

/// Mutable state of one in-progress deployment workflow. Created at start,
/// mutated step by step by the transition function, discarded (password
/// included) at a terminal state.
#[derive(Debug, Clone)]
pub struct DeploymentSession {
    pub id: Uuid,
    pub state: DeployState,
    pub dump: Option<DumpRef>,
    pub engine: Option<EngineKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub overwrite_confirmed: bool,
    prompts: HashMap<DeployState, String>,
}

impl DeploymentSession {
    pub fn new() -> Self {
        DeploymentSession {
            id: Uuid::new_v4(),
            state: DeployState::SelectingDump,
            dump: None,
            engine: None,
            host: None,
            port: None,
            dbname: None,
            username: None,
            password: None,
            overwrite_confirmed: false,
            prompts: HashMap::new(),
        }
    }

    /// The prompt to re-display for a state: the snapshot taken when the
    /// state was last shown, or its default text.
    pub fn prompt_for(&self, state: DeployState) -> String {
        self.prompts
            .get(&state)
            .cloned()
            .unwrap_or_else(|| state.default_prompt().to_string())
    }

    pub fn remember_prompt(&mut self, state: DeployState, text: String) {
        self.prompts.insert(state, text);
    }

    pub fn clear_secrets(&mut self) {
        self.password = None;
    }
}

impl Default for DeploymentSession {
    fn default() -> Self {
        Self::new()
    }
}
