// backuptool/src/config/mod.rs
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{AppError, Result};

/// Dumps smaller than this are considered truncated and rejected.
pub const MIN_DUMP_SIZE: u64 = 1024;

const MAX_TARGETS_PER_FAMILY: u32 = 9;

/// Engine families the dump/restore tools are selected by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Postgres,
    MySql,
}

impl EngineKind {
    pub fn label(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "PostgreSQL",
            EngineKind::MySql => "MySQL",
        }
    }

    pub fn dump_tool(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "pg_dump",
            EngineKind::MySql => "mysqldump",
        }
    }

    pub fn client_tool(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "psql",
            EngineKind::MySql => "mysql",
        }
    }

    /// The credential always travels through the environment, never on the
    /// command line where it would show up in the process list.
    pub fn password_env(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "PGPASSWORD",
            EngineKind::MySql => "MYSQL_PWD",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            EngineKind::Postgres => 5432,
            EngineKind::MySql => 3306,
        }
    }

    /// Markers a plain-SQL dump of this engine is expected to contain.
    /// A dump passing the size check but missing all of these is truncated.
    pub fn structural_keywords(&self) -> &'static [&'static str] {
        match self {
            EngineKind::Postgres => &[
                "create schema",
                "set search_path",
                "create sequence",
                "copy public.",
                "create table",
            ],
            EngineKind::MySql => &[
                "create table",
                "insert into",
                "engine=innodb",
                "lock tables",
            ],
        }
    }
}

/// One fully-specified database subject to backup. Immutable after load.
#[derive(Debug, Clone)]
pub struct BackupTarget {
    pub engine: EngineKind,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl BackupTarget {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.engine.label(), self.name)
    }
}

#[derive(Debug, Clone)]
pub struct RemoteDiskConfig {
    pub token: String,
    pub backup_folder: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct FileExchangeConfig {
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub targets: Vec<BackupTarget>,
    pub dumps_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    pub min_dump_size: u64,
    pub dump_interval: Duration,
    pub remote_disk: Option<RemoteDiskConfig>,
    pub file_exchange: Option<FileExchangeConfig>,
}

/// Raw values of one `<FAMILY>_DB_<i>_*` environment block, before validation.
#[derive(Debug, Default)]
struct RawTargetBlock {
    name: Option<String>,
    host: Option<String>,
    port: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl RawTargetBlock {
    fn from_env(prefix: &str, index: u32) -> Self {
        let var = |field: &str| {
            env::var(format!("{prefix}_{index}_{field}"))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };
        RawTargetBlock {
            name: var("NAME"),
            host: var("HOST"),
            port: var("PORT"),
            user: var("USER"),
            password: var("PASSWORD"),
        }
    }

    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.host.is_none()
            && self.port.is_none()
            && self.user.is_none()
            && self.password.is_none()
    }
}

/// Validates one environment block into a target.
///
/// An entirely absent block is fine (`Ok(None)`); a block with some but not
/// all required fields is a configuration error, reported at load time
/// rather than silently skipped deep in the pipeline.
fn parse_target(
    engine: EngineKind,
    prefix: &str,
    index: u32,
    raw: RawTargetBlock,
) -> Result<Option<BackupTarget>> {
    if raw.is_empty() {
        return Ok(None);
    }

    let mut missing = Vec::new();
    if raw.name.is_none() {
        missing.push("NAME");
    }
    if raw.host.is_none() {
        missing.push("HOST");
    }
    if raw.user.is_none() {
        missing.push("USER");
    }
    if raw.password.is_none() {
        missing.push("PASSWORD");
    }
    if !missing.is_empty() {
        let vars: Vec<String> = missing
            .iter()
            .map(|f| format!("{prefix}_{index}_{f}"))
            .collect();
        return Err(AppError::Config(format!(
            "database block {prefix}_{index} is partially specified; missing: {}",
            vars.join(", ")
        )));
    }

    let port = match raw.port {
        Some(p) => p.parse::<u16>().map_err(|_| {
            AppError::Config(format!("{prefix}_{index}_PORT is not a valid port: {p}"))
        })?,
        None => engine.default_port(),
    };

    Ok(Some(BackupTarget {
        engine,
        name: raw.name.unwrap(),
        host: raw.host.unwrap(),
        port,
        user: raw.user.unwrap(),
        password: raw.password.unwrap(),
    }))
}

impl AppConfig {
    pub fn load_from_env() -> Result<Self> {
        let families = [
            ("POSTGRES_DB", EngineKind::Postgres),
            ("MYSQL_DB", EngineKind::MySql),
            ("MARIADB_DB", EngineKind::MySql),
        ];

        let mut targets = Vec::new();
        for (prefix, engine) in families {
            for i in 1..=MAX_TARGETS_PER_FAMILY {
                let raw = RawTargetBlock::from_env(prefix, i);
                if let Some(target) = parse_target(engine, prefix, i, raw)? {
                    tracing::debug!(target = %target.display_name(), "loaded backup target");
                    targets.push(target);
                }
            }
        }

        let dumps_dir = env::var("DUMPS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./dumps"));
        let quarantine_dir = dumps_dir.join("errors");

        let interval_hours = match env::var("DUMP_INTERVAL_HOURS") {
            Ok(v) => v.parse::<u64>().map_err(|_| {
                AppError::Config(format!("DUMP_INTERVAL_HOURS is not a valid number: {v}"))
            })?,
            Err(_) => 1,
        };

        let remote_disk = env::var("REMOTE_DISK_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(|token| RemoteDiskConfig {
                token,
                backup_folder: env::var("REMOTE_DISK_BACKUP_FOLDER")
                    .unwrap_or_else(|_| "/Backups".to_string()),
                api_base: env::var("REMOTE_DISK_API_BASE")
                    .unwrap_or_else(|_| "https://cloud-api.yandex.net/v1/disk".to_string()),
            });

        let file_exchange = env::var("FILE_EXCHANGE_API_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .map(|api_url| FileExchangeConfig { api_url });

        Ok(AppConfig {
            targets,
            dumps_dir,
            quarantine_dir,
            min_dump_size: MIN_DUMP_SIZE,
            dump_interval: Duration::from_secs(interval_hours * 3600),
            remote_disk,
            file_exchange,
        })
    }

    pub fn find_target(&self, name: &str) -> Option<&BackupTarget> {
        self.targets.iter().find(|t| t.name == name)
    }
}
