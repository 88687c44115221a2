// backuptool/src/backup/mod.rs
pub mod archive;
pub mod dump;
pub mod orchestrator;
pub mod validate;

pub use orchestrator::{run_all, run_single, BackupRecord};
