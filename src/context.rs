// backuptool/src/context.rs
use std::sync::Arc;

use crate::config::AppConfig;
use crate::errors::Result;
use crate::notify::{LogNotifier, Notifier};
use crate::storage::UploadFanout;

/// Everything the orchestrator, scheduler and deployment flow need,
/// constructed once at startup and passed explicitly. There are no process
/// globals.
pub struct AppContext {
    pub config: AppConfig,
    pub fanout: UploadFanout,
    pub notifier: Arc<dyn Notifier>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Result<Self> {
        let fanout = UploadFanout::from_config(&config)?;
        Ok(AppContext {
            config,
            fanout,
            notifier: Arc::new(LogNotifier),
        })
    }

    pub fn with_notifier(config: AppConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let fanout = UploadFanout::from_config(&config)?;
        Ok(AppContext {
            config,
            fanout,
            notifier,
        })
    }
}
