use std::sync::Arc;
use std::time::Duration;

use crate::common::{Clock, Color, SystemClock};
use crate::config::AppConfig;
use crate::error::StorageError;
use crate::presence::{
    CodeBook, FriendRegistry, MessageLog, PaletteAllocator, PresenceMonitor, SignalQueue,
};
use crate::storage::{
    CodeDatabase, Database, FriendDatabase, MessageDatabase, SignalDatabase, ensure_data_dir,
};

/// Every presence component wired to one shared store client.
pub struct Coordinator {
    pub registry: Arc<FriendRegistry>,
    pub signals: SignalQueue,
    pub messages: MessageLog,
    pub codes: CodeBook,
    stale_after: Duration,
    sweep_interval: Duration,
}

impl Coordinator {
    /// Open (or create) the database named in `config`.
    pub fn open(config: &AppConfig) -> Result<Self, StorageError> {
        ensure_data_dir(&config.database_path)?;
        let db = Database::new(&config.database_path)?;
        log::info!("Opened store at {}", config.database_path);
        Self::with_database(db, config, Arc::new(SystemClock))
    }

    pub fn with_database(
        db: Database,
        config: &AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let allocator = PaletteAllocator::new(
            config.palette.iter().map(|name| Color::new(name.as_str())),
            config.allocation,
        );

        let registry = FriendRegistry::new(
            FriendDatabase::new(db.clone())?,
            Arc::new(allocator),
            clock.clone(),
        )
        .with_midnight_policy(config.midnight_policy);

        let signals = SignalQueue::new(SignalDatabase::new(db.clone())?, clock.clone())
            .with_capacity(config.queue_capacity);
        let messages = MessageLog::new(MessageDatabase::new(db.clone())?, clock.clone());
        let codes = CodeBook::new(CodeDatabase::new(db)?, clock);

        Ok(Self {
            registry: Arc::new(registry),
            signals,
            messages,
            codes,
            stale_after: Duration::from_secs(config.stale_after_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        })
    }

    pub fn monitor(&self) -> PresenceMonitor {
        PresenceMonitor::new(Arc::clone(&self.registry))
            .with_stale_after(self.stale_after)
            .with_sweep_interval(self.sweep_interval)
    }
}
