//! Per-invocation state passed to every component call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::Config;

/// Shared flag used to stop the drive watch and the batch loop.
///
/// Clones observe the same flag, so the binary can hand one clone to a
/// signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Running totals for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub units_encrypted: u64,
    pub units_decrypted: u64,
    pub bytes_processed: u64,
}

#[derive(Debug, Clone)]
pub struct Context {
    config: Config,
    cancel: CancelToken,
    stats: Stats,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self::with_cancel(config, CancelToken::new())
    }

    pub fn with_cancel(config: Config, cancel: CancelToken) -> Self {
        Self {
            config,
            cancel,
            stats: Stats::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms())
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
