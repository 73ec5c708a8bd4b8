//! # Pause Gate
//!
//! Global suspend switch for all pipeline runs. The flag lives in a
//! [`PauseFlagStore`]; runs call [`PauseGate::wait_if_paused`] before doing
//! any work and re-check the flag every `check_interval` until it clears.
//! Runs already past the gate are not interrupted.

pub mod flag_store;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants;
use crate::error::GeoconvResult;

pub use flag_store::{InMemoryPauseFlagStore, PauseFlagStore, SqlPauseFlagStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseState {
    Running,
    Paused,
}

impl From<bool> for PauseState {
    fn from(paused: bool) -> Self {
        if paused {
            Self::Paused
        } else {
            Self::Running
        }
    }
}

impl fmt::Display for PauseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PauseGate {
    store: Arc<dyn PauseFlagStore>,
    check_interval: Duration,
}

impl PauseGate {
    pub fn new(store: Arc<dyn PauseFlagStore>) -> Self {
        Self::with_interval(store, constants::pause::CHECK_INTERVAL)
    }

    pub fn with_interval(store: Arc<dyn PauseFlagStore>, check_interval: Duration) -> Self {
        Self {
            store,
            check_interval,
        }
    }

    /// Gate over a process-local flag
    pub fn in_memory(check_interval: Duration) -> Self {
        Self::with_interval(Arc::new(InMemoryPauseFlagStore::new()), check_interval)
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub async fn initialize(&self) -> GeoconvResult<()> {
        self.store.initialize().await
    }

    pub async fn is_paused(&self) -> GeoconvResult<bool> {
        self.store.read().await
    }

    pub async fn state(&self) -> GeoconvResult<PauseState> {
        Ok(self.is_paused().await?.into())
    }

    pub async fn set_pause(&self) -> GeoconvResult<()> {
        self.store.write(true).await?;
        info!("Processing paused");
        Ok(())
    }

    pub async fn unset_pause(&self) -> GeoconvResult<()> {
        self.store.write(false).await?;
        info!("Processing resumed");
        Ok(())
    }

    pub async fn toggle(&self) -> GeoconvResult<PauseState> {
        let state = PauseState::from(self.store.toggle().await?);
        info!(state = %state, "Pause flag toggled");
        Ok(state)
    }

    /// Block until the flag is clear
    pub async fn wait_if_paused(&self) -> GeoconvResult<()> {
        let mut logged = false;
        while self.is_paused().await? {
            if !logged {
                debug!(
                    interval_ms = self.check_interval.as_millis() as u64,
                    "Processing paused, waiting"
                );
                logged = true;
            }
            tokio::time::sleep(self.check_interval).await;
        }
        Ok(())
    }
}
