//! Per-service poll cycle and the selection it carries between cycles.
//!
//! A [`ServiceConfigPoller`] owns the [`ActiveSelection`] of one service. Each
//! call to [`ServiceConfigPoller::poll_once`] resolves the newest rollout,
//! loads the config document when the config id moved, and only then swaps
//! the selection in a single write. A failed cycle leaves the previous
//! selection in place.

use std::sync::{PoisonError, RwLock as StdRwLock};

use service_management_proto::Service;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::FetchError;
use crate::loader::{ConfigLoader, ConfigSource};
use crate::rollout::{ActiveSelection, RolloutResolver};

/// Result of a successful poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Newest rollout is the one already served.
    Unchanged,
    /// A new rollout kept the served config; only the rollout id moved.
    RolloutAdvanced(ActiveSelection),
    /// A new config was selected and loaded; hand `config` to whoever applies it.
    ConfigChanged {
        selection: ActiveSelection,
        config: Service,
    },
}

#[derive(Debug)]
pub struct ServiceConfigPoller {
    service_name: String,
    resolver: RolloutResolver,
    loader: ConfigLoader,
    selection: StdRwLock<Option<ActiveSelection>>,
    /// Serialises cycles so the selection is never resolved from a stale read.
    cycle: Mutex<()>,
}

impl ServiceConfigPoller {
    pub fn new(
        service_name: impl Into<String>,
        resolver: RolloutResolver,
        loader: ConfigLoader,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            resolver,
            loader,
            selection: StdRwLock::new(None),
            cycle: Mutex::new(()),
        }
    }

    /// Starts from a selection restored by the embedder instead of an empty one.
    pub fn with_selection(self, selection: ActiveSelection) -> Self {
        self.replace_selection(selection);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Snapshot of the selection from the last successful cycle.
    pub fn selection(&self) -> Option<ActiveSelection> {
        self.selection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs one poll cycle.
    pub async fn poll_once(&self) -> Result<PollOutcome, FetchError> {
        let _cycle = self.cycle.lock().await;
        let current = self.selection();

        let next = self
            .resolver
            .resolve(&self.service_name, current.as_ref())
            .await?;

        let Some(current) = current else {
            return self.load_and_replace(next).await;
        };
        if current == next {
            return Ok(PollOutcome::Unchanged);
        }
        if current.config_id == next.config_id {
            self.replace_selection(next.clone());
            return Ok(PollOutcome::RolloutAdvanced(next));
        }
        self.load_and_replace(next).await
    }

    async fn load_and_replace(&self, next: ActiveSelection) -> Result<PollOutcome, FetchError> {
        let source = ConfigSource::Remote {
            service_name: self.service_name.clone(),
            config_id: next.config_id.clone(),
        };
        let config = self.loader.load(&source).await.map_err(|err| {
            warn!(service = %self.service_name, error = %err, "keeping previous selection");
            err.into_cause()
        })?;

        self.replace_selection(next.clone());
        info!(
            service = %self.service_name,
            rollout_id = %next.rollout_id,
            config_id = %next.config_id,
            "active selection updated"
        );
        Ok(PollOutcome::ConfigChanged {
            selection: next,
            config,
        })
    }

    fn replace_selection(&self, selection: ActiveSelection) {
        // A single assignment cannot leave the pair half-written, so a
        // poisoned lock still guards a consistent value.
        *self
            .selection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(selection);
    }
}
