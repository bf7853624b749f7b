//! Load status shared by the remote clients.

use crate::{Error, Result};
use std::fmt;
use tokio::sync::watch;

/// Metadata load state of a client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadStatus {
    #[default]
    Pending,
    Loading,
    Loaded,
    Error(String),
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Loading => f.write_str("loading"),
            Self::Loaded => f.write_str("loaded"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Observable [`LoadStatus`].
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<LoadStatus>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LoadStatus::Pending);
        Self { tx }
    }

    /// Current status.
    #[must_use]
    pub fn get(&self) -> LoadStatus {
        self.tx.borrow().clone()
    }

    pub fn set(&self, status: LoadStatus) {
        log::debug!("status -> {status}");
        self.tx.send_replace(status);
    }

    /// Move `Pending` to `Loading`. Returns false if loading already started.
    pub fn begin_loading(&self) -> bool {
        self.tx.send_if_modified(|status| {
            if *status == LoadStatus::Pending {
                *status = LoadStatus::Loading;
                true
            } else {
                false
            }
        })
    }

    /// Record the outcome of a load.
    pub fn finish<T>(&self, outcome: &Result<T>) {
        match outcome {
            Ok(_) => self.set(LoadStatus::Loaded),
            Err(err) => self.set(LoadStatus::Error(err.to_string())),
        }
    }

    /// Wait until the status is `Loaded`.
    ///
    /// # Errors
    /// Returns [`Error::LoadFailed`] if loading ends in an error.
    pub async fn wait_for_loaded(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        loop {
            match &*rx.borrow_and_update() {
                LoadStatus::Loaded => return Ok(()),
                LoadStatus::Error(msg) => return Err(Error::LoadFailed(msg.clone())),
                LoadStatus::Pending | LoadStatus::Loading => {}
            }
            rx.changed()
                .await
                .map_err(|_| Error::LoadFailed("status cell dropped".to_string()))?;
        }
    }
}
