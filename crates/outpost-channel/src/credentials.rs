// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filesystem-backed session credential store.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use outpost_core::{CredentialStore, OutpostError};

/// Persisted pairing data kept in a directory owned by the session client.
#[derive(Debug, Clone)]
pub struct SessionDirStore {
    dir: PathBuf,
}

impl SessionDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl CredentialStore for SessionDirStore {
    async fn has_credentials(&self) -> bool {
        match tokio::fs::read_dir(&self.dir).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
            Err(_) => false,
        }
    }

    async fn purge(&self) -> Result<(), OutpostError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(path = %self.dir.display(), "session credentials purged");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OutpostError::Internal(format!(
                "failed to purge session credentials at {}: {e}",
                self.dir.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn purge_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("session");
        std::fs::create_dir_all(session.join("Default")).unwrap();
        std::fs::write(session.join("Default/creds.json"), b"{}").unwrap();

        let store = SessionDirStore::new(&session);
        assert!(store.has_credentials().await);

        store.purge().await.unwrap();
        assert!(!session.exists());
        assert!(!store.has_credentials().await);
    }

    #[tokio::test]
    async fn purge_of_missing_directory_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionDirStore::new(dir.path().join("never-created"));
        store.purge().await.unwrap();
    }

    #[tokio::test]
    async fn empty_directory_has_no_credentials() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!SessionDirStore::new(dir.path()).has_credentials().await);
    }
}
