//! Session cache persistence
//!
//! Single writer for `sessions.json`. The whole mapping is held in memory
//! behind one async mutex; every mutation rewrites the file through
//! temp-file + rename, so an interrupted write (crash or task abort) leaves
//! the previous file intact and later loads keep working.

use crate::core::keeper::debug_logger::get_logger;
use crate::core::keeper::types::{write_atomic, Session, SessionKey};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("failed to serialize sessions: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct SessionStore {
    path: PathBuf,
    sessions: Mutex<BTreeMap<String, Session>>,
}

impl SessionStore {
    /// Open the store at `path`
    ///
    /// A missing file starts an empty store. An unreadable or corrupt file is
    /// logged and also treated as empty; it is replaced on the next save.
    pub async fn open(path: PathBuf) -> Self {
        let sessions = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, Session>>(&content) {
                Ok(sessions) => sessions,
                Err(e) => {
                    get_logger().warn(
                        "SessionStore",
                        &format!("Ignoring corrupt session cache {}: {}", path.display(), e),
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                get_logger().warn(
                    "SessionStore",
                    &format!("Cannot read session cache {}: {}", path.display(), e),
                );
                BTreeMap::new()
            }
        };

        Self {
            path,
            sessions: Mutex::new(sessions),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.lock().await.get(key.as_str()).cloned()
    }

    pub async fn save(&self, key: &SessionKey, session: Session) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().await;
        let mut updated = sessions.clone();
        updated.insert(key.as_str().to_string(), session);
        self.persist(&updated).await?;
        *sessions = updated;
        Ok(())
    }

    /// Remove a stored session; clearing an absent key is a no-op
    pub async fn clear(&self, key: &SessionKey) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(key.as_str()) {
            return Ok(());
        }
        let mut updated = sessions.clone();
        updated.remove(key.as_str());
        self.persist(&updated).await?;
        *sessions = updated;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    async fn persist(&self, sessions: &BTreeMap<String, Session>) -> Result<(), SessionStoreError> {
        let content = serde_json::to_string_pretty(sessions)?;
        write_atomic(&self.path, content.as_bytes())
            .await
            .map_err(|source| SessionStoreError::Write {
                path: self.path.clone(),
                source,
            })
    }
}
