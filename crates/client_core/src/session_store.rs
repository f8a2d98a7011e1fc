use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::domain::SessionIdentity;
use tokio::sync::Mutex;
use tracing::warn;

/// Keeps the logged-in identity between runs so a session can be restored
/// without logging in again.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<SessionIdentity>>;
    async fn save(&self, identity: &SessionIdentity) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<SessionIdentity>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read session file '{}'", self.path.display())
                })
            }
        };
        match serde_json::from_str(&raw) {
            Ok(identity) => Ok(Some(identity)),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "session store: ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    async fn save(&self, identity: &SessionIdentity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!(
                    "failed to create parent directory '{}' for session file",
                    parent.display()
                )
            })?;
        }
        let raw = serde_json::to_string_pretty(identity)?;
        tokio::fs::write(&self.path, raw)
            .await
            .with_context(|| format!("failed to write session file '{}'", self.path.display()))
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove session file '{}'", self.path.display())
            }),
        }
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    identity: Mutex<Option<SessionIdentity>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: SessionIdentity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<SessionIdentity>> {
        Ok(self.identity.lock().await.clone())
    }

    async fn save(&self, identity: &SessionIdentity) -> Result<()> {
        *self.identity.lock().await = Some(identity.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.identity.lock().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use shared::domain::{EntityId, UuidCode};

    fn alice() -> SessionIdentity {
        SessionIdentity {
            entity_id: EntityId::from("u1"),
            full_name: "Alice".into(),
            email: "alice@example.com".into(),
            uuid_code: Some(UuidCode::from("AB12")),
        }
    }

    fn temp_session_path(tag: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir()
            .join(format!("chat_client_{tag}_{suffix}"))
            .join("session.json")
    }

    #[tokio::test]
    async fn file_store_round_trips_and_clears() {
        let path = temp_session_path("store");
        let store = FileSessionStore::new(&path);

        assert_eq!(store.load().await.expect("empty load"), None);
        store.save(&alice()).await.expect("save");
        assert_eq!(store.load().await.expect("load"), Some(alice()));

        store.clear().await.expect("clear");
        assert_eq!(store.load().await.expect("load after clear"), None);
        store.clear().await.expect("clear is idempotent");

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[tokio::test]
    async fn corrupt_session_file_reads_as_no_session() {
        let path = temp_session_path("corrupt");
        let parent = path.parent().expect("parent").to_path_buf();
        std::fs::create_dir_all(&parent).expect("dir");
        std::fs::write(&path, "{not json").expect("write");

        let store = FileSessionStore::new(&path);
        assert_eq!(store.load().await.expect("load"), None);

        std::fs::remove_dir_all(parent).expect("cleanup");
    }

    #[tokio::test]
    async fn stored_file_uses_login_response_field_names() {
        let path = temp_session_path("fields");
        let store = FileSessionStore::new(&path);
        store.save(&alice()).await.expect("save");

        let raw = std::fs::read_to_string(&path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["_id"], "u1");
        assert_eq!(value["uuid_code"], "AB12");

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
