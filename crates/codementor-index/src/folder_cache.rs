//! Per-(user, workspace) cache of the rendered folder structure.
//!
//! Written after every successful resync, read before prompt construction.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use codementor_llm::BoxFuture;

use crate::error::{IndexError, Result};

pub trait FolderStructureStore: Send + Sync {
    /// Cached text, or `None` if the workspace was never resynced.
    fn load<'a>(&'a self, user: &'a str, workspace: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    fn save<'a>(
        &'a self,
        user: &'a str,
        workspace: &'a str,
        structure: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Clone)]
pub struct SqliteFolderStore {
    pool: SqlitePool,
}

impl SqliteFolderStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `:memory:` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self> {
        let (url, max_connections) = if path == ":memory:" {
            ("sqlite::memory:".to_owned(), 1)
        } else {
            (format!("sqlite:{path}?mode=rwc"), 5)
        };

        let opts = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!(path, "folder cache ready");
        Ok(Self { pool })
    }

    async fn load_inner(&self, user: &str, workspace: &str) -> Result<Option<String>> {
        let structure: Option<String> = sqlx::query_scalar(
            "SELECT structure FROM folder_structures \
             WHERE user_identity = ? AND workspace_identity = ?",
        )
        .bind(user)
        .bind(workspace)
        .fetch_optional(&self.pool)
        .await?;
        Ok(structure)
    }

    async fn save_inner(&self, user: &str, workspace: &str, structure: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO folder_structures (user_identity, workspace_identity, structure) \
             VALUES (?, ?, ?) \
             ON CONFLICT (user_identity, workspace_identity) \
             DO UPDATE SET structure = excluded.structure, updated_at = datetime('now')",
        )
        .bind(user)
        .bind(workspace)
        .bind(structure)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl FolderStructureStore for SqliteFolderStore {
    fn load<'a>(&'a self, user: &'a str, workspace: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(self.load_inner(user, workspace))
    }

    fn save<'a>(
        &'a self,
        user: &'a str,
        workspace: &'a str,
        structure: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.save_inner(user, workspace, structure))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFolderStore {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl InMemoryFolderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> IndexError {
    IndexError::Store("folder cache lock poisoned".into())
}

impl FolderStructureStore for InMemoryFolderStore {
    fn load<'a>(&'a self, user: &'a str, workspace: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let entries = self.entries.read().map_err(|_| poisoned())?;
            Ok(entries
                .get(&(user.to_owned(), workspace.to_owned()))
                .cloned())
        })
    }

    fn save<'a>(
        &'a self,
        user: &'a str,
        workspace: &'a str,
        structure: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut entries = self.entries.write().map_err(|_| poisoned())?;
            entries.insert((user.to_owned(), workspace.to_owned()), structure.to_owned());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_missing_entry_is_none() {
        let store = SqliteFolderStore::open(":memory:").await.unwrap();
        assert!(store.load("a@b.com", "ws1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_save_overwrites() {
        let store = SqliteFolderStore::open(":memory:").await.unwrap();
        store.save("a@b.com", "ws1", "first").await.unwrap();
        store.save("a@b.com", "ws1", "second").await.unwrap();
        store.save("a@b.com", "ws2", "other").await.unwrap();
        assert_eq!(
            store.load("a@b.com", "ws1").await.unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(
            store.load("a@b.com", "ws2").await.unwrap().as_deref(),
            Some("other")
        );
    }

    #[tokio::test]
    async fn sqlite_file_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folders.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteFolderStore::open(path).await.unwrap();
            store.save("u", "w", "tree").await.unwrap();
            store.pool.close().await;
        }
        let reopened = SqliteFolderStore::open(path).await.unwrap();
        assert_eq!(reopened.load("u", "w").await.unwrap().as_deref(), Some("tree"));
    }

    #[tokio::test]
    async fn in_memory_store_keys_by_user_and_workspace() {
        let store = InMemoryFolderStore::new();
        store.save("u", "w", "tree").await.unwrap();
        assert_eq!(store.load("u", "w").await.unwrap().as_deref(), Some("tree"));
        assert!(store.load("u", "other").await.unwrap().is_none());
    }
}
