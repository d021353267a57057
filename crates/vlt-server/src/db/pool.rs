// db/pool.rs
// Async connection pool using deadpool-sqlite
//
// Database access always goes through `interact` / `run` closures, which
// execute on a blocking thread so the async runtime is never stalled by
// SQLite. In-memory pools use a shared-cache URI so every pooled connection
// sees the same database (required for tests).

use crate::error::VltError;
use crate::utils::path_to_string;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
///
/// SQLITE_BUSY occurs with file-based databases under write contention;
/// SQLITE_LOCKED occurs with shared-cache in-memory databases when another
/// connection holds a write lock on the same table.
fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Check if a VltError wraps a SQLite contention error.
fn is_vlt_contention(err: &VltError) -> bool {
    match err {
        VltError::Db(e) => is_rusqlite_contention(e),
        _ => false,
    }
}

/// Retry delays for SQLite contention backoff.
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

/// Database pool wrapper with per-connection setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
}

/// Whether to use a file path or shared in-memory URI.
enum DbStorage {
    File(PathBuf),
    InMemory,
}

impl DatabasePool {
    /// Open a pooled database at the given path, running schema setup.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf())).await
    }

    /// Open a pooled in-memory database (shared-cache, for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_internal(DbStorage::InMemory).await
    }

    async fn open_internal(storage: DbStorage) -> Result<Self> {
        let (conn_str, path, memory_uri, hook) = match storage {
            DbStorage::File(p) => {
                ensure_parent_directory(&p)?;
                let s = path_to_string(&p);
                let hook = make_file_post_create_hook(p.clone());
                (s, Some(p), None, hook)
            }
            DbStorage::InMemory => {
                let uri = format!(
                    "file:memdb_{}?mode=memory&cache=shared",
                    uuid::Uuid::new_v4().simple()
                );
                let hook = make_memory_post_create_hook();
                (uri.clone(), None, Some(uri), hook)
            }
        };

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
        };

        db_pool
            .interact(|conn| {
                super::schema::run_all_migrations(conn)?;
                if let Err(e) = conn.execute_batch("PRAGMA optimize") {
                    tracing::debug!("PRAGMA optimize skipped: {}", e);
                }
                Ok(())
            })
            .await?;

        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests).
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool.
    ///
    /// The closure runs on a blocking thread pool, so it won't block the
    /// async runtime.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure and return `Result<T, VltError>`.
    ///
    /// Preferred for call sites that live in the VltError world; handles
    /// the error conversion boilerplate in one place.
    pub async fn run<F, R, E>(&self, f: F) -> std::result::Result<R, VltError>
    where
        F: FnOnce(&Connection) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<VltError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| VltError::Other(format!("Failed to get connection: {}", e)))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| VltError::Other(format!("Database error: {}", e)))?
    }

    /// Like [`run`](Self::run) but with retry on SQLite contention errors.
    ///
    /// Uses backoff (100ms, 500ms, 2000ms). The closure must be `Clone` to
    /// support retries. Use for critical writes (delta commits, node pushes).
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> std::result::Result<R, VltError>
    where
        F: FnOnce(&Connection) -> std::result::Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<VltError> + Send + 'static,
    {
        for delay in RETRY_DELAYS.iter() {
            let f_clone = f.clone();
            match self.run(f_clone).await {
                Ok(result) => return Ok(result),
                Err(e) if is_vlt_contention(&e) => {
                    tracing::warn!("SQLite contention, retrying in {:?}", delay);
                    tokio::time::sleep(*delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.run(f).await
    }

    /// Run a closure, logging errors at debug but not propagating.
    /// Use for best-effort operations (summary refresh, telemetry).
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("{}: {}", label, e);
                None
            }
        }
    }
}

/// Ensure parent directory exists with restricted permissions (0o700 on Unix).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

/// Post-create hook for file-based databases: PRAGMAs + 0o600 file mode.
fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to set database file permissions to 0600: {}", e);
                    }
                }

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into()))?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Post-create hook for in-memory databases (WAL does not apply in-memory).
fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into()))?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Configure a connection after it's created.
fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL; \
         PRAGMA journal_size_limit=32768;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_in_memory() {
        let pool = DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool");

        pool.interact(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, description) VALUES (?, ?, ?)",
                rusqlite::params!["p1", "test", "test project"],
            )?;
            Ok(())
        })
        .await
        .expect("Failed to insert");

        // Second connection from the pool sees the same data (shared cache)
        let name: String = pool
            .interact(|conn| {
                conn.query_row("SELECT name FROM projects WHERE id = 'p1'", [], |row| {
                    row.get(0)
                })
                .map_err(Into::into)
            })
            .await
            .expect("Failed to query");

        assert_eq!(name, "test");
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let pool = std::sync::Arc::new(
            DatabasePool::open_in_memory()
                .await
                .expect("Failed to open pool"),
        );

        let mut handles = Vec::new();
        for i in 0..10 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.run_with_retry(move |conn| {
                    conn.execute(
                        "INSERT INTO projects (id, name, description) VALUES (?, ?, ?)",
                        rusqlite::params![format!("p{i}"), format!("project-{i}"), ""],
                    )?;
                    Ok::<_, rusqlite::Error>(())
                })
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().expect("Insert failed");
        }

        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .expect("Count failed");

        assert_eq!(count, 10);
    }

    #[test]
    fn test_contention_detection() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy,
                extended_code: 5,
            },
            Some("database is locked".to_string()),
        );
        assert!(is_rusqlite_contention(&busy));

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::ConstraintViolation,
                extended_code: 19,
            },
            None,
        );
        assert!(!is_rusqlite_contention(&constraint));

        assert!(is_vlt_contention(&VltError::Db(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseLocked,
                extended_code: 6,
            },
            None,
        ))));
        assert!(!is_vlt_contention(&VltError::ProjectNotSet));
    }
}
