use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

use crate::error::KnowledgeResult;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the index database at `db_path`.
///
/// WAL mode lets readers proceed while a writer holds its transaction.
pub async fn connect(db_path: &Path) -> KnowledgeResult<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    #[cfg(feature = "sqlite-vec")]
    init_sqlite_vec_once()?;

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Register sqlite-vec as an auto extension for every connection opened
/// afterwards in this process.
#[cfg(feature = "sqlite-vec")]
pub fn init_sqlite_vec_once() -> KnowledgeResult<()> {
    use crate::error::KnowledgeError;
    use libsqlite3_sys::{sqlite3_auto_extension, SQLITE_OK};
    use sqlite_vec::sqlite3_vec_init;
    use std::sync::OnceLock;

    static SQLITE_VEC_INIT_RC: OnceLock<i32> = OnceLock::new();

    // The entry point signature is inferred from sqlite3_auto_extension.
    #[allow(clippy::missing_transmute_annotations)]
    let rc = *SQLITE_VEC_INIT_RC.get_or_init(|| unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())))
    });

    if rc == SQLITE_OK {
        Ok(())
    } else {
        Err(KnowledgeError::Storage(format!(
            "sqlite3_auto_extension failed with code {rc}"
        )))
    }
}
