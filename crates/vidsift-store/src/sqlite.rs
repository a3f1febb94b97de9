use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, ErrorCode};
use tracing::debug;

use vidsift_core::StoreError;

/// Schema version recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Contention longer than this surfaces as `StoreError::Busy`.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Video store backed by one SQLite connection.
pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    /// Open or create a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| StoreError::Unavailable {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable {
            message: e.to_string(),
        })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        let store = Self { conn };
        store.configure_pragmas()?;
        store.migrate_schema()?;
        Ok(store)
    }

    fn configure_pragmas(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA cache_size = -16000;",
            )
            .map_err(unavailable)?;
        self.conn.busy_timeout(BUSY_TIMEOUT).map_err(unavailable)?;
        debug!("SQLite pragmas configured (WAL mode, {BUSY_TIMEOUT:?} busy timeout)");
        Ok(())
    }

    fn migrate_schema(&self) -> Result<(), StoreError> {
        let version = self.schema_version()?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::Unavailable {
                message: format!(
                    "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
                ),
            });
        }

        self.conn
            .execute_batch(include_str!("schema.sql"))
            .map_err(unavailable)?;
        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(unavailable)?;
        debug!(from = version, to = SCHEMA_VERSION, "SQLite schema initialized");
        Ok(())
    }

    /// Schema version of the open database.
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        self.conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(classify)
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Map a rusqlite error onto the store error kinds.
pub(crate) fn classify(err: rusqlite::Error) -> StoreError {
    let message = err.to_string();
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            StoreError::Busy { message }
        }
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::PermissionDenied
            ) =>
        {
            StoreError::Unavailable { message }
        }
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::CorruptRow { message },
        _ => StoreError::Query { message },
    }
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    match classify(err) {
        StoreError::Busy { message } => StoreError::Busy { message },
        other => StoreError::Unavailable {
            message: other.to_string(),
        },
    }
}

/// Nanoseconds since the epoch, negative before it.
pub(crate) fn to_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_nanos()).map_or(i64::MIN, |n| -n),
    }
}

pub(crate) fn from_nanos(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}
