//! SQLite connection helpers.
//!
//! Every database in the system (control plane and per-world) is a SQLite
//! file opened through [`open_connection`], which applies the same pragmas.
//! Connections are shared behind a `parking_lot` mutex; rusqlite connections
//! are `Send` but not `Sync`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::WorldgraphResult;

pub type SharedConnection = Arc<Mutex<Connection>>;

/// How long a statement waits on a locked database before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn open_connection(path: impl AsRef<Path>) -> WorldgraphResult<Connection> {
    let path = path.as_ref();
    if path.as_os_str() == ":memory:" {
        return open_in_memory();
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // journal_mode returns the resulting mode as a row.
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

pub fn open_in_memory() -> WorldgraphResult<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn share(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}
