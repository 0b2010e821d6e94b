//! Fixed-size SQLite connection pool.
//!
//! Connections live in a bounded channel. Acquiring one is a receive with a
//! timeout; dropping the guard sends it back. Saturation therefore queues
//! callers on the channel rather than opening extra connections.

use super::open::{open_db, open_db_in_memory};
use super::{DbError, DbResult};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::Duration;

/// Shared handle to a fixed set of migrated connections.
#[derive(Clone)]
pub struct ConnectionPool {
    idle_tx: Sender<Connection>,
    idle_rx: Receiver<Connection>,
    size: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    /// Opens `size` connections to the database file at `path`.
    pub fn open(path: impl AsRef<Path>, size: usize, acquire_timeout: Duration) -> DbResult<Self> {
        if size == 0 {
            return Err(DbError::EmptyPool);
        }
        let path = path.as_ref();
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(open_db(path)?);
        }
        Ok(Self::from_connections(connections, acquire_timeout))
    }

    /// Builds a single-connection pool over a private in-memory database.
    pub fn open_in_memory(acquire_timeout: Duration) -> DbResult<Self> {
        let conn = open_db_in_memory()?;
        Ok(Self::from_connections(vec![conn], acquire_timeout))
    }

    fn from_connections(connections: Vec<Connection>, acquire_timeout: Duration) -> Self {
        let size = connections.len();
        let (idle_tx, idle_rx) = bounded(size);
        for conn in connections {
            // Capacity equals the number of connections, so this never blocks.
            let _ = idle_tx.send(conn);
        }
        Self {
            idle_tx,
            idle_rx,
            size,
            acquire_timeout,
        }
    }

    /// Total number of connections owned by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of connections currently idle.
    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }

    /// Waits up to the configured timeout for a free connection.
    pub fn acquire(&self) -> DbResult<PooledConnection> {
        match self.idle_rx.recv_timeout(self.acquire_timeout) {
            Ok(conn) => {
                debug!(
                    "event=pool_acquire module=db status=ok idle={}",
                    self.idle_rx.len()
                );
                Ok(PooledConnection {
                    conn: Some(conn),
                    home: self.idle_tx.clone(),
                })
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                warn!(
                    "event=pool_acquire module=db status=timeout waited_ms={} size={}",
                    self.acquire_timeout.as_millis(),
                    self.size
                );
                Err(DbError::PoolTimeout {
                    waited: self.acquire_timeout,
                })
            }
        }
    }
}

/// Connection checked out of a [`ConnectionPool`]; returned on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    home: Sender<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = self.home.send(conn);
        }
    }
}
