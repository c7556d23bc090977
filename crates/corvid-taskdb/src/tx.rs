//! Nested transactions via savepoints.
//!
//! Depth 0 opens `BEGIN IMMEDIATE` (serializes writers, avoids lost
//! updates under concurrent access); depth > 0 opens `SAVEPOINT sp_<n>`.
//! Depth tracking is safe because a [`Transaction`] holds the connection's
//! mutex guard for its entire lifetime — only one write transaction can be
//! in flight at a time, and nested savepoints borrow from it rather than
//! re-acquiring the lock.

use std::sync::MutexGuard;

use rusqlite::Connection;

use crate::error::Result;

pub struct Transaction<'a> {
    conn: MutexGuard<'a, Connection>,
    depth: u32,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(conn: MutexGuard<'a, Connection>) -> Result<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self { conn, depth: 0, finished: false })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn savepoint(&mut self) -> Result<Savepoint<'_, 'a>> {
        self.depth += 1;
        let name = format!("sp_{}", self.depth);
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(Savepoint { tx: self, name, finished: false })
    }

    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

pub struct Savepoint<'t, 'a> {
    tx: &'t mut Transaction<'a>,
    name: String,
    finished: bool,
}

impl Savepoint<'_, '_> {
    pub fn connection(&self) -> &Connection {
        &self.tx.conn
    }

    pub fn commit(mut self) -> Result<()> {
        self.tx.conn.execute_batch(&format!("RELEASE {}", self.name))?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.tx
            .conn
            .execute_batch(&format!("ROLLBACK TO {}", self.name))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Savepoint<'_, '_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self
                .tx
                .conn
                .execute_batch(&format!("ROLLBACK TO {}", self.name));
        }
    }
}
