//! PostgreSQL client
//!
//! Wraps a deadpool connection pool and exposes parameterized query
//! execution with `?` placeholder translation, quoting, ping, and nested
//! transaction scopes. The outermost scope issues `BEGIN`; inner scopes
//! issue `SAVEPOINT sp_<depth>`. A deadlock surfacing at the outermost
//! scope is rolled back and retried with linear backoff; inner deadlocks
//! propagate to the outer scope.

use crate::config::PgConfig;
use crate::row::PgParam;
use deadpool_postgres::{Object, Pool};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{StrataError, StrataResult, Value};
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, warn};

/// Default number of attempts for [`PgClient::transaction`].
pub const DEFAULT_TX_RETRIES: u32 = 3;

#[derive(Default)]
struct TxnState {
    conn: Option<Object>,
    depth: u32,
}

/// Pooled PostgreSQL client with a shared transaction scope.
///
/// The engine is cooperative and single-threaded per instance, so one
/// transaction scope per client matches the orchestration model: while a
/// transaction is open every statement routes to its connection.
#[derive(Clone)]
pub struct PgClient {
    pool: Pool,
    txn: Arc<Mutex<TxnState>>,
}

impl PgClient {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            txn: Arc::new(Mutex::new(TxnState::default())),
        }
    }

    pub fn from_config(config: &PgConfig) -> StrataResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Quote a string literal for inline SQL: single-quote doubling.
    pub fn quote(literal: &str) -> String {
        format!("'{}'", literal.replace('\'', "''"))
    }

    /// Run a parameterized query. Placeholders are written as `?` and
    /// rewritten to the positional `$n` form.
    pub async fn query(&self, sql: &str, params: &[Value]) -> StrataResult<Vec<Row>> {
        let sql = translate_placeholders(sql);
        let pg_params: Vec<PgParam> = params.iter().cloned().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = pg_params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        debug!(sql = %sql, params = params.len(), "Executing query");
        let txn = self.txn.lock().await;
        if let Some(conn) = txn.conn.as_ref() {
            return conn.query(sql.as_str(), &refs).await.map_err(map_pg_error);
        }
        drop(txn);
        let conn = self.get_conn().await?;
        conn.query(sql.as_str(), &refs).await.map_err(map_pg_error)
    }

    /// Run a statement and return the number of rows affected.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> StrataResult<u64> {
        let sql = translate_placeholders(sql);
        let pg_params: Vec<PgParam> = params.iter().cloned().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = pg_params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        debug!(sql = %sql, params = params.len(), "Executing statement");
        let txn = self.txn.lock().await;
        if let Some(conn) = txn.conn.as_ref() {
            return conn
                .execute(sql.as_str(), &refs)
                .await
                .map_err(map_pg_error);
        }
        drop(txn);
        let conn = self.get_conn().await?;
        conn.execute(sql.as_str(), &refs).await.map_err(map_pg_error)
    }

    /// Check connectivity.
    pub async fn ping(&self) -> StrataResult<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }

    async fn get_conn(&self) -> StrataResult<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| StrataError::database(format!("Connection pool: {}", e), None))
    }

    // ========================================================================
    // TRANSACTION SCOPES
    // ========================================================================

    /// Open a transaction scope. Returns the new depth: 1 means an
    /// outermost `BEGIN` was issued, larger values mean a savepoint.
    pub async fn begin(&self) -> StrataResult<u32> {
        let mut txn = self.txn.lock().await;
        if txn.depth == 0 {
            let conn = self.get_conn().await?;
            conn.batch_execute("BEGIN").await.map_err(map_pg_error)?;
            txn.conn = Some(conn);
            txn.depth = 1;
        } else {
            let statement = format!("SAVEPOINT sp_{}", txn.depth);
            txn.conn
                .as_ref()
                .ok_or_else(|| StrataError::internal("Transaction depth without connection"))?
                .batch_execute(&statement)
                .await
                .map_err(map_pg_error)?;
            txn.depth += 1;
        }
        Ok(txn.depth)
    }

    /// Commit the innermost scope. At depth 1 this issues `COMMIT` and
    /// returns the pooled connection; deeper scopes release their
    /// savepoint.
    pub async fn commit(&self) -> StrataResult<()> {
        let mut txn = self.txn.lock().await;
        match txn.depth {
            0 => Err(StrataError::transaction("No active transaction to commit")),
            1 => {
                let conn = txn
                    .conn
                    .take()
                    .ok_or_else(|| StrataError::internal("Transaction depth without connection"))?;
                txn.depth = 0;
                conn.batch_execute("COMMIT").await.map_err(map_pg_error)
            }
            depth => {
                let statement = format!("RELEASE SAVEPOINT sp_{}", depth - 1);
                txn.conn
                    .as_ref()
                    .ok_or_else(|| StrataError::internal("Transaction depth without connection"))?
                    .batch_execute(&statement)
                    .await
                    .map_err(map_pg_error)?;
                txn.depth -= 1;
                Ok(())
            }
        }
    }

    /// Roll back the innermost scope. At depth 1 this issues `ROLLBACK`
    /// and returns the pooled connection; deeper scopes roll back to their
    /// savepoint.
    pub async fn rollback(&self) -> StrataResult<()> {
        let mut txn = self.txn.lock().await;
        match txn.depth {
            0 => Err(StrataError::transaction(
                "No active transaction to roll back",
            )),
            1 => {
                let conn = txn
                    .conn
                    .take()
                    .ok_or_else(|| StrataError::internal("Transaction depth without connection"))?;
                txn.depth = 0;
                conn.batch_execute("ROLLBACK").await.map_err(map_pg_error)
            }
            depth => {
                let statement = format!("ROLLBACK TO SAVEPOINT sp_{}", depth - 1);
                txn.conn
                    .as_ref()
                    .ok_or_else(|| StrataError::internal("Transaction depth without connection"))?
                    .batch_execute(&statement)
                    .await
                    .map_err(map_pg_error)?;
                txn.depth -= 1;
                Ok(())
            }
        }
    }

    /// Run `body` inside a transaction scope with deadlock retry.
    ///
    /// Nested calls become savepoints. Only the call that opened the
    /// outermost scope retries on deadlock (code `40P01`), with a
    /// `50ms * attempt` backoff up to `max_retries` attempts; inner
    /// deadlocks propagate after rolling back their savepoint.
    pub async fn transaction<T, F, Fut>(&self, body: F, max_retries: u32) -> StrataResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StrataResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let depth = self.begin().await?;
            let result: StrataResult<T> = match body().await {
                Ok(value) => match self.commit().await {
                    Ok(()) => return Ok(value),
                    Err(err) => Err(err),
                },
                Err(err) => {
                    if let Err(rollback_err) = self.rollback().await {
                        warn!(error = %rollback_err, "Rollback after failed transaction body");
                    }
                    Err(err)
                }
            };

            let Err(err) = result else {
                unreachable!("Ok case returned above")
            };
            if should_retry(&err, depth, attempt, max_retries) {
                let delay = retry_backoff(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Deadlock, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }
            return Err(err);
        }
    }

    /// Close the pool. Fails while a transaction is active.
    pub async fn disconnect(&self) -> StrataResult<()> {
        let txn = self.txn.lock().await;
        if txn.depth > 0 {
            return Err(StrataError::transaction(
                "Cannot disconnect with an active transaction",
            ));
        }
        self.pool.close();
        Ok(())
    }
}

/// Whether a failed transaction attempt should be retried: only deadlocks
/// at the outermost scope, and only while attempts remain.
pub(crate) fn should_retry(
    err: &StrataError,
    depth: u32,
    attempt: u32,
    max_retries: u32,
) -> bool {
    depth == 1 && err.is_deadlock() && attempt < max_retries
}

/// Linear backoff: `50ms * attempt`.
pub(crate) fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(50 * attempt as u64)
}

/// Map a driver error, keeping its SQLSTATE for deadlock detection.
pub(crate) fn map_pg_error(err: tokio_postgres::Error) -> StrataError {
    let code = err.code().map(|state| state.code().to_string());
    StrataError::database(err.to_string(), code)
}

/// Rewrite `?` placeholders to the positional `$1, $2, ...` form, leaving
/// question marks inside single-quoted literals untouched.
pub(crate) fn translate_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut position = 0;
    let mut in_string = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                if in_string && chars.peek() == Some(&'\'') {
                    // Escaped quote inside a literal.
                    out.push('\'');
                    out.push(chars.next().expect("peeked"));
                    continue;
                }
                in_string = !in_string;
                out.push(c);
            }
            '?' if !in_string => {
                position += 1;
                out.push('$');
                out.push_str(&position.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_placeholders() {
        assert_eq!(
            translate_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"),
            "SELECT * FROM t WHERE a = $1 AND b = $2"
        );
        assert_eq!(translate_placeholders("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_placeholders_inside_literals_are_kept() {
        assert_eq!(
            translate_placeholders("SELECT '?' , ? FROM t WHERE s = 'it''s ?' AND x = ?"),
            "SELECT '?' , $1 FROM t WHERE s = 'it''s ?' AND x = $2"
        );
    }

    #[test]
    fn test_quote() {
        assert_eq!(PgClient::quote("plain"), "'plain'");
        assert_eq!(PgClient::quote("it's"), "'it''s'");
    }

    #[test]
    fn test_retry_decision() {
        let deadlock = StrataError::database("deadlock detected", Some("40P01".to_string()));
        let other = StrataError::database("syntax error", Some("42601".to_string()));

        // Outermost deadlock retries while attempts remain.
        assert!(should_retry(&deadlock, 1, 1, DEFAULT_TX_RETRIES));
        assert!(should_retry(&deadlock, 1, 2, DEFAULT_TX_RETRIES));
        // Attempts exhausted.
        assert!(!should_retry(&deadlock, 1, 3, DEFAULT_TX_RETRIES));
        // Inner scopes propagate.
        assert!(!should_retry(&deadlock, 2, 1, DEFAULT_TX_RETRIES));
        // Non-deadlock errors never retry.
        assert!(!should_retry(&other, 1, 1, DEFAULT_TX_RETRIES));
    }

    #[test]
    fn test_retry_backoff_is_linear() {
        assert_eq!(retry_backoff(1), Duration::from_millis(50));
        assert_eq!(retry_backoff(2), Duration::from_millis(100));
        assert_eq!(retry_backoff(3), Duration::from_millis(150));
    }
}
