use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::store::{self, StoreTxn, StoredRun};
use super::{PersistenceError, Provider, ProviderAdmin};
use crate::config::PersistenceOptions;
use crate::execution::{CurrentExecution, ExecutionKey, WorkflowMutableState};
use crate::history::{BranchToken, DataBlob, Encoding, HistoryBranchDetail, HistoryNode, NodeRange};
use crate::pagination::{decode_page_token, paginate};
use crate::requests::*;
use crate::shard::{check_range_id, FailoverMarker, ShardInfo};
use crate::task::{ReplicationTask, RowsAffected, Task, TaskInfo, TimerTask, TransferTask};

/// Configuration options for SqliteProvider
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Pool size for file databases. In-memory databases always use one connection.
    ///
    /// With more than one connection, concurrent writers can see `ServiceBusy` when two
    /// deferred transactions both try to upgrade to a write lock.
    pub max_connections: u32,
    /// How long SQLite waits on a locked database before reporting busy.
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            max_connections: 1,
            busy_timeout: Duration::from_secs(60),
        }
    }
}

/// SQLite-backed provider.
///
/// Every operation runs inside one SQLite transaction: all checks and all writes of a
/// call commit together, and any error rolls the whole call back.
pub struct SqliteProvider {
    pool: SqlitePool,
    options: PersistenceOptions,
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Primary result code of a SQLite error; extended codes keep it in the low byte.
fn sqlite_primary_code(e: &sqlx::Error) -> Option<i32> {
    let code = e.as_database_error()?.code()?;
    code.parse::<i32>().ok().map(|c| c & 0xff)
}

/// Convert sqlx error to PersistenceError with retry classification
fn sqlx_to_persistence_error(operation: &str, e: sqlx::Error) -> PersistenceError {
    let message = e.to_string();

    let busy_code = matches!(sqlite_primary_code(&e), Some(SQLITE_BUSY | SQLITE_LOCKED));
    if busy_code || message.contains("database is locked") || message.contains("database table is locked") {
        return PersistenceError::service_busy(operation, message);
    }

    // Key collisions mean another writer got there first
    let unique = e.as_database_error().is_some_and(|d| d.is_unique_violation());
    if unique || message.contains("UNIQUE constraint") {
        return PersistenceError::ConditionFailed(format!("{operation}: {message}"));
    }

    if matches!(e, sqlx::Error::PoolTimedOut) {
        return PersistenceError::timeout(operation, message);
    }

    PersistenceError::internal(operation, message)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, PersistenceError> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, PersistenceError> {
    Ok(serde_json::from_str(text)?)
}

fn task_row<T: Clone + Serialize>(key: &ExecutionKey, task: &T) -> Result<String, PersistenceError> {
    to_json(&TaskInfo {
        domain_id: key.domain_id.clone(),
        workflow_id: key.workflow_id.clone(),
        run_id: key.run_id.clone(),
        task: task.clone(),
    })
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<String>) -> Result<Vec<T>, PersistenceError> {
    rows.iter().map(|r| from_json(r)).collect()
}

/// Timer keys are stored as nanoseconds since the epoch.
fn nanos(ts: DateTime<Utc>) -> Result<i64, PersistenceError> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| PersistenceError::invalid(format!("timestamp {ts} is outside the storable range")))
}

fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn rows_affected(n: u64) -> RowsAffected {
    if n == 0 {
        RowsAffected::Unknown
    } else {
        RowsAffected::Known(n)
    }
}

fn encoding_name(encoding: Encoding) -> &'static str {
    match encoding {
        Encoding::Json => "json",
    }
}

fn parse_encoding(name: &str) -> Result<Encoding, PersistenceError> {
    match name {
        "json" => Ok(Encoding::Json),
        other => Err(PersistenceError::Corrupted(format!("unknown blob encoding {other:?}"))),
    }
}

impl SqliteProvider {
    /// Create a new SQLite provider
    ///
    /// # Arguments
    /// * `database_url` - SQLite connection string (e.g., "sqlite:data.db" or "sqlite::memory:")
    /// * `options` - Pool and lock settings, defaults when `None`
    ///
    /// File databases are created when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if database connection or schema initialization fails.
    pub async fn new(database_url: &str, options: Option<SqliteOptions>) -> Result<Self, sqlx::Error> {
        let options = options.unwrap_or_default();
        let is_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let busy_timeout_ms = i64::try_from(options.busy_timeout.as_millis()).unwrap_or(i64::MAX);

        let mut pool_options = SqlitePoolOptions::new();
        if is_memory {
            // Each in-memory connection is its own database, so keep exactly one alive
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(options.max_connections.max(1));
        }

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = pool_options
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if is_memory {
                        sqlx::query("PRAGMA journal_mode = MEMORY").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = OFF").execute(&mut *conn).await?;
                    } else {
                        sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                    }
                    let busy = format!("PRAGMA busy_timeout = {busy_timeout_ms}");
                    sqlx::query(&busy).execute(&mut *conn).await?;
                    sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect_with(connect_options)
            .await?;

        Self::create_schema(&pool).await?;
        debug!(
            target: "durastore::providers::sqlite",
            database_url,
            is_memory,
            "sqlite provider ready"
        );
        Ok(Self {
            pool,
            options: PersistenceOptions::default(),
        })
    }

    /// Convenience: a private in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if database connection or schema initialization fails.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        Self::new("sqlite::memory:", None).await
    }

    /// Replace the size limit, page size and timeout settings.
    pub fn with_persistence_options(mut self, options: PersistenceOptions) -> Self {
        self.options = options;
        self
    }

    async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS shards (
                shard_id INTEGER PRIMARY KEY,
                range_id INTEGER NOT NULL,
                data TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                shard_id INTEGER NOT NULL,
                domain_id TEXT NOT NULL,
                workflow_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                run_condition INTEGER NOT NULL,
                next_event_id INTEGER NOT NULL,
                state TEXT NOT NULL,
                PRIMARY KEY (shard_id, domain_id, workflow_id, run_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS current_executions (
                shard_id INTEGER NOT NULL,
                domain_id TEXT NOT NULL,
                workflow_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (shard_id, domain_id, workflow_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS transfer_tasks (
                shard_id INTEGER NOT NULL,
                task_id INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (shard_id, task_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS timer_tasks (
                shard_id INTEGER NOT NULL,
                visibility_ts INTEGER NOT NULL,
                task_id INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (shard_id, visibility_ts, task_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS replication_tasks (
                shard_id INTEGER NOT NULL,
                task_id INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (shard_id, task_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS replication_dlq (
                shard_id INTEGER NOT NULL,
                source_cluster TEXT NOT NULL,
                task_id INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (shard_id, source_cluster, task_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS history_tree (
                tree_id TEXT NOT NULL,
                branch_id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (tree_id, branch_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS history_node (
                tree_id TEXT NOT NULL,
                branch_id TEXT NOT NULL,
                node_id INTEGER NOT NULL,
                txn_id INTEGER NOT NULL,
                encoding TEXT NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (tree_id, branch_id, node_id)
            )
            "#,
        ];
        for statement in statements {
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Sqlite>, PersistenceError> {
        self.pool.begin().await.map_err(|e| sqlx_to_persistence_error(operation, e))
    }

    async fn commit(operation: &str, tx: Transaction<'static, Sqlite>) -> Result<(), PersistenceError> {
        tx.commit().await.map_err(|e| sqlx_to_persistence_error(operation, e))
    }

    async fn fetch_task_rows(
        &self,
        operation: &str,
        sql: &str,
        shard_id: i32,
        low: i64,
        high: i64,
        batch_size: usize,
    ) -> Result<Vec<String>, PersistenceError> {
        sqlx::query_scalar::<_, String>(sql)
            .bind(shard_id)
            .bind(low)
            .bind(high)
            .bind(limit(batch_size + 1))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error(operation, e))
    }
}

#[async_trait]
impl StoreTxn for SqliteConnection {
    async fn shard_range_id(&mut self, shard_id: i32) -> Result<Option<i64>, PersistenceError> {
        sqlx::query_scalar::<_, i64>("SELECT range_id FROM shards WHERE shard_id = ?")
            .bind(shard_id)
            .fetch_optional(&mut *self)
            .await
            .map_err(|e| sqlx_to_persistence_error("shard_range_id", e))
    }

    async fn current_execution(
        &mut self,
        shard_id: i32,
        domain_id: &str,
        workflow_id: &str,
    ) -> Result<Option<CurrentExecution>, PersistenceError> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT data FROM current_executions WHERE shard_id = ? AND domain_id = ? AND workflow_id = ?",
        )
        .bind(shard_id)
        .bind(domain_id)
        .bind(workflow_id)
        .fetch_optional(&mut *self)
        .await
        .map_err(|e| sqlx_to_persistence_error("current_execution", e))?;
        row.as_deref().map(from_json).transpose()
    }

    async fn load_run(&mut self, shard_id: i32, key: &ExecutionKey) -> Result<Option<StoredRun>, PersistenceError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT state, run_condition FROM executions
            WHERE shard_id = ? AND domain_id = ? AND workflow_id = ? AND run_id = ?
            "#,
        )
        .bind(shard_id)
        .bind(&key.domain_id)
        .bind(&key.workflow_id)
        .bind(&key.run_id)
        .fetch_optional(&mut *self)
        .await
        .map_err(|e| sqlx_to_persistence_error("load_run", e))?;

        match row {
            Some((state, condition)) => Ok(Some(StoredRun {
                state: from_json::<WorkflowMutableState>(&state)?,
                condition,
            })),
            None => Ok(None),
        }
    }

    async fn history_node_transaction_id(
        &mut self,
        tree_id: &str,
        branch_id: &str,
        node_id: i64,
    ) -> Result<Option<i64>, PersistenceError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT txn_id FROM history_node WHERE tree_id = ? AND branch_id = ? AND node_id = ?",
        )
        .bind(tree_id)
        .bind(branch_id)
        .bind(node_id)
        .fetch_optional(&mut *self)
        .await
        .map_err(|e| sqlx_to_persistence_error("history_node_transaction_id", e))
    }

    async fn branch(&mut self, tree_id: &str, branch_id: &str) -> Result<Option<HistoryBranchDetail>, PersistenceError> {
        let row = sqlx::query_scalar::<_, String>("SELECT data FROM history_tree WHERE tree_id = ? AND branch_id = ?")
            .bind(tree_id)
            .bind(branch_id)
            .fetch_optional(&mut *self)
            .await
            .map_err(|e| sqlx_to_persistence_error("branch", e))?;
        row.as_deref().map(from_json).transpose()
    }

    async fn tree_branches(&mut self, tree_id: &str) -> Result<Vec<HistoryBranchDetail>, PersistenceError> {
        let rows = sqlx::query_scalar::<_, String>("SELECT data FROM history_tree WHERE tree_id = ? ORDER BY branch_id")
            .bind(tree_id)
            .fetch_all(&mut *self)
            .await
            .map_err(|e| sqlx_to_persistence_error("tree_branches", e))?;
        decode_rows(rows)
    }

    async fn put_run(&mut self, shard_id: i32, run: &StoredRun) -> Result<(), PersistenceError> {
        let info = &run.state.execution_info;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO executions
                (shard_id, domain_id, workflow_id, run_id, run_condition, next_event_id, state)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(shard_id)
        .bind(&info.domain_id)
        .bind(&info.workflow_id)
        .bind(&info.run_id)
        .bind(run.condition)
        .bind(info.next_event_id)
        .bind(to_json(&run.state)?)
        .execute(&mut *self)
        .await
        .map_err(|e| sqlx_to_persistence_error("put_run", e))?;
        Ok(())
    }

    async fn put_current_execution(
        &mut self,
        shard_id: i32,
        current: &CurrentExecution,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO current_executions (shard_id, domain_id, workflow_id, run_id, data)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(shard_id)
        .bind(&current.domain_id)
        .bind(&current.workflow_id)
        .bind(&current.run_id)
        .bind(to_json(current)?)
        .execute(&mut *self)
        .await
        .map_err(|e| sqlx_to_persistence_error("put_current_execution", e))?;
        Ok(())
    }

    async fn put_tasks(&mut self, shard_id: i32, key: &ExecutionKey, tasks: &[Task]) -> Result<(), PersistenceError> {
        for task in tasks {
            let result = match task {
                Task::Transfer(t) => {
                    sqlx::query("INSERT OR REPLACE INTO transfer_tasks (shard_id, task_id, data) VALUES (?, ?, ?)")
                        .bind(shard_id)
                        .bind(t.task_id)
                        .bind(task_row(key, t)?)
                        .execute(&mut *self)
                        .await
                }
                Task::Timer(t) => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO timer_tasks (shard_id, visibility_ts, task_id, data) VALUES (?, ?, ?, ?)",
                    )
                    .bind(shard_id)
                    .bind(nanos(t.visibility_timestamp)?)
                    .bind(t.task_id)
                    .bind(task_row(key, t)?)
                    .execute(&mut *self)
                    .await
                }
                Task::Replication(t) => {
                    sqlx::query("INSERT OR REPLACE INTO replication_tasks (shard_id, task_id, data) VALUES (?, ?, ?)")
                        .bind(shard_id)
                        .bind(t.task_id)
                        .bind(task_row(key, t)?)
                        .execute(&mut *self)
                        .await
                }
            };
            result.map_err(|e| sqlx_to_persistence_error("put_tasks", e))?;
        }
        Ok(())
    }

    async fn put_history_node(
        &mut self,
        tree_id: &str,
        branch_id: &str,
        node: &HistoryNode,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO history_node (tree_id, branch_id, node_id, txn_id, encoding, data)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tree_id)
        .bind(branch_id)
        .bind(node.node_id)
        .bind(node.transaction_id)
        .bind(encoding_name(node.blob.encoding))
        .bind(node.blob.data.as_slice())
        .execute(&mut *self)
        .await
        .map_err(|e| sqlx_to_persistence_error("put_history_node", e))?;
        Ok(())
    }

    async fn put_branch(&mut self, detail: &HistoryBranchDetail) -> Result<(), PersistenceError> {
        sqlx::query("INSERT OR REPLACE INTO history_tree (tree_id, branch_id, data) VALUES (?, ?, ?)")
            .bind(&detail.tree_id)
            .bind(&detail.branch_id)
            .bind(to_json(detail)?)
            .execute(&mut *self)
            .await
            .map_err(|e| sqlx_to_persistence_error("put_branch", e))?;
        Ok(())
    }

    async fn delete_branch(&mut self, tree_id: &str, branch_id: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM history_tree WHERE tree_id = ? AND branch_id = ?")
            .bind(tree_id)
            .bind(branch_id)
            .execute(&mut *self)
            .await
            .map_err(|e| sqlx_to_persistence_error("delete_branch", e))?;
        Ok(())
    }

    async fn delete_history_nodes(
        &mut self,
        tree_id: &str,
        branch_id: &str,
        range: NodeRange,
    ) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM history_node WHERE tree_id = ? AND branch_id = ? AND node_id >= ? AND node_id < ?")
            .bind(tree_id)
            .bind(branch_id)
            .bind(range.begin)
            .bind(range.end)
            .execute(&mut *self)
            .await
            .map_err(|e| sqlx_to_persistence_error("delete_history_nodes", e))?;
        Ok(())
    }
}

#[async_trait]
impl Provider for SqliteProvider {
    async fn create_shard(&self, info: ShardInfo) -> Result<(), PersistenceError> {
        let mut tx = self.begin("create_shard").await?;
        if tx.shard_range_id(info.shard_id).await?.is_some() {
            return Err(PersistenceError::ShardAlreadyExists(format!("shard {}", info.shard_id)));
        }
        sqlx::query("INSERT INTO shards (shard_id, range_id, data) VALUES (?, ?, ?)")
            .bind(info.shard_id)
            .bind(info.range_id)
            .bind(to_json(&info)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| sqlx_to_persistence_error("create_shard", e))?;
        Self::commit("create_shard", tx).await?;
        debug!(
            target: "durastore::providers::sqlite",
            shard_id = info.shard_id,
            range_id = info.range_id,
            owner = %info.owner,
            "shard created"
        );
        Ok(())
    }

    async fn get_shard(&self, shard_id: i32) -> Result<ShardInfo, PersistenceError> {
        let row = sqlx::query_scalar::<_, String>("SELECT data FROM shards WHERE shard_id = ?")
            .bind(shard_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error("get_shard", e))?;
        match row {
            Some(data) => from_json(&data),
            None => Err(PersistenceError::EntityNotExists(format!("shard {shard_id}"))),
        }
    }

    async fn update_shard(&self, info: ShardInfo, previous_range_id: i64) -> Result<(), PersistenceError> {
        let mut tx = self.begin("update_shard").await?;
        let stored = tx.shard_range_id(info.shard_id).await?;
        check_range_id(info.shard_id, stored, previous_range_id)?;
        sqlx::query("UPDATE shards SET range_id = ?, data = ? WHERE shard_id = ?")
            .bind(info.range_id)
            .bind(to_json(&info)?)
            .bind(info.shard_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| sqlx_to_persistence_error("update_shard", e))?;
        Self::commit("update_shard", tx).await?;
        debug!(
            target: "durastore::providers::sqlite",
            shard_id = info.shard_id,
            previous_range_id,
            range_id = info.range_id,
            "shard updated"
        );
        Ok(())
    }

    async fn create_workflow_execution(
        &self,
        req: CreateWorkflowExecutionRequest,
    ) -> Result<CreateWorkflowExecutionResponse, PersistenceError> {
        let mut tx = self.begin("create_workflow_execution").await?;
        let resp = store::create_workflow_execution(&mut *tx, &self.options, &req).await?;
        Self::commit("create_workflow_execution", tx).await?;
        debug!(
            target: "durastore::providers::sqlite",
            shard_id = req.shard_id,
            execution = %req.new_workflow_snapshot.execution_info.key(),
            mode = ?req.mode,
            transaction_size = resp.transaction_size,
            "workflow execution created"
        );
        Ok(resp)
    }

    async fn get_workflow_execution(
        &self,
        req: GetWorkflowExecutionRequest,
    ) -> Result<GetWorkflowExecutionResponse, PersistenceError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| sqlx_to_persistence_error("get_workflow_execution", e))?;
        store::get_workflow_execution(&mut *conn, &req).await
    }

    async fn update_workflow_execution(
        &self,
        req: UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse, PersistenceError> {
        let mut tx = self.begin("update_workflow_execution").await?;
        let resp = store::update_workflow_execution(&mut *tx, &self.options, &req).await?;
        Self::commit("update_workflow_execution", tx).await?;
        debug!(
            target: "durastore::providers::sqlite",
            shard_id = req.shard_id,
            execution = %req.update_workflow_mutation.execution_info.key(),
            mode = ?req.mode,
            condition = req.update_workflow_mutation.condition,
            new_run = req.new_workflow_snapshot.is_some(),
            "workflow execution updated"
        );
        Ok(resp)
    }

    async fn conflict_resolve_workflow_execution(
        &self,
        req: ConflictResolveWorkflowExecutionRequest,
    ) -> Result<(), PersistenceError> {
        let mut tx = self.begin("conflict_resolve_workflow_execution").await?;
        store::conflict_resolve_workflow_execution(&mut *tx, &self.options, &req).await?;
        Self::commit("conflict_resolve_workflow_execution", tx).await?;
        debug!(
            target: "durastore::providers::sqlite",
            shard_id = req.shard_id,
            execution = %req.reset_workflow_snapshot.execution_info.key(),
            mode = ?req.mode,
            "workflow execution conflict resolved"
        );
        Ok(())
    }

    async fn reset_workflow_execution(&self, req: ResetWorkflowExecutionRequest) -> Result<(), PersistenceError> {
        let mut tx = self.begin("reset_workflow_execution").await?;
        store::reset_workflow_execution(&mut *tx, &self.options, &req).await?;
        Self::commit("reset_workflow_execution", tx).await?;
        debug!(
            target: "durastore::providers::sqlite",
            shard_id = req.shard_id,
            base_run_id = %req.base_run_id,
            new_run_id = %req.new_workflow_snapshot.execution_info.run_id,
            "workflow execution reset"
        );
        Ok(())
    }

    async fn delete_workflow_execution(&self, req: DeleteWorkflowExecutionRequest) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM executions WHERE shard_id = ? AND domain_id = ? AND workflow_id = ? AND run_id = ?")
            .bind(req.shard_id)
            .bind(&req.execution.domain_id)
            .bind(&req.execution.workflow_id)
            .bind(&req.execution.run_id)
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error("delete_workflow_execution", e))?;
        Ok(())
    }

    async fn delete_current_workflow_execution(
        &self,
        req: DeleteWorkflowExecutionRequest,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "DELETE FROM current_executions WHERE shard_id = ? AND domain_id = ? AND workflow_id = ? AND run_id = ?",
        )
        .bind(req.shard_id)
        .bind(&req.execution.domain_id)
        .bind(&req.execution.workflow_id)
        .bind(&req.execution.run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| sqlx_to_persistence_error("delete_current_workflow_execution", e))?;
        Ok(())
    }

    async fn get_current_execution(
        &self,
        req: GetCurrentExecutionRequest,
    ) -> Result<CurrentExecution, PersistenceError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| sqlx_to_persistence_error("get_current_execution", e))?;
        StoreTxn::current_execution(&mut *conn, req.shard_id, &req.domain_id, &req.workflow_id)
            .await?
            .ok_or_else(|| {
                PersistenceError::EntityNotExists(format!(
                    "no current execution for {}/{}",
                    req.domain_id, req.workflow_id
                ))
            })
    }

    async fn is_workflow_execution_exists(
        &self,
        shard_id: i32,
        execution: &ExecutionKey,
    ) -> Result<bool, PersistenceError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM executions WHERE shard_id = ? AND domain_id = ? AND workflow_id = ? AND run_id = ?",
        )
        .bind(shard_id)
        .bind(&execution.domain_id)
        .bind(&execution.workflow_id)
        .bind(&execution.run_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| sqlx_to_persistence_error("is_workflow_execution_exists", e))?;
        Ok(count > 0)
    }

    async fn get_transfer_tasks(&self, req: GetTasksRequest) -> Result<GetTransferTasksResponse, PersistenceError> {
        let batch_size = self.options.page_size(req.batch_size);
        let start = decode_page_token::<i64>(req.next_page_token.as_deref())?.unwrap_or(req.read_level);
        let rows = self
            .fetch_task_rows(
                "get_transfer_tasks",
                "SELECT data FROM transfer_tasks WHERE shard_id = ? AND task_id > ? AND task_id <= ? ORDER BY task_id LIMIT ?",
                req.shard_id,
                start,
                req.max_read_level,
                batch_size,
            )
            .await?;
        let tasks: Vec<TaskInfo<TransferTask>> = decode_rows(rows)?;
        let (tasks, next_page_token) = paginate(tasks, batch_size, |t| t.task.task_id)?;
        Ok(GetTasksResponse { tasks, next_page_token })
    }

    async fn complete_transfer_task(&self, shard_id: i32, task_id: i64) -> Result<RowsAffected, PersistenceError> {
        let result = sqlx::query("DELETE FROM transfer_tasks WHERE shard_id = ? AND task_id = ?")
            .bind(shard_id)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error("complete_transfer_task", e))?;
        Ok(rows_affected(result.rows_affected()))
    }

    async fn range_complete_transfer_task(
        &self,
        shard_id: i32,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM transfer_tasks WHERE shard_id = ? AND task_id > ? AND task_id <= ?")
            .bind(shard_id)
            .bind(exclusive_begin)
            .bind(inclusive_end)
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error("range_complete_transfer_task", e))?;
        debug!(
            target: "durastore::providers::sqlite",
            shard_id,
            exclusive_begin,
            inclusive_end,
            count = result.rows_affected(),
            "transfer tasks range completed"
        );
        Ok(result.rows_affected())
    }

    async fn get_timer_index_tasks(&self, req: GetTimerTasksRequest) -> Result<GetTimerTasksResponse, PersistenceError> {
        let batch_size = self.options.page_size(req.batch_size);
        let max = nanos(req.max_timestamp)?;
        let rows = match decode_page_token::<(DateTime<Utc>, i64)>(req.next_page_token.as_deref())? {
            Some((ts, task_id)) => sqlx::query_scalar::<_, String>(
                r#"
                SELECT data FROM timer_tasks
                WHERE shard_id = ? AND (visibility_ts, task_id) > (?, ?) AND visibility_ts < ?
                ORDER BY visibility_ts, task_id LIMIT ?
                "#,
            )
            .bind(req.shard_id)
            .bind(nanos(ts)?)
            .bind(task_id)
            .bind(max)
            .bind(limit(batch_size + 1))
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query_scalar::<_, String>(
                r#"
                SELECT data FROM timer_tasks
                WHERE shard_id = ? AND visibility_ts >= ? AND visibility_ts < ?
                ORDER BY visibility_ts, task_id LIMIT ?
                "#,
            )
            .bind(req.shard_id)
            .bind(nanos(req.min_timestamp)?)
            .bind(max)
            .bind(limit(batch_size + 1))
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(|e| sqlx_to_persistence_error("get_timer_index_tasks", e))?;
        let tasks: Vec<TaskInfo<TimerTask>> = decode_rows(rows)?;
        let (tasks, next_page_token) = paginate(tasks, batch_size, |t| (t.task.visibility_timestamp, t.task.task_id))?;
        Ok(GetTasksResponse { tasks, next_page_token })
    }

    async fn complete_timer_task(
        &self,
        shard_id: i32,
        visibility_timestamp: DateTime<Utc>,
        task_id: i64,
    ) -> Result<RowsAffected, PersistenceError> {
        let result = sqlx::query("DELETE FROM timer_tasks WHERE shard_id = ? AND visibility_ts = ? AND task_id = ?")
            .bind(shard_id)
            .bind(nanos(visibility_timestamp)?)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error("complete_timer_task", e))?;
        Ok(rows_affected(result.rows_affected()))
    }

    async fn range_complete_timer_task(
        &self,
        shard_id: i32,
        inclusive_begin: DateTime<Utc>,
        exclusive_end: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM timer_tasks WHERE shard_id = ? AND visibility_ts >= ? AND visibility_ts < ?")
            .bind(shard_id)
            .bind(nanos(inclusive_begin)?)
            .bind(nanos(exclusive_end)?)
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error("range_complete_timer_task", e))?;
        Ok(result.rows_affected())
    }

    async fn get_replication_tasks(
        &self,
        req: GetTasksRequest,
    ) -> Result<GetReplicationTasksResponse, PersistenceError> {
        let batch_size = self.options.page_size(req.batch_size);
        let start = decode_page_token::<i64>(req.next_page_token.as_deref())?.unwrap_or(req.read_level);
        let rows = self
            .fetch_task_rows(
                "get_replication_tasks",
                "SELECT data FROM replication_tasks WHERE shard_id = ? AND task_id > ? AND task_id <= ? ORDER BY task_id LIMIT ?",
                req.shard_id,
                start,
                req.max_read_level,
                batch_size,
            )
            .await?;
        let tasks: Vec<TaskInfo<ReplicationTask>> = decode_rows(rows)?;
        let (tasks, next_page_token) = paginate(tasks, batch_size, |t| t.task.task_id)?;
        Ok(GetTasksResponse { tasks, next_page_token })
    }

    async fn complete_replication_task(&self, shard_id: i32, task_id: i64) -> Result<RowsAffected, PersistenceError> {
        let result = sqlx::query("DELETE FROM replication_tasks WHERE shard_id = ? AND task_id = ?")
            .bind(shard_id)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error("complete_replication_task", e))?;
        Ok(rows_affected(result.rows_affected()))
    }

    async fn range_complete_replication_task(
        &self,
        shard_id: i32,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM replication_tasks WHERE shard_id = ? AND task_id > ? AND task_id <= ?")
            .bind(shard_id)
            .bind(exclusive_begin)
            .bind(inclusive_end)
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error("range_complete_replication_task", e))?;
        Ok(result.rows_affected())
    }

    async fn create_failover_marker_tasks(
        &self,
        shard_id: i32,
        range_id: i64,
        first_task_id: i64,
        markers: Vec<FailoverMarker>,
    ) -> Result<(), PersistenceError> {
        let mut tx = self.begin("create_failover_marker_tasks").await?;
        let stored = tx.shard_range_id(shard_id).await?;
        check_range_id(shard_id, stored, range_id)?;
        for (task_id, marker) in (first_task_id..).zip(&markers) {
            sqlx::query("INSERT OR REPLACE INTO replication_tasks (shard_id, task_id, data) VALUES (?, ?, ?)")
                .bind(shard_id)
                .bind(task_id)
                .bind(to_json(&marker.to_replication_task(task_id))?)
                .execute(&mut *tx)
                .await
                .map_err(|e| sqlx_to_persistence_error("create_failover_marker_tasks", e))?;
        }
        Self::commit("create_failover_marker_tasks", tx).await?;
        debug!(
            target: "durastore::providers::sqlite",
            shard_id,
            count = markers.len(),
            "failover marker tasks created"
        );
        Ok(())
    }

    async fn put_replication_task_to_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        task: TaskInfo<ReplicationTask>,
    ) -> Result<(), PersistenceError> {
        sqlx::query("INSERT OR REPLACE INTO replication_dlq (shard_id, source_cluster, task_id, data) VALUES (?, ?, ?, ?)")
            .bind(shard_id)
            .bind(source_cluster)
            .bind(task.task.task_id)
            .bind(to_json(&task)?)
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error("put_replication_task_to_dlq", e))?;
        debug!(
            target: "durastore::providers::sqlite",
            shard_id,
            source_cluster,
            task_id = task.task.task_id,
            "replication task moved to dlq"
        );
        Ok(())
    }

    async fn get_replication_tasks_from_dlq(
        &self,
        req: GetReplicationDlqTasksRequest,
    ) -> Result<GetReplicationTasksResponse, PersistenceError> {
        let batch_size = self.options.page_size(req.batch_size);
        let start = decode_page_token::<i64>(req.next_page_token.as_deref())?.unwrap_or(req.read_level);
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT data FROM replication_dlq
            WHERE shard_id = ? AND source_cluster = ? AND task_id > ? AND task_id <= ?
            ORDER BY task_id LIMIT ?
            "#,
        )
        .bind(req.shard_id)
        .bind(&req.source_cluster)
        .bind(start)
        .bind(req.max_read_level)
        .bind(limit(batch_size + 1))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| sqlx_to_persistence_error("get_replication_tasks_from_dlq", e))?;
        let tasks: Vec<TaskInfo<ReplicationTask>> = decode_rows(rows)?;
        let (tasks, next_page_token) = paginate(tasks, batch_size, |t| t.task.task_id)?;
        Ok(GetTasksResponse { tasks, next_page_token })
    }

    async fn delete_replication_task_from_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        task_id: i64,
    ) -> Result<RowsAffected, PersistenceError> {
        let result = sqlx::query("DELETE FROM replication_dlq WHERE shard_id = ? AND source_cluster = ? AND task_id = ?")
            .bind(shard_id)
            .bind(source_cluster)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| sqlx_to_persistence_error("delete_replication_task_from_dlq", e))?;
        Ok(rows_affected(result.rows_affected()))
    }

    async fn range_delete_replication_task_from_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError> {
        let result = sqlx::query(
            "DELETE FROM replication_dlq WHERE shard_id = ? AND source_cluster = ? AND task_id > ? AND task_id <= ?",
        )
        .bind(shard_id)
        .bind(source_cluster)
        .bind(exclusive_begin)
        .bind(inclusive_end)
        .execute(&self.pool)
        .await
        .map_err(|e| sqlx_to_persistence_error("range_delete_replication_task_from_dlq", e))?;
        Ok(result.rows_affected())
    }

    async fn get_replication_dlq_size(&self, shard_id: i32, source_cluster: &str) -> Result<u64, PersistenceError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM replication_dlq WHERE shard_id = ? AND source_cluster = ?",
        )
        .bind(shard_id)
        .bind(source_cluster)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| sqlx_to_persistence_error("get_replication_dlq_size", e))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn append_history_nodes(
        &self,
        req: AppendHistoryNodesRequest,
    ) -> Result<AppendHistoryNodesResponse, PersistenceError> {
        let mut tx = self.begin("append_history_nodes").await?;
        let resp = store::append_history_nodes(&mut *tx, &req).await?;
        Self::commit("append_history_nodes", tx).await?;
        debug!(
            target: "durastore::providers::sqlite",
            tree_id = %req.branch_token.tree_id,
            branch_id = %req.branch_token.branch_id,
            transaction_id = req.transaction_id,
            size = resp.size,
            "history nodes appended"
        );
        Ok(resp)
    }

    async fn read_history_nodes(&self, req: ReadHistoryNodesRequest) -> Result<Vec<HistoryNode>, PersistenceError> {
        let rows = sqlx::query_as::<_, (i64, i64, String, Vec<u8>)>(
            r#"
            SELECT node_id, txn_id, encoding, data FROM history_node
            WHERE tree_id = ? AND branch_id = ? AND node_id >= ? AND node_id < ?
            ORDER BY node_id LIMIT ?
            "#,
        )
        .bind(&req.tree_id)
        .bind(&req.branch_id)
        .bind(req.min_node_id)
        .bind(req.max_node_id)
        .bind(limit(req.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| sqlx_to_persistence_error("read_history_nodes", e))?;

        rows.into_iter()
            .map(|(node_id, transaction_id, encoding, data)| {
                Ok(HistoryNode {
                    node_id,
                    transaction_id,
                    blob: DataBlob {
                        encoding: parse_encoding(&encoding)?,
                        data,
                    },
                })
            })
            .collect()
    }

    async fn fork_history_branch(
        &self,
        req: ForkHistoryBranchRequest,
    ) -> Result<ForkHistoryBranchResponse, PersistenceError> {
        let mut tx = self.begin("fork_history_branch").await?;
        let resp = store::fork_history_branch(&mut *tx, &req).await?;
        Self::commit("fork_history_branch", tx).await?;
        debug!(
            target: "durastore::providers::sqlite",
            tree_id = %resp.new_branch_token.tree_id,
            new_branch_id = %resp.new_branch_token.branch_id,
            fork_node_id = req.fork_node_id,
            "history branch forked"
        );
        Ok(resp)
    }

    async fn complete_fork_branch(&self, req: CompleteForkBranchRequest) -> Result<(), PersistenceError> {
        let mut tx = self.begin("complete_fork_branch").await?;
        store::complete_fork_branch(&mut *tx, &req).await?;
        Self::commit("complete_fork_branch", tx).await
    }

    async fn delete_history_branch(&self, branch_token: BranchToken) -> Result<(), PersistenceError> {
        let mut tx = self.begin("delete_history_branch").await?;
        store::delete_history_branch(&mut *tx, &branch_token).await?;
        Self::commit("delete_history_branch", tx).await
    }

    async fn get_history_tree(&self, tree_id: &str) -> Result<GetHistoryTreeResponse, PersistenceError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| sqlx_to_persistence_error("get_history_tree", e))?;
        let branches = StoreTxn::tree_branches(&mut *conn, tree_id).await?;
        Ok(GetHistoryTreeResponse { branches })
    }

    fn as_admin(&self) -> Option<&dyn ProviderAdmin> {
        Some(self)
    }
}

#[async_trait]
impl ProviderAdmin for SqliteProvider {
    async fn list_current_executions(
        &self,
        req: ListExecutionsRequest,
    ) -> Result<ListCurrentExecutionsResponse, PersistenceError> {
        let page_size = self.options.page_size(req.page_size);
        let rows = match decode_page_token::<(String, String)>(req.next_page_token.as_deref())? {
            Some((domain_id, workflow_id)) => sqlx::query_scalar::<_, String>(
                r#"
                SELECT data FROM current_executions
                WHERE shard_id = ? AND (domain_id, workflow_id) > (?, ?)
                ORDER BY domain_id, workflow_id LIMIT ?
                "#,
            )
            .bind(req.shard_id)
            .bind(domain_id)
            .bind(workflow_id)
            .bind(limit(page_size + 1))
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query_scalar::<_, String>(
                "SELECT data FROM current_executions WHERE shard_id = ? ORDER BY domain_id, workflow_id LIMIT ?",
            )
            .bind(req.shard_id)
            .bind(limit(page_size + 1))
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(|e| sqlx_to_persistence_error("list_current_executions", e))?;
        let executions: Vec<CurrentExecution> = decode_rows(rows)?;
        let (executions, next_page_token) =
            paginate(executions, page_size, |c| (c.domain_id.clone(), c.workflow_id.clone()))?;
        Ok(ListCurrentExecutionsResponse {
            executions,
            next_page_token,
        })
    }

    async fn list_concrete_executions(
        &self,
        req: ListExecutionsRequest,
    ) -> Result<ListConcreteExecutionsResponse, PersistenceError> {
        let page_size = self.options.page_size(req.page_size);
        let rows = match decode_page_token::<ExecutionKey>(req.next_page_token.as_deref())? {
            Some(key) => sqlx::query_scalar::<_, String>(
                r#"
                SELECT state FROM executions
                WHERE shard_id = ? AND (domain_id, workflow_id, run_id) > (?, ?, ?)
                ORDER BY domain_id, workflow_id, run_id LIMIT ?
                "#,
            )
            .bind(req.shard_id)
            .bind(key.domain_id)
            .bind(key.workflow_id)
            .bind(key.run_id)
            .bind(limit(page_size + 1))
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query_scalar::<_, String>(
                "SELECT state FROM executions WHERE shard_id = ? ORDER BY domain_id, workflow_id, run_id LIMIT ?",
            )
            .bind(req.shard_id)
            .bind(limit(page_size + 1))
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(|e| sqlx_to_persistence_error("list_concrete_executions", e))?;
        let states: Vec<WorkflowMutableState> = decode_rows(rows)?;
        let executions = states
            .into_iter()
            .map(|s| ConcreteExecution {
                execution_info: s.execution_info,
                version_histories: s.version_histories,
            })
            .collect();
        let (executions, next_page_token) = paginate(executions, page_size, |e| e.execution_info.key())?;
        Ok(ListConcreteExecutionsResponse {
            executions,
            next_page_token,
        })
    }

    async fn get_all_history_tree_branches(
        &self,
        req: GetAllHistoryTreeBranchesRequest,
    ) -> Result<GetAllHistoryTreeBranchesResponse, PersistenceError> {
        let page_size = self.options.page_size(req.page_size);
        let rows = match decode_page_token::<(String, String)>(req.next_page_token.as_deref())? {
            Some((tree_id, branch_id)) => sqlx::query_scalar::<_, String>(
                r#"
                SELECT data FROM history_tree
                WHERE (tree_id, branch_id) > (?, ?)
                ORDER BY tree_id, branch_id LIMIT ?
                "#,
            )
            .bind(tree_id)
            .bind(branch_id)
            .bind(limit(page_size + 1))
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query_scalar::<_, String>("SELECT data FROM history_tree ORDER BY tree_id, branch_id LIMIT ?")
                .bind(limit(page_size + 1))
                .fetch_all(&self.pool)
                .await,
        }
        .map_err(|e| sqlx_to_persistence_error("get_all_history_tree_branches", e))?;
        let branches: Vec<HistoryBranchDetail> = decode_rows(rows)?;
        let (branches, next_page_token) = paginate(branches, page_size, |b| (b.tree_id.clone(), b.branch_id.clone()))?;
        Ok(GetAllHistoryTreeBranchesResponse {
            branches,
            next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryEvent;

    #[test]
    fn busy_errors_are_transient() {
        let err = sqlx_to_persistence_error("update_shard", sqlx::Error::Protocol("database is locked".into()));
        assert!(matches!(err, PersistenceError::ServiceBusy { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn key_collisions_are_condition_failures() {
        let err = sqlx_to_persistence_error(
            "put_tasks",
            sqlx::Error::Protocol("UNIQUE constraint failed: transfer_tasks.task_id".into()),
        );
        assert!(matches!(err, PersistenceError::ConditionFailed(_)));
    }

    #[test]
    fn pool_timeout_maps_to_timeout() {
        let err = sqlx_to_persistence_error("get_shard", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, PersistenceError::Timeout { .. }));
        let err = sqlx_to_persistence_error("get_shard", sqlx::Error::RowNotFound);
        assert!(matches!(err, PersistenceError::Internal { .. }));
    }

    #[test]
    fn timeout_in_message_is_not_a_timeout() {
        let err = sqlx_to_persistence_error(
            "read_history_nodes",
            sqlx::Error::Protocol("column timeout_ms has an unexpected type".into()),
        );
        assert!(matches!(err, PersistenceError::Internal { .. }), "got {err:?}");
        let err = sqlx_to_persistence_error("get_shard", sqlx::Error::Protocol("statement timeout".into()));
        assert!(!matches!(err, PersistenceError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn unique_violation_from_database_is_condition_failure() {
        let provider = SqliteProvider::new_in_memory().await.unwrap();
        sqlx::query("CREATE TABLE dup_check (id INTEGER PRIMARY KEY)")
            .execute(&provider.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO dup_check (id) VALUES (1)")
            .execute(&provider.pool)
            .await
            .unwrap();
        let e = sqlx::query("INSERT INTO dup_check (id) VALUES (1)")
            .execute(&provider.pool)
            .await
            .unwrap_err();
        assert!(sqlite_primary_code(&e).is_some());
        let err = sqlx_to_persistence_error("put_run", e);
        assert!(matches!(err, PersistenceError::ConditionFailed(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let provider = SqliteProvider::new_in_memory().await.unwrap();
        SqliteProvider::create_schema(&provider.pool).await.unwrap();
        provider.create_shard(ShardInfo::new(1, "a", 1)).await.unwrap();
        assert_eq!(provider.get_shard(1).await.unwrap().owner, "a");
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("store.db").display());

        let token = BranchToken::new_root("tree");
        {
            let provider = SqliteProvider::new(&url, None).await.unwrap();
            provider.create_shard(ShardInfo::new(7, "host-a", 3)).await.unwrap();
            provider
                .append_history_nodes(AppendHistoryNodesRequest {
                    is_new_branch: true,
                    info: String::new(),
                    branch_token: token.clone(),
                    events: vec![HistoryEvent::new(1, 1, "WorkflowExecutionStarted")],
                    transaction_id: 1,
                })
                .await
                .unwrap();
        }

        let provider = SqliteProvider::new(&url, None).await.unwrap();
        assert_eq!(provider.get_shard(7).await.unwrap().range_id, 3);
        let resp = provider
            .read_history_branch(ReadHistoryBranchRequest {
                branch_token: token,
                min_event_id: 1,
                max_event_id: 2,
                page_size: 10,
                next_page_token: None,
            })
            .await
            .unwrap();
        assert_eq!(resp.events.len(), 1);
        assert_eq!(resp.events[0].event_type, "WorkflowExecutionStarted");
    }

    #[test]
    fn out_of_range_timestamp_is_invalid() {
        let far = DateTime::<Utc>::MAX_UTC;
        assert!(matches!(nanos(far), Err(PersistenceError::InvalidRequest(_))));
    }
}
