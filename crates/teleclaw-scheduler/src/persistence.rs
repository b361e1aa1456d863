//! SQLite-backed record store for tasks and execution history.
//! Survives restarts; the `status` column is the authority on which tasks
//! should be running.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use teleclaw_core::error::{Result, TeleclawError};
use teleclaw_core::traits::RecordStore;
use teleclaw_core::types::{Task, TaskExecutionRecord, TaskStatus};

const TASK_COLUMNS: &str = "id, name, task_type, account_ids, target_ids, config, priority, \
                            status, next_run_at, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, task_id, executed_at, success, account_id, target_id, \
                                 target_message_id, content, error_message, retry_count";

/// SQLite-backed record store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        // Best effort.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(())).ok();
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.lock()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                task_type TEXT NOT NULL,          -- 'group_posting', 'channel_monitoring'
                account_ids TEXT NOT NULL,        -- JSON array
                target_ids TEXT NOT NULL,         -- JSON array
                config TEXT NOT NULL,             -- JSON TaskConfig
                priority INTEGER NOT NULL DEFAULT 5,
                status TEXT NOT NULL DEFAULT 'stopped',
                next_run_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS task_executions (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                executed_at TEXT NOT NULL,
                success INTEGER NOT NULL,
                account_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                target_message_id TEXT,
                content TEXT NOT NULL DEFAULT '',
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_executions_task ON task_executions(task_id, executed_at);
            CREATE INDEX IF NOT EXISTS idx_executions_account ON task_executions(account_id, executed_at);
            CREATE INDEX IF NOT EXISTS idx_executions_time ON task_executions(executed_at);
         ",
            )
            .map_err(|e| TeleclawError::Store(format!("Migration: {e}")))
    }

    fn query_tasks(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Task>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args, TaskRow::from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<TaskRow>>>()
            .map_err(db_err)?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    fn query_executions(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<TaskExecutionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args, ExecutionRow::from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<ExecutionRow>>>()
            .map_err(db_err)?;
        rows.into_iter().map(ExecutionRow::into_record).collect()
    }
}

fn db_err(e: rusqlite::Error) -> TeleclawError {
    TeleclawError::Store(e.to_string())
}

/// Fixed-width UTC timestamps so text comparison matches time order.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| TeleclawError::Store(format!("bad timestamp '{s}': {e}")))
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

struct TaskRow {
    id: String,
    name: String,
    task_type: String,
    account_ids: String,
    target_ids: String,
    config: String,
    priority: i64,
    status: String,
    next_run_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            task_type: row.get(2)?,
            account_ids: row.get(3)?,
            target_ids: row.get(4)?,
            config: row.get(5)?,
            priority: row.get(6)?,
            status: row.get(7)?,
            next_run_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            task_type: self.task_type.parse()?,
            account_ids: serde_json::from_str(&self.account_ids)?,
            target_ids: serde_json::from_str(&self.target_ids)?,
            config: serde_json::from_str(&self.config)?,
            priority: u8::try_from(self.priority)
                .map_err(|_| TeleclawError::Store(format!("bad priority {}", self.priority)))?,
            status: self.status.parse()?,
            next_run_at: self.next_run_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
            name: self.name,
        })
    }
}

struct ExecutionRow {
    id: String,
    task_id: String,
    executed_at: String,
    success: bool,
    account_id: String,
    target_id: String,
    target_message_id: Option<String>,
    content: String,
    error_message: Option<String>,
    retry_count: u32,
}

impl ExecutionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            executed_at: row.get(2)?,
            success: row.get::<_, i32>(3)? != 0,
            account_id: row.get(4)?,
            target_id: row.get(5)?,
            target_message_id: row.get(6)?,
            content: row.get(7)?,
            error_message: row.get(8)?,
            retry_count: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<TaskExecutionRecord> {
        Ok(TaskExecutionRecord {
            executed_at: parse_ts(&self.executed_at)?,
            id: self.id,
            task_id: self.task_id,
            success: self.success,
            account_id: self.account_id,
            target_id: self.target_id,
            target_message_id: self.target_message_id,
            content: self.content,
            error_message: self.error_message,
            retry_count: self.retry_count,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_task(&self, task: &Task) -> Result<()> {
        let accounts = serde_json::to_string(&task.account_ids)?;
        let targets = serde_json::to_string(&task.target_ids)?;
        let config = serde_json::to_string(&task.config)?;
        self.lock()
            .execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    task.id,
                    task.name,
                    task.task_type.as_str(),
                    accounts,
                    targets,
                    config,
                    task.priority as i64,
                    task.status.as_str(),
                    task.next_run_at.map(ts),
                    ts(task.created_at),
                    ts(task.updated_at),
                ],
            )
            .map_err(|e| TeleclawError::Store(format!("Create task: {e}")))?;
        Ok(())
    }

    async fn find_task_by_id(&self, id: &str) -> Result<Option<Task>> {
        let row = {
            let conn = self.lock();
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id],
                TaskRow::from_row,
            )
            .optional()
            .map_err(db_err)?
        };
        row.map(TaskRow::into_task).transpose()
    }

    async fn find_all_tasks(&self) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY priority DESC, created_at, id"),
            &[],
        )
    }

    async fn find_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1
                 ORDER BY priority DESC, created_at, id"
            ),
            &[&status.as_str()],
        )
    }

    async fn find_tasks_by_account(&self, account_id: &str) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE EXISTS (SELECT 1 FROM json_each(tasks.account_ids) WHERE value = ?1)
                 ORDER BY priority DESC, created_at, id"
            ),
            &[&account_id],
        )
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let accounts = serde_json::to_string(&task.account_ids)?;
        let targets = serde_json::to_string(&task.target_ids)?;
        let config = serde_json::to_string(&task.config)?;
        let changed = self
            .lock()
            .execute(
                "UPDATE tasks SET name = ?2, task_type = ?3, account_ids = ?4, target_ids = ?5,
                        config = ?6, priority = ?7, next_run_at = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    task.id,
                    task.name,
                    task.task_type.as_str(),
                    accounts,
                    targets,
                    config,
                    task.priority as i64,
                    task.next_run_at.map(ts),
                    ts(task.updated_at),
                ],
            )
            .map_err(|e| TeleclawError::Store(format!("Update task: {e}")))?;
        if changed == 0 {
            return Err(TeleclawError::TaskNotFound(task.id.clone()));
        }
        Ok(())
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<bool> {
        let changed = self
            .lock()
            .execute(
                "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), ts(Utc::now())],
            )
            .map_err(|e| TeleclawError::Store(format!("Update status: {e}")))?;
        Ok(changed > 0)
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool> {
        let changed = self
            .lock()
            .execute(
                "UPDATE tasks SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
                params![id, expected.as_str(), new.as_str(), ts(Utc::now())],
            )
            .map_err(|e| TeleclawError::Store(format!("Transition status: {e}")))?;
        Ok(changed > 0)
    }

    async fn update_next_run(&self, id: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        self.lock()
            .execute(
                "UPDATE tasks SET next_run_at = ?2 WHERE id = ?1",
                params![id, next_run_at.map(ts)],
            )
            .map_err(|e| TeleclawError::Store(format!("Update next run: {e}")))?;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        let changed = self
            .lock()
            .execute("DELETE FROM tasks WHERE id = ?1", [id])
            .map_err(|e| TeleclawError::Store(format!("Delete task: {e}")))?;
        Ok(changed > 0)
    }

    async fn create_execution_record(&self, record: &TaskExecutionRecord) -> Result<()> {
        self.lock()
            .execute(
                &format!(
                    "INSERT INTO task_executions ({EXECUTION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    record.id,
                    record.task_id,
                    ts(record.executed_at),
                    record.success as i32,
                    record.account_id,
                    record.target_id,
                    record.target_message_id,
                    record.content,
                    record.error_message,
                    record.retry_count,
                ],
            )
            .map_err(|e| TeleclawError::Store(format!("Create execution: {e}")))?;
        Ok(())
    }

    async fn find_executions_by_task(
        &self,
        task_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TaskExecutionRecord>> {
        self.query_executions(
            &format!(
                "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE task_id = ?1
                 ORDER BY executed_at DESC LIMIT ?2"
            ),
            &[&task_id, &sql_limit(limit)],
        )
    }

    async fn find_executions_by_account(
        &self,
        account_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TaskExecutionRecord>> {
        self.query_executions(
            &format!(
                "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE account_id = ?1
                 ORDER BY executed_at DESC LIMIT ?2"
            ),
            &[&account_id, &sql_limit(limit)],
        )
    }

    async fn find_recent_executions(&self, limit: usize) -> Result<Vec<TaskExecutionRecord>> {
        self.query_executions(
            &format!(
                "SELECT {EXECUTION_COLUMNS} FROM task_executions
                 ORDER BY executed_at DESC LIMIT ?1"
            ),
            &[&sql_limit(Some(limit))],
        )
    }

    async fn find_failed_executions(&self, limit: usize) -> Result<Vec<TaskExecutionRecord>> {
        self.query_executions(
            &format!(
                "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE success = 0
                 ORDER BY executed_at DESC LIMIT ?1"
            ),
            &[&sql_limit(Some(limit))],
        )
    }

    async fn delete_executions_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.lock()
            .execute(
                "DELETE FROM task_executions WHERE executed_at < ?1",
                [ts(cutoff)],
            )
            .map_err(|e| TeleclawError::Store(format!("Cleanup executions: {e}")))
    }
}
