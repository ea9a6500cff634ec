//! 执行记录写入 - 业务能力层
//!
//! 历史库只写不读：每次任务运行结束时写入一条记录。

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::error::{AppError, AppResult, StorageError};
use crate::models::ExecutionRecord;

/// 执行记录写入接口
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, record: &ExecutionRecord) -> AppResult<()>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS historico (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    account_id TEXT NOT NULL,
    account_name TEXT NOT NULL,
    mode TEXT NOT NULL,
    total_files INTEGER NOT NULL,
    status TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_historico_owner ON historico(owner);
"#;

/// SQLite 历史库，所有访问通过 `Mutex<Connection>` 串行化
#[derive(Clone)]
pub struct SqliteHistory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistory {
    /// 打开（或创建）历史库
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("📚 历史库已打开: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 记录条数
    pub fn count(&self) -> AppResult<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM historico", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Other(anyhow!("历史库连接锁已损坏")))
    }
}

#[async_trait]
impl HistorySink for SqliteHistory {
    async fn record(&self, record: &ExecutionRecord) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO historico (owner, account_id, account_name, mode, total_files, status, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.owner,
                record.account_id,
                record.account_name,
                record.mode.as_str(),
                record.total_files as i64,
                record.status.as_str(),
                record.detail,
                record.timestamp.to_rfc3339(),
            ],
        )?;
        debug!(
            "写入执行记录: {} / {} / {}",
            record.account_id,
            record.status.as_str(),
            record.total_files
        );
        Ok(())
    }
}

/// 内存历史，用于测试与无库运行
#[derive(Clone, Default)]
pub struct MemoryHistory {
    records: Arc<Mutex<Vec<ExecutionRecord>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn record(&self, record: &ExecutionRecord) -> AppResult<()> {
        self.records
            .lock()
            .map_err(|_| AppError::Other(anyhow!("内存历史锁已损坏")))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionMode, RunStatus};
    use chrono::Local;

    fn sample(status: RunStatus) -> ExecutionRecord {
        ExecutionRecord {
            owner: "admin".to_string(),
            account_id: "1".to_string(),
            account_name: "Empresa A".to_string(),
            mode: ExecutionMode::Lote,
            total_files: 4,
            status,
            detail: "4 arquivos".to_string(),
            timestamp: Local::now(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_history_inserts() {
        let history = SqliteHistory::open_in_memory().unwrap();
        history.record(&sample(RunStatus::Sucesso)).await.unwrap();
        history.record(&sample(RunStatus::Erro)).await.unwrap();
        assert_eq!(history.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_history_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("historico.db");
        let history = SqliteHistory::open(&path).unwrap();
        history.record(&sample(RunStatus::Parcial)).await.unwrap();
        assert!(path.exists());
        assert_eq!(history.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_history() {
        let history = MemoryHistory::new();
        history.record(&sample(RunStatus::Simulado)).await.unwrap();
        let records = history.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RunStatus::Simulado);
    }
}
