//! 应用入口 - 编排层
//!
//! 管理应用生命周期：打开历史库、加载账号、按执行模式调度、输出统计。

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::browser::ChromeSessionFactory;
use crate::config::Config;
use crate::models::{load_accounts, Account, ExecutionMode};
use crate::orchestrator::batch_coordinator::{BatchCoordinator, BatchSummary};
use crate::services::{HistorySink, SqliteHistory};
use crate::utils::logging::{log_startup, print_final_stats};
use crate::workflow::JobDirector;

/// 应用主结构
pub struct App {
    config: Config,
    accounts: Vec<Account>,
    history: Arc<dyn HistorySink>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        let history = SqliteHistory::open(&config.history_db)?;

        info!("\n📁 正在加载账号...");
        let accounts = load_accounts(&config.accounts_file).await?;

        log_startup(config.live, accounts.len());

        Ok(Self {
            config,
            accounts,
            history: Arc::new(history),
        })
    }

    pub fn with_history(config: Config, accounts: Vec<Account>, history: Arc<dyn HistorySink>) -> Self {
        Self {
            config,
            accounts,
            history,
        }
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<BatchSummary> {
        if self.accounts.is_empty() {
            warn!("⚠️ 没有找到任何账号，程序结束");
            return Ok(BatchSummary::default());
        }

        let factory = ChromeSessionFactory::new(&self.config);
        let director = JobDirector::new(self.config.clone(), factory, self.history.clone());
        let coordinator = BatchCoordinator::new(director);

        let summary = match self.config.mode {
            ExecutionMode::Manual => {
                let account = &self.accounts[0];
                if self.accounts.len() > 1 {
                    info!(
                        "💡 手动模式只处理第一个账号: {} (共 {} 个)",
                        account.name,
                        self.accounts.len()
                    );
                }
                coordinator.run_manual(account).await
            }
            ExecutionMode::Lote => coordinator.run_batch(&self.accounts).await,
        };

        print_final_stats(
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.files,
        );

        Ok(summary)
    }
}
