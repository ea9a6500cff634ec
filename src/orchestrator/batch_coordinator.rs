//! 账号批量调度 - 编排层
//!
//! ## 职责
//!
//! 1. 逐个账号顺序执行（不并发，避免门户过载）
//! 2. 实际采集模式下跳过没有可用凭据的账号（记一行日志，不算失败）
//! 3. 每个账号一个独立的任务目录，账号内各分类共用文件序号
//! 4. 单个账号失败不影响后续账号，只汇总日志和统计
//!
//! 执行记录由 `JobDirector` 自己写入，这里不重复写。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::infrastructure::surface::SessionFactory;
use crate::models::account::account_dir_name;
use crate::models::{Account, DateRange, Job, RunStatus};
use crate::utils::logging::log_account_start;
use crate::utils::RunLog;
use crate::workflow::{JobDirector, RunContext, RunReport};

/// 本次调度的任务根目录 `{base}/jobs/{period}/{timestamp}`
pub fn jobs_root(base: &Path, range: &DateRange, now: DateTime<Local>) -> PathBuf {
    base.join("jobs")
        .join(range.period_key())
        .join(now.format("%Y%m%d-%H%M%S").to_string())
}

/// 调度统计
#[derive(Debug, Default, Clone)]
pub struct BatchSummary {
    /// 成功（含模拟和部分成功）的任务数
    pub succeeded: usize,
    pub failed: usize,
    /// 被跳过的账号数
    pub skipped: usize,
    pub files: usize,
    pub reports: Vec<RunReport>,
    /// 按账号顺序拼接的完整日志
    pub log: RunLog,
}

impl BatchSummary {
    fn absorb(&mut self, mut report: RunReport) {
        match report.status {
            RunStatus::Erro => self.failed += 1,
            RunStatus::Sucesso | RunStatus::Parcial | RunStatus::Simulado => self.succeeded += 1,
        }
        self.files += report.total_files;
        self.log.append(std::mem::take(&mut report.log));
        self.reports.push(report);
    }
}

/// 账号调度器
pub struct BatchCoordinator<F: SessionFactory> {
    director: JobDirector<F>,
}

impl<F: SessionFactory> BatchCoordinator<F> {
    pub fn new(director: JobDirector<F>) -> Self {
        Self { director }
    }

    pub fn director(&self) -> &JobDirector<F> {
        &self.director
    }

    /// 手动模式：单个账号，任务目录不再按账号细分
    pub async fn run_manual(&self, account: &Account) -> BatchSummary {
        let config = self.director.config();
        let range = config.range();
        let root = jobs_root(&config.output_dir, &range, Local::now());

        let mut summary = BatchSummary::default();
        self.run_account(account, root, &mut summary).await;
        summary
    }

    /// 批量模式：所有账号顺序执行
    pub async fn run_batch(&self, accounts: &[Account]) -> BatchSummary {
        let config = self.director.config();
        let range = config.range();
        let batch_root = jobs_root(&config.output_dir, &range, Local::now());

        let mut summary = BatchSummary::default();
        let mut batch_log = RunLog::new("[lote]");
        batch_log.info(format!(
            "📦 开始批量采集: {} 个账号, 区间 {}",
            accounts.len(),
            range.period_key()
        ));
        summary.log.append(batch_log);

        for (idx, account) in accounts.iter().enumerate() {
            log_account_start(idx + 1, accounts.len(), &account.name);

            if config.live && account.credentials().is_none() {
                let mut skip_log = RunLog::new(format!("[{}]", account.name));
                skip_log.warn(format!(
                    "⏭️ 账号 {} ({}) 没有可用的账号密码或证书，已跳过",
                    account.name, account.id
                ));
                summary.log.append(skip_log);
                summary.skipped += 1;
                continue;
            }

            let root = batch_root.join(account_dir_name(&account.reference()));
            self.run_account(account, root, &mut summary).await;
        }

        summary
    }

    /// 对一个账号依次运行所有分类
    async fn run_account(&self, account: &Account, root: PathBuf, summary: &mut BatchSummary) {
        let config = self.director.config();
        let mut ctx = RunContext::new(root.clone());

        for &category in &config.categories {
            let job = Job {
                category,
                range: config.range(),
                formats: config.formats.clone(),
                target_dir: root.clone(),
                account: account.reference(),
                credentials: account.credentials(),
                mode: config.mode,
                owner: config.owner.clone(),
            };
            let report = self.director.run(&job, &mut ctx).await;
            summary.absorb(report);
        }
    }
}
