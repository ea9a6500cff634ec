//! 任务执行流程 - 流程层
//!
//! 核心职责：定义“一个账号 + 一个分类”的完整采集流程
//!
//! 状态顺序：
//! `Idle → Authenticating → Navigated → Filtered → Paginating{n} → Completed`，
//! 任一状态都可能进入 `Aborted`。
//!
//! 无论成功与否，每次运行都恰好写入一条执行记录。

use std::fmt;
use std::sync::Arc;

use chrono::Local;
use tracing::debug;

use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::http::load_identity;
use crate::infrastructure::surface::{
    AutomationSurface, RowLink, RowSnapshot, SessionFactory, SessionSpec, TableSnapshot,
};
use crate::models::{Credentials, DocFormat, ExecutionRecord, Job, RunStatus};
use crate::services::date_filter::{resolve_issued_column, row_issued_on};
use crate::services::{
    classify_row, resolve_status_column, DateFilterResolver, DownloadCapture, HistorySink,
    PageAdvance, PaginationWalker,
};
use crate::services::file_store::row_token;
use crate::utils::{normalize_signal, truncate_text, RunLog};
use crate::workflow::authenticator::{capture_debug_snapshot, Authenticator};
use crate::workflow::run_ctx::RunContext;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Authenticating,
    Navigated,
    Filtered,
    Paginating { page: usize },
    Completed,
    Aborted,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Authenticating => write!(f, "authenticating"),
            JobState::Navigated => write!(f, "navigated"),
            JobState::Filtered => write!(f, "filtered"),
            JobState::Paginating { page } => write!(f, "paginating(page={})", page),
            JobState::Completed => write!(f, "completed"),
            JobState::Aborted => write!(f, "aborted"),
        }
    }
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub total_files: usize,
    pub detail: String,
    pub final_state: JobState,
    pub log: RunLog,
}

/// 采集过程中的计数
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    pages: usize,
    rows_seen: usize,
    rows_kept: usize,
    files: usize,
    failures: usize,
}

impl Tally {
    fn summary(&self) -> String {
        format!(
            "{} arquivo(s), {} falha(s), {} linha(s) selecionada(s) de {}, {} página(s)",
            self.files, self.failures, self.rows_kept, self.rows_seen, self.pages
        )
    }
}

/// 行内链接的匹配提示
fn link_hints(format: DocFormat) -> &'static [&'static str] {
    match format {
        DocFormat::Xml => &["XML"],
        DocFormat::Pdf => &["PDF", "DANFSE", "DANFE"],
    }
}

/// 在行内选择对应格式的下载链接
pub fn select_link(row: &RowSnapshot, format: DocFormat) -> Option<&RowLink> {
    row.links.iter().find(|link| {
        let signal = normalize_signal(&format!(
            "{} {} {}",
            link.label,
            link.href.as_deref().unwrap_or_default(),
            link.hint
        ));
        link_hints(format).iter().any(|hint| signal.contains(hint))
    })
}

/// 任务执行器
///
/// - 每次运行通过工厂打开独立的会话，结束时关闭
/// - 只依赖 `AutomationSurface` 能力
pub struct JobDirector<F: SessionFactory> {
    config: Config,
    factory: F,
    history: Arc<dyn HistorySink>,
    authenticator: Authenticator,
}

impl<F: SessionFactory> JobDirector<F> {
    pub fn new(config: Config, factory: F, history: Arc<dyn HistorySink>) -> Self {
        let authenticator = Authenticator::new(&config);
        Self {
            config,
            factory,
            history,
            authenticator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 单独运行一个任务（独立的文件序号）
    pub async fn run_job(&self, job: &Job) -> RunReport {
        let mut ctx = RunContext::new(job.target_dir.clone());
        self.run(job, &mut ctx).await
    }

    /// 运行任务，`ctx` 在同一任务目录的多个分类间共享
    pub async fn run(&self, job: &Job, ctx: &mut RunContext) -> RunReport {
        let mut log = RunLog::new(format!("[{}/{}]", job.account.name, job.category));
        let mut state = JobState::Idle;
        let files_before = ctx.files().len();

        let simulated = !self.config.live || job.credentials.is_none();
        let outcome = if simulated {
            self.simulate(job, ctx, &mut log).await
        } else {
            self.execute(job, ctx, &mut log, &mut state).await
        };

        let total_files = ctx.files().len() - files_before;
        let (status, detail) = match outcome {
            Ok(_) if simulated => {
                state = JobState::Completed;
                (RunStatus::Simulado, "execução simulada".to_string())
            }
            Ok(tally) => {
                state = JobState::Completed;
                let status = if tally.failures > 0 {
                    RunStatus::Parcial
                } else {
                    RunStatus::Sucesso
                };
                (status, tally.summary())
            }
            Err(e) => {
                log.error(format!("❌ 任务中止 (状态 {}): {}", state, e));
                state = JobState::Aborted;
                (RunStatus::Erro, e.to_string())
            }
        };

        log.info(format!(
            "🏁 结束: {} | {} 个文件 | {}",
            status.as_str(),
            total_files,
            detail
        ));

        // 无论结果如何都写入执行记录
        let record = ExecutionRecord {
            owner: job.owner.clone(),
            account_id: job.account.id.clone(),
            account_name: job.account.name.clone(),
            mode: job.mode,
            total_files,
            status,
            detail: detail.clone(),
            timestamp: Local::now(),
        };
        if let Err(e) = self.history.record(&record).await {
            log.error(format!("❌ 写入执行记录失败: {}", e));
        }

        RunReport {
            status,
            total_files,
            detail,
            final_state: state,
            log,
        }
    }

    async fn simulate(&self, job: &Job, ctx: &RunContext, log: &mut RunLog) -> Result<Tally, AppError> {
        if job.credentials.is_none() {
            log.info("🧪 未配置账号密码或证书，模拟运行");
        } else {
            log.info("🧪 实际采集已关闭，模拟运行");
        }
        ctx.ensure_root().await?;
        Ok(Tally::default())
    }

    /// 实际采集：配置校验 → 打开会话 → 采集 → 关闭会话
    async fn execute(
        &self,
        job: &Job,
        ctx: &mut RunContext,
        log: &mut RunLog,
        state: &mut JobState,
    ) -> Result<Tally, AppError> {
        let certificate = match &job.credentials {
            Some(Credentials::Certificate(bundle)) => {
                // 证书问题在打开会话之前就是致命错误
                load_identity(bundle)?;
                Some(bundle.clone())
            }
            _ => None,
        };

        ctx.ensure_root().await?;

        let spec = SessionSpec {
            download_dir: std::env::temp_dir().join(format!(
                "nfse-harvest-{}-{}",
                std::process::id(),
                Local::now().format("%Y%m%d%H%M%S%3f")
            )),
            certificate,
        };
        let surface = self.factory.open(&spec).await?;

        let result = self.drive(&surface, job, ctx, log, state).await;

        if let Err(e) = surface.close().await {
            debug!("关闭会话失败: {}", e);
        }
        let _ = tokio::fs::remove_dir_all(&spec.download_dir).await;

        result
    }

    async fn drive<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        job: &Job,
        ctx: &mut RunContext,
        log: &mut RunLog,
        state: &mut JobState,
    ) -> Result<Tally, AppError> {
        // ========== 登录 ==========
        *state = JobState::Authenticating;
        if let Some(credentials) = &job.credentials {
            if let Err(e) = self.authenticator.login(surface, credentials, log).await {
                if let AppError::Auth(_) = e {
                    match capture_debug_snapshot(surface, ctx.job_root()).await {
                        Ok(paths) => log.warn(format!("🧾 登录失败现场已保存 ({} 个文件)", paths.len())),
                        Err(snap) => log.warn(format!("⚠️ 保存登录失败现场出错: {}", snap)),
                    }
                }
                return Err(e);
            }
        }

        // ========== 进入分类 ==========
        let url = self.config.category_url(job.category);
        log.info(format!("🧭 打开分类 {}: {}", job.category, url));
        surface.navigate(url).await?;
        surface.wait_for_network_idle(self.config.settle_timeout()).await?;
        *state = JobState::Navigated;

        // ========== 日期筛选 ==========
        let filter = DateFilterResolver::new(self.config.settle_timeout())
            .apply(surface, &job.range)
            .await?;
        log.info(format!(
            "📅 日期筛选: {:?} ({})",
            filter.strategy,
            job.range.period_key()
        ));
        *state = JobState::Filtered;

        // ========== 翻页采集 ==========
        let capture = DownloadCapture::new(self.config.capture_timeout());
        let mut walker = PaginationWalker::new(self.config.settle_timeout());
        let mut tally = Tally::default();

        loop {
            let page = walker.current_page();
            *state = JobState::Paginating { page };
            tally.pages = page;

            let table = surface.table_snapshot().await?;
            log.info(format!("📄 第 {} 页: {} 行", page, table.rows.len()));
            self.process_page(surface, job, ctx, log, &capture, &table, filter.use_table_filter, &mut tally)
                .await;

            if page >= self.config.max_pages {
                log.warn(format!("⚠️ 已达到最大页数 {}", self.config.max_pages));
                break;
            }
            match walker.advance(surface).await {
                Ok(PageAdvance::Advanced(_)) => continue,
                Ok(PageAdvance::Exhausted) => break,
                Err(e) => {
                    log.warn(format!("⚠️ 翻页失败，停止翻页: {}", e));
                    break;
                }
            }
        }

        Ok(tally)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_page<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        job: &Job,
        ctx: &mut RunContext,
        log: &mut RunLog,
        capture: &DownloadCapture,
        table: &TableSnapshot,
        use_table_filter: bool,
        tally: &mut Tally,
    ) {
        let status_column = resolve_status_column(&table.headers);
        let issued_column = resolve_issued_column(&table.headers);

        for row in &table.rows {
            tally.rows_seen += 1;
            let position = tally.rows_seen;

            // 先判断状态，被排除的行不触发下载
            let classification = classify_row(row, status_column);
            if !job.category.keeps(classification.is_cancelled) {
                debug!(
                    "跳过第 {} 行 (作废={}): {}",
                    position,
                    classification.is_cancelled,
                    truncate_text(&classification.normalized, 60)
                );
                continue;
            }

            if use_table_filter {
                match row_issued_on(row, issued_column) {
                    Some(date) if !job.range.contains(date) => {
                        debug!("跳过第 {} 行: 日期 {} 不在区间内", position, date);
                        continue;
                    }
                    Some(_) => {}
                    None => log.warn(format!("⚠️ 第 {} 行没有可识别的日期，保留", position)),
                }
            }

            tally.rows_kept += 1;
            let token = row_token(&row.text, position);

            for &format in &job.formats {
                let Some(link) = select_link(row, format) else {
                    log.warn(format!("⚠️ 第 {} 行没有 {} 链接", position, format));
                    tally.failures += 1;
                    continue;
                };

                match capture.capture(surface, link, format).await {
                    Ok(file) => match ctx.store(job.category, &token, &file).await {
                        Ok(path) => {
                            tally.files += 1;
                            log.info(format!(
                                "✅ 第 {} 行 {} 已保存 ({}): {}",
                                position,
                                format,
                                file.channel,
                                path.display()
                            ));
                        }
                        Err(e) => {
                            tally.failures += 1;
                            log.error(format!("❌ 第 {} 行 {} 写入失败: {}", position, format, e));
                        }
                    },
                    Err(e) => {
                        tally.failures += 1;
                        log.error(format!("❌ 第 {} 行 {} 下载失败: {}", position, format, e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::surface::ElementHandle;

    fn link(label: &str, href: &str, hint: &str) -> RowLink {
        RowLink {
            handle: ElementHandle(label.to_string()),
            label: label.to_string(),
            href: Some(href.to_string()),
            hint: hint.to_string(),
        }
    }

    #[test]
    fn test_select_link_by_label_href_and_hint() {
        let row = RowSnapshot {
            text: String::new(),
            cells: Vec::new(),
            links: vec![
                link("", "/Notas/Download/1?tipo=xml", ""),
                link("", "#", "Baixar DANFSe"),
            ],
        };
        assert_eq!(select_link(&row, DocFormat::Xml).unwrap().href.as_deref(), Some("/Notas/Download/1?tipo=xml"));
        assert_eq!(select_link(&row, DocFormat::Pdf).unwrap().hint, "Baixar DANFSe");
    }

    #[test]
    fn test_select_link_missing() {
        let row = RowSnapshot {
            links: vec![link("Visualizar", "/Notas/Visualizar/1", "")],
            ..Default::default()
        };
        assert!(select_link(&row, DocFormat::Pdf).is_none());
    }

    #[test]
    fn test_tally_summary() {
        let tally = Tally {
            pages: 2,
            rows_seen: 10,
            rows_kept: 4,
            files: 8,
            failures: 0,
        };
        assert!(tally.summary().starts_with("8 arquivo(s), 0 falha(s)"));
    }
}
