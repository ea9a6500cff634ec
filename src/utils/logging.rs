//! 日志工具模块
//!
//! tracing 订阅器初始化，以及每次运行的有序日志记录

use chrono::Local;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化 tracing，`RUST_LOG` 未设置时默认 info
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// 单次运行的日志记录
///
/// 每一行同时输出到 tracing，运行结束后整体返回给调用方。
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    prefix: String,
    lines: Vec<String>,
    warnings: usize,
    errors: usize,
}

impl RunLog {
    /// `prefix` 会出现在每一行日志前，如 `[Empresa A/emitidas]`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.push(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        self.push(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.push(LogLevel::Error, message.as_ref());
    }

    fn push(&mut self, level: LogLevel, message: &str) {
        let line = if self.prefix.is_empty() {
            message.to_string()
        } else {
            format!("{} {}", self.prefix, message)
        };

        match level {
            LogLevel::Info => info!("{}", line),
            LogLevel::Warn => {
                self.warnings += 1;
                warn!("{}", line)
            }
            LogLevel::Error => {
                self.errors += 1;
                error!("{}", line)
            }
        }

        self.lines
            .push(format!("[{}] {}", Local::now().format("%H:%M:%S"), line));
    }

    /// 合并另一段日志（批量运行时按账号拼接）
    pub fn append(&mut self, other: RunLog) {
        self.warnings += other.warnings;
        self.errors += other.errors;
        self.lines.extend(other.lines);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    /// 是否有某一行包含该片段
    pub fn contains(&self, fragment: &str) -> bool {
        self.lines.iter().any(|l| l.contains(fragment))
    }
}

/// 记录程序启动信息
pub fn log_startup(live: bool, accounts: usize) {
    info!("{}", "=".repeat(60));
    info!(
        "🚀 程序启动 - {}模式",
        if live { "实际采集" } else { "模拟" }
    );
    info!("👥 账号数量: {}", accounts);
    info!("{}", "=".repeat(60));
}

/// 记录账号开始信息
pub fn log_account_start(index: usize, total: usize, name: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 个账号: {}", index, total, name);
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(success: usize, failed: usize, skipped: usize, files: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!("完成时间: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}", success);
    info!("❌ 失败: {}", failed);
    info!("⏭️ 跳过: {}", skipped);
    info!("📄 文件: {}", files);
    info!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_log_keeps_order_and_counts() {
        let mut log = RunLog::new("[A/emitidas]");
        log.info("início");
        log.warn("linha 3 ignorada");
        log.error("falha");

        assert_eq!(log.lines().len(), 3);
        assert!(log.lines()[0].ends_with("[A/emitidas] início"));
        assert_eq!(log.warning_count(), 1);
        assert_eq!(log.error_count(), 1);
    }

    #[test]
    fn test_append() {
        let mut batch = RunLog::default();
        batch.info("lote");
        let mut run = RunLog::new("[B]");
        run.error("x");
        batch.append(run);
        assert_eq!(batch.lines().len(), 2);
        assert_eq!(batch.error_count(), 1);
        assert!(batch.contains("[B] x"));
    }
}
