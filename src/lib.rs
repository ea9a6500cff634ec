//! # NFS-e Harvest
//!
//! 从 NFS-e 门户批量下载已开具 / 已接收 / 已作废票据（XML 与 PDF）的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有浏览器资源，只暴露自动化能力
//! - `AutomationSurface` - 引擎依赖的全部能力（导航 / 定位 / 点击 / 事件捕获 / 直接请求）
//! - `ChromeSurface` - 基于 chromiumoxide 的实现
//! - `ScriptedSurface` - 按脚本回放 DOM 快照和事件的实现
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单行 / 单页
//! - `DownloadCapture` - 下载 / 弹窗 / 响应 / 超时四路竞争
//! - `classify_row` - 根据状态列和提示属性识别作废票据
//! - `DateFilterResolver` - 原生控件 → 历史控件 → 表格内比对
//! - `PaginationWalker` - 基于页面签名的翻页
//! - `HistorySink` - 执行记录写入
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个账号 + 一个分类"的完整流程
//! - `RunContext` - 任务目录、文件序号
//! - `JobDirector` - 登录 → 进入分类 → 筛选 → 翻页采集 → 写记录
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/app` - 应用生命周期
//! - `orchestrator/batch_coordinator` - 账号顺序调度
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::ChromeSessionFactory;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{AutomationSurface, ScriptedFactory, ScriptedSurface, SessionFactory};
pub use models::{Account, Category, DateRange, DocFormat, ExecutionMode, Job, RunStatus};
pub use orchestrator::{App, BatchCoordinator, BatchSummary};
pub use workflow::{JobDirector, RunContext, RunReport};
