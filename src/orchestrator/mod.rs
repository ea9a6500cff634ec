//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责账号调度和统计，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用入口
//! - 打开历史库、加载账号
//! - 按执行模式（manual / lote）选择调度方式
//! - 输出全局统计信息
//!
//! ### `batch_coordinator` - 账号调度器
//! - 逐个账号顺序执行，跳过没有凭据的账号
//! - 每个账号一个任务目录，对每个分类运行一次 `JobDirector`
//! - 汇总日志
//!
//! ## 层次关系
//!
//! ```text
//! app (加载账号 / 选择模式)
//!     ↓
//! batch_coordinator (处理 Vec<Account>)
//!     ↓
//! workflow::JobDirector (处理单个账号 + 分类)
//!     ↓
//! services (能力层：下载捕获 / 状态识别 / 日期筛选 / 翻页 / 历史)
//!     ↓
//! infrastructure (基础设施：AutomationSurface)
//! ```

pub mod app;
pub mod batch_coordinator;

pub use app::App;
pub use batch_coordinator::{jobs_root, BatchCoordinator, BatchSummary};
