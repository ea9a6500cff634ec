//! 自动化能力接口 - 基础设施层
//!
//! 引擎只依赖这里声明的能力，任何浏览器驱动实现该 trait 即可接入。
//! 所有等待类操作都必须带超时。

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::models::CertificateBundle;

/// 元素句柄（由实现方分配的不透明标识）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

/// 元素定位方式
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// CSS 选择器
    Css(String),
    /// 靠近指定标签文字的输入框
    LabelText(String),
    /// id / name 包含该片段的输入框
    NameFragment(String),
    /// 文字为该内容的按钮或链接
    ButtonText(String),
}

/// 表格单元格快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellSnapshot {
    /// 可见文字
    pub text: String,
    /// 单元格及后代节点上的提示类属性 (title / aria-label / data-original-title ...)
    pub tooltips: Vec<String>,
    /// 原始 innerHTML
    pub inner_html: String,
}

/// 行内可点击的操作链接
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLink {
    pub handle: ElementHandle,
    pub label: String,
    pub href: Option<String>,
    /// title + aria-label + class 拼接
    pub hint: String,
}

/// 表格行快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSnapshot {
    pub text: String,
    pub cells: Vec<CellSnapshot>,
    pub links: Vec<RowLink>,
}

/// 结果表格快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    pub url: String,
    pub headers: Vec<String>,
    pub rows: Vec<RowSnapshot>,
}

/// 页面上的可点击元素（分页候选）
#[derive(Debug, Clone, PartialEq)]
pub struct Clickable {
    pub handle: ElementHandle,
    pub label: String,
    pub hint: String,
    pub visible: bool,
    pub disabled: bool,
    /// 元素顶部在视口中的相对位置 (0.0 = 顶部, 1.0 = 底部)
    pub vertical_ratio: f64,
}

/// 浏览器报告的下载事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEvent {
    pub id: String,
    pub url: String,
    pub suggested_filename: Option<String>,
    /// 失败原因，None 表示下载完成
    pub failure: Option<String>,
}

/// 新打开的弹窗 / 标签页
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupHandle {
    pub id: String,
    pub url: String,
}

/// HTTP 响应载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpPayload {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    /// 来自 content-disposition 的文件名
    pub filename: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl HttpPayload {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 点击前预先挂好的三个捕获通道
///
/// 每个 future 自带超时，超时或失败时返回 None。
pub struct CaptureChannels {
    pub download: BoxFuture<'static, Option<DownloadEvent>>,
    pub popup: BoxFuture<'static, Option<PopupHandle>>,
    pub response: BoxFuture<'static, Option<HttpPayload>>,
}

/// 会话启动参数
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub download_dir: std::path::PathBuf,
    pub certificate: Option<CertificateBundle>,
}

/// 自动化能力接口
#[async_trait]
pub trait AutomationSurface: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// 查找元素，找不到返回 None 而不是错误
    async fn locate(&self, locator: &Locator) -> Result<Option<ElementHandle>>;

    async fn click(&self, handle: &ElementHandle) -> Result<()>;

    async fn fill(&self, handle: &ElementHandle, text: &str) -> Result<()>;

    /// 等待网络空闲，超时返回 false
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<bool>;

    /// 当前结果表格
    async fn table_snapshot(&self) -> Result<TableSnapshot>;

    /// 页面上所有可点击元素
    async fn clickables(&self) -> Result<Vec<Clickable>>;

    /// 预先订阅下载 / 弹窗 / 响应三个事件源，之后才能触发点击
    async fn arm_capture(&self, content_type: &str, timeout: Duration) -> Result<CaptureChannels>;

    /// 使用浏览器自己的保存能力读取已完成的下载
    async fn save_download(&self, event: &DownloadEvent) -> Result<Vec<u8>>;

    /// 等待弹窗加载完成，返回其最终 URL
    async fn popup_settle(&self, popup: &PopupHandle, timeout: Duration) -> Result<String>;

    /// 将弹窗渲染为 PDF
    async fn popup_render_pdf(&self, popup: &PopupHandle) -> Result<Vec<u8>>;

    /// 在弹窗上下文中读取其二进制响应
    async fn popup_binary_response(&self, popup: &PopupHandle, content_type: &str)
        -> Result<Option<HttpPayload>>;

    async fn close_popup(&self, popup: &PopupHandle) -> Result<()>;

    /// 带登录态的直接 GET 请求
    async fn request_get(&self, url: &str) -> Result<HttpPayload>;

    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn dump_markup(&self) -> Result<String>;

    async fn close(&self) -> Result<()>;
}

/// 会话工厂：每次任务运行打开一个独立会话
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Surface: AutomationSurface;

    async fn open(&self, spec: &SessionSpec) -> Result<Self::Surface>;
}

/// 依次尝试多个定位方式，返回第一个找到的元素
///
/// 定位出错只记录日志，视为未找到。
pub async fn first_found<S, I>(surface: &S, locators: I) -> Option<ElementHandle>
where
    S: AutomationSurface + ?Sized,
    I: IntoIterator<Item = Locator>,
{
    for locator in locators {
        match surface.locate(&locator).await {
            Ok(Some(handle)) => return Some(handle),
            Ok(None) => {}
            Err(e) => debug!("定位 {:?} 失败: {}", locator, e),
        }
    }
    None
}
