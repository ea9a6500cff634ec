//! 脚本化自动化实现
//!
//! 不启动浏览器，按预先编排的 DOM 快照和事件响应工作。
//! 捕获通道在 `arm_capture` 时挂起，直到对应链接被点击才触发，
//! 与真实浏览器“先订阅、后点击”的时序一致。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::infrastructure::surface::{
    AutomationSurface, CaptureChannels, Clickable, DownloadEvent, ElementHandle, HttpPayload,
    Locator, PopupHandle, SessionFactory, SessionSpec, TableSnapshot,
};

/// 点击某个链接后浏览器的表现
#[derive(Debug, Clone, Default)]
pub struct CaptureScript {
    pub download: Option<DownloadEvent>,
    pub popup: Option<PopupHandle>,
    pub response: Option<HttpPayload>,
    /// 事件触发前的延迟
    pub delay: Duration,
    /// 响应在其他事件之后额外延迟到达
    pub response_delay: Duration,
}

/// 弹窗内的表现
#[derive(Debug, Clone, Default)]
pub struct PopupScript {
    pub pdf: Option<Vec<u8>>,
    pub binary: Option<HttpPayload>,
}

#[derive(Default)]
struct Armed {
    download: Option<oneshot::Sender<DownloadEvent>>,
    popup: Option<oneshot::Sender<PopupHandle>>,
    response: Option<oneshot::Sender<HttpPayload>>,
}

#[derive(Default)]
struct ScriptState {
    pages: Vec<TableSnapshot>,
    current_page: usize,
    pager: Vec<Clickable>,
    advancing: HashSet<String>,
    elements: HashMap<Locator, ElementHandle>,
    login_elements: HashMap<Locator, ElementHandle>,
    login_triggers: HashSet<String>,
    accept_login: bool,
    logged_in: bool,
    captures: HashMap<String, CaptureScript>,
    popups: HashMap<String, PopupScript>,
    downloads: HashMap<String, Vec<u8>>,
    direct: HashMap<String, HttpPayload>,
    armed: Option<Armed>,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    navigations: Vec<String>,
    closed_popups: Vec<String>,
    closed: bool,
}

/// 脚本化会话，clone 后共享同一份状态
#[derive(Clone, Default)]
pub struct ScriptedSurface {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        // 锁中毒只可能来自测试线程 panic，直接沿用内部状态
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 追加一页结果
    pub fn with_page(self, table: TableSnapshot) -> Self {
        self.state().pages.push(table);
        self
    }

    /// 分页控件；`advances` 为 true 时点击会翻到下一页
    pub fn with_pager(self, clickable: Clickable, advances: bool) -> Self {
        {
            let mut st = self.state();
            if advances {
                st.advancing.insert(clickable.handle.0.clone());
            }
            st.pager.push(clickable);
        }
        self
    }

    pub fn with_element(self, locator: Locator, handle: &str) -> Self {
        self.state()
            .elements
            .insert(locator, ElementHandle(handle.to_string()));
        self
    }

    /// 只在登录前可见的元素（如密码框）
    pub fn with_login_element(self, locator: Locator, handle: &str) -> Self {
        self.state()
            .login_elements
            .insert(locator, ElementHandle(handle.to_string()));
        self
    }

    /// 点击后完成登录的元素；`accept` 为 false 时登录页不会消失
    pub fn with_login_trigger(self, handle: &str, accept: bool) -> Self {
        {
            let mut st = self.state();
            st.login_triggers.insert(handle.to_string());
            st.accept_login = accept;
        }
        self
    }

    pub fn logged_in(self) -> Self {
        self.state().logged_in = true;
        self
    }

    pub fn with_capture(self, link_handle: &str, script: CaptureScript) -> Self {
        self.state().captures.insert(link_handle.to_string(), script);
        self
    }

    pub fn with_popup(self, popup_id: &str, script: PopupScript) -> Self {
        self.state().popups.insert(popup_id.to_string(), script);
        self
    }

    pub fn with_saved_download(self, id: &str, bytes: &[u8]) -> Self {
        self.state().downloads.insert(id.to_string(), bytes.to_vec());
        self
    }

    pub fn with_direct(self, url: &str, payload: HttpPayload) -> Self {
        self.state().direct.insert(url.to_string(), payload);
        self
    }

    // ========== 检查方法 ==========

    pub fn clicks(&self) -> Vec<String> {
        self.state().clicks.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.state().fills.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state().navigations.clone()
    }

    pub fn closed_popups(&self) -> Vec<String> {
        self.state().closed_popups.clone()
    }

    pub fn current_page(&self) -> usize {
        self.state().current_page
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn fire(&self, handle: &str) {
        let (script, armed) = {
            let mut st = self.state();
            let Some(script) = st.captures.get(handle).cloned() else {
                return;
            };
            let Some(armed) = st.armed.take() else {
                return;
            };
            (script, armed)
        };

        let fire = async move {
            if !script.delay.is_zero() {
                tokio::time::sleep(script.delay).await;
            }
            if script.response_delay.is_zero() {
                if let (Some(tx), Some(ev)) = (armed.response, script.response) {
                    let _ = tx.send(ev);
                }
                if let (Some(tx), Some(ev)) = (armed.popup, script.popup) {
                    let _ = tx.send(ev);
                }
                if let (Some(tx), Some(ev)) = (armed.download, script.download) {
                    let _ = tx.send(ev);
                }
            } else {
                if let (Some(tx), Some(ev)) = (armed.popup, script.popup) {
                    let _ = tx.send(ev);
                }
                if let (Some(tx), Some(ev)) = (armed.download, script.download) {
                    let _ = tx.send(ev);
                }
                tokio::time::sleep(script.response_delay).await;
                if let (Some(tx), Some(ev)) = (armed.response, script.response) {
                    let _ = tx.send(ev);
                }
            }
        };
        tokio::spawn(fire);
    }
}

fn waiting<T: Send + 'static>(
    rx: oneshot::Receiver<T>,
    wait: Duration,
) -> futures::future::BoxFuture<'static, Option<T>> {
    async move { timeout(wait, rx).await.ok().and_then(|r| r.ok()) }.boxed()
}

#[async_trait]
impl AutomationSurface for ScriptedSurface {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut st = self.state();
        st.navigations.push(url.to_string());
        st.current_page = 0;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let st = self.state();
        Ok(st.navigations.last().cloned().unwrap_or_default())
    }

    async fn locate(&self, locator: &Locator) -> Result<Option<ElementHandle>> {
        let st = self.state();
        if !st.logged_in {
            if let Some(handle) = st.login_elements.get(locator) {
                return Ok(Some(handle.clone()));
            }
        }
        Ok(st.elements.get(locator).cloned())
    }

    async fn click(&self, handle: &ElementHandle) -> Result<()> {
        {
            let mut st = self.state();
            st.clicks.push(handle.0.clone());
            if st.login_triggers.contains(&handle.0) && st.accept_login {
                st.logged_in = true;
            }
            if st.advancing.contains(&handle.0) && st.current_page + 1 < st.pages.len() {
                st.current_page += 1;
            }
        }
        self.fire(&handle.0);
        Ok(())
    }

    async fn fill(&self, handle: &ElementHandle, text: &str) -> Result<()> {
        self.state()
            .fills
            .push((handle.0.clone(), text.to_string()));
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    async fn table_snapshot(&self) -> Result<TableSnapshot> {
        let st = self.state();
        Ok(st.pages.get(st.current_page).cloned().unwrap_or_default())
    }

    async fn clickables(&self) -> Result<Vec<Clickable>> {
        Ok(self.state().pager.clone())
    }

    async fn arm_capture(&self, _content_type: &str, wait: Duration) -> Result<CaptureChannels> {
        let (d_tx, d_rx) = oneshot::channel();
        let (p_tx, p_rx) = oneshot::channel();
        let (r_tx, r_rx) = oneshot::channel();
        self.state().armed = Some(Armed {
            download: Some(d_tx),
            popup: Some(p_tx),
            response: Some(r_tx),
        });
        Ok(CaptureChannels {
            download: waiting(d_rx, wait),
            popup: waiting(p_rx, wait),
            response: waiting(r_rx, wait),
        })
    }

    async fn save_download(&self, event: &DownloadEvent) -> Result<Vec<u8>> {
        self.state()
            .downloads
            .get(&event.id)
            .cloned()
            .ok_or_else(|| anyhow!("下载文件不存在: {}", event.id))
    }

    async fn popup_settle(&self, popup: &PopupHandle, _timeout: Duration) -> Result<String> {
        Ok(popup.url.clone())
    }

    async fn popup_render_pdf(&self, popup: &PopupHandle) -> Result<Vec<u8>> {
        self.state()
            .popups
            .get(&popup.id)
            .and_then(|p| p.pdf.clone())
            .ok_or_else(|| anyhow!("弹窗无法渲染 PDF"))
    }

    async fn popup_binary_response(
        &self,
        popup: &PopupHandle,
        _content_type: &str,
    ) -> Result<Option<HttpPayload>> {
        Ok(self
            .state()
            .popups
            .get(&popup.id)
            .and_then(|p| p.binary.clone()))
    }

    async fn close_popup(&self, popup: &PopupHandle) -> Result<()> {
        self.state().closed_popups.push(popup.id.clone());
        Ok(())
    }

    async fn request_get(&self, url: &str) -> Result<HttpPayload> {
        self.state()
            .direct
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("请求失败: {}", url))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(b"\x89PNG".to_vec())
    }

    async fn dump_markup(&self) -> Result<String> {
        let st = self.state();
        Ok(format!(
            "<html><body data-page=\"{}\" data-logged-in=\"{}\"></body></html>",
            st.current_page, st.logged_in
        ))
    }

    async fn close(&self) -> Result<()> {
        self.state().closed = true;
        Ok(())
    }
}

/// 按顺序发放脚本化会话的工厂
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    sessions: Arc<Mutex<VecDeque<ScriptedSurface>>>,
    opened: Arc<Mutex<Vec<SessionSpec>>>,
}

impl ScriptedFactory {
    pub fn new(sessions: impl IntoIterator<Item = ScriptedSurface>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(sessions.into_iter().collect())),
            opened: Arc::default(),
        }
    }

    /// 已打开的会话参数
    pub fn opened(&self) -> Vec<SessionSpec> {
        self.opened
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    type Surface = ScriptedSurface;

    async fn open(&self, spec: &SessionSpec) -> Result<ScriptedSurface> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(spec.clone());
        }
        self.sessions
            .lock()
            .map_err(|_| anyhow!("会话队列锁已损坏"))?
            .pop_front()
            .ok_or_else(|| anyhow!("没有可用的脚本化会话"))
    }
}
