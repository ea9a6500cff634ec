//! Chrome 自动化实现 - 基础设施层
//!
//! 持有唯一的 Browser / Page 资源，对外只暴露 `AutomationSurface` 能力。
//! DOM 查询统一通过 `Page::evaluate` 执行 JS 片段完成。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
};
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, GetResponseBodyParams};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::cdp::browser_protocol::target::{EventTargetCreated, TargetId};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::BrowserError;
use crate::infrastructure::http::{disposition_filename, DirectFetcher};
use crate::infrastructure::scripts;
use crate::infrastructure::surface::{
    AutomationSurface, CaptureChannels, CellSnapshot, Clickable, DownloadEvent, ElementHandle,
    HttpPayload, Locator, PopupHandle, RowLink, RowSnapshot, TableSnapshot,
};

/// 单元格提示属性最多检查的后代节点数
pub const TOOLTIP_CAP: usize = 15;
const HTML_CAP: usize = 4000;

/// Chrome 会话
pub struct ChromeSurface {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    download_dir: PathBuf,
    fetcher: DirectFetcher,
    slow_mo: Duration,
    /// 已打开的弹窗页面
    popups: Mutex<HashMap<String, Page>>,
}

impl ChromeSurface {
    pub fn new(
        browser: Browser,
        page: Page,
        handler: JoinHandle<()>,
        download_dir: PathBuf,
        fetcher: DirectFetcher,
        slow_mo: Duration,
    ) -> Self {
        Self {
            browser: Mutex::new(browser),
            page,
            handler,
            download_dir,
            fetcher,
            slow_mo,
            popups: Mutex::new(HashMap::new()),
        }
    }

    /// 执行 JS 代码并返回 JSON 结果
    async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    async fn pace(&self) {
        if !self.slow_mo.is_zero() {
            sleep(self.slow_mo).await;
        }
    }

    async fn popup_page(&self, popup: &PopupHandle) -> Result<Page> {
        if let Some(page) = self.popups.lock().await.get(&popup.id) {
            return Ok(page.clone());
        }

        // 新标签页挂载需要一点时间
        let mut last_err = None;
        for _ in 0..10 {
            let attempt = {
                let browser = self.browser.lock().await;
                browser.get_page(TargetId::new(popup.id.clone())).await
            };
            match attempt {
                Ok(page) => {
                    self.popups
                        .lock()
                        .await
                        .insert(popup.id.clone(), page.clone());
                    return Ok(page);
                }
                Err(e) => last_err = Some(e),
            }
            sleep(Duration::from_millis(200)).await;
        }
        Err(anyhow!(
            "无法获取弹窗页面 {}: {:?}",
            popup.id,
            last_err.map(|e| e.to_string())
        ))
    }

    async fn cookie_header(&self) -> String {
        match self.page.get_cookies().await {
            Ok(cookies) => cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
            Err(e) => {
                debug!("读取 cookie 失败: {}", e);
                String::new()
            }
        }
    }
}

#[derive(Deserialize)]
struct RawCell {
    text: String,
    #[serde(default)]
    tooltips: Vec<String>,
    #[serde(default)]
    html: String,
}

#[derive(Deserialize)]
struct RawLink {
    reference: Option<String>,
    #[serde(default)]
    label: String,
    href: Option<String>,
    #[serde(default)]
    hint: String,
}

#[derive(Deserialize)]
struct RawRow {
    #[serde(default)]
    text: String,
    #[serde(default)]
    cells: Vec<RawCell>,
    #[serde(default)]
    links: Vec<RawLink>,
}

#[derive(Deserialize)]
struct RawTable {
    #[serde(default)]
    url: String,
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    rows: Vec<RawRow>,
}

#[derive(Deserialize)]
struct RawClickable {
    reference: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    hint: String,
    visible: bool,
    disabled: bool,
    ratio: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFetch {
    url: Option<String>,
    status: Option<u16>,
    content_type: Option<String>,
    disposition: Option<String>,
    body: Option<String>,
    error: Option<String>,
}

impl RawFetch {
    fn into_payload(self, requested: &str) -> Result<HttpPayload> {
        if let Some(error) = self.error {
            return Err(anyhow!("页面内 fetch 失败: {}", error));
        }
        let body = match self.body {
            Some(b64) => Some(general_purpose::STANDARD.decode(b64)?),
            None => None,
        };
        Ok(HttpPayload {
            url: self.url.unwrap_or_else(|| requested.to_string()),
            status: self.status.unwrap_or(0),
            content_type: self.content_type,
            filename: self.disposition.as_deref().and_then(disposition_filename),
            body,
        })
    }
}

/// 从 CDP 的 Headers 中取某个头（大小写不敏感）
fn header_value(headers: &JsonValue, name: &str) -> Option<String> {
    headers.as_object().and_then(|map| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_str().map(str::to_string))
    })
}

async fn response_body(
    page: &Page,
    request_id: chromiumoxide::cdp::browser_protocol::network::RequestId,
) -> Option<Vec<u8>> {
    // 响应体要等 loadingFinished 之后才可读
    for _ in 0..20 {
        match page
            .execute(GetResponseBodyParams::new(request_id.clone()))
            .await
        {
            Ok(resp) => {
                let body = &resp.result;
                if body.base64_encoded {
                    return general_purpose::STANDARD.decode(&body.body).ok();
                }
                return Some(body.body.clone().into_bytes());
            }
            Err(_) => sleep(Duration::from_millis(250)).await,
        }
    }
    None
}

#[async_trait]
impl AutomationSurface for ChromeSurface {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!("导航到: {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn locate(&self, locator: &Locator) -> Result<Option<ElementHandle>> {
        let (kind, value) = match locator {
            Locator::Css(v) => ("css", v),
            Locator::LabelText(v) => ("label", v),
            Locator::NameFragment(v) => ("name", v),
            Locator::ButtonText(v) => ("button", v),
        };
        let found: Option<String> = self.eval_as(scripts::locate(kind, value)?).await?;
        Ok(found.map(ElementHandle))
    }

    async fn click(&self, handle: &ElementHandle) -> Result<()> {
        self.pace().await;
        let element = self
            .page
            .find_element(scripts::ref_selector(&handle.0))
            .await
            .map_err(|_| BrowserError::StaleHandle(handle.0.clone()))?;
        element.click().await?;
        Ok(())
    }

    async fn fill(&self, handle: &ElementHandle, text: &str) -> Result<()> {
        self.pace().await;
        let filled: bool = self.eval_as(scripts::fill(&handle.0, text)?).await?;
        if !filled {
            return Err(BrowserError::StaleHandle(handle.0.clone()).into());
        }
        Ok(())
    }

    async fn wait_for_network_idle(&self, wait: Duration) -> Result<bool> {
        let js = scripts::network_idle(wait.as_millis() as u64);
        // 脚本自身有超时，外层再加一点余量
        match timeout(wait + Duration::from_secs(2), self.eval_as::<bool>(js)).await {
            Ok(result) => result,
            Err(_) => Ok(false),
        }
    }

    async fn table_snapshot(&self) -> Result<TableSnapshot> {
        let raw: RawTable = self
            .eval_as(scripts::table_snapshot(TOOLTIP_CAP, HTML_CAP))
            .await
            .context("读取结果表格失败")?;

        Ok(TableSnapshot {
            url: raw.url,
            headers: raw.headers,
            rows: raw
                .rows
                .into_iter()
                .map(|row| RowSnapshot {
                    text: row.text,
                    cells: row
                        .cells
                        .into_iter()
                        .map(|c| CellSnapshot {
                            text: c.text,
                            tooltips: c.tooltips,
                            inner_html: c.html,
                        })
                        .collect(),
                    links: row
                        .links
                        .into_iter()
                        .filter_map(|l| {
                            Some(RowLink {
                                handle: ElementHandle(l.reference?),
                                label: l.label,
                                href: l.href,
                                hint: l.hint,
                            })
                        })
                        .collect(),
                })
                .collect(),
        })
    }

    async fn clickables(&self) -> Result<Vec<Clickable>> {
        let raw: Vec<RawClickable> = self.eval_as(scripts::CLICKABLES).await?;
        Ok(raw
            .into_iter()
            .map(|c| Clickable {
                handle: ElementHandle(c.reference),
                label: c.label,
                hint: c.hint,
                visible: c.visible,
                disabled: c.disabled,
                vertical_ratio: c.ratio,
            })
            .collect())
    }

    async fn arm_capture(&self, content_type: &str, wait: Duration) -> Result<CaptureChannels> {
        let (mut begins, mut progress, mut targets) = {
            let browser = self.browser.lock().await;
            (
                browser.event_listener::<EventDownloadWillBegin>().await?,
                browser.event_listener::<EventDownloadProgress>().await?,
                browser.event_listener::<EventTargetCreated>().await?,
            )
        };
        let mut responses = self.page.event_listener::<EventResponseReceived>().await?;

        let download = async move {
            let watch = async {
                let begin = begins.next().await?;
                loop {
                    let p = progress.next().await?;
                    if p.guid != begin.guid {
                        continue;
                    }
                    let failure = match p.state {
                        DownloadProgressState::InProgress => continue,
                        DownloadProgressState::Completed => None,
                        DownloadProgressState::Canceled => Some("canceled".to_string()),
                    };
                    return Some(DownloadEvent {
                        id: begin.guid.clone(),
                        url: begin.url.clone(),
                        suggested_filename: Some(begin.suggested_filename.clone())
                            .filter(|s| !s.is_empty()),
                        failure,
                    });
                }
            };
            timeout(wait, watch).await.ok().flatten()
        }
        .boxed();

        let opener = self.page.target_id().clone();
        let popup = async move {
            let watch = async {
                while let Some(ev) = targets.next().await {
                    let info = &ev.target_info;
                    if info.r#type == "page" && info.opener_id.as_ref() == Some(&opener) {
                        return Some(PopupHandle {
                            id: info.target_id.inner().clone(),
                            url: info.url.clone(),
                        });
                    }
                }
                None
            };
            timeout(wait, watch).await.ok().flatten()
        }
        .boxed();

        let page = self.page.clone();
        let wanted = content_type.to_ascii_lowercase();
        let response = async move {
            let watch = async {
                while let Some(ev) = responses.next().await {
                    if !ev.response.mime_type.to_ascii_lowercase().contains(&wanted) {
                        continue;
                    }
                    let headers = serde_json::to_value(&ev.response.headers).unwrap_or_default();
                    let body = response_body(&page, ev.request_id.clone()).await;
                    return Some(HttpPayload {
                        url: ev.response.url.clone(),
                        status: ev.response.status as u16,
                        content_type: Some(ev.response.mime_type.clone()),
                        filename: header_value(&headers, "content-disposition")
                            .as_deref()
                            .and_then(disposition_filename),
                        body,
                    });
                }
                None
            };
            timeout(wait, watch).await.ok().flatten()
        }
        .boxed();

        Ok(CaptureChannels {
            download,
            popup,
            response,
        })
    }

    async fn save_download(&self, event: &DownloadEvent) -> Result<Vec<u8>> {
        let path = self.download_dir.join(&event.id);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("无法读取下载文件: {}", path.display()))?;
        let _ = tokio::fs::remove_file(&path).await;
        Ok(bytes)
    }

    async fn popup_settle(&self, popup: &PopupHandle, wait: Duration) -> Result<String> {
        let page = self.popup_page(popup).await?;
        if timeout(wait, page.wait_for_navigation()).await.is_err() {
            debug!("弹窗加载超时: {}", popup.url);
        }
        Ok(page.url().await?.unwrap_or_else(|| popup.url.clone()))
    }

    async fn popup_render_pdf(&self, popup: &PopupHandle) -> Result<Vec<u8>> {
        let page = self.popup_page(popup).await?;
        let pdf = page.pdf(PrintToPdfParams::default()).await?;
        Ok(pdf)
    }

    async fn popup_binary_response(
        &self,
        popup: &PopupHandle,
        content_type: &str,
    ) -> Result<Option<HttpPayload>> {
        let page = self.popup_page(popup).await?;
        let url = page.url().await?.unwrap_or_else(|| popup.url.clone());
        let raw: RawFetch = page
            .evaluate(scripts::fetch_binary(&url)?)
            .await?
            .into_value()?;
        let payload = raw.into_payload(&url)?;
        let matches = payload
            .content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains(&content_type.to_ascii_lowercase()))
            .unwrap_or(false);
        Ok(matches.then_some(payload))
    }

    async fn close_popup(&self, popup: &PopupHandle) -> Result<()> {
        let page = match self.popups.lock().await.remove(&popup.id) {
            Some(page) => page,
            None => match self.popup_page(popup).await {
                Ok(page) => {
                    self.popups.lock().await.remove(&popup.id);
                    page
                }
                Err(_) => return Ok(()),
            },
        };
        page.close().await?;
        Ok(())
    }

    async fn request_get(&self, url: &str) -> Result<HttpPayload> {
        let in_page: Result<HttpPayload> = async {
            let raw: RawFetch = self.eval_as(scripts::fetch_binary(url)?).await?;
            raw.into_payload(url)
        }
        .await;

        match in_page {
            Ok(payload) => Ok(payload),
            Err(e) => {
                warn!("页面内请求失败，改用直接请求: {}", e);
                let cookies = self.cookie_header().await;
                self.fetcher.get(url, Some(&cookies)).await
            }
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder().full_page(true).build();
        Ok(self.page.screenshot(params).await?)
    }

    async fn dump_markup(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            debug!("关闭浏览器失败: {}", e);
        }
        let _ = browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}
