//! 下载捕获协议 - 业务能力层
//!
//! 门户可能通过三种方式交付文件：原生下载、弹出新窗口、同页响应。
//! 点击前先挂好三个通道，点击后竞速，谁先到用谁：
//!
//! 1. `race` 只负责竞速，返回带标签的胜者和仍未结束的通道
//! 2. `resolve` 按胜者走各自的分支，失败时逐级回退
//! 3. `validate` 检查扩展名与内容，绝不返回类型不对的文件

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::CaptureError;
use crate::infrastructure::surface::{
    AutomationSurface, CaptureChannels, DownloadEvent, HttpPayload, PopupHandle, RowLink,
};
use crate::models::DocFormat;
use crate::services::file_store::resolve_extension;

/// 最终交付文件的通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureChannel {
    Response,
    Popup,
    Download,
    /// 带登录态的直接请求
    Direct,
}

impl fmt::Display for CaptureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureChannel::Response => "response",
            CaptureChannel::Popup => "popup",
            CaptureChannel::Download => "download",
            CaptureChannel::Direct => "direct",
        };
        write!(f, "{}", name)
    }
}

/// 竞速胜者
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceWinner {
    Response(HttpPayload),
    Popup(PopupHandle),
    Download(DownloadEvent),
    TimedOut,
}

/// 竞速结束时还没有结果的通道
#[derive(Default)]
pub struct PendingChannels {
    pub download: Option<BoxFuture<'static, Option<DownloadEvent>>>,
    pub popup: Option<BoxFuture<'static, Option<PopupHandle>>>,
    pub response: Option<BoxFuture<'static, Option<HttpPayload>>>,
}

impl PendingChannels {
    async fn response_within(&mut self, wait: Duration) -> Option<HttpPayload> {
        let fut = self.response.take()?;
        timeout(wait, fut).await.ok().flatten()
    }

    async fn popup_within(&mut self, wait: Duration) -> Option<PopupHandle> {
        let fut = self.popup.take()?;
        timeout(wait, fut).await.ok().flatten()
    }
}

pub struct RaceOutcome {
    pub winner: RaceWinner,
    pub pending: PendingChannels,
}

/// 竞速三个通道，总时限内都没有结果则为 `TimedOut`
///
/// 返回 None 的通道（超时或订阅失败）直接出局，不算胜出。
pub async fn race(channels: CaptureChannels, deadline: Duration) -> RaceOutcome {
    let CaptureChannels {
        mut download,
        mut popup,
        mut response,
    } = channels;
    let (mut download_open, mut popup_open, mut response_open) = (true, true, true);

    let timer = sleep(deadline);
    tokio::pin!(timer);

    let winner = loop {
        if !(download_open || popup_open || response_open) {
            break RaceWinner::TimedOut;
        }
        tokio::select! {
            biased;
            got = &mut response, if response_open => {
                response_open = false;
                if let Some(payload) = got {
                    break RaceWinner::Response(payload);
                }
            }
            got = &mut popup, if popup_open => {
                popup_open = false;
                if let Some(handle) = got {
                    break RaceWinner::Popup(handle);
                }
            }
            got = &mut download, if download_open => {
                download_open = false;
                if let Some(event) = got {
                    break RaceWinner::Download(event);
                }
            }
            _ = &mut timer => break RaceWinner::TimedOut,
        }
    };

    RaceOutcome {
        winner,
        pending: PendingChannels {
            download: download_open.then_some(download),
            popup: popup_open.then_some(popup),
            response: response_open.then_some(response),
        },
    }
}

/// 尚未校验的原始载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub bytes: Vec<u8>,
    pub suggested_name: Option<String>,
    pub content_type: Option<String>,
    pub channel: CaptureChannel,
}

/// 校验通过的文件内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFile {
    pub bytes: Vec<u8>,
    /// 带点号的扩展名
    pub extension: &'static str,
    pub channel: CaptureChannel,
}

/// 下载捕获器
pub struct DownloadCapture {
    /// 单个通道的等待时间
    channel_timeout: Duration,
    /// 竞速总时限
    deadline: Duration,
    popup_settle: Duration,
    /// 下载被取消后回看其他通道的等待时间
    recheck: Duration,
}

impl DownloadCapture {
    pub fn new(channel_timeout: Duration) -> Self {
        Self {
            channel_timeout,
            deadline: channel_timeout + Duration::from_secs(1),
            popup_settle: channel_timeout.min(Duration::from_secs(10)),
            recheck: channel_timeout.min(Duration::from_secs(3)),
        }
    }

    /// 点击链接并捕获文件
    pub async fn capture<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        link: &RowLink,
        format: DocFormat,
    ) -> Result<CapturedFile, CaptureError> {
        let channels = surface
            .arm_capture(content_type_for(format), self.channel_timeout)
            .await
            .map_err(|e| single_failure(format!("无法订阅下载事件: {}", e)))?;

        surface
            .click(&link.handle)
            .await
            .map_err(|e| single_failure(format!("点击 '{}' 失败: {}", link.label, e)))?;

        let outcome = race(channels, self.deadline).await;
        let raw = self
            .resolve(surface, outcome, link.href.as_deref(), format)
            .await?;
        validate(raw, format)
    }

    /// 按竞速结果取得文件内容
    pub async fn resolve<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        outcome: RaceOutcome,
        href: Option<&str>,
        format: DocFormat,
    ) -> Result<RawPayload, CaptureError> {
        let RaceOutcome { winner, mut pending } = outcome;
        let mut reasons = Vec::new();

        match winner {
            // ========== 同页响应：直接读取，失败即报错 ==========
            RaceWinner::Response(payload) => {
                debug!("响应通道胜出: {}", payload.url);
                from_http(payload, CaptureChannel::Response)
            }

            // ========== 弹窗：渲染 → 弹窗内响应 → 直接请求 ==========
            RaceWinner::Popup(popup) => {
                debug!("弹窗通道胜出: {}", popup.url);
                if let Some(raw) = self.from_popup(surface, &popup, format, &mut reasons).await {
                    return Ok(raw);
                }
                let target = href
                    .filter(|u| is_fetchable(u))
                    .unwrap_or(popup.url.as_str())
                    .to_string();
                self.direct(surface, Some(&target), &mut reasons).await
            }

            // ========== 原生下载 ==========
            RaceWinner::Download(event) => match &event.failure {
                None => {
                    debug!("下载通道胜出: {}", event.url);
                    match surface.save_download(&event).await {
                        Ok(bytes) => Ok(RawPayload {
                            bytes,
                            suggested_name: event.suggested_filename.clone(),
                            content_type: None,
                            channel: CaptureChannel::Download,
                        }),
                        Err(e) => {
                            warn!("⚠️ 读取已完成的下载失败，改为直接请求: {}", e);
                            reasons.push(format!("download save: {}", e));
                            let target = href
                                .filter(|u| is_fetchable(u))
                                .or(Some(event.url.as_str()));
                            self.direct(surface, target, &mut reasons).await
                        }
                    }
                }
                Some(failure) => {
                    reasons.push(format!("download: {}", failure));
                    if failure.to_ascii_lowercase().contains("cancel") {
                        // 下载被取消通常意味着文件改走了响应或弹窗
                        info!("⚠️ 下载被取消，回看响应与弹窗通道");
                        if let Some(payload) = pending.response_within(self.recheck).await {
                            match from_http(payload, CaptureChannel::Response) {
                                Ok(raw) => return Ok(raw),
                                Err(e) => reasons.push(format!("response: {}", e)),
                            }
                        }
                        if let Some(popup) = pending.popup_within(self.recheck).await {
                            if let Some(raw) =
                                self.from_popup(surface, &popup, format, &mut reasons).await
                            {
                                return Ok(raw);
                            }
                        }
                    }
                    let target = href
                        .filter(|u| is_fetchable(u))
                        .or(Some(event.url.as_str()));
                    self.direct(surface, target, &mut reasons).await
                }
            },

            // ========== 全部超时：直接请求链接 ==========
            RaceWinner::TimedOut => {
                reasons.push("所有通道均未在时限内响应".to_string());
                self.direct(surface, href, &mut reasons).await
            }
        }
    }

    /// 弹窗分支，失败时记录原因并关闭弹窗
    async fn from_popup<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        popup: &PopupHandle,
        format: DocFormat,
        reasons: &mut Vec<String>,
    ) -> Option<RawPayload> {
        match surface.popup_settle(popup, self.popup_settle).await {
            Ok(url) => debug!("弹窗已加载: {}", url),
            Err(e) => reasons.push(format!("popup settle: {}", e)),
        }

        let mut result = None;

        if format == DocFormat::Pdf {
            match surface.popup_render_pdf(popup).await {
                Ok(bytes) if !bytes.is_empty() => {
                    result = Some(RawPayload {
                        bytes,
                        suggested_name: None,
                        content_type: Some(content_type_for(format).to_string()),
                        channel: CaptureChannel::Popup,
                    });
                }
                Ok(_) => reasons.push("popup render: 空内容".to_string()),
                Err(e) => reasons.push(format!("popup render: {}", e)),
            }
        }

        if result.is_none() {
            match surface.popup_binary_response(popup, content_type_for(format)).await {
                Ok(Some(payload)) => match from_http(payload, CaptureChannel::Popup) {
                    Ok(raw) => result = Some(raw),
                    Err(e) => reasons.push(format!("popup response: {}", e)),
                },
                Ok(None) => reasons.push("popup response: 未找到文件响应".to_string()),
                Err(e) => reasons.push(format!("popup response: {}", e)),
            }
        }

        if let Err(e) = surface.close_popup(popup).await {
            debug!("关闭弹窗失败: {}", e);
        }
        result
    }

    /// 最后手段：带登录态直接 GET
    async fn direct<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        url: Option<&str>,
        reasons: &mut Vec<String>,
    ) -> Result<RawPayload, CaptureError> {
        let Some(url) = url.filter(|u| is_fetchable(u)) else {
            reasons.push("direct: 没有可请求的链接".to_string());
            return Err(CaptureError::AllChannelsFailed {
                reasons: std::mem::take(reasons),
            });
        };

        debug!("直接请求回退: {}", url);
        let outcome = match surface.request_get(url).await {
            Ok(payload) => from_http(payload, CaptureChannel::Direct),
            Err(e) => Err(CaptureError::BodyUnreadable {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        };
        outcome.map_err(|e| {
            reasons.push(format!("direct: {}", e));
            CaptureError::AllChannelsFailed {
                reasons: std::mem::take(reasons),
            }
        })
    }
}

/// 校验内容与扩展名
pub fn validate(raw: RawPayload, format: DocFormat) -> Result<CapturedFile, CaptureError> {
    if raw.bytes.is_empty() {
        warn!("⚠️ 通过 {} 取得的文件为空，已丢弃", raw.channel);
        return Err(CaptureError::EmptyPayload);
    }
    let extension = resolve_extension(
        raw.suggested_name.as_deref(),
        raw.content_type.as_deref(),
        format,
    )
    .map_err(|e| {
        warn!(
            "⚠️ 文件类型不符，已丢弃 ({} / {:?}): {}",
            raw.channel, raw.suggested_name, e
        );
        e
    })?;

    Ok(CapturedFile {
        bytes: raw.bytes,
        extension,
        channel: raw.channel,
    })
}

fn from_http(payload: HttpPayload, channel: CaptureChannel) -> Result<RawPayload, CaptureError> {
    if !payload.is_success() {
        return Err(CaptureError::HttpStatus {
            url: payload.url,
            status: payload.status,
        });
    }
    let Some(bytes) = payload.body else {
        return Err(CaptureError::BodyUnreadable {
            url: payload.url,
            reason: "响应体为空或不可读".to_string(),
        });
    };
    Ok(RawPayload {
        bytes,
        suggested_name: payload.filename,
        content_type: payload.content_type,
        channel,
    })
}

fn content_type_for(format: DocFormat) -> &'static str {
    match format {
        DocFormat::Pdf => "application/pdf",
        DocFormat::Xml => "xml",
    }
}

fn is_fetchable(url: &str) -> bool {
    let url = url.trim();
    !url.is_empty() && !url.starts_with('#') && !url.to_ascii_lowercase().starts_with("javascript:")
}

fn single_failure(reason: String) -> CaptureError {
    CaptureError::AllChannelsFailed {
        reasons: vec![reason],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::scripted::{CaptureScript, PopupScript, ScriptedSurface};
    use crate::infrastructure::surface::ElementHandle;

    const PDF: &[u8] = b"%PDF-1.4 nota";

    fn link(href: Option<&str>) -> RowLink {
        RowLink {
            handle: ElementHandle("lnk".to_string()),
            label: "PDF".to_string(),
            href: href.map(str::to_string),
            hint: String::new(),
        }
    }

    fn http(url: &str, status: u16, filename: Option<&str>, body: Option<&[u8]>) -> HttpPayload {
        HttpPayload {
            url: url.to_string(),
            status,
            content_type: Some("application/pdf".to_string()),
            filename: filename.map(str::to_string),
            body: body.map(<[u8]>::to_vec),
        }
    }

    fn download(failure: Option<&str>, name: &str) -> DownloadEvent {
        DownloadEvent {
            id: "dl-1".to_string(),
            url: "https://portal/dl/1".to_string(),
            suggested_filename: Some(name.to_string()),
            failure: failure.map(str::to_string),
        }
    }

    fn popup() -> PopupHandle {
        PopupHandle {
            id: "pop-1".to_string(),
            url: "https://portal/visualizar/1".to_string(),
        }
    }

    fn capture() -> DownloadCapture {
        DownloadCapture::new(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_response_wins() {
        let surface = ScriptedSurface::new().with_capture(
            "lnk",
            CaptureScript {
                response: Some(http("https://portal/nota.pdf", 200, Some("nota.pdf"), Some(PDF))),
                ..Default::default()
            },
        );
        let file = capture().capture(&surface, &link(None), DocFormat::Pdf).await.unwrap();
        assert_eq!(file.channel, CaptureChannel::Response);
        assert_eq!(file.extension, ".pdf");
        assert_eq!(file.bytes, PDF);
    }

    #[tokio::test]
    async fn test_response_error_status_fails_loudly() {
        let surface = ScriptedSurface::new().with_capture(
            "lnk",
            CaptureScript {
                response: Some(http("https://portal/nota.pdf", 500, None, Some(b"erro"))),
                ..Default::default()
            },
        );
        let err = capture().capture(&surface, &link(Some("https://portal/nota.pdf")), DocFormat::Pdf).await;
        assert!(matches!(err, Err(CaptureError::HttpStatus { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_popup_rendered_to_pdf() {
        let surface = ScriptedSurface::new()
            .with_capture(
                "lnk",
                CaptureScript {
                    popup: Some(popup()),
                    ..Default::default()
                },
            )
            .with_popup(
                "pop-1",
                PopupScript {
                    pdf: Some(PDF.to_vec()),
                    binary: None,
                },
            );
        let file = capture().capture(&surface, &link(None), DocFormat::Pdf).await.unwrap();
        assert_eq!(file.channel, CaptureChannel::Popup);
        assert_eq!(surface.closed_popups(), vec!["pop-1".to_string()]);
    }

    #[tokio::test]
    async fn test_popup_binary_response_after_render_fails() {
        let surface = ScriptedSurface::new()
            .with_capture(
                "lnk",
                CaptureScript {
                    popup: Some(popup()),
                    ..Default::default()
                },
            )
            .with_popup(
                "pop-1",
                PopupScript {
                    pdf: None,
                    binary: Some(http("https://portal/visualizar/1", 200, None, Some(PDF))),
                },
            );
        let file = capture().capture(&surface, &link(None), DocFormat::Pdf).await.unwrap();
        assert_eq!(file.channel, CaptureChannel::Popup);
        assert_eq!(file.bytes, PDF);
    }

    #[tokio::test]
    async fn test_popup_falls_back_to_direct_href() {
        let href = "https://portal/nota/1/pdf";
        let surface = ScriptedSurface::new()
            .with_capture(
                "lnk",
                CaptureScript {
                    popup: Some(popup()),
                    ..Default::default()
                },
            )
            .with_direct(href, http(href, 200, Some("nota-1.pdf"), Some(PDF)));
        let file = capture().capture(&surface, &link(Some(href)), DocFormat::Pdf).await.unwrap();
        assert_eq!(file.channel, CaptureChannel::Direct);
        assert_eq!(surface.closed_popups(), vec!["pop-1".to_string()]);
    }

    #[tokio::test]
    async fn test_completed_download_saved() {
        let surface = ScriptedSurface::new()
            .with_capture(
                "lnk",
                CaptureScript {
                    download: Some(download(None, "NFSe_1.pdf")),
                    ..Default::default()
                },
            )
            .with_saved_download("dl-1", PDF);
        let file = capture().capture(&surface, &link(None), DocFormat::Pdf).await.unwrap();
        assert_eq!(file.channel, CaptureChannel::Download);
    }

    #[tokio::test]
    async fn test_unsaved_download_falls_back_to_direct_get() {
        let surface = ScriptedSurface::new()
            .with_capture(
                "lnk",
                CaptureScript {
                    download: Some(download(None, "NFSe_1.pdf")),
                    ..Default::default()
                },
            )
            .with_direct(
                "https://portal/Notas/Download/1",
                http("https://portal/Notas/Download/1", 200, Some("nota.pdf"), Some(PDF)),
            );
        let file = capture()
            .capture(&surface, &link(Some("https://portal/Notas/Download/1")), DocFormat::Pdf)
            .await
            .unwrap();
        assert_eq!(file.channel, CaptureChannel::Direct);
        assert_eq!(file.extension, ".pdf");
    }

    #[tokio::test]
    async fn test_canceled_download_rechecks_late_response() {
        let surface = ScriptedSurface::new().with_capture(
            "lnk",
            CaptureScript {
                download: Some(download(Some("canceled"), "nota.pdf")),
                response: Some(http("https://portal/nota.pdf", 200, None, Some(PDF))),
                response_delay: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let file = capture().capture(&surface, &link(None), DocFormat::Pdf).await.unwrap();
        assert_eq!(file.channel, CaptureChannel::Response);
    }

    #[tokio::test]
    async fn test_canceled_download_uses_event_url() {
        let surface = ScriptedSurface::new()
            .with_capture(
                "lnk",
                CaptureScript {
                    download: Some(download(Some("Canceled"), "nota.pdf")),
                    ..Default::default()
                },
            )
            .with_direct(
                "https://portal/dl/1",
                http("https://portal/dl/1", 200, None, Some(PDF)),
            );
        let file = capture().capture(&surface, &link(Some("#")), DocFormat::Pdf).await.unwrap();
        assert_eq!(file.channel, CaptureChannel::Direct);
    }

    #[tokio::test]
    async fn test_timeout_without_href_reports_all_reasons() {
        let surface = ScriptedSurface::new();
        let err = DownloadCapture::new(Duration::from_millis(30))
            .capture(&surface, &link(None), DocFormat::Xml)
            .await
            .unwrap_err();
        match err {
            CaptureError::AllChannelsFailed { reasons } => assert_eq!(reasons.len(), 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_direct_get() {
        let href = "https://portal/nota/1/xml";
        let mut payload = http(href, 200, Some("nota.xml"), Some(b"<nfse/>"));
        payload.content_type = Some("text/xml".to_string());
        let surface = ScriptedSurface::new().with_direct(href, payload);
        let file = DownloadCapture::new(Duration::from_millis(30))
            .capture(&surface, &link(Some(href)), DocFormat::Xml)
            .await
            .unwrap();
        assert_eq!(file.channel, CaptureChannel::Direct);
        assert_eq!(file.extension, ".xml");
    }

    #[tokio::test]
    async fn test_wrong_extension_rejected() {
        let surface = ScriptedSurface::new()
            .with_capture(
                "lnk",
                CaptureScript {
                    download: Some(download(None, "nota.xml")),
                    ..Default::default()
                },
            )
            .with_saved_download("dl-1", b"<nfse/>");
        let err = capture().capture(&surface, &link(None), DocFormat::Pdf).await;
        assert!(matches!(err, Err(CaptureError::ExtensionMismatch { .. })));
    }

    #[test]
    fn test_validate_empty_payload() {
        let raw = RawPayload {
            bytes: Vec::new(),
            suggested_name: Some("nota.pdf".to_string()),
            content_type: None,
            channel: CaptureChannel::Download,
        };
        assert!(matches!(validate(raw, DocFormat::Pdf), Err(CaptureError::EmptyPayload)));
    }

    #[tokio::test]
    async fn test_race_skips_closed_channels() {
        use futures::FutureExt;

        let channels = CaptureChannels {
            download: async { Some(download(None, "a.pdf")) }.boxed(),
            popup: async { None }.boxed(),
            response: async { None }.boxed(),
        };
        let outcome = race(channels, Duration::from_millis(100)).await;
        assert!(matches!(outcome.winner, RaceWinner::Download(_)));

        let channels = CaptureChannels {
            download: async { None }.boxed(),
            popup: async { None }.boxed(),
            response: async { None }.boxed(),
        };
        let outcome = race(channels, Duration::from_secs(5)).await;
        assert_eq!(outcome.winner, RaceWinner::TimedOut);
        assert!(outcome.pending.download.is_none());
    }
}
