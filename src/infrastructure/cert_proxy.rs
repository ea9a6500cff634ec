//! 证书登录代理
//!
//! 浏览器本身无法通过 CDP 注入客户端证书，因此拦截页面的全部请求
//! (Fetch.requestPaused)，用携带证书身份的 reqwest 客户端重放，
//! 再把响应回填给页面。

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FulfillRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::Page;
use futures::StreamExt;
use reqwest::Method;
use serde_json::{json, Value as JsonValue};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::infrastructure::http::DirectFetcher;

/// 逐跳头，不能转发
const HOP_HEADERS: [&str; 5] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "content-encoding",
];

/// 开启请求拦截并启动后台代理任务
pub async fn install(page: &Page, fetcher: DirectFetcher) -> Result<JoinHandle<()>> {
    let mut paused = page.event_listener::<EventRequestPaused>().await?;

    page.execute(EnableParams {
        patterns: Some(vec![RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: None,
            request_stage: Some(RequestStage::Request),
        }]),
        handle_auth_requests: None,
    })
    .await?;

    let page = page.clone();
    let handle = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let request_id = event.request_id.clone();
            if let Err(e) = relay(&page, &fetcher, &event).await {
                warn!("证书代理转发失败，放行原始请求: {}", e);
                let _ = page.execute(ContinueRequestParams::new(request_id)).await;
            }
        }
        debug!("证书代理任务结束");
    });

    Ok(handle)
}

async fn relay(page: &Page, fetcher: &DirectFetcher, event: &EventRequestPaused) -> Result<()> {
    let request = serde_json::to_value(&event.request)?;
    let url = request["url"].as_str().unwrap_or_default().to_string();
    let method = Method::from_bytes(
        request["method"]
            .as_str()
            .unwrap_or("GET")
            .as_bytes(),
    )?;

    let mut builder = fetcher.client().request(method, &url);
    if let Some(headers) = request["headers"].as_object() {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                builder = builder.header(name.as_str(), value);
            }
        }
    }
    if let Some(body) = request_body(&request) {
        builder = builder.body(body);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers: Vec<JsonValue> = response
        .headers()
        .iter()
        .filter(|(name, _)| !HOP_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| json!({ "name": name.as_str(), "value": v }))
        })
        .collect();
    let body = response.bytes().await?;

    let params: FulfillRequestParams = serde_json::from_value(json!({
        "requestId": event.request_id,
        "responseCode": status,
        "responseHeaders": headers,
        "body": general_purpose::STANDARD.encode(&body),
    }))?;
    page.execute(params).await?;
    Ok(())
}

/// 取出请求体：优先 postData，其次 postDataEntries（base64）
fn request_body(request: &JsonValue) -> Option<Vec<u8>> {
    if let Some(data) = request["postData"].as_str() {
        return Some(data.as_bytes().to_vec());
    }
    let entries = request["postDataEntries"].as_array()?;
    let mut body = Vec::new();
    for entry in entries {
        if let Some(b64) = entry["bytes"].as_str() {
            body.extend(general_purpose::STANDARD.decode(b64).ok()?);
        }
    }
    (!body.is_empty()).then_some(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_prefers_post_data() {
        let req = json!({ "postData": "a=1", "postDataEntries": [{ "bytes": "Yj0y" }] });
        assert_eq!(request_body(&req), Some(b"a=1".to_vec()));
    }

    #[test]
    fn test_request_body_from_entries() {
        let req = json!({ "postDataEntries": [{ "bytes": "YT0x" }, { "bytes": "JmI9Mg==" }] });
        assert_eq!(request_body(&req), Some(b"a=1&b=2".to_vec()));
        assert_eq!(request_body(&json!({ "url": "x" })), None);
    }
}
