//! 浏览器之外的直接 HTTP 请求
//!
//! 页面内 fetch 失败（跨域等）时，带着页面 cookie 走 reqwest 重新请求；
//! 证书登录时客户端同时携带 PKCS#12 身份。

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE};
use tracing::debug;

use crate::error::ConfigError;
use crate::infrastructure::surface::HttpPayload;
use crate::models::CertificateBundle;

static DISPOSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\*?\s*=\s*(?:UTF-8'')?"?([^";]+)"?"#).expect("disposition regex")
});

/// 加载并校验证书，失败即为配置错误
pub fn load_identity(bundle: &CertificateBundle) -> Result<reqwest::Identity, ConfigError> {
    let path: &Path = &bundle.path;
    if !path.is_file() {
        return Err(ConfigError::CertificateMissing {
            path: path.to_path_buf(),
        });
    }

    let der = std::fs::read(path).map_err(|e| ConfigError::CertificateInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    reqwest::Identity::from_pkcs12_der(&der, &bundle.passphrase).map_err(|e| {
        ConfigError::CertificateInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}

/// 直接请求客户端
#[derive(Clone)]
pub struct DirectFetcher {
    client: reqwest::Client,
}

impl DirectFetcher {
    pub fn new(identity: Option<reqwest::Identity>, timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true);
        if let Some(identity) = identity {
            builder = builder.identity(identity);
        }
        let client = builder.build().context("无法创建 HTTP 客户端")?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// 带 cookie 头的 GET
    pub async fn get(&self, url: &str, cookie_header: Option<&str>) -> Result<HttpPayload> {
        debug!("直接 GET: {}", url);

        let mut request = self.client.get(url);
        if let Some(cookies) = cookie_header.filter(|c| !c.is_empty()) {
            request = request.header(COOKIE, cookies);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("请求失败: {}", url))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = header_str(response.headers().get(CONTENT_TYPE));
        let filename = header_str(response.headers().get(CONTENT_DISPOSITION))
            .and_then(|d| disposition_filename(&d));
        let body = response.bytes().await.ok().map(|b| b.to_vec());

        Ok(HttpPayload {
            url: final_url,
            status,
            content_type,
            filename,
            body,
        })
    }
}

fn header_str(value: Option<&reqwest::header::HeaderValue>) -> Option<String> {
    value.and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// 从 content-disposition 中提取文件名
pub fn disposition_filename(value: &str) -> Option<String> {
    DISPOSITION_RE
        .captures_iter(value)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .last()
}
