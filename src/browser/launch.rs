use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::BrowserError;
use crate::infrastructure::http::{load_identity, DirectFetcher};
use crate::infrastructure::surface::{SessionFactory, SessionSpec};
use crate::infrastructure::{cert_proxy, ChromeSurface};

/// 浏览器启动参数
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub download_dir: PathBuf,
}

/// 启动浏览器并打开空白页
pub async fn launch_browser(options: &LaunchOptions) -> Result<(Browser, Page, JoinHandle<()>)> {
    info!(
        "🚀 启动浏览器 ({})...",
        if options.headless { "无头" } else { "有界面" }
    );

    let mut builder = BrowserConfig::builder();
    builder = if options.headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };
    if let Some(path) = &options.chrome_path {
        builder = builder.chrome_executable(Path::new(path));
    }

    let config = builder
        .args(vec![
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--remote-debugging-port=0",
        ])
        .build()
        .map_err(|e| {
            error!("配置浏览器失败: {}", e);
            BrowserError::ConfigurationFailed(e)
        })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动浏览器失败: {}", e);
        BrowserError::LaunchFailed(e.to_string())
    })?;
    debug!("浏览器启动成功");

    // 在后台处理浏览器事件
    let handle = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等待浏览器状态同步
    sleep(Duration::from_millis(300)).await;

    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建页面失败: {}", e);
        BrowserError::LaunchFailed(e.to_string())
    })?;

    tokio::fs::create_dir_all(&options.download_dir).await?;
    let download_path = options
        .download_dir
        .canonicalize()
        .unwrap_or_else(|_| options.download_dir.clone());
    let behavior = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::AllowAndName)
        .download_path(download_path.to_string_lossy().to_string())
        .events_enabled(true)
        .build()
        .map_err(|e| anyhow!("下载行为参数无效: {}", e))?;
    browser.execute(behavior).await.map_err(|e| {
        BrowserError::ConfigurationFailed(format!("无法设置下载目录: {}", e))
    })?;
    debug!("下载目录: {}", download_path.display());

    Ok((browser, page, handle))
}

/// 每次任务运行启动一个独立的浏览器
#[derive(Debug, Clone)]
pub struct ChromeSessionFactory {
    headless: bool,
    chrome_path: Option<String>,
    slow_mo: Duration,
    request_timeout: Duration,
}

impl ChromeSessionFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            headless: config.headless,
            chrome_path: config.chrome_path.clone(),
            slow_mo: config.slow_mo(),
            request_timeout: config.capture_timeout() * 2,
        }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    type Surface = ChromeSurface;

    async fn open(&self, spec: &SessionSpec) -> Result<ChromeSurface> {
        let identity = spec.certificate.as_ref().map(load_identity).transpose()?;
        let with_certificate = identity.is_some();
        let fetcher = DirectFetcher::new(identity, self.request_timeout)?;

        let options = LaunchOptions {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            download_dir: spec.download_dir.clone(),
        };
        let (browser, page, handler) = launch_browser(&options).await?;

        if with_certificate {
            // 代理任务随页面关闭自然结束
            let _proxy = cert_proxy::install(&page, fetcher.clone()).await?;
            info!("🔐 已启用证书代理");
        }

        Ok(ChromeSurface::new(
            browser,
            page,
            handler,
            spec.download_dir.clone(),
            fetcher,
            self.slow_mo,
        ))
    }
}
