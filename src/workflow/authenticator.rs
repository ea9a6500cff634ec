//! 登录流程
//!
//! 账号密码登录或证书登录。登录后在限定时间内仍停留在登录页即视为失败，
//! 此时保存截图和页面源码供排查。

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{AppError, AuthError};
use crate::infrastructure::surface::{first_found, AutomationSurface, Locator};
use crate::models::Credentials;
use crate::services::file_store;
use crate::utils::RunLog;

/// 证书登录失败后的额外重试次数
pub const CERT_RETRIES: usize = 2;

/// 登录名输入框
pub fn login_fields() -> Vec<Locator> {
    ["Inscricao", "login", "usuario", "cpf"]
        .iter()
        .map(|n| Locator::NameFragment(n.to_string()))
        .collect()
}

/// 密码输入框，同时也是“仍在登录页”的标志
pub fn password_field() -> Locator {
    Locator::Css("input[type='password']".to_string())
}

pub fn submit_buttons() -> Vec<Locator> {
    vec![
        Locator::ButtonText("Entrar".to_string()),
        Locator::ButtonText("Acessar".to_string()),
        Locator::Css("button[type='submit']".to_string()),
    ]
}

/// 证书登录入口
pub fn certificate_buttons() -> Vec<Locator> {
    vec![
        Locator::ButtonText("Certificado Digital".to_string()),
        Locator::ButtonText("Acesso via certificado digital".to_string()),
        Locator::Css("a[href*='Certificado']".to_string()),
    ]
}

/// 登录器
pub struct Authenticator {
    login_url: String,
    cert_login_url: String,
    login_wait: Duration,
    poll_interval: Duration,
}

impl Authenticator {
    pub fn new(config: &Config) -> Self {
        Self {
            login_url: config.login_url.clone(),
            cert_login_url: config.cert_login_url.clone(),
            login_wait: config.login_wait(),
            poll_interval: Duration::from_millis(250),
        }
    }

    /// 登录，失败返回 `AuthError`
    pub async fn login<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        credentials: &Credentials,
        log: &mut RunLog,
    ) -> Result<(), AppError> {
        match credentials {
            Credentials::Password { login, password } => {
                self.login_with_password(surface, login, password, log).await
            }
            Credentials::Certificate(bundle) => {
                log.info(format!("🔐 使用证书登录: {}", bundle.path.display()));
                self.login_with_certificate(surface, log).await
            }
        }
    }

    async fn login_with_password<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        login: &str,
        password: &str,
        log: &mut RunLog,
    ) -> Result<(), AppError> {
        log.info(format!("🔑 使用账号密码登录: {}", login));
        surface.navigate(&self.login_url).await?;

        if !self.on_login_surface(surface).await {
            log.info("✓ 会话已登录，跳过登录表单");
            return Ok(());
        }

        let login_input = first_found(surface, login_fields())
            .await
            .ok_or_else(|| AuthError::FormNotFound("login".to_string()))?;
        let password_input = first_found(surface, [password_field()])
            .await
            .ok_or_else(|| AuthError::FormNotFound("password".to_string()))?;
        let submit = first_found(surface, submit_buttons())
            .await
            .ok_or_else(|| AuthError::FormNotFound("submit".to_string()))?;

        surface.fill(&login_input, login).await?;
        surface.fill(&password_input, password).await?;
        surface.click(&submit).await?;

        if self.wait_until_left(surface).await? {
            log.info("✓ 登录成功");
            Ok(())
        } else {
            Err(AuthError::StillOnLoginSurface { attempts: 1 }.into())
        }
    }

    async fn login_with_certificate<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        log: &mut RunLog,
    ) -> Result<(), AppError> {
        let attempts = 1 + CERT_RETRIES;
        surface.navigate(&self.cert_login_url).await?;

        for attempt in 1..=attempts {
            if let Some(button) = first_found(surface, certificate_buttons()).await {
                debug!("点击证书登录入口 (第 {} 次)", attempt);
                surface.click(&button).await?;
            }
            if self.wait_until_left(surface).await? {
                log.info(format!("✓ 证书登录成功 (第 {} 次尝试)", attempt));
                return Ok(());
            }
            if attempt < attempts {
                log.warn(format!("⚠️ 证书登录第 {} 次未通过，重试", attempt));
                surface.navigate(&self.cert_login_url).await?;
            }
        }

        Err(AuthError::StillOnLoginSurface { attempts }.into())
    }

    /// 是否仍在登录页
    async fn on_login_surface<S: AutomationSurface + ?Sized>(&self, surface: &S) -> bool {
        let mut markers = vec![password_field()];
        markers.extend(certificate_buttons());
        first_found(surface, markers).await.is_some()
    }

    /// 在限定时间内等待离开登录页
    async fn wait_until_left<S: AutomationSurface + ?Sized>(&self, surface: &S) -> anyhow::Result<bool> {
        let deadline = Instant::now() + self.login_wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            surface
                .wait_for_network_idle(remaining.min(Duration::from_secs(2)))
                .await?;
            if !self.on_login_surface(surface).await {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.poll_interval.min(remaining)).await;
        }
    }
}

/// 保存登录失败现场：`debug/login-<ts>.png` 与 `.html`
pub async fn capture_debug_snapshot<S: AutomationSurface + ?Sized>(
    surface: &S,
    job_root: &Path,
) -> Result<Vec<PathBuf>, AppError> {
    let dir = job_root.join("debug");
    file_store::ensure_dir(&dir).await?;

    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let mut written = Vec::new();

    match surface.screenshot().await {
        Ok(png) => {
            let path = dir.join(format!("login-{}.png", stamp));
            file_store::write_atomic(&path, &png).await?;
            written.push(path);
        }
        Err(e) => debug!("截图失败: {}", e),
    }
    match surface.dump_markup().await {
        Ok(html) => {
            let path = dir.join(format!("login-{}.html", stamp));
            file_store::write_atomic(&path, html.as_bytes()).await?;
            written.push(path);
        }
        Err(e) => debug!("读取页面源码失败: {}", e),
    }

    info!("🧾 已保存登录失败现场: {}", dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::scripted::ScriptedSurface;
    use crate::models::CertificateBundle;

    fn authenticator() -> Authenticator {
        let config = Config {
            login_wait_ms: 40,
            ..Config::default()
        };
        Authenticator::new(&config)
    }

    fn password_surface(accept: bool) -> ScriptedSurface {
        ScriptedSurface::new()
            .with_login_element(Locator::NameFragment("Inscricao".into()), "user")
            .with_login_element(password_field(), "pwd")
            .with_login_element(Locator::ButtonText("Entrar".into()), "entrar")
            .with_login_trigger("entrar", accept)
    }

    fn password() -> Credentials {
        Credentials::Password {
            login: "12345678000190".into(),
            password: "segredo".into(),
        }
    }

    #[tokio::test]
    async fn test_password_login() {
        let surface = password_surface(true);
        let mut log = RunLog::default();
        authenticator().login(&surface, &password(), &mut log).await.unwrap();

        assert_eq!(
            surface.fills(),
            vec![
                ("user".to_string(), "12345678000190".to_string()),
                ("pwd".to_string(), "segredo".to_string())
            ]
        );
        assert_eq!(surface.clicks(), vec!["entrar".to_string()]);
    }

    #[tokio::test]
    async fn test_password_rejected() {
        let surface = password_surface(false);
        let mut log = RunLog::default();
        let err = authenticator()
            .login(&surface, &password(), &mut log)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::StillOnLoginSurface { attempts: 1 })));
    }

    #[tokio::test]
    async fn test_missing_form_is_auth_error() {
        let surface = ScriptedSurface::new().with_login_element(password_field(), "pwd");
        let mut log = RunLog::default();
        let err = authenticator()
            .login(&surface, &password(), &mut log)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::FormNotFound(_))));
    }

    #[tokio::test]
    async fn test_certificate_retries_then_fails() {
        let surface = ScriptedSurface::new()
            .with_login_element(Locator::ButtonText("Certificado Digital".into()), "cert")
            .with_login_trigger("cert", false);
        let credentials = Credentials::Certificate(CertificateBundle {
            path: "empresa.pfx".into(),
            passphrase: "x".into(),
        });
        let mut log = RunLog::default();
        let err = authenticator()
            .login(&surface, &credentials, &mut log)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Auth(AuthError::StillOnLoginSurface { attempts: 3 })
        ));
        assert_eq!(surface.clicks().len(), 3);
        assert_eq!(surface.navigations().len(), 3);
    }

    #[tokio::test]
    async fn test_debug_snapshot_written() {
        let dir = tempfile::tempdir().unwrap();
        let surface = ScriptedSurface::new();
        let written = capture_debug_snapshot(&surface, dir.path()).await.unwrap();
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|p| p.starts_with(dir.path().join("debug"))));
    }
}
