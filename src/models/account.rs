use std::path::PathBuf;

use serde::Deserialize;

use crate::models::job::AccountRef;

/// 账号配置（来自 accounts.toml 的 `[[accounts]]`）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub cert_passphrase: Option<String>,
}

/// 证书文件（PKCS#12）+ 密码
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub path: PathBuf,
    pub passphrase: String,
}

/// 登录凭据
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { login: String, password: String },
    Certificate(CertificateBundle),
}

impl Account {
    pub fn reference(&self) -> AccountRef {
        AccountRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }

    /// 解析可用凭据，证书优先
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(path) = &self.cert_path {
            if !path.as_os_str().is_empty() {
                return Some(Credentials::Certificate(CertificateBundle {
                    path: path.clone(),
                    passphrase: self.cert_passphrase.clone().unwrap_or_default(),
                }));
            }
        }

        match (non_blank(&self.login), non_blank(&self.password)) {
            (Some(login), Some(password)) => Some(Credentials::Password {
                login: login.to_string(),
                password: password.to_string(),
            }),
            _ => None,
        }
    }
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// 目录名用的账号标识：只保留字母数字
pub fn account_dir_name(account: &AccountRef) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>()
            .trim_matches('_')
            .to_string()
    };
    let name = clean(&account.name);
    if name.is_empty() {
        clean(&account.id)
    } else {
        format!("{}-{}", clean(&account.id), name)
    }
}
