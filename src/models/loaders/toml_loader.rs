use crate::error::ConfigError;
use crate::models::account::Account;
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<Account>,
}

/// 从 TOML 文件加载账号列表
pub async fn load_accounts(toml_file_path: &Path) -> Result<Vec<Account>, ConfigError> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .map_err(|e| ConfigError::AccountsFile {
            path: toml_file_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let accounts = parse_accounts(&content).map_err(|e| ConfigError::AccountsFile {
        path: toml_file_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    tracing::info!(
        "成功加载 {} 个账号: {}",
        accounts.len(),
        toml_file_path.display()
    );

    Ok(accounts)
}

/// 解析账号 TOML 内容
pub fn parse_accounts(content: &str) -> Result<Vec<Account>, toml::de::Error> {
    let file: AccountsFile = toml::from_str(content)?;
    Ok(file.accounts)
}
