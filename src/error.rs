use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 登录失败
    #[error("认证错误: {0}")]
    Auth(#[from] AuthError),
    /// 文件下载捕获失败
    #[error("下载错误: {0}")]
    Capture(#[from] CaptureError),
    /// 文件写入错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),
    /// 历史记录写入错误
    #[error("历史记录错误: {0}")]
    History(#[from] rusqlite::Error),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 启动浏览器失败
    #[error("启动浏览器失败: {0}")]
    LaunchFailed(String),
    /// 浏览器配置失败
    #[error("浏览器配置失败: {0}")]
    ConfigurationFailed(String),
    /// 导航失败
    #[error("导航到 {url} 失败: {reason}")]
    NavigationFailed { url: String, reason: String },
    /// 元素已失效
    #[error("元素句柄已失效: {0}")]
    StaleHandle(String),
}

/// 配置错误，在打开任何浏览器会话之前即为致命错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 证书文件不存在
    #[error("证书文件不存在: {}", path.display())]
    CertificateMissing { path: PathBuf },
    /// 证书无法解析（密码错误或格式错误）
    #[error("证书无效 ({}): {reason}", path.display())]
    CertificateInvalid { path: PathBuf, reason: String },
    /// 账号文件读取失败
    #[error("无法读取账号文件 {}: {reason}", path.display())]
    AccountsFile { path: PathBuf, reason: String },
}

/// 认证错误
#[derive(Debug, Error)]
pub enum AuthError {
    /// 登录后仍停留在登录页面
    #[error("登录后仍停留在登录页面 (尝试 {attempts} 次)")]
    StillOnLoginSurface { attempts: usize },
    /// 登录表单缺失
    #[error("未找到登录表单字段: {0}")]
    FormNotFound(String),
}

/// 下载捕获错误
#[derive(Debug, Error)]
pub enum CaptureError {
    /// HTTP 响应非 2xx
    #[error("HTTP 状态异常 {status}: {url}")]
    HttpStatus { url: String, status: u16 },
    /// 响应体无法读取
    #[error("无法读取响应体 ({url}): {reason}")]
    BodyUnreadable { url: String, reason: String },
    /// 文件扩展名与请求格式不一致
    #[error("文件类型不匹配: 期望 {expected}, 实际 {actual}")]
    ExtensionMismatch { expected: String, actual: String },
    /// 空文件
    #[error("下载内容为空")]
    EmptyPayload,
    /// 所有通道均失败
    #[error("所有下载通道均失败: {}", reasons.join("; "))]
    AllChannelsFailed { reasons: Vec<String> },
}

/// 文件写入错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 创建目录失败
    #[error("创建目录失败 {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ========== 便捷构造函数 ==========

impl CaptureError {
    /// 创建扩展名不匹配错误
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        CaptureError::ExtensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_channels_message_joins_reasons() {
        let err = CaptureError::AllChannelsFailed {
            reasons: vec!["popup: timeout".to_string(), "get: 404".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "所有下载通道均失败: popup: timeout; get: 404"
        );
    }
}
