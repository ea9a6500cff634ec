use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::{Category, DateRange, DocFormat, ExecutionMode};

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 为 false 时所有任务都以模拟方式运行
    pub live: bool,
    pub headless: bool,
    /// 每次点击 / 输入前的延迟
    pub slow_mo_ms: u64,
    pub chrome_path: Option<String>,
    /// 输出根目录，任务目录为 `{output_dir}/jobs/...`
    pub output_dir: PathBuf,
    pub history_db: PathBuf,
    pub accounts_file: PathBuf,
    // --- 门户地址 ---
    pub login_url: String,
    pub cert_login_url: String,
    pub url_emitidas: String,
    pub url_recebidas: String,
    pub url_canceladas: String,
    // --- 任务参数 ---
    pub categories: Vec<Category>,
    pub formats: Vec<DocFormat>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub mode: ExecutionMode,
    pub owner: String,
    pub max_pages: usize,
    // --- 超时 ---
    pub capture_timeout_ms: u64,
    pub login_wait_ms: u64,
    pub settle_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            live: true,
            headless: true,
            slow_mo_ms: 0,
            chrome_path: None,
            output_dir: PathBuf::from("saida"),
            history_db: PathBuf::from("data/historico.db"),
            accounts_file: PathBuf::from("accounts.toml"),
            login_url: "https://www.nfse.gov.br/EmissorNacional/Login".to_string(),
            cert_login_url: "https://www.nfse.gov.br/EmissorNacional/Certificado".to_string(),
            url_emitidas: "https://www.nfse.gov.br/EmissorNacional/Notas/Emitidas".to_string(),
            url_recebidas: "https://www.nfse.gov.br/EmissorNacional/Notas/Recebidas".to_string(),
            url_canceladas: "https://www.nfse.gov.br/EmissorNacional/Notas/Emitidas".to_string(),
            categories: Category::ALL.to_vec(),
            formats: vec![DocFormat::Xml, DocFormat::Pdf],
            start: None,
            end: None,
            mode: ExecutionMode::Manual,
            owner: "admin".to_string(),
            max_pages: 200,
            capture_timeout_ms: 15_000,
            login_wait_ms: 20_000,
            settle_timeout_ms: 8_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 按变量名查值，未设置的字段保留默认值
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            live: parse_or(&get, "HARVEST_LIVE", default.live, parse_bool)?,
            headless: parse_or(&get, "HARVEST_HEADLESS", default.headless, parse_bool)?,
            slow_mo_ms: parse_or(&get, "HARVEST_SLOW_MO_MS", default.slow_mo_ms, number)?,
            chrome_path: get("HARVEST_CHROME_PATH").or(default.chrome_path),
            output_dir: get("HARVEST_OUTPUT_DIR").map(PathBuf::from).unwrap_or(default.output_dir),
            history_db: get("HARVEST_HISTORY_DB").map(PathBuf::from).unwrap_or(default.history_db),
            accounts_file: get("HARVEST_ACCOUNTS_FILE").map(PathBuf::from).unwrap_or(default.accounts_file),
            login_url: get("HARVEST_LOGIN_URL").unwrap_or(default.login_url),
            cert_login_url: get("HARVEST_CERT_LOGIN_URL").unwrap_or(default.cert_login_url),
            url_emitidas: get("HARVEST_URL_EMITIDAS").unwrap_or(default.url_emitidas),
            url_recebidas: get("HARVEST_URL_RECEBIDAS").unwrap_or(default.url_recebidas),
            url_canceladas: get("HARVEST_URL_CANCELADAS").unwrap_or(default.url_canceladas),
            categories: parse_or(&get, "HARVEST_CATEGORIES", default.categories, |v| {
                parse_list(v, Category::from_slug)
            })?,
            formats: parse_or(&get, "HARVEST_FORMATS", default.formats, parse_formats)?,
            start: get("HARVEST_START").or(default.start),
            end: get("HARVEST_END").or(default.end),
            mode: parse_or(&get, "HARVEST_MODE", default.mode, parse_mode)?,
            owner: get("HARVEST_OWNER").unwrap_or(default.owner),
            max_pages: parse_or(&get, "HARVEST_MAX_PAGES", default.max_pages, number)?,
            capture_timeout_ms: parse_or(&get, "HARVEST_CAPTURE_TIMEOUT_MS", default.capture_timeout_ms, number)?,
            login_wait_ms: parse_or(&get, "HARVEST_LOGIN_WAIT_MS", default.login_wait_ms, number)?,
            settle_timeout_ms: parse_or(&get, "HARVEST_SETTLE_TIMEOUT_MS", default.settle_timeout_ms, number)?,
        })
    }

    /// 分类对应的列表页地址
    pub fn category_url(&self, category: Category) -> &str {
        match category {
            Category::Emitidas => &self.url_emitidas,
            Category::Recebidas => &self.url_recebidas,
            Category::Canceladas => &self.url_canceladas,
        }
    }

    pub fn range(&self) -> DateRange {
        DateRange::parse(self.start.as_deref(), self.end.as_deref())
    }

    pub fn slow_mo(&self) -> Duration {
        Duration::from_millis(self.slow_mo_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn login_wait(&self) -> Duration {
        Duration::from_millis(self.login_wait_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

fn parse_or<G, T, P>(get: &G, key: &str, default: T, parse: P) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => parse(&value).ok_or_else(|| ConfigError::EnvVarParseFailed {
            var_name: key.to_string(),
            value,
            expected_type: std::any::type_name::<T>().to_string(),
        }),
    }
}

fn number<T: FromStr>(value: &str) -> Option<T> {
    value.parse().ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "sim" | "on" => Some(true),
        "0" | "false" | "no" | "nao" | "não" | "off" => Some(false),
        _ => None,
    }
}

fn parse_mode(value: &str) -> Option<ExecutionMode> {
    match value.to_ascii_lowercase().as_str() {
        "manual" => Some(ExecutionMode::Manual),
        "lote" | "batch" => Some(ExecutionMode::Lote),
        _ => None,
    }
}

/// `xml,pdf`；`none` / `nenhum` 表示不下载任何格式
fn parse_formats(value: &str) -> Option<Vec<DocFormat>> {
    match value.to_ascii_lowercase().as_str() {
        "none" | "nenhum" => Some(Vec::new()),
        "both" | "ambos" => Some(vec![DocFormat::Xml, DocFormat::Pdf]),
        _ => parse_list(value, DocFormat::from_str),
    }
}

/// 逗号分隔列表，任一项无法识别即整体失败，重复项去掉
fn parse_list<T: PartialEq>(value: &str, item: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
    let mut out = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let parsed = item(part)?;
        if !out.contains(&parsed) {
            out.push(parsed);
        }
    }
    Some(out)
}
