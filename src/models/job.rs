//! 任务模型
//!
//! 一次采集运行 = 一个账号 + 一个文档分类 + 一个日期区间

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::account::Credentials;

/// 文档分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// 已开具
    Emitidas,
    /// 已接收
    Recebidas,
    /// 已作废
    Canceladas,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Emitidas, Category::Recebidas, Category::Canceladas];

    /// 目录名与文件名前缀
    pub fn slug(self) -> &'static str {
        match self {
            Category::Emitidas => "emitidas",
            Category::Recebidas => "recebidas",
            Category::Canceladas => "canceladas",
        }
    }

    /// 从字符串解析分类
    pub fn from_slug(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emitidas" => Some(Category::Emitidas),
            "recebidas" => Some(Category::Recebidas),
            "canceladas" => Some(Category::Canceladas),
            _ => None,
        }
    }

    /// 根据行的作废状态决定是否保留该行
    ///
    /// `canceladas` 只保留已作废的行，其余分类只保留未作废的行
    pub fn keeps(self, is_cancelled: bool) -> bool {
        match self {
            Category::Canceladas => is_cancelled,
            Category::Emitidas | Category::Recebidas => !is_cancelled,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// 文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocFormat {
    Xml,
    Pdf,
}

impl DocFormat {
    /// 带点号的扩展名
    pub fn extension(self) -> &'static str {
        match self {
            DocFormat::Xml => ".xml",
            DocFormat::Pdf => ".pdf",
        }
    }

    /// 判断 content-type 是否属于该格式
    pub fn matches_content_type(self, content_type: &str) -> bool {
        let ct = content_type.to_ascii_lowercase();
        match self {
            DocFormat::Pdf => ct.contains("application/pdf"),
            DocFormat::Xml => ct.contains("xml"),
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "xml" => Some(DocFormat::Xml),
            "pdf" => Some(DocFormat::Pdf),
            _ => None,
        }
    }

    /// 从扩展名反查格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::from_str(ext)
    }
}

impl fmt::Display for DocFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocFormat::Xml => write!(f, "xml"),
            DocFormat::Pdf => write!(f, "pdf"),
        }
    }
}

/// 执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Manual,
    Lote,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Manual => "manual",
            ExecutionMode::Lote => "lote",
        }
    }
}

/// 日期区间（闭区间，两端均可省略）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// 从 ISO 字符串解析，只取前 10 位 (yyyy-mm-dd)
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Self {
        Self {
            start: start.and_then(parse_iso_prefix),
            end: end.and_then(parse_iso_prefix),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// 判断日期是否落在区间内
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    /// 目录用的区间键: `{start}_a_{end}`，缺省端为 `sem-data`
    pub fn period_key(&self) -> String {
        let fmt = |d: Option<NaiveDate>| {
            d.map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "sem-data".to_string())
        };
        format!("{}_a_{}", fmt(self.start), fmt(self.end))
    }
}

fn parse_iso_prefix(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// 账号标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRef {
    pub id: String,
    pub name: String,
}

/// 一次采集任务，只存在于单次运行期间
#[derive(Debug, Clone)]
pub struct Job {
    pub category: Category,
    pub range: DateRange,
    pub formats: Vec<DocFormat>,
    /// 任务根目录，分类子目录在其下按需创建
    pub target_dir: PathBuf,
    pub account: AccountRef,
    pub credentials: Option<Credentials>,
    pub mode: ExecutionMode,
    /// 发起者，用于历史记录归属
    pub owner: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_period_key_full_range() {
        let range = DateRange::new(Some(d(2025, 10, 1)), Some(d(2025, 10, 31)));
        assert_eq!(range.period_key(), "2025-10-01_a_2025-10-31");
    }

    #[test]
    fn test_period_key_only_end() {
        let range = DateRange::new(None, Some(d(2025, 10, 31)));
        assert_eq!(range.period_key(), "sem-data_a_2025-10-31");
        assert_eq!(DateRange::default().period_key(), "sem-data_a_sem-data");
    }

    #[test]
    fn test_parse_truncates_timestamps() {
        let range = DateRange::parse(Some("2025-10-01T00:00:00Z"), Some("2025-10-31"));
        assert_eq!(range.start, Some(d(2025, 10, 1)));
        assert_eq!(range.end, Some(d(2025, 10, 31)));
        assert_eq!(DateRange::parse(Some("garbage"), None), DateRange::default());
    }

    #[test]
    fn test_contains_is_inclusive() {
        let range = DateRange::new(Some(d(2025, 10, 1)), Some(d(2025, 10, 31)));
        assert!(range.contains(d(2025, 10, 1)));
        assert!(range.contains(d(2025, 10, 31)));
        assert!(!range.contains(d(2025, 11, 1)));
        assert!(DateRange::default().contains(d(1999, 1, 1)));
    }

    #[test]
    fn test_category_keeps() {
        assert!(Category::Canceladas.keeps(true));
        assert!(!Category::Canceladas.keeps(false));
        assert!(Category::Emitidas.keeps(false));
        assert!(!Category::Recebidas.keeps(true));
    }

    #[test]
    fn test_format_content_type() {
        assert!(DocFormat::Pdf.matches_content_type("application/pdf; charset=binary"));
        assert!(DocFormat::Xml.matches_content_type("text/xml"));
        assert!(!DocFormat::Xml.matches_content_type("application/pdf"));
        assert_eq!(DocFormat::from_extension(".PDF"), Some(DocFormat::Pdf));
    }
}
