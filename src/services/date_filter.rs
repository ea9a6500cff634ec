//! 日期筛选 - 业务能力层
//!
//! 依次尝试：带标签的原生筛选控件 → 历史命名的控件 → 表格内逐行比对。

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::infrastructure::surface::{
    first_found, AutomationSurface, ElementHandle, Locator, RowSnapshot,
};
use crate::models::DateRange;
use crate::utils::text::normalize_signal;

static BR_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})/(\d{2})/(\d{4})").expect("date regex"));

/// 带标签控件的标签文字
const START_LABELS: [&str; 3] = ["Data Inicial", "Data Início", "Start Date"];
const END_LABELS: [&str; 3] = ["Data Final", "Data Fim", "End Date"];
const FILTER_BUTTONS: [&str; 2] = ["Filtrar", "Filter"];

/// 历史版本页面使用过的 id / name 片段
const LEGACY_START_NAMES: [&str; 5] = [
    "DataInicio",
    "DataInicial",
    "dtInicio",
    "txtDataInicial",
    "periodoInicial",
];
const LEGACY_END_NAMES: [&str; 5] = [
    "DataFim",
    "DataFinal",
    "dtFim",
    "txtDataFinal",
    "periodoFinal",
];
const LEGACY_BUTTONS: [&str; 3] = ["Pesquisar", "Consultar", "Buscar"];

/// 实际采用的筛选方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrategy {
    /// 无需筛选（未指定日期）
    Unfiltered,
    /// 带标签的原生控件
    Labeled,
    /// 历史命名控件
    Legacy,
    /// 表格内逐行比对
    Table,
}

/// 筛选结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOutcome {
    pub strategy: FilterStrategy,
    /// 是否仍需在表格内逐行比对（usarFiltroNaTabela）
    pub use_table_filter: bool,
}

/// 日期筛选器
pub struct DateFilterResolver {
    settle_timeout: Duration,
}

impl DateFilterResolver {
    pub fn new(settle_timeout: Duration) -> Self {
        Self { settle_timeout }
    }

    /// 尝试在服务端完成筛选
    pub async fn apply<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        range: &DateRange,
    ) -> Result<FilterOutcome> {
        if range.is_empty() {
            return Ok(FilterOutcome {
                strategy: FilterStrategy::Unfiltered,
                use_table_filter: false,
            });
        }

        // ========== 策略 1: 带标签控件 ==========
        let start = first_found(surface, START_LABELS.iter().map(|l| Locator::LabelText(l.to_string()))).await;
        let end = first_found(surface, END_LABELS.iter().map(|l| Locator::LabelText(l.to_string()))).await;
        if start.is_some() || end.is_some() {
            info!("📅 使用带标签的日期控件筛选");
            if self
                .fill_and_submit(surface, range, start, end, &FILTER_BUTTONS)
                .await
            {
                return Ok(FilterOutcome {
                    strategy: FilterStrategy::Labeled,
                    use_table_filter: false,
                });
            }
            warn!("⚠️ 带标签控件筛选失败，尝试历史控件");
        }

        // ========== 策略 2: 历史命名控件 ==========
        let start = first_found(surface, LEGACY_START_NAMES.iter().map(|n| Locator::NameFragment(n.to_string()))).await;
        let end = first_found(surface, LEGACY_END_NAMES.iter().map(|n| Locator::NameFragment(n.to_string()))).await;
        if start.is_some() || end.is_some() {
            info!("📅 使用历史命名的日期控件筛选");
            if self
                .fill_and_submit(surface, range, start, end, &LEGACY_BUTTONS)
                .await
            {
                return Ok(FilterOutcome {
                    strategy: FilterStrategy::Legacy,
                    use_table_filter: false,
                });
            }
            warn!("⚠️ 历史控件筛选失败");
        }

        // ========== 策略 3: 表格内比对 ==========
        info!("📅 页面没有可用的日期筛选控件，改为按“发行日期”列逐行比对");
        Ok(FilterOutcome {
            strategy: FilterStrategy::Table,
            use_table_filter: true,
        })
    }

    /// 填写日期并点击提交，任何一步失败返回 false
    async fn fill_and_submit<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        range: &DateRange,
        start: Option<ElementHandle>,
        end: Option<ElementHandle>,
        buttons: &[&str],
    ) -> bool {
        let attempt: Result<bool> = async {
            if let (Some(handle), Some(date)) = (&start, range.start) {
                surface.fill(handle, &format_br(date)).await?;
            }
            if let (Some(handle), Some(date)) = (&end, range.end) {
                surface.fill(handle, &format_br(date)).await?;
            }

            let button = first_found(surface, buttons.iter().map(|b| Locator::ButtonText(b.to_string()))).await;
            let Some(button) = button else {
                debug!("未找到提交按钮: {:?}", buttons);
                return Ok(false);
            };
            surface.click(&button).await?;
            if !surface.wait_for_network_idle(self.settle_timeout).await? {
                debug!("筛选后等待网络空闲超时");
            }
            Ok(true)
        }
        .await;

        attempt.unwrap_or_else(|e| {
            warn!("⚠️ 日期筛选出错: {}", e);
            false
        })
    }
}

/// dd/mm/yyyy
pub fn format_br(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// 解析页面上的 dd/mm/yyyy 日期（允许带时间后缀）
pub fn parse_br_date(text: &str) -> Option<NaiveDate> {
    let cap = BR_DATE_RE.captures(text)?;
    let day = cap[1].parse().ok()?;
    let month = cap[2].parse().ok()?;
    let year = cap[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// 在表头中定位“发行日期”列
pub fn resolve_issued_column(headers: &[String]) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_signal(h)).collect();
    normalized
        .iter()
        .position(|h| h.contains("EMISS"))
        .or_else(|| normalized.iter().position(|h| h.contains("DATA")))
}

/// 读取一行的发行日期：优先指定列，否则取整行第一个日期
pub fn row_issued_on(row: &RowSnapshot, issued_column: Option<usize>) -> Option<NaiveDate> {
    issued_column
        .and_then(|i| row.cells.get(i))
        .and_then(|cell| parse_br_date(&cell.text))
        .or_else(|| parse_br_date(&row.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::scripted::ScriptedSurface;
    use crate::infrastructure::surface::CellSnapshot;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn october() -> DateRange {
        DateRange::new(Some(d(2025, 10, 1)), Some(d(2025, 10, 31)))
    }

    #[test]
    fn test_parse_br_date() {
        assert_eq!(parse_br_date("05/10/2025"), Some(d(2025, 10, 5)));
        assert_eq!(parse_br_date("Emitida em 31/10/2025 14:22"), Some(d(2025, 10, 31)));
        assert_eq!(parse_br_date("31/02/2025"), None);
        assert_eq!(parse_br_date("sem data"), None);
    }

    #[test]
    fn test_resolve_issued_column() {
        let headers: Vec<String> = vec!["Número".into(), "Competência".into(), "Data de Emissão".into()];
        assert_eq!(resolve_issued_column(&headers), Some(2));
        let headers: Vec<String> = vec!["Número".into(), "Data".into()];
        assert_eq!(resolve_issued_column(&headers), Some(1));
        assert_eq!(resolve_issued_column(&["Valor".to_string()]), None);
    }

    #[test]
    fn test_row_issued_on_falls_back_to_row_text() {
        let row = RowSnapshot {
            text: "123 | 07/10/2025 | R$ 10,00".into(),
            cells: vec![CellSnapshot {
                text: "123".into(),
                ..Default::default()
            }],
            links: Vec::new(),
        };
        assert_eq!(row_issued_on(&row, Some(0)), Some(d(2025, 10, 7)));
        assert_eq!(row_issued_on(&row, Some(9)), Some(d(2025, 10, 7)));
    }

    #[tokio::test]
    async fn test_empty_range_skips_filtering() {
        let surface = ScriptedSurface::new();
        let resolver = DateFilterResolver::new(Duration::from_millis(10));
        let outcome = resolver.apply(&surface, &DateRange::default()).await.unwrap();
        assert_eq!(outcome.strategy, FilterStrategy::Unfiltered);
        assert!(!outcome.use_table_filter);
    }

    #[tokio::test]
    async fn test_labeled_controls_preferred() {
        let surface = ScriptedSurface::new()
            .with_element(Locator::LabelText("Data Inicial".into()), "ini")
            .with_element(Locator::LabelText("Data Final".into()), "fim")
            .with_element(Locator::ButtonText("Filtrar".into()), "btn")
            .with_element(Locator::NameFragment("DataInicio".into()), "legacy");
        let resolver = DateFilterResolver::new(Duration::from_millis(10));

        let outcome = resolver.apply(&surface, &october()).await.unwrap();

        assert_eq!(outcome.strategy, FilterStrategy::Labeled);
        assert!(!outcome.use_table_filter);
        assert_eq!(
            surface.fills(),
            vec![
                ("ini".to_string(), "01/10/2025".to_string()),
                ("fim".to_string(), "31/10/2025".to_string())
            ]
        );
        assert_eq!(surface.clicks(), vec!["btn".to_string()]);
    }

    #[tokio::test]
    async fn test_legacy_controls() {
        let surface = ScriptedSurface::new()
            .with_element(Locator::NameFragment("txtDataInicial".into()), "ini")
            .with_element(Locator::NameFragment("txtDataFinal".into()), "fim")
            .with_element(Locator::ButtonText("Consultar".into()), "btn");
        let resolver = DateFilterResolver::new(Duration::from_millis(10));

        let outcome = resolver.apply(&surface, &october()).await.unwrap();

        assert_eq!(outcome.strategy, FilterStrategy::Legacy);
        assert_eq!(surface.clicks(), vec!["btn".to_string()]);
    }

    #[tokio::test]
    async fn test_labeled_without_button_falls_through_to_table() {
        let surface = ScriptedSurface::new()
            .with_element(Locator::LabelText("Data Inicial".into()), "ini");
        let resolver = DateFilterResolver::new(Duration::from_millis(10));

        let outcome = resolver.apply(&surface, &october()).await.unwrap();

        assert_eq!(outcome.strategy, FilterStrategy::Table);
        assert!(outcome.use_table_filter);
    }
}
