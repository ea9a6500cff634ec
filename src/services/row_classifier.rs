//! 行状态识别 - 业务能力层
//!
//! 状态列经常只有图标，没有文字，所以信号来自三处：
//! 单元格文字、后代节点的提示属性、原始 innerHTML。

use crate::infrastructure::surface::{CellSnapshot, RowSnapshot};
use crate::utils::text::normalize_signal;

/// 每个单元格最多取的提示属性数量
pub const MAX_TOOLTIPS: usize = 15;

/// 文字中出现这些词根即视为状态明确，不再需要提示属性
const STATUS_ROOTS: [&str; 6] = ["CANCEL", "NORMAL", "ATIV", "EMITID", "AUTORIZ", "SUBSTITU"];

/// 行状态识别结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowClassification {
    /// 拼接后的原始信号
    pub raw_signal: String,
    /// 归一化信号
    pub normalized: String,
    pub is_cancelled: bool,
}

/// 在表头中定位状态列，找不到返回 None
pub fn resolve_status_column(headers: &[String]) -> Option<usize> {
    headers.iter().position(|h| {
        let norm = normalize_signal(h);
        norm.contains("STATUS") || norm.contains("SITUA")
    })
}

/// 识别一行的作废状态
pub fn classify_row(row: &RowSnapshot, status_column: Option<usize>) -> RowClassification {
    let raw_signal = match status_column.and_then(|i| row.cells.get(i)) {
        Some(cell) => cell_signal(cell),
        None => {
            // 找不到状态列时退化为整行
            let mut parts = vec![row.text.clone()];
            parts.extend(
                row.cells
                    .iter()
                    .flat_map(|c| c.tooltips.iter().cloned())
                    .take(MAX_TOOLTIPS),
            );
            parts.retain(|p| !p.trim().is_empty());
            parts.join(" ")
        }
    };

    let normalized = normalize_signal(&raw_signal);
    let is_cancelled = signals_cancellation(&normalized);

    RowClassification {
        raw_signal,
        normalized,
        is_cancelled,
    }
}

/// 单元格信号：文字明确时只用文字，否则拼上提示属性与 innerHTML
fn cell_signal(cell: &CellSnapshot) -> String {
    let text = cell.text.trim();
    let text_norm = normalize_signal(text);
    if !text_norm.is_empty() && STATUS_ROOTS.iter().any(|root| text_norm.contains(root)) {
        return text.to_string();
    }

    let mut parts: Vec<&str> = Vec::new();
    if !text.is_empty() {
        parts.push(text);
    }
    parts.extend(
        cell.tooltips
            .iter()
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
            .take(MAX_TOOLTIPS),
    );
    if !cell.inner_html.trim().is_empty() {
        parts.push(cell.inner_html.as_str());
    }
    parts.join(" ")
}

/// 出现 `CANCEL` 词根且整段信号中没有 `CANCELAR` 时判定为已作废
///
/// `CANCELAR` 是操作按钮（“作废这张”），不是状态；按钮的英文标记
/// (`btn-cancel`、`cancelNota()`) 也会带出 `CANCEL`，所以只要出现
/// `CANCELAR` 就整体不算作废。
pub fn signals_cancellation(normalized: &str) -> bool {
    normalized.contains("CANCEL") && !normalized.contains("CANCELAR")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(text: &str, tooltips: &[&str], html: &str) -> CellSnapshot {
        CellSnapshot {
            text: text.to_string(),
            tooltips: tooltips.iter().map(|s| s.to_string()).collect(),
            inner_html: html.to_string(),
        }
    }

    fn row(cells: Vec<CellSnapshot>) -> RowSnapshot {
        RowSnapshot {
            text: cells.iter().map(|c| c.text.clone()).collect::<Vec<_>>().join("\t"),
            cells,
            links: Vec::new(),
        }
    }

    #[test]
    fn test_status_column_by_header_name() {
        let headers = vec![
            "Número".to_string(),
            "Emissão".to_string(),
            "Situação".to_string(),
        ];
        assert_eq!(resolve_status_column(&headers), Some(2));

        let headers = vec!["Status".to_string(), "Valor".to_string()];
        assert_eq!(resolve_status_column(&headers), Some(0));

        assert_eq!(resolve_status_column(&["Valor".to_string()]), None);
    }

    #[test]
    fn test_cancelled_text() {
        let r = row(vec![cell("123", &[], ""), cell("Cancelada", &[], "")]);
        let c = classify_row(&r, Some(1));
        assert!(c.is_cancelled);
        assert_eq!(c.normalized, "CANCELADA");
    }

    #[test]
    fn test_icon_only_status_uses_tooltip() {
        let r = row(vec![
            cell("123", &[], ""),
            cell("", &["NFS-e Cancelada"], r#"<img src="cancelada.png">"#),
        ]);
        assert!(classify_row(&r, Some(1)).is_cancelled);
    }

    #[test]
    fn test_vendor_tooltip_with_accents() {
        let r = row(vec![cell(
            "",
            &["Situação: CANCELADÁ"],
            r#"<i class="fa fa-ban" data-original-title="Situação: CANCELADÁ"></i>"#,
        )]);
        assert!(classify_row(&r, Some(0)).is_cancelled);
    }

    #[test]
    fn test_cancel_action_is_not_status() {
        let r = row(vec![cell(
            "",
            &["Cancelar NFS-e"],
            r#"<a href="/Notas/Cancelar/1" title="Cancelar NFS-e"></a>"#,
        )]);
        let c = classify_row(&r, Some(0));
        assert!(!c.is_cancelled);
        assert!(c.normalized.contains("CANCELAR"));
    }

    #[test]
    fn test_normal_row() {
        let r = row(vec![cell("", &["Emitida"], "<img>")]);
        assert!(!classify_row(&r, Some(0)).is_cancelled);
    }

    #[test]
    fn test_missing_status_column_falls_back_to_row() {
        let r = RowSnapshot {
            text: "123  01/10/2025".to_string(),
            cells: vec![cell("123", &[], ""), cell("", &["Cancelada"], "")],
            links: Vec::new(),
        };
        assert!(classify_row(&r, None).is_cancelled);
    }

    #[test]
    fn test_tooltips_are_capped() {
        let mut tips: Vec<String> = (0..20).map(|i| format!("icone {}", i)).collect();
        tips.push("Cancelada".to_string());
        let c = CellSnapshot {
            text: String::new(),
            tooltips: tips,
            inner_html: String::new(),
        };
        let r = row(vec![c]);
        assert!(!classify_row(&r, Some(0)).is_cancelled);
    }

    #[test]
    fn test_signals_cancellation_rule() {
        assert!(signals_cancellation("NFSE CANCELADA"));
        assert!(signals_cancellation("CANCELAMENTO DEFERIDO"));
        assert!(!signals_cancellation("CANCELAR"));
        assert!(!signals_cancellation("EMITIDA"));
        assert!(!signals_cancellation("CANCELAR CANCELADA"));
    }

    #[test]
    fn test_cancel_action_markup_is_not_cancelled() {
        let c = cell(
            "",
            &["Cancelar NFS-e"],
            r#"<a class="btn-cancel" href="/Notas/Cancel/1" title="Cancelar NFS-e"><i class="fa fa-ban"></i></a>"#,
        );
        let r = row(vec![c]);
        let classification = classify_row(&r, Some(0));
        assert!(classification.normalized.contains("BTN-CANCEL"));
        assert!(!classification.is_cancelled);
    }
}
