//! 分页遍历 - 业务能力层
//!
//! 分页控件没有可靠的语义标记（没有 disabled、URL 不一定变化），
//! 因此用页面签名（URL + 行数 + 首行文字）的变化判断翻页是否真的发生。

use std::time::{Duration, Instant};

use anyhow::Result;
use phf::phf_set;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::infrastructure::surface::{AutomationSurface, Clickable, TableSnapshot};
use crate::utils::text::normalize_signal;

/// 常见的“下一页”标签
static NEXT_LABELS: phf::Set<&'static str> = phf_set! {
    "›", ">", "»", "→", ">>", "›»",
    "PROXIMA", "PROXIMO", "PROXIMA PAGINA", "NEXT", "SEGUINTE", "AVANCAR",
};

/// 宽松匹配时使用的词根
const LOOSE_ROOTS: [&str; 5] = ["PROX", "NEXT", "SEGUINTE", "AVANC", "PAGE-NEXT"];
const LOOSE_GLYPHS: [char; 4] = ['›', '»', '>', '→'];

/// 页面签名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSignature {
    pub url: String,
    pub row_count: usize,
    pub first_row_text: String,
}

impl PageSignature {
    pub fn of(table: &TableSnapshot) -> Self {
        Self {
            url: table.url.clone(),
            row_count: table.rows.len(),
            first_row_text: table
                .rows
                .first()
                .map(|r| r.text.trim().to_string())
                .unwrap_or_default(),
        }
    }
}

/// 翻页结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAdvance {
    /// 已翻到第 n 页
    Advanced(usize),
    /// 没有下一页
    Exhausted,
}

/// 下一页控件的匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Criterion {
    Strict,
    Loose,
}

/// 分页遍历器
pub struct PaginationWalker {
    current_page: usize,
    /// 只考虑视口中该比例以下的元素
    min_vertical_ratio: f64,
    settle_timeout: Duration,
    poll_interval: Duration,
}

impl PaginationWalker {
    pub fn new(settle_timeout: Duration) -> Self {
        Self {
            current_page: 1,
            min_vertical_ratio: 0.45,
            settle_timeout,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    /// 尝试翻到下一页
    pub async fn advance<S: AutomationSurface + ?Sized>(&mut self, surface: &S) -> Result<PageAdvance> {
        let before = PageSignature::of(&surface.table_snapshot().await?);
        let candidates = self.candidates(surface).await?;

        let strict = choose_next(&candidates, self.current_page, Criterion::Strict);
        if let Some(target) = strict {
            debug!("点击下一页控件: '{}'", target.label);
            surface.click(&target.handle).await?;
            if self.wait_for_change(surface, &before).await? {
                return Ok(self.mark_advanced());
            }
        }

        // 签名未变化，用宽松条件再试一次
        let loose = choose_next(&candidates, self.current_page, Criterion::Loose)
            .filter(|c| strict.map_or(true, |s| s.handle != c.handle))
            .or(strict);
        if let Some(target) = loose {
            debug!("宽松匹配重试下一页控件: '{}'", target.label);
            surface.click(&target.handle).await?;
            if self.wait_for_change(surface, &before).await? {
                return Ok(self.mark_advanced());
            }
        }

        info!("📄 第 {} 页之后没有更多结果", self.current_page);
        Ok(PageAdvance::Exhausted)
    }

    fn mark_advanced(&mut self) -> PageAdvance {
        self.current_page += 1;
        info!("📄 已翻到第 {} 页", self.current_page);
        PageAdvance::Advanced(self.current_page)
    }

    async fn candidates<S: AutomationSurface + ?Sized>(&self, surface: &S) -> Result<Vec<Clickable>> {
        Ok(surface
            .clickables()
            .await?
            .into_iter()
            .filter(|c| c.visible && !c.disabled && c.vertical_ratio >= self.min_vertical_ratio)
            .collect())
    }

    /// 在超时内轮询签名，变化返回 true
    async fn wait_for_change<S: AutomationSurface + ?Sized>(
        &self,
        surface: &S,
        before: &PageSignature,
    ) -> Result<bool> {
        let deadline = Instant::now() + self.settle_timeout;
        loop {
            let now = PageSignature::of(&surface.table_snapshot().await?);
            if &now != before {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            // 网络空闲后再比一次即可结束等待
            let remaining = deadline.saturating_duration_since(Instant::now());
            if surface.wait_for_network_idle(remaining.min(self.poll_interval)).await? {
                let now = PageSignature::of(&surface.table_snapshot().await?);
                return Ok(&now != before);
            }
            sleep(self.poll_interval.min(remaining)).await;
        }
    }
}

/// 在候选中选择下一页控件
fn choose_next(candidates: &[Clickable], current_page: usize, criterion: Criterion) -> Option<&Clickable> {
    match criterion {
        Criterion::Strict => {
            let wanted = (current_page + 1).to_string();
            candidates
                .iter()
                .find(|c| c.label.trim() == wanted)
                .or_else(|| {
                    candidates
                        .iter()
                        .find(|c| NEXT_LABELS.contains(normalize_signal(&c.label).as_str()))
                })
        }
        Criterion::Loose => candidates.iter().rev().find(|c| {
            let text = normalize_signal(&format!("{} {}", c.label, c.hint));
            LOOSE_ROOTS.iter().any(|root| text.contains(root))
                || c.label.chars().any(|ch| LOOSE_GLYPHS.contains(&ch))
        }),
    }
}
