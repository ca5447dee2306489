use crate::state::StatusCounts;
use serde::Serialize;
use std::collections::HashMap;
use trendscout_core::{keyword_key, KeywordResult};

/// Passing keywords of one category, in ranked order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub category: String,
    pub keywords: Vec<String>,
}

/// What a completed scan hands to downstream consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// Passing, scored keywords in rank order.
    pub ranked: Vec<KeywordResult>,
    /// Per-status counts over the whole checkpoint log, resumed runs included.
    pub status_counts: StatusCounts,
    pub total_keywords: usize,
    pub scanned_this_run: usize,
    pub skipped: usize,
    pub by_category: Vec<CategorySummary>,
    pub archived_to: Option<String>,
}

impl ScanReport {
    pub fn new(
        ranked: Vec<KeywordResult>,
        log: &[KeywordResult],
        total_keywords: usize,
        scanned_this_run: usize,
        skipped: usize,
    ) -> Self {
        let by_category = group_by_category(&ranked);
        Self {
            ranked,
            status_counts: count_statuses(log),
            total_keywords,
            scanned_this_run,
            skipped,
            by_category,
            archived_to: None,
        }
    }

    pub fn top(&self, n: usize) -> &[KeywordResult] {
        &self.ranked[..n.min(self.ranked.len())]
    }

    pub fn passing_count(&self) -> usize {
        self.ranked.len()
    }
}

// Latest record per keyword decides its status.
fn count_statuses(log: &[KeywordResult]) -> StatusCounts {
    let mut latest = HashMap::new();
    for record in log {
        latest.insert(keyword_key(&record.keyword), record.status);
    }

    let mut counts = StatusCounts::default();
    for status in latest.into_values() {
        counts.record(status);
    }
    counts
}

fn group_by_category(ranked: &[KeywordResult]) -> Vec<CategorySummary> {
    let mut groups: Vec<CategorySummary> = Vec::new();
    for result in ranked {
        match groups.iter_mut().find(|g| g.category == result.category) {
            Some(group) => group.keywords.push(result.keyword.clone()),
            None => groups.push(CategorySummary {
                category: result.category.clone(),
                keywords: vec![result.keyword.clone()],
            }),
        }
    }
    groups
}
