//! Pure projections from scan data into display-ready statistics.

use serde::Serialize;

use crate::config::HeatmapOrder;
use crate::types::{Finding, HeatmapEntry, Severity, Summary};

/// Shown instead of an empty heatmap.
pub const NO_FINDINGS_MESSAGE: &str = "No findings yet. Run a scan to populate the heatmap.";

/// Project severity totals into heatmap cells, one per key.
///
/// `HeatmapOrder::Server` keeps the order the service listed the keys in;
/// `HeatmapOrder::SeverityRank` sorts CRITICAL first. Absent or empty totals
/// give an empty heatmap.
pub fn heatmap(totals: Option<&[(Severity, u64)]>, order: HeatmapOrder) -> Vec<HeatmapEntry> {
    let mut entries: Vec<HeatmapEntry> = totals
        .unwrap_or_default()
        .iter()
        .map(|&(severity, count)| HeatmapEntry { severity, count })
        .collect();
    if order == HeatmapOrder::SeverityRank {
        // stable, so duplicate keys keep their relative order
        entries.sort_by(|a, b| b.severity.cmp(&a.severity));
    }
    entries
}

/// Headline counters above the heatmap.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeverityCards {
    pub critical: u64,
    pub high_and_medium: u64,
    pub total: u64,
}

pub fn severity_cards(summary: Option<&Summary>) -> SeverityCards {
    match summary {
        Some(s) => SeverityCards {
            critical: s.severity_count(Severity::Critical),
            high_and_medium: s
                .severity_count(Severity::High)
                .saturating_add(s.severity_count(Severity::Medium)),
            total: s.total_findings,
        },
        None => SeverityCards::default(),
    }
}

/// Recompute a summary from a findings collection. Keys appear in order of
/// first occurrence.
pub fn summarize(findings: &[Finding], status: &str) -> Summary {
    let mut severity_totals: Vec<(Severity, u64)> = Vec::new();
    let mut service_totals: Vec<(String, u64)> = Vec::new();
    for f in findings {
        match severity_totals.iter_mut().find(|(s, _)| *s == f.severity) {
            Some((_, n)) => *n += 1,
            None => severity_totals.push((f.severity, 1)),
        }
        match service_totals.iter_mut().find(|(s, _)| *s == f.service) {
            Some((_, n)) => *n += 1,
            None => service_totals.push((f.service.clone(), 1)),
        }
    }
    Summary {
        severity_totals,
        service_totals,
        total_findings: findings.len() as u64,
        status: status.to_string(),
    }
}

/// True when the server's per-severity counts disagree with the findings.
/// Ordering is ignored.
pub fn totals_drift(summary: &Summary, findings: &[Finding]) -> bool {
    let recomputed = summarize(findings, &summary.status);
    if recomputed.total_findings != summary.total_findings {
        return true;
    }
    Severity::RANKED
        .iter()
        .any(|&s| recomputed.severity_count(s) != summary.severity_count(s))
}
