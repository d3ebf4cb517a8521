//! L2: citation integrity over the final record. Pure structural checks.

use crate::sources::{collect_strings, marker_indices, normalize_url};
use crate::types::{FinalAnalysis, LayerVerdict};
use std::collections::{BTreeSet, HashSet};

/// Every free-text field that may carry global citation markers.
pub(crate) fn cited_texts(analysis: &FinalAnalysis) -> Vec<&str> {
    let mut texts: Vec<&str> = vec![analysis.synthesis.as_str()];
    texts.extend(analysis.recommendations.iter().map(String::as_str));
    texts.extend(analysis.priority_flags.iter().map(String::as_str));
    texts.extend(analysis.conflicts.iter().map(|c| c.description.as_str()));
    for output in analysis.agent_outputs.iter().filter(|o| o.citations_resolved) {
        collect_strings(&output.analysis, &mut texts);
        texts.extend(output.flags.iter().map(String::as_str));
    }
    for resolution in analysis
        .conflict_resolutions
        .iter()
        .filter(|r| r.citations_resolved)
    {
        texts.push(&resolution.verdict);
        texts.push(&resolution.updated_recommendation);
    }
    texts
}

pub fn check(analysis: &FinalAnalysis) -> LayerVerdict {
    let mut violations = Vec::new();

    for (i, source) in analysis.sources.iter().enumerate() {
        if !source.has_url() {
            violations.push(format!("source [{}] \"{}\" has no URL", i + 1, source.title));
        }
    }

    let mut seen = HashSet::new();
    for source in &analysis.sources {
        let Some(url) = source.url.as_deref() else {
            continue;
        };
        let identity = normalize_url(url).unwrap_or_else(|| url.to_string());
        if !seen.insert(identity) {
            violations.push(format!("duplicate URL in global sources: {}", url));
        }
    }

    let texts = cited_texts(analysis);
    let markers: Vec<usize> = texts.iter().flat_map(|t| marker_indices(t)).collect();
    let orphans: BTreeSet<usize> = markers
        .iter()
        .copied()
        .filter(|&n| n == 0 || n > analysis.sources.len())
        .collect();
    if !orphans.is_empty() {
        let list: Vec<String> = orphans.iter().map(usize::to_string).collect();
        violations.push(format!("orphaned citation markers: [{}]", list.join(", ")));
    }

    if !analysis.search_enabled && (!analysis.sources.is_empty() || !markers.is_empty()) {
        violations.push(format!(
            "citations present although grounding was inactive ({} sources, {} markers)",
            analysis.sources.len(),
            markers.len()
        ));
    }

    for output in analysis.agent_outputs.iter().filter(|o| !o.citations_resolved) {
        if !output.sources.is_empty() {
            violations.push(format!(
                "{} ({}) still carries {} unconsolidated local sources",
                output.agent,
                output.round,
                output.sources.len()
            ));
        }
    }

    for resolution in analysis
        .conflict_resolutions
        .iter()
        .filter(|r| !r.citations_resolved)
    {
        let missing = resolution.sources.iter().filter(|s| !s.record.has_url()).count();
        if missing > 0 {
            violations.push(format!(
                "resolution \"{}\" has {} un-merged sources without URL",
                resolution.topic, missing
            ));
        }
    }

    if !violations.is_empty() {
        tracing::warn!(violations = violations.len(), "Citation integrity check failed");
    }
    LayerVerdict::from_violations(violations)
}
