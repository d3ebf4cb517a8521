//! Merges per-emitter source lists into the run's single global list.
//!
//! Walk order is stable: round, then position in the run's output list (which
//! follows roster order), then emission order inside each list. A URL keeps the
//! first global index it was given for the rest of the run. Emitters that were
//! already processed are skipped, so running the pass again is a no-op.

use crate::sources::{normalize_url, rewrite_markers, rewrite_value};
use crate::types::{CitedSource, FinalAnalysis, SourceRecord};
use std::collections::HashMap;

/// Counters for one consolidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Sources claimed by emitters processed in this pass.
    pub claimed: usize,
    /// New entries appended to the global list.
    pub promoted: usize,
    /// Entries dropped for lacking an absolute https URL.
    pub dropped: usize,
}

/// Global index under construction: normalized URL → 1-based index.
struct GlobalIndex<'a> {
    sources: &'a mut Vec<SourceRecord>,
    by_url: HashMap<String, usize>,
    promoted: usize,
}

impl<'a> GlobalIndex<'a> {
    fn new(sources: &'a mut Vec<SourceRecord>) -> Self {
        let by_url = sources
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.url
                    .as_deref()
                    .and_then(normalize_url)
                    .map(|url| (url, i + 1))
            })
            .collect();
        Self {
            sources,
            by_url,
            promoted: 0,
        }
    }

    fn assign(&mut self, record: &SourceRecord) -> Option<usize> {
        let url = record.url.as_deref().and_then(normalize_url)?;
        if let Some(index) = self.by_url.get(&url) {
            return Some(*index);
        }
        self.sources.push(SourceRecord {
            title: record.title.clone(),
            url: Some(url.clone()),
            snippet: record.snippet.clone(),
        });
        let index = self.sources.len();
        self.by_url.insert(url, index);
        self.promoted += 1;
        Some(index)
    }

    /// Local index → global index for one emitter. The first entry wins when
    /// an emitter reuses a local number.
    fn map_emitter(&mut self, sources: &[CitedSource], dropped: &mut usize) -> HashMap<usize, usize> {
        let mut map = HashMap::new();
        for source in sources {
            match self.assign(&source.record) {
                Some(global) => {
                    map.entry(source.local_index).or_insert(global);
                }
                None => *dropped += 1,
            }
        }
        map
    }
}

#[derive(Debug, Clone)]
pub struct SourceConsolidator {
    drop_on_miss: bool,
}

impl Default for SourceConsolidator {
    fn default() -> Self {
        Self { drop_on_miss: true }
    }
}

impl SourceConsolidator {
    pub fn new(drop_on_miss: bool) -> Self {
        Self { drop_on_miss }
    }

    /// Folds every unprocessed agent output and conflict resolution into the
    /// global list, rewrites their markers, clears their local lists and prunes
    /// synthesis-level markers that point past the end of the list.
    pub fn consolidate(&self, analysis: &mut FinalAnalysis) -> ConsolidationReport {
        let mut report = ConsolidationReport::default();
        let drop_on_miss = self.drop_on_miss;

        let mut order: Vec<usize> = (0..analysis.agent_outputs.len()).collect();
        order.sort_by_key(|&i| analysis.agent_outputs[i].round);

        let FinalAnalysis {
            agent_outputs,
            conflict_resolutions,
            sources,
            ..
        } = &mut *analysis;
        let mut index = GlobalIndex::new(sources);

        for i in order {
            let output = &mut agent_outputs[i];
            if output.citations_resolved {
                continue;
            }
            report.claimed += output.sources.len();
            let map = index.map_emitter(&output.sources, &mut report.dropped);
            let lookup = |n: usize| map.get(&n).copied();

            rewrite_value(&mut output.analysis, &lookup, drop_on_miss);
            for flag in output.flags.iter_mut() {
                *flag = rewrite_markers(flag, lookup, drop_on_miss);
            }
            output.sources.clear();
            output.citations_resolved = true;
        }

        for resolution in conflict_resolutions.iter_mut() {
            if resolution.citations_resolved {
                continue;
            }
            report.claimed += resolution.sources.len();
            let map = index.map_emitter(&resolution.sources, &mut report.dropped);
            let lookup = |n: usize| map.get(&n).copied();

            resolution.verdict = rewrite_markers(&resolution.verdict, lookup, drop_on_miss);
            resolution.updated_recommendation =
                rewrite_markers(&resolution.updated_recommendation, lookup, drop_on_miss);
            resolution.sources.clear();
            resolution.citations_resolved = true;
        }

        report.promoted = index.promoted;
        analysis.telemetry.sources_claimed += report.claimed;
        self.prune_global_markers(analysis);

        if report.claimed > 0 {
            tracing::info!(
                claimed = report.claimed,
                promoted = report.promoted,
                dropped = report.dropped,
                total = analysis.sources.len(),
                "Consolidated sources"
            );
        }
        report
    }

    /// Synthesis-level text already uses global numbers; anything past the end
    /// of the list is an orphan.
    fn prune_global_markers(&self, analysis: &mut FinalAnalysis) {
        let len = analysis.sources.len();
        let valid = |n: usize| (1..=len).contains(&n).then_some(n);
        let drop_on_miss = self.drop_on_miss;

        analysis.synthesis = rewrite_markers(&analysis.synthesis, valid, drop_on_miss);
        for text in analysis
            .recommendations
            .iter_mut()
            .chain(analysis.priority_flags.iter_mut())
        {
            *text = rewrite_markers(text, valid, drop_on_miss);
        }
        for conflict in analysis.conflicts.iter_mut() {
            conflict.description = rewrite_markers(&conflict.description, valid, drop_on_miss);
        }
    }
}
