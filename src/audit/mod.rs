//! Audit pipeline
//!
//! Five independent layers over a finished [`FinalAnalysis`]:
//!
//! | Layer | Module | External calls |
//! |-------|--------|----------------|
//! | L1 prompt constraints | [`linter`] | none |
//! | L2 citation integrity | [`integrity`] | none |
//! | L3 URL reachability | [`reachability`] | HTTP HEAD |
//! | L4 grounding (sampled, opt-in) | [`grounding`] | page fetch + reasoning |
//! | L5 round consistency (opt-in) | [`consistency`] | reasoning |
//!
//! A failed or skipped layer never blocks another. [`quality::QualityGate`]
//! lives here too; it is scored by the orchestrator, not by the pipeline.

pub mod consistency;
pub mod grounding;
pub mod integrity;
pub mod linter;
pub mod quality;
pub mod reachability;

pub use consistency::ConsistencyChecker;
pub use grounding::GroundingVerifier;
pub use quality::QualityGate;
pub use reachability::{classify_status, ReachabilityChecker};

use crate::llm::Reasoner;
use crate::search::PageFetcher;
use crate::types::{AuditSummary, ConsistencyCheck, FinalAnalysis, GroundingCheck, ReachabilitySummary};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub reachability_timeout: Duration,
    pub reachability_concurrency: usize,
    pub grounding: bool,
    pub grounding_sample_rate: f64,
    pub grounding_seed: Option<u64>,
    pub consistency: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            reachability_timeout: Duration::from_secs(8),
            reachability_concurrency: 10,
            grounding: false,
            grounding_sample_rate: 0.2,
            grounding_seed: None,
            consistency: false,
        }
    }
}

pub struct AuditPipeline {
    reasoner: Option<Arc<Reasoner>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    options: AuditOptions,
}

impl AuditPipeline {
    /// Layers 4 and 5 need a reasoner (and L4 a page fetcher); without them
    /// they are skipped.
    pub fn new(
        reasoner: Option<Arc<Reasoner>>,
        fetcher: Option<Arc<dyn PageFetcher>>,
        options: AuditOptions,
    ) -> Self {
        Self {
            reasoner,
            fetcher,
            options,
        }
    }

    pub fn lint(&self, analysis: &FinalAnalysis) -> crate::types::LayerVerdict {
        linter::lint(analysis)
    }

    pub fn integrity(&self, analysis: &FinalAnalysis) -> crate::types::LayerVerdict {
        integrity::check(analysis)
    }

    pub async fn reachability(&self, analysis: &FinalAnalysis) -> ReachabilitySummary {
        match ReachabilityChecker::new(
            self.options.reachability_timeout,
            self.options.reachability_concurrency,
        ) {
            Ok(checker) => checker.check(analysis).await,
            Err(e) => {
                tracing::error!(error = %e, "Reachability layer could not start");
                reachability::all_failed(&reachability::collect_urls(analysis), &e.to_string())
            }
        }
    }

    /// L1 to L3: cheap enough to run after every completed run.
    pub async fn run_fast(&self, analysis: &FinalAnalysis) -> AuditSummary {
        AuditSummary {
            layer1: self.lint(analysis),
            layer2: self.integrity(analysis),
            layer3: self.reachability(analysis).await,
            layer4: None,
            layer5: None,
        }
    }

    pub async fn run_grounding(&self, analysis: &FinalAnalysis) -> Option<Vec<GroundingCheck>> {
        let (Some(reasoner), Some(fetcher)) = (&self.reasoner, &self.fetcher) else {
            tracing::warn!("Grounding verification skipped: no reasoner or page fetcher");
            return None;
        };
        let verifier = GroundingVerifier::new(
            reasoner.clone(),
            fetcher.clone(),
            self.options.grounding_sample_rate,
            self.options.grounding_seed,
        );
        Some(verifier.verify(analysis).await)
    }

    pub async fn run_consistency(&self, analysis: &FinalAnalysis) -> Option<Vec<ConsistencyCheck>> {
        let Some(reasoner) = &self.reasoner else {
            tracing::warn!("Consistency check skipped: no reasoner");
            return None;
        };
        Some(ConsistencyChecker::new(reasoner.clone()).check(analysis).await)
    }

    /// Runs L1 to L3 plus whichever opt-in layers are enabled, and writes the
    /// summary back into the record.
    pub async fn run(&self, analysis: &mut FinalAnalysis) -> AuditSummary {
        let mut summary = self.run_fast(analysis).await;
        if self.options.grounding {
            summary.layer4 = self.run_grounding(analysis).await;
        }
        if self.options.consistency {
            summary.layer5 = self.run_consistency(analysis).await;
        }
        tracing::info!(
            layer1 = summary.layer1.passed,
            layer2 = summary.layer2.passed,
            urls_failed = summary.layer3.failed,
            exit_code = summary.exit_code(),
            "Audit complete"
        );
        analysis.audit = Some(summary.clone());
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fast_layers_on_empty_record() {
        let mut analysis = FinalAnalysis::new("Should we open a second warehouse?");
        let pipeline = AuditPipeline::new(None, None, AuditOptions::default());
        let summary = pipeline.run(&mut analysis).await;

        assert!(summary.layer1.passed);
        assert!(summary.layer2.passed);
        assert_eq!(summary.layer3.total, 0);
        assert!(summary.layer4.is_none());
        assert_eq!(summary.exit_code(), 0);
        assert!(analysis.audit.is_some());
    }

    #[tokio::test]
    async fn test_opt_in_layers_skip_without_reasoner() {
        let analysis = FinalAnalysis::new("p");
        let options = AuditOptions {
            grounding: true,
            consistency: true,
            ..Default::default()
        };
        let pipeline = AuditPipeline::new(None, None, options);
        assert!(pipeline.run_grounding(&analysis).await.is_none());
        assert!(pipeline.run_consistency(&analysis).await.is_none());
    }
}
