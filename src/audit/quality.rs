//! Deterministic run-quality scoring over structural metrics. No model calls.

use crate::types::{FinalAnalysis, QualityTier, RunQuality};

/// Penalty weights and thresholds.
#[derive(Debug, Clone)]
pub struct QualityGate {
    pub failed_agent_penalty: f64,
    pub low_survival_ratio: f64,
    pub low_survival_penalty: f64,
    pub moderate_survival_ratio: f64,
    pub moderate_survival_penalty: f64,
    pub min_survived_sources: usize,
    pub few_sources_penalty: f64,
    pub red_flag_threshold: usize,
    pub red_flag_penalty: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            failed_agent_penalty: 0.3,
            low_survival_ratio: 0.5,
            low_survival_penalty: 0.3,
            moderate_survival_ratio: 0.7,
            moderate_survival_penalty: 0.1,
            min_survived_sources: 5,
            few_sources_penalty: 0.2,
            red_flag_threshold: 4,
            red_flag_penalty: 0.1,
        }
    }
}

impl QualityGate {
    pub fn evaluate(&self, analysis: &FinalAnalysis) -> RunQuality {
        let telemetry = &analysis.telemetry;
        let mut score = 1.0;
        let mut warnings = Vec::new();

        let failed = telemetry
            .modules_attempted
            .saturating_sub(telemetry.modules_completed);
        if failed > 0 {
            score -= self.failed_agent_penalty * failed as f64;
            warnings.push(format!(
                "{} agent(s) failed; analysis is incomplete",
                failed
            ));
        }

        if analysis.search_enabled {
            let survived = analysis.sources.len();
            let claimed = telemetry.sources_claimed;
            if claimed > 0 {
                let survival = survived as f64 / claimed as f64;
                if survival < self.low_survival_ratio {
                    score -= self.low_survival_penalty;
                    warnings.push(format!(
                        "Low source survival ({:.0}%): most claimed sources had no real URL",
                        survival * 100.0
                    ));
                } else if survival < self.moderate_survival_ratio {
                    score -= self.moderate_survival_penalty;
                    warnings.push(format!(
                        "Moderate source survival ({:.0}%): some sources may be fabricated",
                        survival * 100.0
                    ));
                }
            }
            if survived < self.min_survived_sources {
                score -= self.few_sources_penalty;
                warnings.push(format!(
                    "Only {} source(s) survived URL validation; analysis may be undergrounded",
                    survived
                ));
            }
        }

        let red = analysis.red_flag_count();
        if red >= self.red_flag_threshold {
            score -= self.red_flag_penalty;
            warnings.push(format!(
                "{} critical flags identified; consider deep research for evidence-based resolution",
                red
            ));
        }

        if telemetry.failures.iter().any(|f| f.agent == "synthesis") {
            warnings.push("Synthesis failed; no merged narrative was produced".to_string());
        }
        if telemetry.cancelled {
            warnings.push("Run was cancelled before completion".to_string());
        }

        // Rounded before tiering so 1.0 - 0.3 - 0.2 lands on 0.5 exactly.
        let score = (score.clamp(0.0, 1.0) * 100.0).round() / 100.0;
        RunQuality {
            score,
            tier: QualityTier::from_score(score),
            warnings,
        }
    }
}
