//! L4: sampled grounding verification.
//!
//! Pairs every cited sentence with each global index it cites, samples a
//! fraction of the pairs, fetches the cited pages and asks the reasoning
//! service whether the page supports the sentence.

use crate::audit::integrity::cited_texts;
use crate::llm::{prompts, Reasoner};
use crate::search::PageFetcher;
use crate::sources::marker_indices;
use crate::types::{FinalAnalysis, GroundingCheck, GroundingVerdict};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

pub const PAGE_TEXT_LIMIT: usize = 4000;

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("valid sentence regex"));

/// A cited sentence and one index it cites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationPair {
    pub sentence: String,
    pub citation: usize,
}

pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END_RE.find_iter(text) {
        // keep the terminator, drop the whitespace
        let end = m.start() + 1;
        sentences.push(text[start..end].trim());
        start = m.end();
    }
    sentences.push(text[start..].trim());
    sentences.retain(|s| !s.is_empty());
    sentences
}

pub fn citation_pairs(analysis: &FinalAnalysis) -> Vec<CitationPair> {
    let mut pairs = Vec::new();
    for text in cited_texts(analysis) {
        for sentence in split_sentences(text) {
            for citation in marker_indices(sentence) {
                pairs.push(CitationPair {
                    sentence: sentence.to_string(),
                    citation,
                });
            }
        }
    }
    pairs
}

/// `max(1, floor(len * rate))` pairs, without replacement.
pub fn sample_pairs<R: Rng + ?Sized>(
    pairs: &[CitationPair],
    rate: f64,
    rng: &mut R,
) -> Vec<CitationPair> {
    if pairs.is_empty() {
        return Vec::new();
    }
    let size = ((pairs.len() as f64 * rate).floor() as usize).clamp(1, pairs.len());
    pairs.choose_multiple(rng, size).cloned().collect()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

pub struct GroundingVerifier {
    reasoner: Arc<Reasoner>,
    fetcher: Arc<dyn PageFetcher>,
    sample_rate: f64,
    seed: Option<u64>,
    concurrency: usize,
}

impl GroundingVerifier {
    pub fn new(
        reasoner: Arc<Reasoner>,
        fetcher: Arc<dyn PageFetcher>,
        sample_rate: f64,
        seed: Option<u64>,
    ) -> Self {
        Self {
            reasoner,
            fetcher,
            sample_rate,
            seed,
            concurrency: 5,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn sample(&self, pairs: &[CitationPair]) -> Vec<CitationPair> {
        match self.seed {
            Some(seed) => sample_pairs(pairs, self.sample_rate, &mut StdRng::seed_from_u64(seed)),
            None => sample_pairs(pairs, self.sample_rate, &mut rand::rng()),
        }
    }

    pub async fn verify(&self, analysis: &FinalAnalysis) -> Vec<GroundingCheck> {
        let sampled = self.sample(&citation_pairs(analysis));
        let targets: Vec<(CitationPair, String)> = sampled
            .into_iter()
            .filter_map(|pair| {
                let url = analysis
                    .sources
                    .get(pair.citation.checked_sub(1)?)?
                    .url
                    .clone()?;
                Some((pair, url))
            })
            .collect();
        tracing::info!(checks = targets.len(), "Verifying grounding of sampled citations");

        stream::iter(targets)
            .map(|(pair, url)| self.check_one(pair, url))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn check_one(&self, pair: CitationPair, url: String) -> GroundingCheck {
        let verdict = match self.fetcher.fetch(&url).await {
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Page fetch failed");
                GroundingVerdict::FetchFailed
            }
            Ok(text) if text.trim().is_empty() => GroundingVerdict::FetchFailed,
            Ok(text) => {
                let page = truncate_chars(&text, PAGE_TEXT_LIMIT);
                let prompt = prompts::grounding_check(&pair.sentence, &page);
                match self
                    .reasoner
                    .invoke(&prompt, &prompts::grounding_schema())
                    .await
                {
                    Ok(value) => value
                        .get("verdict")
                        .and_then(Value::as_str)
                        .map(GroundingVerdict::parse)
                        .unwrap_or(GroundingVerdict::Unknown),
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Grounding check call failed");
                        GroundingVerdict::Unknown
                    }
                }
            }
        };
        GroundingCheck {
            sentence: pair.sentence,
            citation: pair.citation,
            url,
            verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMClient, LLMResponse, ToolDefinition};
    use crate::search::MockPageFetcher;
    use crate::types::{AppError, Result, SourceRecord};
    use async_trait::async_trait;

    struct Verdict(&'static str);

    #[async_trait]
    impl LLMClient for Verdict {
        async fn generate_with_system(&self, _s: &str, _p: &str) -> Result<LLMResponse> {
            Ok(LLMResponse::text(format!("{{\"verdict\": \"{}\"}}", self.0)))
        }

        async fn generate_with_tools(
            &self,
            _s: &str,
            _p: &str,
            _t: &[ToolDefinition],
        ) -> Result<LLMResponse> {
            Ok(LLMResponse::text("{}"))
        }

        fn model_name(&self) -> &str {
            "verdict"
        }
    }

    fn analysis() -> FinalAnalysis {
        let mut analysis = FinalAnalysis::new("p");
        analysis.sources = vec![
            SourceRecord::new("a", Some("https://a.example".to_string())),
            SourceRecord::new("b", Some("https://b.example".to_string())),
        ];
        analysis.synthesis =
            "Demand grew 12% last year [1]. Costs doubled [2]! Nothing cited here. Both agree [1, 2]."
                .to_string();
        analysis
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("One [1]. Two? Three!  Four"),
            vec!["One [1].", "Two?", "Three!", "Four"]
        );
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_citation_pairs_one_per_marker() {
        let pairs = citation_pairs(&analysis());
        let citations: Vec<usize> = pairs.iter().map(|p| p.citation).collect();
        assert_eq!(citations, vec![1, 2, 1, 2]);
        assert_eq!(pairs[0].sentence, "Demand grew 12% last year [1].");
    }

    #[test]
    fn test_sample_size_is_at_least_one() {
        let pairs = citation_pairs(&analysis());
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(sample_pairs(&pairs, 0.1, &mut rng).len(), 1);
        assert_eq!(sample_pairs(&pairs, 0.5, &mut rng).len(), 2);
        assert_eq!(sample_pairs(&pairs, 1.0, &mut rng).len(), 4);
        assert!(sample_pairs(&[], 1.0, &mut rng).is_empty());
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let pairs = citation_pairs(&analysis());
        let first = sample_pairs(&pairs, 0.5, &mut StdRng::seed_from_u64(42));
        let second = sample_pairs(&pairs, 0.5, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_verdicts_and_fetch_failures() {
        let mut fetcher = MockPageFetcher::new();
        fetcher.expect_fetch().returning(|url| {
            if url.contains("a.example") {
                Ok("Demand grew 12% last year according to the survey.".to_string())
            } else {
                Err(AppError::Search("connection refused".to_string()))
            }
        });
        let reasoner = Arc::new(Reasoner::new(Arc::new(Verdict("SUPPORTED"))));
        let verifier = GroundingVerifier::new(reasoner, Arc::new(fetcher), 1.0, Some(1));

        let checks = verifier.verify(&analysis()).await;
        assert_eq!(checks.len(), 4);
        for check in &checks {
            let expected = if check.citation == 1 {
                GroundingVerdict::Supported
            } else {
                GroundingVerdict::FetchFailed
            };
            assert_eq!(check.verdict, expected, "{}", check.url);
        }
    }
}
