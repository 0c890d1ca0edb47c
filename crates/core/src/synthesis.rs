use crate::config::RagConfig;
use crate::error::{SynthesisError, SynthesisFailure};
use crate::models::{Chunk, FusedResult, QueryResponse};
use crate::traits::CompletionService;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

pub struct AnswerSynthesizer {
    completion: Arc<dyn CompletionService>,
    template: String,
    max_sentences: usize,
    max_context_chars: usize,
}

impl AnswerSynthesizer {
    pub fn new(completion: Arc<dyn CompletionService>, config: &RagConfig) -> Self {
        Self {
            completion,
            template: config.prompt_template.clone(),
            max_sentences: config.max_response_sentences,
            max_context_chars: config.max_context_chars,
        }
    }

    /// Calls the completion service once with the bounded context. An empty
    /// fused result fails with `InsufficientContext` without calling it.
    pub async fn synthesize(
        &self,
        question: &str,
        fused: &FusedResult,
    ) -> Result<QueryResponse, SynthesisError> {
        let failure = |reason: SynthesisFailure| SynthesisError {
            question: question.to_string(),
            chunks: fused.chunks(),
            reason,
        };

        let sources = select_context(fused, self.max_context_chars);
        if sources.is_empty() {
            return Err(failure(SynthesisFailure::InsufficientContext));
        }

        let prompt = self.render_prompt(question, &sources);
        debug!(
            sources = sources.len(),
            prompt_chars = prompt.chars().count(),
            "requesting completion"
        );

        let raw = self
            .completion
            .complete(&prompt)
            .await
            .map_err(|error| failure(error.into()))?;

        let answer = clean_answer(&raw);
        if answer.is_empty() {
            warn!(question, "completion returned no answer text");
            return Err(failure(SynthesisFailure::EmptyAnswer));
        }

        Ok(QueryResponse {
            question: question.to_string(),
            cited_pages: cited_pages(&answer),
            answer,
            sources,
        })
    }

    pub fn render_prompt(&self, question: &str, sources: &[Chunk]) -> String {
        let context = sources
            .iter()
            .map(context_block)
            .collect::<Vec<_>>()
            .join("\n\n");
        let max_sentences = self.max_sentences.to_string();

        render_template(&self.template, |name| match name {
            "max_sentences" => Some(max_sentences.as_str()),
            "context" => Some(context.as_str()),
            "input" => Some(question),
            _ => None,
        })
    }
}

fn context_block(chunk: &Chunk) -> String {
    format!("[Page {}]\n{}", chunk.page_label(), chunk.text)
}

/// Chunks in fused order until the next block would exceed `max_chars`.
/// The first chunk is always kept.
fn select_context(fused: &FusedResult, max_chars: usize) -> Vec<Chunk> {
    let mut selected = Vec::new();
    let mut used = 0usize;

    for hit in &fused.hits {
        let block_chars = context_block(&hit.chunk).chars().count() + 2;
        if !selected.is_empty() && used + block_chars > max_chars {
            break;
        }
        used += block_chars;
        selected.push(hit.chunk.as_ref().clone());
    }

    selected
}

/// Single pass over `{name}` placeholders so substituted text is never
/// rescanned.
fn render_template<'a>(template: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}').and_then(|close| lookup(&after[..close]).map(|value| (close, value))) {
            Some((close, value)) => {
                rendered.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

fn clean_answer(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_label = match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("answer:") => &trimmed[7..],
        _ => trimmed,
    };
    without_label.trim().to_string()
}

fn citation_regex() -> Option<&'static Regex> {
    static CITATION: OnceLock<Option<Regex>> = OnceLock::new();
    CITATION
        .get_or_init(|| {
            Regex::new(r"(?i)\b(?:pages?|pg\.?|p\.)\s*(\d+)(?:\s*(?:,|and|&|-)\s*(\d+))?").ok()
        })
        .as_ref()
}

/// Page numbers cited in `answer`, deduplicated in order of first mention.
pub fn cited_pages(answer: &str) -> Vec<u32> {
    let mut pages = Vec::new();
    let Some(citation) = citation_regex() else {
        return pages;
    };
    for capture in citation.captures_iter(answer) {
        for group in capture.iter().skip(1).flatten() {
            if let Ok(page) = group.as_str().parse::<u32>() {
                if !pages.contains(&page) {
                    pages.push(page);
                }
            }
        }
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use crate::models::FusedHit;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingCompletion {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingCompletion {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(reason: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(reason.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl CompletionService for RecordingCompletion {
        async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            self.reply.clone().map_err(CompletionError::Request)
        }
    }

    fn fused(texts: &[(&str, Option<u32>)]) -> FusedResult {
        FusedResult {
            question: "q".to_string(),
            hits: texts
                .iter()
                .enumerate()
                .map(|(index, (text, page))| FusedHit {
                    chunk: Arc::new(Chunk {
                        chunk_index: index,
                        text: text.to_string(),
                        page_number: *page,
                        source_id: "lease.pdf".to_string(),
                        start_offset: 0,
                    }),
                    fused_score: 1.0 - index as f64 * 0.1,
                    lexical: None,
                    semantic: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn prompt_carries_instructions_pages_and_question() -> Result<(), SynthesisError> {
        let completion = RecordingCompletion::replying("Answer: The rent is $1500 (Page 1).");
        let synthesizer = AnswerSynthesizer::new(completion.clone(), &RagConfig::default());

        let response = synthesizer
            .synthesize(
                "How much is the rent?",
                &fused(&[
                    ("The monthly rent is $1500, due on the 1st.", Some(1)),
                    ("Pets are not allowed.", None),
                ]),
            )
            .await?;

        let prompts = completion.prompts();
        assert_eq!(prompts.len(), 1);
        let prompt = &prompts[0];
        assert!(prompt.contains("based ONLY on the context"));
        assert!(prompt.contains("No more than 5 sentences"));
        assert!(prompt.contains("[Page 1]\nThe monthly rent is $1500, due on the 1st."));
        assert!(prompt.contains("[Page Unknown]\nPets are not allowed."));
        assert!(prompt.contains("Question: How much is the rent?"));

        assert_eq!(response.answer, "The rent is $1500 (Page 1).");
        assert_eq!(response.cited_pages, vec![1]);
        assert_eq!(response.sources.len(), 2);
        assert_eq!(response.sources[0].page_number, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn empty_context_never_reaches_the_completion_service() {
        let completion = RecordingCompletion::replying("unused");
        let synthesizer = AnswerSynthesizer::new(completion.clone(), &RagConfig::default());

        let error = synthesizer.synthesize("Any pets?", &FusedResult::empty("Any pets?")).await;
        assert!(matches!(
            error,
            Err(SynthesisError {
                reason: SynthesisFailure::InsufficientContext,
                ..
            })
        ));
        assert!(completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn completion_failure_keeps_question_and_chunks() {
        let synthesizer =
            AnswerSynthesizer::new(RecordingCompletion::failing("quota"), &RagConfig::default());

        match synthesizer
            .synthesize("Deposit?", &fused(&[("Deposit is $500.", Some(2))]))
            .await
        {
            Err(error) => {
                assert_eq!(error.question, "Deposit?");
                assert_eq!(error.chunks.len(), 1);
                assert!(matches!(error.reason, SynthesisFailure::Completion(_)));
            }
            Ok(response) => panic!("unexpected answer: {}", response.answer),
        }
    }

    #[tokio::test]
    async fn blank_completion_is_an_error() {
        let synthesizer =
            AnswerSynthesizer::new(RecordingCompletion::replying("  \n"), &RagConfig::default());
        let result = synthesizer
            .synthesize("Deposit?", &fused(&[("Deposit is $500.", Some(2))]))
            .await;
        assert!(matches!(
            result,
            Err(SynthesisError {
                reason: SynthesisFailure::EmptyAnswer,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn context_budget_bounds_the_sources() -> Result<(), SynthesisError> {
        let config = RagConfig {
            max_context_chars: 40,
            ..RagConfig::default()
        };
        let synthesizer = AnswerSynthesizer::new(RecordingCompletion::replying("ok"), &config);

        let response = synthesizer
            .synthesize(
                "Deposit?",
                &fused(&[
                    ("Deposit is five hundred dollars.", Some(2)),
                    ("Refund within thirty days.", Some(3)),
                ]),
            )
            .await?;
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].page_number, Some(2));
        Ok(())
    }

    #[test]
    fn placeholders_in_substituted_text_are_left_alone() {
        let rendered = render_template("{context} / {input} / {other}", |name| match name {
            "context" => Some("{input}"),
            "input" => Some("q"),
            _ => None,
        });
        assert_eq!(rendered, "{input} / q / {other}");
    }

    #[test]
    fn citations_are_collected_once_in_order() {
        assert_eq!(
            cited_pages("Rent is $1500 (Page 3). Pets need consent (pages 5 and 3); see p. 7."),
            vec![3, 5, 7]
        );
        assert!(cited_pages("No citation here.").is_empty());
    }
}
