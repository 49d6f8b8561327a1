//! Grounded answer synthesis.
//!
//! [`AnswerSynthesizer`] turns a question plus retrieved passages into an
//! [`Answer`] by prompting a [`Generator`]. The prompt instructs the model to
//! answer only from the numbered passages, cite them as `[n]`, and reply
//! with [`NO_RELEVANT_INFO`] when they do not contain the answer.
//!
//! # Prompt layout
//!
//! ```text
//! system:    persona + grounding rules
//! user/assistant: last `history_turns` turns of the conversation
//! user:      Context:
//!            [1] leave-policy.pdf (chars 0-1000)
//!            ...passage text...
//!
//!            [2] ...
//!
//!            Question: <query>
//! ```
//!
//! # Citations
//!
//! Mapping an answer back to passages is best effort:
//!
//! 1. passages whose `[n]` marker appears in the answer;
//! 2. otherwise passages sharing at least two content words with the answer;
//! 3. otherwise every passage that was in the prompt.
//!
//! A reply that is the no-information sentence carries no citations.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{Citation, RetrievedChunk, Role, Turn};
use crate::retry::{CallKind, RetryPolicy};

/// Reply used when the documents do not answer the question.
pub const NO_RELEVANT_INFO: &str = "No relevant information found in the HR policy documents. \
Please rephrase your question or contact HR directly for help.";

const NO_INFO_MARKER: &str = "no relevant information found";

const SYSTEM_PERSONA: &str = "You are an HR policy assistant. You help employees understand \
company HR policies and procedures using only the official policy excerpts provided to you.

Rules:
1. Answer ONLY from the numbered context passages in the user's message. Do not use outside knowledge and do not guess.
2. Cite every passage you rely on with its bracketed number, for example [1] or [2][3].
3. If the passages do not contain the answer, reply with exactly this sentence and nothing else: \"";

const SYSTEM_PERSONA_TAIL: &str = "\"
4. Be clear, concise and professional. For disciplinary or legal matters, advise the employee to consult HR directly.";

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "with", "this", "that", "from",
    "they", "their", "have", "has", "had", "was", "were", "will", "shall", "can", "may", "all",
    "any", "each", "who", "what", "when", "which", "how", "per", "our", "its", "into", "than",
    "then", "there", "these", "those", "been", "also", "such", "must", "should", "would", "could",
    "about", "after", "before", "other", "more", "most", "some", "only", "does", "did",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// An external text-generation capability.
///
/// Like [`EmbeddingGateway`](crate::embedding::EmbeddingGateway), one call is
/// one request; retries are the caller's business.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// How strictly answers are checked against the passages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroundingMode {
    /// Rely on the prompt instructions.
    #[default]
    Instructed,
    /// Also reject answers that neither cite nor overlap any passage.
    Verified,
}

/// How an answer relates to the passages it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grounding {
    /// No passages, or the model said the passages do not answer the question.
    NoContext,
    /// The answer cites passages with `[n]` markers.
    Cited,
    /// No markers, citations inferred from shared vocabulary.
    Overlap,
    /// No markers and no overlap; every prompt passage is cited.
    Unattributed,
    /// Discarded by verification and replaced with [`NO_RELEVANT_INFO`].
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub grounding: Grounding,
}

impl Answer {
    fn no_context() -> Self {
        Self {
            text: NO_RELEVANT_INFO.to_string(),
            citations: Vec::new(),
            grounding: Grounding::NoContext,
        }
    }

    /// Whether this is the "no relevant information" answer path.
    pub fn is_no_context(&self) -> bool {
        matches!(self.grounding, Grounding::NoContext | Grounding::Rejected)
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub temperature: f32,
    pub max_answer_tokens: u32,
    /// Character budget for the context block.
    pub max_context_chars: usize,
    /// Prior turns included in the prompt.
    pub history_turns: usize,
    pub grounding: GroundingMode,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_answer_tokens: 500,
            max_context_chars: 4000,
            history_turns: 6,
            grounding: GroundingMode::Instructed,
        }
    }
}

pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
    options: SynthesisOptions,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn Generator>, retry: RetryPolicy, options: SynthesisOptions) -> Self {
        Self {
            generator,
            retry,
            options,
        }
    }

    pub fn options(&self) -> &SynthesisOptions {
        &self.options
    }

    /// Answer `query` from `chunks`, taking `history` into account.
    ///
    /// An empty `chunks` slice short-circuits to [`NO_RELEVANT_INFO`] without
    /// calling the generator.
    ///
    /// # Errors
    ///
    /// [`Error::Generation`] (or [`Error::RateLimited`]) once retries are
    /// exhausted. Failures are never turned into an answer here.
    pub async fn answer(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
        history: &[Turn],
    ) -> Result<Answer> {
        if chunks.is_empty() {
            debug!("no passages retrieved, answering without generation");
            return Ok(Answer::no_context());
        }

        let passages = select_passages(chunks, self.options.max_context_chars);
        let request = GenerationRequest {
            messages: build_messages(query, passages, history, self.options.history_turns),
            temperature: self.options.temperature,
            max_tokens: self.options.max_answer_tokens,
        };

        let generator = &self.generator;
        let request_ref = &request;
        let raw = self
            .retry
            .run(CallKind::Generation, || generator.generate(request_ref))
            .await?;
        let text = raw.trim().to_string();
        if text.is_empty() {
            return Err(Error::generation_fatal("model returned an empty answer"));
        }

        // Only a reply that opens with the no-information sentence is a
        // refusal; a partial answer may mention it for the remainder.
        if text.to_lowercase().starts_with(NO_INFO_MARKER) {
            return Ok(Answer::no_context());
        }

        let (citations, grounding) = attribute(&text, passages);
        if grounding == Grounding::Unattributed && self.options.grounding == GroundingMode::Verified {
            info!("answer shares nothing with the retrieved passages, rejecting");
            return Ok(Answer {
                text: NO_RELEVANT_INFO.to_string(),
                citations: Vec::new(),
                grounding: Grounding::Rejected,
            });
        }

        debug!(
            passages = passages.len(),
            cited = citations.len(),
            grounding = ?grounding,
            "answer synthesized"
        );
        Ok(Answer {
            text,
            citations,
            grounding,
        })
    }
}

fn passage_header(n: usize, chunk: &RetrievedChunk) -> String {
    format!(
        "[{}] {} (chars {}-{})",
        n, chunk.citation.document_name, chunk.citation.start, chunk.citation.end
    )
}

fn format_passage(n: usize, chunk: &RetrievedChunk) -> String {
    format!("{}\n{}", passage_header(n, chunk), chunk.chunk.text)
}

/// Leading passages that fit in `budget` characters. The first passage is
/// always kept, and passages are never truncated.
fn select_passages(chunks: &[RetrievedChunk], budget: usize) -> &[RetrievedChunk] {
    let mut used = 0usize;
    let mut keep = 0usize;
    for (i, chunk) in chunks.iter().enumerate() {
        let len = format_passage(i + 1, chunk).chars().count() + 2;
        if keep > 0 && used + len > budget {
            break;
        }
        used += len;
        keep += 1;
    }
    &chunks[..keep]
}

fn build_messages(
    query: &str,
    passages: &[RetrievedChunk],
    history: &[Turn],
    history_turns: usize,
) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(history_turns + 2);
    messages.push(PromptMessage::new(
        PromptRole::System,
        format!("{}{}{}", SYSTEM_PERSONA, NO_RELEVANT_INFO, SYSTEM_PERSONA_TAIL),
    ));

    let start = history.len().saturating_sub(history_turns);
    for turn in &history[start..] {
        let role = match turn.role {
            Role::User => PromptRole::User,
            Role::Assistant => PromptRole::Assistant,
        };
        messages.push(PromptMessage::new(role, turn.text.clone()));
    }

    let context = passages
        .iter()
        .enumerate()
        .map(|(i, c)| format_passage(i + 1, c))
        .collect::<Vec<_>>()
        .join("\n\n");
    messages.push(PromptMessage::new(
        PromptRole::User,
        format!("Context:\n{}\n\nQuestion: {}", context, query.trim()),
    ));
    messages
}

fn attribute(answer: &str, passages: &[RetrievedChunk]) -> (Vec<Citation>, Grounding) {
    let markers = cited_markers(answer, passages.len());
    if !markers.is_empty() {
        let citations = markers
            .into_iter()
            .map(|n| passages[n - 1].citation.clone())
            .collect();
        return (citations, Grounding::Cited);
    }

    let answer_words = content_words(answer);
    let overlapping: Vec<Citation> = passages
        .iter()
        .filter(|p| content_words(&p.chunk.text).intersection(&answer_words).count() >= 2)
        .map(|p| p.citation.clone())
        .collect();
    if !overlapping.is_empty() {
        return (overlapping, Grounding::Overlap);
    }

    (
        passages.iter().map(|p| p.citation.clone()).collect(),
        Grounding::Unattributed,
    )
}

/// Distinct `[n]` markers in `text` with `1 <= n <= count`, ascending.
/// Also accepts grouped markers such as `[1, 3]`.
fn cited_markers(text: &str, count: usize) -> BTreeSet<usize> {
    let mut found = BTreeSet::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        let inner = &after[..close];
        let numbers: Option<Vec<usize>> = inner
            .split(',')
            .map(|part| part.trim().parse::<usize>().ok())
            .collect();
        if let Some(numbers) = numbers {
            found.extend(numbers.into_iter().filter(|n| (1..=count).contains(n)));
        }
        rest = &after[close + 1..];
    }
    found
}

fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()) && !w.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::models::Chunk;

    struct ScriptedGenerator {
        reply: Result<String>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: Error) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(err),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last(&self) -> GenerationRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            self.reply.clone()
        }
    }

    fn passage(doc: &str, ordinal: usize, text: &str) -> RetrievedChunk {
        let chunk = Chunk {
            id: format!("{}:{:05}", doc, ordinal),
            document_id: doc.to_string(),
            ordinal,
            text: text.to_string(),
            start: ordinal * 100,
            end: ordinal * 100 + text.chars().count(),
        };
        RetrievedChunk {
            citation: Citation {
                chunk_id: chunk.id.clone(),
                document_id: doc.to_string(),
                document_name: format!("{}.pdf", doc),
                start: chunk.start,
                end: chunk.end,
            },
            chunk,
            score: 0.9,
        }
    }

    fn synthesizer(gen: Arc<ScriptedGenerator>, options: SynthesisOptions) -> AnswerSynthesizer {
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter: false,
            timeout: Duration::from_secs(1),
        };
        AnswerSynthesizer::new(gen, retry, options)
    }

    fn sample_passages() -> Vec<RetrievedChunk> {
        vec![
            passage("leave", 0, "Employees accrue 15 days of vacation annually."),
            passage("leave", 1, "Sick leave requires a doctor's note after three days."),
            passage("conduct", 0, "Harassment of any kind is prohibited."),
        ]
    }

    #[tokio::test]
    async fn test_empty_context_skips_generator() {
        let gen = ScriptedGenerator::replying("should not be used");
        let s = synthesizer(gen.clone(), SynthesisOptions::default());
        let answer = s.answer("How much vacation?", &[], &[]).await.unwrap();
        assert_eq!(answer.text, NO_RELEVANT_INFO);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.grounding, Grounding::NoContext);
        assert_eq!(gen.calls(), 0);
    }

    #[tokio::test]
    async fn test_marker_citations_are_the_used_subset() {
        let gen = ScriptedGenerator::replying("You get 15 days per year [1].");
        let s = synthesizer(gen.clone(), SynthesisOptions::default());
        let answer = s.answer("vacation?", &sample_passages(), &[]).await.unwrap();
        assert_eq!(answer.grounding, Grounding::Cited);
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].chunk_id, "leave:00000");
    }

    #[tokio::test]
    async fn test_out_of_range_markers_ignored() {
        let gen = ScriptedGenerator::replying("See [2, 9] and [x].");
        let s = synthesizer(gen, SynthesisOptions::default());
        let answer = s.answer("sick?", &sample_passages(), &[]).await.unwrap();
        assert_eq!(answer.grounding, Grounding::Cited);
        let ids: Vec<_> = answer.citations.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["leave:00001"]);
    }

    #[tokio::test]
    async fn test_lexical_overlap_when_no_markers() {
        let gen = ScriptedGenerator::replying("Harassment is strictly prohibited at work.");
        let s = synthesizer(gen, SynthesisOptions::default());
        let answer = s.answer("harassment?", &sample_passages(), &[]).await.unwrap();
        assert_eq!(answer.grounding, Grounding::Overlap);
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].document_id, "conduct");
    }

    #[tokio::test]
    async fn test_unattributed_falls_back_to_all_passages() {
        let gen = ScriptedGenerator::replying("Please speak with your manager.");
        let s = synthesizer(gen, SynthesisOptions::default());
        let answer = s.answer("q?", &sample_passages(), &[]).await.unwrap();
        assert_eq!(answer.grounding, Grounding::Unattributed);
        assert_eq!(answer.citations.len(), 3);
    }

    #[tokio::test]
    async fn test_verified_mode_rejects_unattributed() {
        let gen = ScriptedGenerator::replying("Please speak with your manager.");
        let options = SynthesisOptions {
            grounding: GroundingMode::Verified,
            ..SynthesisOptions::default()
        };
        let s = synthesizer(gen, options);
        let answer = s.answer("q?", &sample_passages(), &[]).await.unwrap();
        assert_eq!(answer.grounding, Grounding::Rejected);
        assert_eq!(answer.text, NO_RELEVANT_INFO);
        assert!(answer.citations.is_empty());
        assert!(answer.is_no_context());
    }

    #[tokio::test]
    async fn test_model_no_info_reply_has_no_citations() {
        let gen = ScriptedGenerator::replying(NO_RELEVANT_INFO);
        let s = synthesizer(gen, SynthesisOptions::default());
        let answer = s.answer("parking?", &sample_passages(), &[]).await.unwrap();
        assert_eq!(answer.grounding, Grounding::NoContext);
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn test_partial_answer_mentioning_no_info_is_kept() {
        let gen = ScriptedGenerator::replying(
            "You accrue 15 days of vacation per year [1]. For carry-over limits, \
             no relevant information found in the HR policy documents.",
        );
        let s = synthesizer(gen, SynthesisOptions::default());
        let answer = s.answer("vacation and carry-over?", &sample_passages(), &[]).await.unwrap();
        assert_eq!(answer.grounding, Grounding::Cited);
        assert!(answer.text.starts_with("You accrue 15 days"));
        assert_eq!(answer.citations[0].chunk_id, "leave:00000");
        assert!(!answer.is_no_context());
    }

    #[tokio::test]
    async fn test_prompt_contains_contract_context_and_history() {
        let gen = ScriptedGenerator::replying("15 days [1].");
        let options = SynthesisOptions {
            history_turns: 2,
            temperature: 0.2,
            max_answer_tokens: 321,
            ..SynthesisOptions::default()
        };
        let s = synthesizer(gen.clone(), options);
        let history = vec![
            Turn::user("first question"),
            Turn::assistant("first answer", Vec::new()),
            Turn::user("second question"),
            Turn::assistant("second answer", Vec::new()),
        ];
        s.answer("And vacation?", &sample_passages(), &history).await.unwrap();

        let req = gen.last();
        assert_eq!(req.temperature, 0.2);
        assert_eq!(req.max_tokens, 321);
        assert_eq!(req.messages.len(), 4);
        assert_eq!(req.messages[0].role, PromptRole::System);
        assert!(req.messages[0].content.contains("ONLY"));
        assert!(req.messages[0].content.contains(NO_RELEVANT_INFO));
        assert_eq!(req.messages[1].content, "second question");
        assert_eq!(req.messages[2].role, PromptRole::Assistant);
        let user = &req.messages[3].content;
        assert!(user.contains("[1] leave.pdf (chars 0-"));
        assert!(user.contains("[3] conduct.pdf"));
        assert!(user.ends_with("Question: And vacation?"));
    }

    #[tokio::test]
    async fn test_context_budget_drops_whole_passages() {
        let gen = ScriptedGenerator::replying("Answer [1].");
        let options = SynthesisOptions {
            max_context_chars: 10,
            ..SynthesisOptions::default()
        };
        let s = synthesizer(gen.clone(), options);
        s.answer("q", &sample_passages(), &[]).await.unwrap();
        let user = gen.last().messages.last().cloned().unwrap().content;
        assert!(user.contains("Employees accrue 15 days of vacation annually."));
        assert!(!user.contains("[2]"));
    }

    #[tokio::test]
    async fn test_generation_failure_surfaces() {
        let gen = ScriptedGenerator::failing(Error::generation("503 service unavailable"));
        let s = synthesizer(gen.clone(), SynthesisOptions::default());
        let err = s.answer("q", &sample_passages(), &[]).await.unwrap_err();
        assert!(matches!(err, Error::Generation { .. }));
        assert_eq!(gen.calls(), 2);
    }

    #[test]
    fn test_content_words_skip_stopwords_and_numbers() {
        let words = content_words("The employees accrue 15 days of Vacation.");
        assert!(words.contains("employees"));
        assert!(words.contains("vacation"));
        assert!(!words.contains("the"));
        assert!(!words.contains("15"));
    }
}
