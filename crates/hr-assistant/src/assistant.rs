//! Query entry point.
//!
//! [`Assistant`] wires the retriever, answer synthesizer and session store
//! together. One call to [`Assistant::ask`] is one conversational turn:
//!
//! 1. validate the question;
//! 2. lock the session (one turn per session at a time);
//! 3. retrieve passages and synthesize an answer with the session history;
//! 4. append the user and assistant turns, unless the session was ended
//!    while the turn was in flight.
//!
//! External failures that survive retries become a
//! [`TEMPORARILY_UNAVAILABLE`] reply; nothing is appended to history in that
//! case. Index mismatches and storage failures are returned as errors.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use anyhow::Result as AnyResult;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use hr_assistant_core::answer::{AnswerSynthesizer, Generator, SynthesisOptions};
use hr_assistant_core::chunk::ChunkingOptions;
use hr_assistant_core::embedding::EmbeddingGateway;
use hr_assistant_core::models::{Citation, RetrievedChunk, Turn};
use hr_assistant_core::retrieve::Retriever;
use hr_assistant_core::retry::RetryPolicy;
use hr_assistant_core::session::Session;
use hr_assistant_core::store::VectorIndex;
use hr_assistant_core::Result;

use crate::config::Config;
use crate::embedding::OpenAiEmbeddings;
use crate::generation::OpenAiChat;
use crate::ingest::IngestContext;
use crate::sqlite_store::SqliteIndex;

pub const TEMPORARILY_UNAVAILABLE: &str = "The HR assistant is temporarily unavailable. \
Please try again in a few minutes or contact HR directly.";

pub const QUESTION_TOO_SHORT: &str =
    "Please provide a more detailed question about HR policies or procedures.";

const MIN_QUESTION_CHARS: usize = 3;

/// Attached to answers for longer questions with no HR vocabulary.
pub const HR_FOCUS_HINT: &str = "For the most accurate information, please make sure your \
question relates to HR policies or workplace procedures.";

/// Word prefixes that mark a question as HR-related.
const HR_TERMS: &[&str] = &[
    "polic", "leave", "vacation", "holiday", "sick", "benefit", "salar", "pay", "promot",
    "train", "perform", "disciplin", "harass", "complian", "onboard", "terminat", "resign",
    "employ", "workplace", "conduct", "ethic", "human", "hr", "manager", "remote",
];

/// Questions up to this many words get no hint.
const HINT_MIN_WORDS: usize = 4;

fn focus_hint(question: &str) -> Option<String> {
    let lower = question.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words.len() < HINT_MIN_WORDS {
        return None;
    }
    let on_topic = words
        .iter()
        .any(|w| HR_TERMS.iter().any(|term| w.starts_with(term)));
    (!on_topic).then(|| HR_FOCUS_HINT.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Answered,
    NoContext,
    InvalidQuestion,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub session_id: String,
    /// Id of the assistant turn appended to history, if one was.
    pub turn_id: Option<String>,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub status: QueryStatus,
    /// Advice on phrasing, for questions that do not look HR-related.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Bounds on the conversations kept in memory.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Turns (user and assistant) kept per session; older ones are dropped.
    pub max_turns: usize,
    /// Sessions kept at once. The least recently used idle session is
    /// evicted to make room.
    pub max_sessions: usize,
    /// Sessions unused for this long are evicted.
    pub idle_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_sessions: 1000,
            idle_timeout: Duration::from_secs(3600),
        }
    }
}

struct SessionSlot {
    session: Mutex<Session>,
    ended: AtomicBool,
    last_used: StdMutex<Instant>,
}

impl SessionSlot {
    fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Held by nobody but the store, so no turn is running.
    fn is_idle(slot: &Arc<SessionSlot>) -> bool {
        Arc::strong_count(slot) == 1
    }
}

/// In-memory conversations keyed by session id.
///
/// Creating a session first evicts idle sessions past the idle timeout and,
/// if the store is still full, the least recently used idle session. A
/// session with a turn in flight is never evicted.
#[derive(Default)]
pub struct SessionStore {
    slots: StdMutex<HashMap<String, Arc<SessionSlot>>>,
    limits: SessionLimits,
}

impl SessionStore {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            slots: StdMutex::new(HashMap::new()),
            limits,
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionSlot>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, session_id: &str) -> Arc<SessionSlot> {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(session_id) {
            slot.touch();
            return Arc::clone(slot);
        }

        self.evict(&mut slots);
        let slot = Arc::new(SessionSlot {
            session: Mutex::new(Session::with_max_turns(self.limits.max_turns)),
            ended: AtomicBool::new(false),
            last_used: StdMutex::new(Instant::now()),
        });
        slots.insert(session_id.to_string(), Arc::clone(&slot));
        slot
    }

    fn evict(&self, slots: &mut HashMap<String, Arc<SessionSlot>>) {
        let before = slots.len();
        slots.retain(|_, slot| {
            let expired =
                SessionSlot::is_idle(slot) && slot.last_used().elapsed() >= self.limits.idle_timeout;
            if expired {
                slot.ended.store(true, Ordering::SeqCst);
            }
            !expired
        });

        while slots.len() >= self.limits.max_sessions {
            let oldest = slots
                .iter()
                .filter(|(_, slot)| SessionSlot::is_idle(slot))
                .min_by_key(|(_, slot)| slot.last_used())
                .map(|(id, _)| id.clone());
            let Some(id) = oldest else {
                break;
            };
            if let Some(slot) = slots.remove(&id) {
                slot.ended.store(true, Ordering::SeqCst);
            }
        }

        if slots.len() < before {
            debug!(evicted = before - slots.len(), remaining = slots.len(), "evicted sessions");
        }
    }

    /// All turns of a session, or `None` if it does not exist.
    pub async fn turns(&self, session_id: &str) -> Option<Vec<Turn>> {
        let slot = self.slots().get(session_id).cloned()?;
        let session = slot.session.lock().await;
        Some(session.turns().to_vec())
    }

    /// Forget a session's turns but keep the session.
    pub async fn clear(&self, session_id: &str) {
        let slot = self.slots().get(session_id).cloned();
        if let Some(slot) = slot {
            slot.session.lock().await.clear();
        }
    }

    /// Tear a session down. A turn still running for it will not be recorded.
    pub fn end(&self, session_id: &str) -> bool {
        match self.slots().remove(session_id) {
            Some(slot) => {
                slot.ended.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Components an [`Assistant`] is assembled from.
pub struct AssistantParts {
    pub index: Arc<dyn VectorIndex>,
    pub gateway: Arc<dyn EmbeddingGateway>,
    pub generator: Arc<dyn Generator>,
    pub retry: RetryPolicy,
    pub chunking: ChunkingOptions,
    pub batch_size: usize,
    pub top_k: usize,
    pub synthesis: SynthesisOptions,
    pub sessions: SessionLimits,
}

pub struct Assistant {
    index: Arc<dyn VectorIndex>,
    gateway: Arc<dyn EmbeddingGateway>,
    retry: RetryPolicy,
    chunking: ChunkingOptions,
    batch_size: usize,
    history_turns: usize,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    sessions: SessionStore,
}

impl Assistant {
    pub fn new(parts: AssistantParts) -> Self {
        let retriever = Retriever::new(
            Arc::clone(&parts.index),
            Arc::clone(&parts.gateway),
            parts.retry.clone(),
            parts.top_k,
        );
        let history_turns = parts.synthesis.history_turns;
        let synthesizer =
            AnswerSynthesizer::new(parts.generator, parts.retry.clone(), parts.synthesis);
        Self {
            index: parts.index,
            gateway: parts.gateway,
            retry: parts.retry,
            chunking: parts.chunking,
            batch_size: parts.batch_size,
            history_turns,
            retriever,
            synthesizer,
            sessions: SessionStore::new(parts.sessions),
        }
    }

    /// Build the production assistant: SQLite index plus OpenAI clients.
    ///
    /// # Errors
    ///
    /// A configuration error if either API key is missing, so the process
    /// fails at startup rather than on the first question.
    pub async fn from_config(config: &Config) -> AnyResult<Self> {
        let gateway = Arc::new(OpenAiEmbeddings::from_config(&config.embedding)?);
        let generator = Arc::new(OpenAiChat::from_config(&config.generation)?);
        let index = Arc::new(open_index(&config.index.path).await?);

        if let Some(binding) = index.binding().await? {
            if binding.model_id != config.embedding.model || binding.dims != config.embedding.dims {
                warn!(
                    indexed_model = %binding.model_id,
                    indexed_dims = binding.dims,
                    configured_model = %config.embedding.model,
                    configured_dims = config.embedding.dims,
                    "index was built with a different embedding model; run `hra reset` and re-ingest"
                );
            }
        }

        Ok(Self::new(AssistantParts {
            index,
            gateway,
            generator,
            retry: config.retry.policy(),
            chunking: config.chunking.options(),
            batch_size: config.embedding.batch_size,
            top_k: config.retrieval.top_k,
            synthesis: config.generation.synthesis_options(),
            sessions: config.sessions.limits(),
        }))
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn ingest_context(&self, force: bool) -> IngestContext {
        IngestContext {
            index: Arc::clone(&self.index),
            gateway: Arc::clone(&self.gateway),
            retry: self.retry.clone(),
            chunking: self.chunking,
            batch_size: self.batch_size,
            force,
        }
    }

    /// Retrieval without generation.
    pub async fn search(&self, query: &str, k: Option<usize>) -> Result<Vec<RetrievedChunk>> {
        self.retriever.retrieve(query, k).await
    }

    /// Answer one question within a session.
    pub async fn ask(&self, session_id: &str, query: &str) -> Result<QueryResponse> {
        let query = query.trim();
        if query.chars().count() < MIN_QUESTION_CHARS {
            return Ok(QueryResponse {
                session_id: session_id.to_string(),
                turn_id: None,
                answer: QUESTION_TOO_SHORT.to_string(),
                citations: Vec::new(),
                status: QueryStatus::InvalidQuestion,
                hint: None,
            });
        }

        let slot = self.sessions.slot(session_id);
        let mut session = slot.session.lock().await;
        let history = session.history(self.history_turns).to_vec();

        let outcome = match self.retriever.retrieve(query, None).await {
            Ok(chunks) => self.synthesizer.answer(query, &chunks, &history).await,
            Err(e) => Err(e),
        };
        let answer = match outcome {
            Ok(answer) => answer,
            Err(e) if e.is_external() => {
                warn!(session = session_id, error = %e, "external service unavailable");
                return Ok(QueryResponse {
                    session_id: session_id.to_string(),
                    turn_id: None,
                    answer: TEMPORARILY_UNAVAILABLE.to_string(),
                    citations: Vec::new(),
                    status: QueryStatus::Unavailable,
                    hint: None,
                });
            }
            Err(e) => return Err(e),
        };

        let status = if answer.is_no_context() {
            QueryStatus::NoContext
        } else {
            QueryStatus::Answered
        };

        let turn_id = if slot.ended.load(Ordering::SeqCst) {
            info!(session = session_id, "session ended during turn, not recording");
            None
        } else {
            let reply = Turn::assistant(answer.text.clone(), answer.citations.clone());
            let id = reply.id.clone();
            session.append(Turn::user(query));
            session.append(reply);
            Some(id)
        };

        info!(
            session = session_id,
            status = ?status,
            citations = answer.citations.len(),
            "answered question"
        );
        Ok(QueryResponse {
            session_id: session_id.to_string(),
            turn_id,
            answer: answer.text,
            citations: answer.citations,
            status,
            hint: focus_hint(query),
        })
    }
}

pub async fn open_index(path: &Path) -> AnyResult<SqliteIndex> {
    SqliteIndex::open(path).await
}
