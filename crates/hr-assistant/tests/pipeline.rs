//! End-to-end tests against a mocked OpenAI-compatible API: ingestion into
//! SQLite, question answering with citations, persistence across restarts,
//! rate-limit handling, and the HTTP API.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use hr_assistant::assistant::{open_index, Assistant, QueryStatus, TEMPORARILY_UNAVAILABLE};
use hr_assistant::config::{load_config, Config};
use hr_assistant::connector_fs::scan_documents;
use hr_assistant::ingest::ingest_sources;
use hr_assistant::server::router;
use hr_assistant_core::store::VectorIndex;

const KEY_VAR: &str = "HRA_PIPELINE_TEST_KEY";
const VOCAB: [&str; 8] = [
    "vacation", "days", "sick", "remote", "dental", "benefit", "approval", "conduct",
];

/// Embeds each input as keyword presence over [`VOCAB`] plus a constant bias.
struct KeywordEmbeddings;

impl Respond for KeywordEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let data: Vec<Value> = body["input"]
            .as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let text = text.as_str().unwrap().to_lowercase();
                let mut v: Vec<f32> = VOCAB
                    .iter()
                    .map(|w| if text.contains(w) { 1.0 } else { 0.0 })
                    .collect();
                v.push(0.05);
                json!({"object": "embedding", "index": i, "embedding": v})
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({"object": "list", "data": data}))
    }
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    }))
}

/// Minimal single-page PDF showing `phrase`, with a correct xref table.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::new();
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!("4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n", stream.len(), stream).as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn write_policies(root: &Path) {
    let dir = root.join("policies");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("leave.txt"),
        "Vacation Policy\n\nEmployees accrue 15 days of vacation annually. \
         Up to 5 unused days carry over to the next year.",
    )
    .unwrap();
    fs::write(
        dir.join("benefits.md"),
        "# Benefits\n\nDental and vision benefit plans start on the first day of employment.",
    )
    .unwrap();
    fs::write(dir.join("remote.pdf"), minimal_pdf("Remote work requires manager approval")).unwrap();
}

fn setup(server: &MockServer) -> (TempDir, Config) {
    std::env::set_var(KEY_VAR, "sk-test");
    let tmp = TempDir::new().unwrap();
    write_policies(tmp.path());
    let toml_text = format!(
        r#"[index]
path = "{root}/data/index.sqlite"

[documents]
root = "{root}/policies"

[embedding]
model = "test-embedding"
dims = 9
base_url = "{uri}"
api_key_env = "{key}"

[generation]
model = "test-chat"
base_url = "{uri}"
api_key_env = "{key}"

[retry]
max_attempts = 2
base_delay_ms = 1
max_delay_ms = 1
jitter = false
timeout_secs = 5
"#,
        root = tmp.path().display(),
        uri = server.uri(),
        key = KEY_VAR,
    );
    let config_path = tmp.path().join("hra.toml");
    fs::write(&config_path, toml_text).unwrap();
    let config = load_config(&config_path).unwrap();
    (tmp, config)
}

async fn mock_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(KeywordEmbeddings)
        .mount(server)
        .await;
}

async fn ingest_all(assistant: &Assistant, config: &Config) {
    let sources = scan_documents(&config.documents).unwrap();
    let report = ingest_sources(&assistant.ingest_context(false), sources).await;
    assert_eq!(report.failed(), 0, "{:?}", report.outcomes);
    assert_eq!(report.ingested(), 3);
}

#[tokio::test]
async fn test_ingest_and_answer_with_citation() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_reply("Employees accrue 15 days of vacation annually [1]."))
        .mount(&server)
        .await;
    let (_tmp, config) = setup(&server);

    let assistant = Assistant::from_config(&config).await.unwrap();
    ingest_all(&assistant, &config).await;

    let hits = assistant.search("vacation days", Some(1)).await.unwrap();
    assert_eq!(hits[0].citation.document_name, "leave.txt");

    let resp = assistant.ask("s1", "How many vacation days do I get?").await.unwrap();
    assert_eq!(resp.status, QueryStatus::Answered);
    assert!(resp.answer.contains("15 days"));
    assert_eq!(resp.citations.len(), 1);
    assert_eq!(resp.citations[0].document_name, "leave.txt");

    let remote = assistant.search("remote approval", Some(1)).await.unwrap();
    assert_eq!(remote[0].citation.document_name, "remote.pdf");
    assert!(remote[0].chunk.text.contains("Remote"));
}

#[tokio::test]
async fn test_index_survives_restart() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    let (_tmp, config) = setup(&server);

    {
        let assistant = Assistant::from_config(&config).await.unwrap();
        ingest_all(&assistant, &config).await;
    }

    let index = open_index(&config.index.path).await.unwrap();
    let stats = index.stats().await.unwrap();
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.entries, 3);
    let binding = stats.binding.unwrap();
    assert_eq!(binding.model_id, "test-embedding");
    assert_eq!(binding.dims, 9);
    index.close().await;

    // Unchanged documents are not re-embedded after a restart.
    let assistant = Assistant::from_config(&config).await.unwrap();
    let sources = scan_documents(&config.documents).unwrap();
    let report = ingest_sources(&assistant.ingest_context(false), sources).await;
    assert_eq!(report.unchanged(), 3);
}

#[tokio::test]
async fn test_rate_limited_generation_is_unavailable() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "requests"}
        })))
        .expect(2)
        .mount(&server)
        .await;
    let (_tmp, config) = setup(&server);

    let assistant = Assistant::from_config(&config).await.unwrap();
    ingest_all(&assistant, &config).await;

    let resp = assistant.ask("s1", "How many vacation days?").await.unwrap();
    assert_eq!(resp.status, QueryStatus::Unavailable);
    assert_eq!(resp.answer, TEMPORARILY_UNAVAILABLE);
    assert!(resp.turn_id.is_none());
    assert_eq!(assistant.sessions().turns("s1").await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_http_api() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_reply("You accrue 15 days of vacation per year [1]."))
        .mount(&server)
        .await;
    let (_tmp, config) = setup(&server);

    let assistant = Arc::new(Assistant::from_config(&config).await.unwrap());
    let app = router(Arc::new(config.clone()), assistant);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let ingest: Value = client
        .post(format!("{}/ingest", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ingest["outcomes"].as_array().unwrap().len(), 3);
    assert_eq!(ingest["outcomes"][0]["status"], "ingested");

    let chat: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({"message": "How many vacation days do I get?"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chat["status"], "answered");
    assert_eq!(chat["citations"][0]["document_name"], "leave.txt");
    let session_id = chat["session_id"].as_str().unwrap().to_string();

    let session: Value = client
        .get(format!("{}/sessions/{}", base, session_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["turns"].as_array().unwrap().len(), 2);
    assert_eq!(session["turns"][0]["role"], "user");

    let search = client
        .post(format!("{}/search", base))
        .json(&json!({"query": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(search.status(), 400);
    let body: Value = search.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let stats: Value = client
        .get(format!("{}/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["documents"], 3);
    assert_eq!(stats["indexed_model"], "test-embedding");

    let ended = client
        .delete(format!("{}/sessions/{}", base, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(ended.status(), 204);
    let missing = client
        .get(format!("{}/sessions/{}", base, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}
