//! HTTP adapter for a hosted question bank and scoring service.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use exam_core::model::{
    AnswerKey, Question, QuestionId, QuestionKind, SealedKey, SectionId, SectionSpec, SessionId,
    TargetRef, UserId,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::repository::{
    AttemptRecord, CompletionReceipt, CompletionRequest, QuestionRequest, QuestionSet,
    QuestionSource, ScoringService, StorageError,
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    /// Upper bound for one request, body included.
    pub timeout: Duration,
}

impl RemoteConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Zero is raised to one millisecond.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    /// Read `EXAM_PORTAL_URL`, the optional `EXAM_PORTAL_TOKEN` and
    /// `EXAM_PORTAL_TIMEOUT_SECS`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let base_url = lookup("EXAM_PORTAL_URL").filter(|u| !u.trim().is_empty())?;
        let mut config = Self::new(base_url);
        if let Some(token) = lookup("EXAM_PORTAL_TOKEN").filter(|t| !t.trim().is_empty()) {
            config = config.with_token(token);
        }
        if let Some(raw) = lookup("EXAM_PORTAL_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config = config.with_timeout(Duration::from_secs(secs)),
                _ => warn!(value = %raw, "ignoring invalid EXAM_PORTAL_TIMEOUT_SECS"),
            }
        }
        Some(config)
    }
}

fn transport(err: &reqwest::Error) -> StorageError {
    if err.is_timeout() {
        warn!(error = %err, "portal request timed out");
        StorageError::Unavailable(format!("timed out: {err}"))
    } else if err.is_decode() {
        StorageError::Serialization(err.to_string())
    } else {
        StorageError::Connection(err.to_string())
    }
}

#[derive(Clone)]
pub struct RemotePortal {
    client: Client,
    config: RemoteConfig,
}

impl RemotePortal {
    /// Build the HTTP client with the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the TLS backend cannot be initialised.
    pub fn new(config: RemoteConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, StorageError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let response = self.send(path, body).await?;
        response.json::<R>().await.map_err(|e| transport(&e))
    }

    async fn send<B>(&self, path: &str, body: &B) -> Result<reqwest::Response, StorageError>
    where
        B: Serialize + Sync,
    {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport(&e))?;

        let status = response.status();
        debug!(path, %status, "portal response");
        match status {
            s if s.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound),
            StatusCode::CONFLICT => Err(StorageError::Conflict),
            s => {
                warn!(path, status = %s, "portal request failed");
                Err(StorageError::Unavailable(format!("status {s}")))
            }
        }
    }
}

//
// ─── WIRE TYPES ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
struct QuestionSetDto {
    sections: Vec<SectionDto>,
    #[serde(default)]
    overall_time_limit_seconds: Option<u32>,
    #[serde(default)]
    allow_continue_after_time_up: bool,
}

#[derive(Debug, Deserialize)]
struct SectionDto {
    id: u64,
    name: String,
    #[serde(default)]
    ordinal: u32,
    #[serde(default)]
    time_limit_seconds: Option<u32>,
    questions: Vec<QuestionDto>,
}

#[derive(Debug, Deserialize)]
struct QuestionDto {
    id: u64,
    #[serde(flatten)]
    kind: QuestionKind,
    prompt: String,
    #[serde(default)]
    media: Option<String>,
    #[serde(default = "default_marks")]
    marks: u32,
    #[serde(default)]
    key: Option<AnswerKey>,
    #[serde(default)]
    explanation: Option<String>,
}

fn default_marks() -> u32 {
    1
}

impl QuestionDto {
    fn into_question(self) -> Result<Question, StorageError> {
        let ser = |e: exam_core::model::QuestionError| StorageError::Serialization(e.to_string());
        let mut question =
            Question::new(QuestionId::new(self.id), self.kind, self.prompt, self.marks)
                .map_err(ser)?;
        if let Some(media) = self.media {
            question = question.with_media(media);
        }
        match self.key {
            Some(key) => question.with_key(SealedKey::new(key, self.explanation)).map_err(ser),
            None => Ok(question),
        }
    }
}

impl QuestionSetDto {
    fn into_set(self) -> Result<QuestionSet, StorageError> {
        let mut sections = Vec::with_capacity(self.sections.len());
        for dto in self.sections {
            let questions = dto
                .questions
                .into_iter()
                .map(QuestionDto::into_question)
                .collect::<Result<Vec<_>, _>>()?;
            let mut spec =
                SectionSpec::new(SectionId::new(dto.id), dto.name, dto.ordinal).with_questions(questions);
            spec.time_limit_seconds = dto.time_limit_seconds;
            sections.push(spec);
        }
        Ok(QuestionSet {
            sections,
            overall_time_limit_seconds: self.overall_time_limit_seconds,
            allow_continue_after_time_up: self.allow_continue_after_time_up,
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateSessionBody {
    user_id: UserId,
    target: TargetRef,
    context_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    session_id: SessionId,
}

#[async_trait]
impl QuestionSource for RemotePortal {
    async fn generate_session_questions(
        &self,
        request: &QuestionRequest,
    ) -> Result<QuestionSet, StorageError> {
        let dto: QuestionSetDto = self.post("sessions/questions", request).await?;
        dto.into_set()
    }
}

#[async_trait]
impl ScoringService for RemotePortal {
    async fn create_session(
        &self,
        user_id: UserId,
        target: TargetRef,
        context_id: Option<u64>,
    ) -> Result<SessionId, StorageError> {
        let body = CreateSessionBody {
            user_id,
            target,
            context_id,
        };
        let created: CreateSessionResponse = self.post("sessions", &body).await?;
        Ok(created.session_id)
    }

    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), StorageError> {
        let path = format!("sessions/{}/attempts", record.session_id);
        self.send(&path, record).await?;
        Ok(())
    }

    async fn complete_session(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionReceipt, StorageError> {
        let path = format!("sessions/{}/complete", request.session_id);
        self.post(&path, request).await
    }
}

impl crate::repository::Storage {
    /// Build a `Storage` backed by a hosted portal.
    ///
    /// # Errors
    ///
    /// As for `RemotePortal::new`.
    pub fn remote(config: RemoteConfig) -> Result<Self, StorageError> {
        let portal = RemotePortal::new(config)?;
        Ok(Self {
            questions: std::sync::Arc::new(portal.clone()),
            scoring: std::sync::Arc::new(portal),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{FinalizeReason, SessionMode, Tally};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn portal(server: &MockServer, token: Option<&str>) -> RemotePortal {
        let mut config = RemoteConfig::new(server.uri());
        if let Some(token) = token {
            config = config.with_token(token);
        }
        RemotePortal::new(config).unwrap()
    }

    fn completion(session: u64) -> CompletionRequest {
        CompletionRequest {
            session_id: SessionId::new(session),
            user_id: UserId::new(1),
            mode: SessionMode::Exam,
            tally: Tally::from_counts(1, 0, 0, 1, 0).unwrap(),
            elapsed_seconds: 10,
            late: false,
            reason: FinalizeReason::TimeUp,
            answers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn question_set_is_decoded_with_keys_sealed() {
        let server = MockServer::start().await;
        let body = json!({
            "sections": [{
                "id": 3,
                "name": "Algebra",
                "ordinal": 1,
                "time_limit_seconds": 300,
                "questions": [{
                    "id": 11,
                    "type": "mcq_single",
                    "options": [{"id": 1, "label": "x"}, {"id": 2, "label": "y"}],
                    "prompt": "Pick y",
                    "key": {"type": "mcq_single", "option": 2}
                }, {
                    "id": 12,
                    "type": "essay",
                    "prompt": "Explain",
                    "marks": 5
                }]
            }],
            "overall_time_limit_seconds": 900
        });
        Mock::given(method("POST"))
            .and(path("/sessions/questions"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let set = portal(&server, Some("secret"))
            .generate_session_questions(&QuestionRequest {
                target: TargetRef::Exam(1),
                scope_id: None,
                subject_context: None,
                user_id: UserId::new(9),
                limit: None,
            })
            .await
            .unwrap();

        assert_eq!(set.overall_time_limit_seconds, Some(900));
        assert!(!set.allow_continue_after_time_up);
        let section = &set.sections[0];
        assert_eq!(section.time_limit_seconds, Some(300));
        assert!(section.questions[0].has_key());
        assert!(!section.questions[1].has_key());
        assert_eq!(section.questions[1].marks(), 5);
    }

    #[tokio::test]
    async fn completion_posts_payload_and_reads_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/42/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "session_id": 42,
                "completed_at": "2023-11-14T22:13:20Z",
                "tally": null,
                "score": 7
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = portal(&server, None)
            .complete_session(&completion(42))
            .await
            .unwrap();

        assert_eq!(receipt.session_id, SessionId::new(42));
        assert_eq!(receipt.score, Some(7));
    }

    #[tokio::test]
    async fn server_errors_map_to_storage_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let err = portal(&server, None)
            .create_session(UserId::new(1), TargetRef::Subtopic(2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }

    #[tokio::test]
    async fn slow_portal_times_out_as_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/5/complete"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "session_id": 5,
                        "completed_at": "2023-11-14T22:13:20Z"
                    }))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let portal = RemotePortal::new(
            RemoteConfig::new(server.uri()).with_timeout(Duration::from_millis(200)),
        )
        .unwrap();
        let outcome =
            tokio::time::timeout(Duration::from_secs(10), portal.complete_session(&completion(5)))
                .await
                .expect("client gives up before the outer guard");
        assert!(matches!(outcome, Err(StorageError::Unavailable(_))));
    }

    #[test]
    fn timeout_override_is_read_from_env_lookup() {
        let vars = |key: &str| match key {
            "EXAM_PORTAL_URL" => Some("https://portal.test".to_owned()),
            "EXAM_PORTAL_TIMEOUT_SECS" => Some("7".to_owned()),
            _ => None,
        };
        let config = RemoteConfig::from_lookup(vars).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(7));
        assert!(config.api_token.is_none());

        let bad = |key: &str| match key {
            "EXAM_PORTAL_URL" => Some("https://portal.test".to_owned()),
            "EXAM_PORTAL_TIMEOUT_SECS" => Some("0".to_owned()),
            _ => None,
        };
        let config = RemoteConfig::from_lookup(bad).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(RemoteConfig::from_lookup(|_| None).is_none());
    }
}
