//! Backend HTTP surface.
//!
//! [`JobApi`] is the seam the controllers talk to; [`ApiClient`] is the
//! reqwest implementation. Reads (GET) are retried on transient failures with
//! exponential backoff. Submissions (POST) and deletions are sent exactly once.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{
    error::{Result, TubescopeError},
    filter::WireFilters,
    progress::{ProgressStatus, RunRecord},
    types::{Report, ReportSummary, Video},
};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertAccepted {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub video_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConvertStatus {
    #[serde(default)]
    pub found: Vec<String>,
    #[serde(default)]
    pub all_found: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    Filter,
    Nl,
}

/// Body of a report submission, minus the board id the client adds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPayload {
    pub mode: ReportMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<WireFilters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nl_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReportAccepted {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Daily conversion allowance. Negative remaining values mean unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quota {
    #[serde(default)]
    pub remaining_count: i64,
    #[serde(default)]
    pub remaining_minutes: i64,
    #[serde(default)]
    pub limit_count: i64,
    #[serde(default)]
    pub limit_minutes: i64,
    #[serde(default)]
    pub used_count: i64,
    #[serde(default)]
    pub used_minutes: i64,
}

impl Quota {
    pub fn is_unlimited(&self) -> bool {
        self.remaining_count < 0
    }
}

#[async_trait]
pub trait JobApi: Send + Sync {
    async fn convert_videos(&self, urls: &[String]) -> Result<ConvertAccepted>;
    async fn convert_status(&self, video_ids: &[String]) -> Result<ConvertStatus>;
    async fn generate_report(&self, payload: &ReportPayload) -> Result<ReportAccepted>;
    async fn report_history(&self) -> Result<Vec<ReportSummary>>;
    async fn get_report(&self, id: &str) -> Result<Report>;
    async fn delete_report(&self, id: &str) -> Result<()>;
    async fn master_index(&self) -> Result<Vec<Video>>;
    async fn status(&self) -> Result<ProgressStatus>;
    async fn status_history(&self) -> Result<Vec<RunRecord>>;
    async fn guest_remaining(&self) -> Result<Quota>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub base_url: String,
    pub board_id: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            board_id: "temp".to_string(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    settings: ApiSettings,
}

#[derive(Serialize)]
struct ConvertBody<'a> {
    urls: &'a [String],
    dashboard_id: &'a str,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    #[serde(flatten)]
    payload: &'a ReportPayload,
    dashboard_id: &'a str,
}

impl ApiClient {
    pub fn new(settings: ApiSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn board_id(&self) -> &str {
        &self.settings.board_id
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        endpoint(&self.settings.base_url, path)
    }

    fn board_query(&self) -> [(&'static str, &str); 1] {
        [("dashboard_id", self.settings.board_id.as_str())]
    }

    /// GET with retry on transient failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        build: impl Fn(RequestBuilder) -> RequestBuilder,
    ) -> Result<T> {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            let outcome = async {
                let response = build(self.http.get(&url)).send().await?;
                let response = check_status(response).await?;
                Ok::<T, TubescopeError>(response.json::<T>().await?)
            }
            .await;

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.settings.max_retries => {
                    let delay = backoff_delay(self.settings.retry_backoff, attempt);
                    warn!(%url, attempt, err = %e, delay_ms = delay.as_millis() as u64, "api: retrying read");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single-shot request; the caller decides what a failure means.
    async fn send_once(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        check_status(response).await
    }
}

#[async_trait]
impl JobApi for ApiClient {
    async fn convert_videos(&self, urls: &[String]) -> Result<ConvertAccepted> {
        debug!(count = urls.len(), board = %self.settings.board_id, "api: convert-videos");
        let body = ConvertBody {
            urls,
            dashboard_id: &self.settings.board_id,
        };
        let response = self
            .send_once(self.http.post(self.url("convert-videos")).json(&body))
            .await?;
        Ok(response.json().await?)
    }

    async fn convert_status(&self, video_ids: &[String]) -> Result<ConvertStatus> {
        let ids = video_ids.join(",");
        self.get_json("temp-convert-status", |req| {
            req.query(&[
                ("video_ids", ids.as_str()),
                ("dashboard_id", self.settings.board_id.as_str()),
            ])
        })
        .await
    }

    async fn generate_report(&self, payload: &ReportPayload) -> Result<ReportAccepted> {
        debug!(mode = ?payload.mode, board = %self.settings.board_id, "api: report/generate");
        let body = GenerateBody {
            payload,
            dashboard_id: &self.settings.board_id,
        };
        let response = self
            .send_once(self.http.post(self.url("report/generate")).json(&body))
            .await?;
        Ok(response.json().await?)
    }

    async fn report_history(&self) -> Result<Vec<ReportSummary>> {
        self.get_json("report/history", |req| req.query(&self.board_query()))
            .await
    }

    async fn get_report(&self, id: &str) -> Result<Report> {
        self.get_json(&format!("report/{id}"), |req| req.query(&self.board_query()))
            .await
    }

    async fn delete_report(&self, id: &str) -> Result<()> {
        self.send_once(
            self.http
                .delete(self.url(&format!("report/{id}")))
                .query(&self.board_query()),
        )
        .await?;
        Ok(())
    }

    async fn master_index(&self) -> Result<Vec<Video>> {
        let mut rows: Vec<Video> = self
            .get_json("master-index", |req| req.query(&self.board_query()))
            .await?;
        for row in rows.iter_mut() {
            row.normalize();
        }
        Ok(rows)
    }

    async fn status(&self) -> Result<ProgressStatus> {
        self.get_json("status", |req| req.query(&self.board_query()))
            .await
    }

    async fn status_history(&self) -> Result<Vec<RunRecord>> {
        self.get_json("status-history", |req| req.query(&self.board_query()))
            .await
    }

    async fn guest_remaining(&self) -> Result<Quota> {
        self.get_json("guest-remaining", |req| req).await
    }
}

pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// `base * 2^attempt`, saturating.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, &body))
}

/// Maps a non-2xx response to the error the caller surfaces verbatim.
pub fn error_for_status(status: StatusCode, body: &str) -> TubescopeError {
    let detail = detail_from_body(body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body.trim().to_string()
        }
    });
    match status {
        StatusCode::TOO_MANY_REQUESTS => TubescopeError::RateLimited { detail },
        StatusCode::NOT_FOUND => TubescopeError::NotFound { what: detail },
        _ => TubescopeError::Rejected {
            status: status.as_u16(),
            detail,
        },
    }
}

fn detail_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterSpec, RankFilter};
    use crate::types::Rank;

    #[test]
    fn test_endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("http://localhost:8000/api/", "/report/history"),
            "http://localhost:8000/api/report/history"
        );
        assert_eq!(
            endpoint("https://example.org/api", "temp-convert-status"),
            "https://example.org/api/temp-convert-status"
        );
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
    }

    #[test]
    fn test_rate_limit_detail_is_verbatim() {
        let body = r#"{"detail": "Guests may convert 5 videos per day"}"#;
        match error_for_status(StatusCode::TOO_MANY_REQUESTS, body) {
            TubescopeError::RateLimited { detail } => {
                assert_eq!(detail, "Guests may convert 5 videos per day")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_json_body_is_kept_raw() {
        match error_for_status(StatusCode::BAD_GATEWAY, "upstream down\n") {
            TubescopeError::Rejected { status, detail } => {
                assert_eq!(status, 502);
                assert_eq!(detail, "upstream down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(error_for_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!error_for_status(StatusCode::BAD_REQUEST, r#"{"detail":"no"}"#).is_transient());
    }

    #[test]
    fn test_generate_body_layout() {
        let spec = FilterSpec::new().with_rank(RankFilter::AtLeast(Rank::A));
        let payload = ReportPayload {
            mode: ReportMode::Filter,
            filters: Some(spec.to_wire()),
            nl_query: None,
            custom_prompt: Some("focus on pricing".into()),
        };
        let body = serde_json::to_value(GenerateBody {
            payload: &payload,
            dashboard_id: "temp",
        })
        .unwrap();

        assert_eq!(body["mode"], "filter");
        assert_eq!(body["dashboard_id"], "temp");
        assert_eq!(body["filters"]["rankFilterMulti"], "A+");
        assert_eq!(body["custom_prompt"], "focus on pricing");
        assert!(body.get("nl_query").is_none());
    }

    #[test]
    fn test_quota_unlimited_marker() {
        let quota: Quota = serde_json::from_value(serde_json::json!({
            "remaining_count": -1,
            "remaining_minutes": -1,
            "limit_count": 20,
            "limit_minutes": 300,
            "used_count": 0,
            "used_minutes": 0
        }))
        .unwrap();
        assert!(quota.is_unlimited());
    }

    mod http {
        use std::sync::{Arc, Mutex};

        use tokio::{
            io::{AsyncReadExt, AsyncWriteExt},
            net::{TcpListener, TcpStream},
        };

        use super::*;

        /// One-response-per-connection HTTP server answering from a script.
        /// Records the request line of everything it receives.
        struct ScriptedServer {
            base_url: String,
            requests: Arc<Mutex<Vec<String>>>,
        }

        impl ScriptedServer {
            async fn start(script: Vec<(u16, &'static str)>) -> Self {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();
                let requests = Arc::new(Mutex::new(Vec::new()));
                let log = requests.clone();
                tokio::spawn(async move {
                    let mut script = script.into_iter();
                    while let Ok((mut socket, _)) = listener.accept().await {
                        let line = read_request(&mut socket).await;
                        log.lock().unwrap().push(line);
                        let (status, body) =
                            script.next().unwrap_or((500, r#"{"detail":"script exhausted"}"#));
                        let response = format!(
                            "HTTP/1.1 {status} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                            body.len()
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                });
                Self {
                    base_url: format!("http://{addr}/api"),
                    requests,
                }
            }

            fn client(&self, max_retries: u32) -> ApiClient {
                ApiClient::new(ApiSettings {
                    base_url: self.base_url.clone(),
                    board_id: "temp".into(),
                    request_timeout: Duration::from_secs(5),
                    max_retries,
                    retry_backoff: Duration::from_millis(1),
                })
                .unwrap()
            }

            fn requests(&self) -> Vec<String> {
                self.requests.lock().unwrap().clone()
            }
        }

        async fn read_request(socket: &mut TcpStream) -> String {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            String::from_utf8_lossy(&buf)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string()
        }

        #[tokio::test]
        async fn test_read_retries_server_errors_and_timeouts() {
            let server = ScriptedServer::start(vec![
                (503, r#"{"detail":"busy"}"#),
                (408, ""),
                (200, r#"{"found":["dQw4w9WgXcQ"],"all_found":true}"#),
            ])
            .await;

            let status = server
                .client(3)
                .convert_status(&["dQw4w9WgXcQ".to_string()])
                .await
                .unwrap();
            assert!(status.all_found);

            let requests = server.requests();
            assert_eq!(requests.len(), 3);
            assert!(requests.iter().all(|r| r.starts_with("GET /api/temp-convert-status?")));
        }

        #[tokio::test]
        async fn test_read_gives_up_after_max_retries() {
            let server = ScriptedServer::start(vec![(503, r#"{"detail":"busy"}"#); 5]).await;

            let err = server.client(2).report_history().await.unwrap_err();
            match err {
                TubescopeError::Rejected { status, detail } => {
                    assert_eq!(status, 503);
                    assert_eq!(detail, "busy");
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert_eq!(server.requests().len(), 3);
        }

        #[tokio::test]
        async fn test_client_errors_are_not_retried() {
            let server = ScriptedServer::start(vec![(404, r#"{"detail":"missing"}"#)]).await;

            let err = server.client(3).get_report("r1").await.unwrap_err();
            assert!(matches!(err, TubescopeError::NotFound { .. }));
            assert_eq!(server.requests().len(), 1);
        }

        #[tokio::test]
        async fn test_writes_are_sent_once_on_server_error() {
            let server = ScriptedServer::start(vec![
                (502, r#"{"detail":"upstream"}"#),
                (503, r#"{"detail":"busy"}"#),
                (500, r#"{"detail":"boom"}"#),
            ])
            .await;
            let client = server.client(3);

            let err = client
                .convert_videos(&["https://youtu.be/dQw4w9WgXcQ".to_string()])
                .await
                .unwrap_err();
            assert!(matches!(err, TubescopeError::Rejected { status: 502, .. }));
            assert_eq!(server.requests().len(), 1);

            let payload = ReportPayload {
                mode: ReportMode::Nl,
                filters: None,
                nl_query: Some("pricing".into()),
                custom_prompt: None,
            };
            let err = client.generate_report(&payload).await.unwrap_err();
            assert!(matches!(err, TubescopeError::Rejected { status: 503, .. }));
            assert_eq!(server.requests().len(), 2);

            let err = client.delete_report("r1").await.unwrap_err();
            assert!(matches!(err, TubescopeError::Rejected { status: 500, .. }));

            let requests = server.requests();
            assert_eq!(requests.len(), 3);
            assert!(requests[0].starts_with("POST /api/convert-videos"));
            assert!(requests[1].starts_with("POST /api/report/generate"));
            assert!(requests[2].starts_with("DELETE /api/report/r1?"));
        }
    }
}
