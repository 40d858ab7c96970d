use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::catalog::{Catalog, CatalogError, EpisodeRecord, ShowRecord};
use crate::app::episode::Show;
use crate::app::tracking::{
    PersistenceError, ProgressRecord, ProgressStore, ProgressWrite, WriteAck,
};

#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) attempts: usize,
    pub(crate) retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            attempts: 3,
            retry_delay: Duration::from_millis(400),
        }
    }
}

impl RetryPolicy {
    fn single_attempt(&self) -> Self {
        Self {
            attempts: 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpRequest<'a> {
    pub(crate) method: Method,
    pub(crate) url: &'a str,
    pub(crate) query: &'a [(String, String)],
    pub(crate) headers: &'a [(String, String)],
    pub(crate) json_body: Option<&'a str>,
}

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

pub(crate) fn send_with_retries(
    request: &HttpRequest<'_>,
    policy: &RetryPolicy,
) -> Result<String, String> {
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(policy.connect_timeout)
            .timeout_read(policy.read_timeout)
            .timeout_write(policy.read_timeout)
            .build();

        let mut call = match request.method {
            Method::Get => agent.get(request.url),
            Method::Post => agent.post(request.url),
        };
        for (key, value) in request.headers {
            call = call.set(key, value);
        }
        for (key, value) in request.query {
            call = call.query(key, value);
        }

        let result = match request.json_body {
            Some(body) => call
                .set("Content-Type", "application/json")
                .send_string(body),
            None => call.call(),
        };

        match result {
            Ok(response) => match response.into_string() {
                Ok(body) => return Ok(body),
                Err(err) => {
                    return Err(format!("request failed: response decode failed: {err}"));
                }
            },
            Err(ureq::Error::Status(status, response)) => {
                let response_body = response.into_string().ok().unwrap_or_default();
                let body = response_body.trim();
                let status_error = if body.is_empty() {
                    format!("HTTP status {status}")
                } else {
                    let truncated = body.chars().take(240).collect::<String>();
                    format!("HTTP status {status} ({truncated})")
                };

                if should_retry_http_status(status) && attempt < attempts {
                    debug!(url = request.url, status, attempt, "retrying request");
                    thread::sleep(policy.retry_delay);
                    continue;
                }

                if should_retry_http_status(status) {
                    return Err(format!(
                        "request failed after {attempts} attempt(s): {status_error}"
                    ));
                }

                return Err(format!("request failed: {status_error}"));
            }
            Err(ureq::Error::Transport(err)) => {
                let transport_error = format!("transport error: {err}");
                if attempt < attempts {
                    debug!(url = request.url, attempt, error = %err, "retrying request");
                    thread::sleep(policy.retry_delay);
                    continue;
                }
                return Err(format!(
                    "request failed after {attempts} attempt(s): {transport_error}"
                ));
            }
        }
    }

    Err("request failed: exhausted attempts without a concrete error".to_string())
}

#[derive(Debug, Deserialize)]
struct ContinueWatchingEntry {
    #[serde(default)]
    anime: Option<ShowRecord>,
    #[serde(default)]
    episode: Option<EpisodeRecord>,
    progress_seconds: f64,
    #[serde(default)]
    last_watched_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct WatchHistoryUpdate<'a> {
    anime_id: &'a str,
    episode_id: &'a str,
    progress_seconds: i64,
    completed: bool,
}

/// Catalog and progress store served by the watch-history REST API.
#[derive(Debug, Clone)]
pub(crate) struct RemoteBackend {
    base_url: String,
    token: Option<String>,
    policy: RetryPolicy,
}

impl RemoteBackend {
    pub(crate) fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|token| !token.trim().is_empty()),
            policy: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.token
            .iter()
            .map(|token| ("Authorization".to_string(), format!("Bearer {token}")))
            .collect()
    }

    fn get(&self, path: &str) -> Result<String, String> {
        let url = format!("{}{path}", self.base_url);
        let headers = self.headers();
        send_with_retries(
            &HttpRequest {
                method: Method::Get,
                url: &url,
                query: &[],
                headers: &headers,
                json_body: None,
            },
            &self.policy,
        )
    }

    /// Unfinished entries for the profile, most recently watched first.
    pub(crate) fn list_progress(
        &self,
        profile_id: &str,
    ) -> Result<Vec<ProgressRecord>, PersistenceError> {
        let raw = self
            .get(&format!("/api/watch-history/{profile_id}/continue-watching"))
            .map_err(PersistenceError::Http)?;
        let entries: Vec<ContinueWatchingEntry> =
            serde_json::from_str(&raw).map_err(|err| PersistenceError::Decode(err.to_string()))?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| entry.into_record(profile_id))
            .collect())
    }
}

impl Catalog for RemoteBackend {
    fn fetch_show_catalog(&self) -> Result<Vec<Show>, CatalogError> {
        let raw = self.get("/api/anime").map_err(CatalogError::Http)?;
        let shows: Vec<ShowRecord> =
            serde_json::from_str(&raw).map_err(|err| CatalogError::Decode(err.to_string()))?;

        let mut out = Vec::with_capacity(shows.len());
        for mut show in shows {
            let raw = self
                .get(&format!("/api/anime/{}/episodes", show.anime_id))
                .map_err(CatalogError::Http)?;
            show.episodes = serde_json::from_str(&raw)
                .map_err(|err| CatalogError::Decode(err.to_string()))?;
            out.push(show.into_show());
        }
        Ok(out)
    }
}

impl ContinueWatchingEntry {
    fn into_record(self, profile_id: &str) -> Option<ProgressRecord> {
        let episode = self.episode?;
        let show_id = self
            .anime
            .map(|anime| anime.anime_id)
            .or(episode.anime_id)
            .unwrap_or_default();
        let updated_at = self
            .last_watched_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        // Continue-watching only lists unfinished entries.
        Some(ProgressRecord {
            profile_id: profile_id.to_string(),
            episode_id: episode.episode_id,
            show_id,
            position_seconds: self.progress_seconds.max(0.0),
            completed: false,
            writer_session: String::new(),
            writer_sequence: 0,
            updated_at,
        })
    }
}

impl ProgressStore for RemoteBackend {
    fn fetch_progress(
        &self,
        profile_id: &str,
        episode_id: &str,
    ) -> Result<Option<ProgressRecord>, PersistenceError> {
        Ok(self
            .list_progress(profile_id)?
            .into_iter()
            .find(|record| record.episode_id == episode_id))
    }

    fn write_progress(&self, write: &ProgressWrite) -> Result<WriteAck, PersistenceError> {
        let body = serde_json::to_string(&WatchHistoryUpdate {
            anime_id: &write.show_id,
            episode_id: &write.episode_id,
            progress_seconds: write.position_seconds.round() as i64,
            completed: write.completed,
        })
        .map_err(|err| PersistenceError::Decode(err.to_string()))?;

        let url = format!("{}/api/watch-history", self.base_url);
        let query = vec![("profile_id".to_string(), write.profile_id.clone())];
        let headers = self.headers();
        send_with_retries(
            &HttpRequest {
                method: Method::Post,
                url: &url,
                query: &query,
                headers: &headers,
                json_body: Some(&body),
            },
            &self.policy.single_attempt(),
        )
        .map_err(|err| {
            warn!(episode_id = %write.episode_id, error = %err, "watch-history write failed");
            PersistenceError::Http(err)
        })?;

        Ok(WriteAck {
            applied: true,
            position_seconds: write.position_seconds,
            completed: write.completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tracking::{CheckpointReason, WriteToken};
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    enum Behavior {
        Respond(u16, String),
        DelayRespond(Duration, u16, String),
    }

    #[derive(Debug)]
    struct TestServer {
        base_url: String,
        requests: Arc<AtomicUsize>,
        heads: Arc<Mutex<Vec<String>>>,
        shutdown_tx: mpsc::Sender<()>,
        join_handle: Option<std::thread::JoinHandle<()>>,
    }

    impl TestServer {
        fn spawn(behaviors: Vec<Behavior>) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind test server");
            listener.set_nonblocking(true).expect("set nonblocking");
            let addr = listener.local_addr().expect("local addr");

            let requests = Arc::new(AtomicUsize::new(0));
            let requests_clone = Arc::clone(&requests);
            let heads = Arc::new(Mutex::new(Vec::new()));
            let heads_clone = Arc::clone(&heads);
            let shared_behaviors = Arc::new(Mutex::new(VecDeque::from(behaviors)));
            let behaviors_clone = Arc::clone(&shared_behaviors);
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

            let join_handle = std::thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    match listener.accept() {
                        Ok((mut stream, _)) => {
                            requests_clone.fetch_add(1, Ordering::SeqCst);
                            let behavior = {
                                let mut queue = behaviors_clone.lock().expect("lock behaviors");
                                queue.pop_front().unwrap_or_else(|| {
                                    Behavior::Respond(200, "[]".to_string())
                                })
                            };
                            let head = consume_request(&mut stream).unwrap_or_default();
                            heads_clone.lock().expect("lock heads").push(head);
                            std::thread::spawn(move || {
                                serve_behavior(&mut stream, behavior);
                            });
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            });

            Self {
                base_url: format!("http://{addr}"),
                requests,
                heads,
                shutdown_tx,
                join_handle: Some(join_handle),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }

        fn request_heads(&self) -> Vec<String> {
            self.heads.lock().expect("lock heads").clone()
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            let _ = self.shutdown_tx.send(());
            if let Some(handle) = self.join_handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn consume_request(stream: &mut TcpStream) -> std::io::Result<String> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_millis(200)))?;
        let mut buf = [0_u8; 1024];
        let mut data = Vec::new();
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => {
                    data.extend_from_slice(&buf[..read]);
                    if data.windows(4).any(|window| window == b"\r\n\r\n") {
                        break;
                    }
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    fn reason_phrase(status: u16) -> &'static str {
        match status {
            200 => "OK",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            408 => "Request Timeout",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Status",
        }
    }

    fn serve_behavior(stream: &mut TcpStream, behavior: Behavior) {
        match behavior {
            Behavior::Respond(status, body) => {
                let _ = write_response(stream, status, &body);
            }
            Behavior::DelayRespond(delay, status, body) => {
                std::thread::sleep(delay);
                let _ = write_response(stream, status, &body);
            }
        }
    }

    fn write_response(stream: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
        let reason = reason_phrase(status);
        let payload = body.as_bytes();
        write!(
            stream,
            "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            payload.len()
        )?;
        stream.write_all(payload)?;
        stream.flush()
    }

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy {
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(200),
            attempts,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn get(url: &str) -> HttpRequest<'_> {
        HttpRequest {
            method: Method::Get,
            url,
            query: &[],
            headers: &[],
            json_body: None,
        }
    }

    fn sample_write() -> ProgressWrite {
        ProgressWrite {
            profile_id: "profile-1".to_string(),
            episode_id: "ep-2".to_string(),
            show_id: "show-1".to_string(),
            position_seconds: 620.4,
            completed: false,
            reason: CheckpointReason::Pause,
            token: WriteToken {
                session_id: "s1".to_string(),
                session_started_at: Utc::now(),
                sequence: 3,
            },
            attempt: 1,
        }
    }

    #[test]
    fn retries_retryable_statuses_until_success() {
        let server = TestServer::spawn(vec![
            Behavior::Respond(500, "server-error".to_string()),
            Behavior::Respond(429, "throttled".to_string()),
            Behavior::Respond(200, "ok".to_string()),
        ]);

        let result = send_with_retries(&get(&server.base_url), &fast_policy(3));

        assert_eq!(result.expect("should eventually succeed"), "ok");
        assert_eq!(server.request_count(), 3);
    }

    #[test]
    fn does_not_retry_hard_client_errors() {
        let server = TestServer::spawn(vec![Behavior::Respond(404, "not-found".to_string())]);

        let result = send_with_retries(&get(&server.base_url), &fast_policy(5));

        let err = result.expect_err("404 should not be retried");
        assert!(
            err.contains("HTTP status 404"),
            "unexpected error message: {err}"
        );
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn retries_transport_timeout_and_recovers() {
        let server = TestServer::spawn(vec![
            Behavior::DelayRespond(Duration::from_millis(120), 200, "slow".to_string()),
            Behavior::Respond(200, "ok".to_string()),
        ]);
        let policy = RetryPolicy {
            connect_timeout: Duration::from_millis(250),
            read_timeout: Duration::from_millis(20),
            attempts: 2,
            retry_delay: Duration::from_millis(1),
        };

        let result = send_with_retries(&get(&server.base_url), &policy);

        assert_eq!(result.expect("timeout should be retried"), "ok");
        assert_eq!(server.request_count(), 2);
    }

    #[test]
    fn returns_retry_exhausted_error_for_retryable_status() {
        let server = TestServer::spawn(vec![
            Behavior::Respond(503, "down".to_string()),
            Behavior::Respond(503, "still-down".to_string()),
        ]);

        let result = send_with_retries(&get(&server.base_url), &fast_policy(2));

        let err = result.expect_err("retryable failures should eventually error");
        assert!(
            err.contains("after 2 attempt(s)") && err.contains("HTTP status 503"),
            "unexpected error message: {err}"
        );
        assert_eq!(server.request_count(), 2);
    }

    #[test]
    fn remote_catalog_joins_shows_with_their_episodes() {
        let server = TestServer::spawn(vec![
            Behavior::Respond(
                200,
                r#"[{"anime_id":"show-1","title":"Frontier","genres":["drama"]}]"#.to_string(),
            ),
            Behavior::Respond(
                200,
                r#"[
                    {"episode_id":"ep-2","anime_id":"show-1","episode_number":2,"duration_seconds":1440,"video_url":"https://cdn.test/2.mp4"},
                    {"episode_id":"ep-1","anime_id":"show-1","episode_number":1,"duration_seconds":1440,"video_url":"https://cdn.test/1.mp4","skip_intro_start":0,"skip_intro_end":85}
                ]"#
                .to_string(),
            ),
        ]);
        let backend = RemoteBackend::new(&server.base_url, None).with_policy(fast_policy(1));

        let shows = backend.fetch_show_catalog().expect("catalog should load");

        assert_eq!(shows.len(), 1);
        let ids: Vec<&str> = shows[0]
            .episodes
            .iter()
            .map(|episode| episode.episode_id.as_str())
            .collect();
        assert_eq!(ids, vec!["ep-1", "ep-2"]);
        assert_eq!(shows[0].episodes[0].skip_windows.len(), 1);
        let heads = server.request_heads();
        assert!(heads[0].starts_with("GET /api/anime HTTP/1.1"));
        assert!(heads[1].starts_with("GET /api/anime/show-1/episodes HTTP/1.1"));
    }

    #[test]
    fn remote_progress_is_found_by_episode() {
        let server = TestServer::spawn(vec![Behavior::Respond(
            200,
            r#"[
                {"anime":{"anime_id":"show-1","title":"Frontier"},"episode":{"episode_id":"ep-1","episode_number":1,"duration_seconds":1440},"progress_seconds":120,"last_watched_at":"2026-03-01T10:00:00+00:00"},
                {"anime":{"anime_id":"show-1","title":"Frontier"},"episode":{"episode_id":"ep-2","episode_number":2,"duration_seconds":1440},"progress_seconds":620,"last_watched_at":"2026-03-02T10:00:00+00:00"}
            ]"#
            .to_string(),
        )]);
        let backend = RemoteBackend::new(&server.base_url, Some("secret".to_string()))
            .with_policy(fast_policy(1));

        let record = backend
            .fetch_progress("profile-1", "ep-2")
            .expect("fetch should succeed")
            .expect("record should exist");

        assert_eq!(record.position_seconds, 620.0);
        assert_eq!(record.show_id, "show-1");
        assert!(!record.completed);
        let heads = server.request_heads();
        assert!(heads[0].starts_with("GET /api/watch-history/profile-1/continue-watching"));
        assert!(
            heads[0].to_ascii_lowercase().contains("authorization: bearer secret"),
            "missing bearer token: {}",
            heads[0]
        );
    }

    #[test]
    fn remote_write_posts_once_without_retrying() {
        let server = TestServer::spawn(vec![
            Behavior::Respond(503, "down".to_string()),
            Behavior::Respond(200, "{}".to_string()),
        ]);
        let backend = RemoteBackend::new(&server.base_url, None).with_policy(fast_policy(3));

        let err = backend
            .write_progress(&sample_write())
            .expect_err("a failed post should surface");
        assert!(matches!(err, PersistenceError::Http(_)));
        assert_eq!(server.request_count(), 1);

        let ack = backend
            .write_progress(&sample_write())
            .expect("second post should succeed");
        assert!(ack.applied);
        let heads = server.request_heads();
        assert!(heads[1].starts_with("POST /api/watch-history?profile_id=profile-1 HTTP/1.1"));
    }
}
