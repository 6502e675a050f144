use std::collections::BTreeMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::bookmark::{ArchiveSnapshot, Bookmark, NewBookmark, QrPayload, RepoStats, ScrapeResult};

pub const CSRF_HEADER: &str = "X-CSRF-Token";
pub const DEFAULT_QR_SIZE: u32 = 256;

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

static CSRF_INPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<input[^>]*name\s*=\s*["']csrf_token["'][^>]*>"#).expect("valid csrf input regex")
});
static INPUT_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"value\s*=\s*["']([^"']*)["']"#).expect("valid value regex"));

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing CSRF token, refusing {0}")]
    MissingCsrfToken(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message} (HTTP {status})")]
    Server { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            ApiError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// `{"message": ..., "status_code": ...}` returned by mutating endpoints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApiMessage {
    pub message: String,
    pub status_code: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    error: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct NotesBody<'a> {
    notes: &'a str,
}

#[derive(Debug, Serialize)]
struct QrRequest<'a> {
    url: &'a str,
    size: u32,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Fixed token; when empty the client performs a session handshake.
    pub csrf_token: String,
    /// Skip the client-side CSRF precondition.
    pub dev_mode: bool,
    /// Repository whose web page is used for the CSRF handshake.
    pub repo: String,
    pub timeout: Duration,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            user_agent: format!("gm-tui/{}", crate::VERSION),
            csrf_token: String::new(),
            dev_mode: false,
            repo: "main".into(),
            timeout: Duration::from_secs(20),
            http_client: None,
        }
    }
}

pub struct Client {
    http: HttpClient,
    base_url: Url,
    user_agent: String,
    dev_mode: bool,
    repo: RwLock<String>,
    csrf: RwLock<Option<String>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let base = config.base_url.trim().trim_end_matches('/');
        let base_url = Url::parse(&format!("{base}/"))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout)
                .cookie_store(true)
                .build()?,
        };
        let token = config.csrf_token.trim().to_string();

        Ok(Client {
            http,
            base_url,
            user_agent: config.user_agent,
            dev_mode: config.dev_mode,
            repo: RwLock::new(config.repo),
            csrf: RwLock::new((!token.is_empty()).then_some(token)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn set_repo(&self, repo: &str) {
        *self.repo.write() = repo.to_string();
    }

    pub fn index(&self) -> Result<serde_json::Value, ApiError> {
        self.get_json("api", &[])
    }

    pub fn health(&self) -> Result<(), ApiError> {
        self.request(Method::GET, "api/health", &[], None)?;
        Ok(())
    }

    pub fn bookmark(&self, db: &str, id: u64) -> Result<Bookmark, ApiError> {
        self.get_json(&format!("api/{}/bookmarks/{id}", seg(db)), &[])
    }

    /// Every bookmark of `db`. The server keeps ids contiguous, so the count
    /// from the repository info bounds the id range.
    ///
    /// An id the server refuses is skipped (a missing record comes back as
    /// 404 or 500). Transport and decode failures abort the whole listing.
    pub fn bookmarks(&self, db: &str) -> Result<Vec<Bookmark>, ApiError> {
        let info = self.repo_info(db)?;
        let mut out = Vec::with_capacity(info.bookmarks);
        for id in 1..=info.bookmarks as u64 {
            match self.bookmark(db, id) {
                Ok(bookmark) => out.push(bookmark),
                Err(err) if err.is_not_found() => {
                    debug!(db, id, "bookmark id missing, skipping");
                }
                Err(err @ ApiError::Server { .. }) => {
                    warn!(db, id, error = %err, "server refused bookmark, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    pub fn tags(&self, db: &str) -> Result<BTreeMap<String, usize>, ApiError> {
        self.get_json(&format!("api/{}/bookmarks/tags", seg(db)), &[])
    }

    pub fn create(&self, db: &str, bookmark: &NewBookmark) -> Result<ApiMessage, ApiError> {
        let body = serde_json::to_value(bookmark).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.send_json(Method::POST, &format!("api/{}/bookmarks/new", seg(db)), &[], Some(body))
    }

    pub fn update(&self, db: &str, bookmark: &Bookmark) -> Result<ApiMessage, ApiError> {
        let body = serde_json::to_value(bookmark).map_err(|e| ApiError::Decode(e.to_string()))?;
        let path = format!("api/{}/bookmarks/{}/update", seg(db), bookmark.id);
        self.send_json(Method::PUT, &path, &[], Some(body))
    }

    pub fn delete(&self, db: &str, id: u64) -> Result<ApiMessage, ApiError> {
        let path = format!("api/{}/bookmarks/{id}/delete", seg(db));
        self.send_json(Method::DELETE, &path, &[], None)
    }

    pub fn toggle_favorite(&self, db: &str, id: u64) -> Result<ApiMessage, ApiError> {
        let path = format!("api/{}/bookmarks/{id}/favorite", seg(db));
        self.send_json(Method::PUT, &path, &[], None)
    }

    pub fn add_visit(&self, db: &str, id: u64) -> Result<ApiMessage, ApiError> {
        let path = format!("api/{}/bookmarks/{id}/visit", seg(db));
        self.send_json(Method::PUT, &path, &[], None)
    }

    pub fn update_notes(&self, db: &str, id: u64, notes: &str) -> Result<ApiMessage, ApiError> {
        let path = format!("api/{}/bookmarks/{id}/notes", seg(db));
        let body = serde_json::to_value(NotesBody { notes })
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        self.send_json(Method::PUT, &path, &[], Some(body))
    }

    pub fn check_status(&self, db: &str, id: u64) -> Result<Bookmark, ApiError> {
        self.get_json(&format!("api/{}/bookmarks/{id}/status", seg(db)), &[])
    }

    pub fn repo_all(&self) -> Result<Vec<RepoStats>, ApiError> {
        self.get_json("api/repo/all", &[])
    }

    pub fn repo_info(&self, db: &str) -> Result<RepoStats, ApiError> {
        self.get_json(&format!("api/{}/info", seg(db)), &[])
    }

    pub fn repo_create(&self, db: &str) -> Result<ApiMessage, ApiError> {
        self.send_json(Method::POST, &format!("api/{}/new", seg(db)), &[], None)
    }

    pub fn repo_delete(&self, db: &str) -> Result<ApiMessage, ApiError> {
        self.send_json(Method::DELETE, &format!("api/{}/delete", seg(db)), &[], None)
    }

    pub fn scrape(&self, url: &str) -> Result<ScrapeResult, ApiError> {
        self.send_json(Method::POST, "api/scrape", &[("url", url)], None)
    }

    /// Latest Internet Archive snapshot, `None` when there is none.
    pub fn archive(&self, url: &str) -> Result<Option<ArchiveSnapshot>, ApiError> {
        match self.send_json(Method::POST, "api/archive", &[("url", url)], None) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn qr(&self, url: &str, size: u32) -> Result<QrPayload, ApiError> {
        let body = serde_json::to_value(QrRequest { url, size })
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        self.send_json(Method::POST, "api/qr", &[], Some(body))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let resp = self.request(Method::GET, path, query, None)?;
        decode(resp)
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        let resp = self.request(method, path, query, body)?;
        decode(resp)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let mut url = self.base_url.join(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }

        let mutating = method != Method::GET && method != Method::HEAD;
        let token = if mutating { self.csrf_token()? } else { None };
        if mutating && token.is_none() && !self.dev_mode {
            return Err(ApiError::MissingCsrfToken(format!("{method} /{path}")));
        }

        let mut req = self
            .http
            .request(method.clone(), url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(ACCEPT, "application/json");
        if let Some(token) = token {
            req = req.header(CSRF_HEADER, token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send()?;
        let status = resp.status();
        debug!(%method, path, status = status.as_u16(), "api request");
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) if !body.error.is_empty() => body.error,
            Ok(body) if !body.message.is_empty() => body.message,
            _ if !text.trim().is_empty() => text.trim().to_string(),
            _ => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };
        Err(ApiError::Server {
            status: status.as_u16(),
            message,
        })
    }

    /// The cached token, or one scraped from the repository web page.
    fn csrf_token(&self) -> Result<Option<String>, ApiError> {
        if let Some(token) = self.csrf.read().clone() {
            return Ok(Some(token));
        }
        let repo = self.repo.read().clone();
        let page = self
            .base_url
            .join(&format!("web/{}/bookmarks/all", seg(&repo)))?;
        let resp = match self
            .http
            .get(page)
            .header(USER_AGENT, self.user_agent.clone())
            .send()
        {
            Ok(resp) => resp,
            Err(err) if self.dev_mode => {
                debug!(error = %err, "csrf handshake skipped in dev mode");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let html = resp.text()?;
        let token = extract_csrf_token(&html);
        if let Some(token) = &token {
            debug!("csrf token acquired");
            *self.csrf.write() = Some(token.clone());
        } else {
            warn!("csrf token not found in web page");
        }
        Ok(token)
    }
}

fn seg(raw: &str) -> String {
    utf8_percent_encode(raw, SEGMENT).to_string()
}

fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let text = resp.text()?;
    if text.trim().is_empty() {
        return serde_json::from_str("null")
            .or_else(|_| serde_json::from_str("{}"))
            .map_err(|err| ApiError::Decode(err.to_string()));
    }
    serde_json::from_str(&text).map_err(|err| ApiError::Decode(err.to_string()))
}

/// Reads the hidden `csrf_token` input of a server-rendered page.
pub fn extract_csrf_token(html: &str) -> Option<String> {
    let input = CSRF_INPUT.find(html)?;
    INPUT_VALUE
        .captures(input.as_str())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::mpsc;
    use std::thread;
    use tiny_http::{Header, Response as HttpResponse, Server};

    #[derive(Debug)]
    struct Seen {
        method: String,
        url: String,
        csrf: Option<String>,
        body: String,
    }

    /// Serves `replies` in order and reports each request it saw.
    fn serve(replies: Vec<(u16, &'static str)>) -> (String, mpsc::Receiver<Seen>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for (status, body) in replies {
                let mut request = match server.recv() {
                    Ok(request) => request,
                    Err(_) => return,
                };
                let mut content = String::new();
                request.as_reader().read_to_string(&mut content).unwrap();
                let csrf = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv(CSRF_HEADER))
                    .map(|h| h.value.as_str().to_string());
                let _ = tx.send(Seen {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    csrf,
                    body: content,
                });
                let header =
                    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
                let response = HttpResponse::from_string(body)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });
        (format!("http://127.0.0.1:{port}"), rx)
    }

    fn client(base_url: String, token: &str, dev_mode: bool) -> Client {
        Client::new(ClientConfig {
            base_url,
            csrf_token: token.into(),
            dev_mode,
            timeout: Duration::from_secs(5),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn fetches_bookmark_by_id() {
        let (base, rx) = serve(vec![(
            200,
            r#"{"id":7,"url":"https://rust-lang.org","title":"Rust","tags":["lang"],"favorite":true}"#,
        )]);
        let bookmark = client(base, "", false).bookmark("main", 7).unwrap();
        assert_eq!(bookmark.title, "Rust");
        assert!(bookmark.favorite);
        let seen = rx.recv().unwrap();
        assert_eq!(seen.method, "GET");
        assert_eq!(seen.url, "/api/main/bookmarks/7");
        assert_eq!(seen.csrf, None);
    }

    #[test]
    fn mutating_requests_carry_the_token() {
        let (base, rx) = serve(vec![(
            201,
            r#"{"message":"bookmark created","status_code":201}"#,
        )]);
        let new = NewBookmark {
            url: "https://example.com".into(),
            title: "Example".into(),
            tags: vec!["a".into(), "b".into()],
            ..NewBookmark::default()
        };
        let msg = client(base, "tok-123", false).create("main", &new).unwrap();
        assert_eq!(msg.message, "bookmark created");
        let seen = rx.recv().unwrap();
        assert_eq!(seen.method, "POST");
        assert_eq!(seen.url, "/api/main/bookmarks/new");
        assert_eq!(seen.csrf.as_deref(), Some("tok-123"));
        let body: serde_json::Value = serde_json::from_str(&seen.body).unwrap();
        assert_eq!(body["tags"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn handshake_reads_token_from_web_page() {
        let (base, rx) = serve(vec![
            (
                200,
                r#"<form><input type="hidden" name="csrf_token" value="from-page"></form>"#,
            ),
            (200, r#"{"message":"ok","status_code":200}"#),
        ]);
        let api = client(base, "", false);
        api.toggle_favorite("main", 3).unwrap();
        let page = rx.recv().unwrap();
        assert_eq!(page.url, "/web/main/bookmarks/all");
        let seen = rx.recv().unwrap();
        assert_eq!(seen.url, "/api/main/bookmarks/3/favorite");
        assert_eq!(seen.csrf.as_deref(), Some("from-page"));
    }

    #[test]
    fn missing_token_aborts_before_request() {
        let (base, rx) = serve(vec![(200, "<html>no token here</html>")]);
        let err = client(base, "", false).delete("main", 1).unwrap_err();
        assert!(matches!(err, ApiError::MissingCsrfToken(_)));
        assert_eq!(rx.recv().unwrap().url, "/web/main/bookmarks/all");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn dev_mode_sends_without_token() {
        let (base, rx) = serve(vec![
            (200, "<html></html>"),
            (200, r#"{"message":"deleted","status_code":200}"#),
        ]);
        let msg = client(base, "", true).delete("main", 4).unwrap();
        assert_eq!(msg.message, "deleted");
        rx.recv().unwrap();
        let seen = rx.recv().unwrap();
        assert_eq!(seen.method, "DELETE");
        assert_eq!(seen.csrf, None);
    }

    #[test]
    fn server_errors_surface_their_message() {
        let (base, _rx) = serve(vec![(
            400,
            r#"{"error":"no changes found","status_code":400}"#,
        )]);
        let bookmark = Bookmark {
            id: 2,
            ..Bookmark::default()
        };
        let err = client(base, "t", false).update("main", &bookmark).unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.to_string(), "no changes found (HTTP 400)");
    }

    #[test]
    fn archive_404_means_no_snapshot() {
        let (base, rx) = serve(vec![(404, r#"{"error":"not found","status_code":404}"#)]);
        let snapshot = client(base, "t", false)
            .archive("https://example.com/a b")
            .unwrap();
        assert!(snapshot.is_none());
        let seen = rx.recv().unwrap();
        assert!(seen.url.starts_with("/api/archive?url=https"));
    }

    #[test]
    fn lists_bookmarks_through_repo_info() {
        let (base, _rx) = serve(vec![
            (200, r#"{"name":"main","bookmarks":4,"tags":2,"favorites":0}"#),
            (200, r#"{"id":1,"url":"https://a.io"}"#),
            (404, r#"{"error":"not found","status_code":404}"#),
            (500, r#"{"error":"record not found","status_code":500}"#),
            (200, r#"{"id":4,"url":"https://d.io"}"#),
        ]);
        let all = client(base, "", false).bookmarks("main").unwrap();
        assert_eq!(all.iter().map(|b| b.id).collect::<Vec<_>>(), vec![1, 4]);
    }

    #[test]
    fn listing_fails_when_server_goes_away() {
        let (base, _rx) = serve(vec![
            (200, r#"{"name":"main","bookmarks":3,"tags":0,"favorites":0}"#),
            (200, r#"{"id":1,"url":"https://a.io"}"#),
        ]);
        let api = Client::new(ClientConfig {
            base_url: base,
            timeout: Duration::from_secs(1),
            ..ClientConfig::default()
        })
        .unwrap();
        let err = api.bookmarks("main").unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }

    #[test]
    fn listing_fails_on_undecodable_record() {
        let (base, _rx) = serve(vec![
            (200, r#"{"name":"main","bookmarks":2,"tags":0,"favorites":0}"#),
            (200, r#"{"id":1,"url":"https://a.io"}"#),
            (200, "<html>maintenance</html>"),
        ]);
        let err = client(base, "", false).bookmarks("main").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn repo_names_are_percent_encoded() {
        let (base, rx) = serve(vec![(200, r#"{"name":"my repo","bookmarks":0}"#)]);
        client(base, "", false).repo_info("my repo").unwrap();
        assert_eq!(rx.recv().unwrap().url, "/api/my%20repo/info");
    }

    #[test]
    fn extract_token_handles_attribute_order() {
        let html = r#"<input value="abc" type="hidden" name='csrf_token'>"#;
        assert_eq!(extract_csrf_token(html).as_deref(), Some("abc"));
        assert_eq!(extract_csrf_token("<input name=\"other\" value=\"x\">"), None);
    }
}
