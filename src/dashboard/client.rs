//! Ralph Dashboard REST client
//!
//! Every command issued here only affects a runner through the dashboard
//! writing into that project's Control Directory.

use std::time::Duration;

use log::debug;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::types::{LoginResponse, Project, ProjectStats};
use crate::error::{RalphError, Result};

/// Default dashboard address
pub const DEFAULT_BASE_URL: &str = "http://localhost:8420";

/// Default page size for iteration listings
pub const DEFAULT_ITERATION_LIMIT: u32 = 50;

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl DashboardConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// Control verbs the dashboard accepts per project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    Start,
    Stop,
    Pause,
    Resume,
}

impl LoopCommand {
    pub fn as_path(&self) -> &'static str {
        match self {
            LoopCommand::Start => "start",
            LoopCommand::Stop => "stop",
            LoopCommand::Pause => "pause",
            LoopCommand::Resume => "resume",
        }
    }
}

pub struct DashboardClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl DashboardClient {
    pub fn new(config: DashboardConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RalphError::Dashboard(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| RalphError::Dashboard(format!("Invalid base URL {}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RalphError::Dashboard(format!("Invalid base URL {}", config.base_url)));
        }

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Use an existing bearer token instead of logging in.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// `<base>/api/<segments...>`, each segment percent-encoded on its own.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    /// Authenticate and keep the access token.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<LoginResponse> {
        let request = self
            .client
            .post(self.url(&["auth", "login"]))
            .json(&json!({"username": username, "password": password}));
        let response: LoginResponse = Self::send(request).await?;
        self.token = Some(response.access_token.clone());
        Ok(response)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.call(Method::GET, &["projects"]).await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        self.call(Method::GET, &["projects", project_id]).await
    }

    pub async fn get_stats(&self, project_id: &str) -> Result<ProjectStats> {
        self.call(Method::GET, &["projects", project_id, "stats"]).await
    }

    /// Recent iterations; `page` is forwarded when given.
    pub async fn get_iterations(&self, project_id: &str, limit: u32, page: Option<u32>) -> Result<Vec<Value>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(page) = page {
            query.push(("page", page.to_string()));
        }
        let request = self
            .authed(Method::GET, &["projects", project_id, "iterations"])?
            .query(&query);
        Self::send(request).await
    }

    pub async fn get_plan(&self, project_id: &str) -> Result<Value> {
        self.call(Method::GET, &["projects", project_id, "plan"]).await
    }

    pub async fn command(&self, project_id: &str, command: LoopCommand) -> Result<Value> {
        self.call(Method::POST, &["projects", project_id, command.as_path()])
            .await
    }

    /// Queue an instruction for the project's next iteration.
    pub async fn inject(&self, project_id: &str, instruction: &str) -> Result<Value> {
        let request = self
            .authed(Method::POST, &["projects", project_id, "inject"])?
            .json(&json!({"instruction": instruction}));
        Self::send(request).await
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, segments: &[&str]) -> Result<T> {
        Self::send(self.authed(method, segments)?).await
    }

    fn authed(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let token = self.token.as_ref().ok_or(RalphError::NotAuthenticated)?;
        Ok(self.client.request(method, self.url(segments)).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        debug!("Dashboard responded {} for {}", status, response.url());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RalphError::Dashboard(format!("{}: {}", status, body.trim())));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..head_end]
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= head_end + 4 + content_length
    }

    fn client(base_url: &str) -> DashboardClient {
        DashboardClient::new(DashboardConfig::with_base_url(base_url)).unwrap()
    }

    #[test]
    fn test_url_building() {
        let client = client("http://localhost:8420/");
        assert_eq!(client.url(&["projects"]).as_str(), "http://localhost:8420/api/projects");
        assert_eq!(client.url(&["auth", "login"]).as_str(), "http://localhost:8420/api/auth/login");

        let prefixed = DashboardClient::new(DashboardConfig::with_base_url("http://dash/ralph/")).unwrap();
        assert_eq!(prefixed.url(&["projects"]).as_str(), "http://dash/ralph/api/projects");
    }

    #[test]
    fn test_project_id_is_one_path_segment() {
        let client = client(DEFAULT_BASE_URL);
        assert_eq!(
            client.url(&["projects", "team/web?x=1#top", "stats"]).as_str(),
            "http://localhost:8420/api/projects/team%2Fweb%3Fx=1%23top/stats"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = DashboardClient::new(DashboardConfig::with_base_url("not a url"));
        assert!(matches!(result, Err(RalphError::Dashboard(_))));
    }

    #[test]
    fn test_loop_command_paths() {
        assert_eq!(LoopCommand::Start.as_path(), "start");
        assert_eq!(LoopCommand::Resume.as_path(), "resume");
    }

    #[tokio::test]
    async fn test_requires_token() {
        let client = client(DEFAULT_BASE_URL);
        let result = client.list_projects().await;
        assert!(matches!(result, Err(RalphError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_login_stores_token() {
        let (base, server) = serve_once("200 OK", r#"{"access_token":"tok-123","token_type":"bearer"}"#).await;
        let mut client = client(&base);

        let response = client.login("admin", "secret").await.unwrap();
        assert_eq!(response.access_token, "tok-123");
        assert_eq!(client.token(), Some("tok-123"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/auth/login"));
        assert!(request.contains("\"username\":\"admin\""));
    }

    #[tokio::test]
    async fn test_list_projects_sends_bearer() {
        let (base, server) = serve_once("200 OK", r#"[{"id":"web","status":"running","path":"/srv/web"}]"#).await;
        let client = client(&base).with_token("tok-abc");

        let projects = client.list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id, "web");
        assert_eq!(projects[0].status.as_deref(), Some("running"));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/projects "));
        assert!(request.to_lowercase().contains("authorization: bearer tok-abc"));
    }

    #[tokio::test]
    async fn test_get_iterations_passes_limit() {
        let (base, server) = serve_once("200 OK", "[]").await;
        let client = client(&base).with_token("t");

        let iterations = client.get_iterations("web", 10, Some(2)).await.unwrap();
        assert!(iterations.is_empty());

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/projects/web/iterations?limit=10&page=2"));
    }

    #[tokio::test]
    async fn test_project_id_with_slash_hits_its_own_endpoint() {
        let (base, server) = serve_once("200 OK", r#"{"iteration_count":4}"#).await;
        let client = client(&base).with_token("t");

        let stats = client.get_stats("team/web").await.unwrap();
        assert_eq!(stats.iteration_count, Some(4));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/projects/team%2Fweb/stats "));
    }

    #[tokio::test]
    async fn test_error_status_is_dashboard_error() {
        let (base, server) = serve_once("404 Not Found", r#"{"detail":"Project not found"}"#).await;
        let client = client(&base).with_token("t");

        match client.command("missing", LoopCommand::Pause).await {
            Err(RalphError::Dashboard(msg)) => {
                assert!(msg.contains("404"));
                assert!(msg.contains("Project not found"));
            }
            other => panic!("expected dashboard error, got {:?}", other),
        }
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/projects/missing/pause"));
    }
}
