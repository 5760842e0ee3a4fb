//! E2B sandbox provider: HTTP client for the E2B REST API.
//!
//! Every call is keyed by an explicit sandbox ID; the client itself holds no
//! per-project state.

use super::{CommandOutput, SandboxClient, SandboxError, SandboxResult};
use async_trait::async_trait;
use reqwest::StatusCode;

/// Default base URL for the E2B REST API.
pub const E2B_API_BASE: &str = "https://api.e2b.dev";

/// Shared HTTP client for E2B API calls.
pub struct E2bSandboxClient {
    pub api_key: String,
    pub base_url: String,
    pub http: reqwest::Client,
}

impl E2bSandboxClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_key: api_key.into(),
            base_url: E2B_API_BASE.to_string(),
            http,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn effective_key(&self) -> String {
        std::env::var("E2B_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.api_key.clone())
    }

    fn sandbox_url(&self, sandbox_id: &str, suffix: &str) -> String {
        format!("{}/v0/sandboxes/{sandbox_id}{suffix}", self.base_url)
    }

    fn file_url(&self, sandbox_id: &str, path: &str) -> String {
        format!(
            "{}?path={encoded}",
            self.sandbox_url(sandbox_id, "/files"),
            encoded = urlencoding::encode(path)
        )
    }

    async fn body_text(resp: reqwest::Response) -> String {
        resp.text()
            .await
            .unwrap_or_else(|_| "<unreadable>".to_string())
    }

    fn api_error(status: StatusCode, body: String) -> SandboxError {
        SandboxError::Api {
            status: status.as_u16(),
            body,
        }
    }

    /// Fetch one directory listing as `(name, type)` pairs. A 404 is
    /// `FileNotFound(dir)`; the caller decides whether that is fatal.
    async fn list_dir(&self, sandbox_id: &str, dir: &str) -> SandboxResult<Vec<(String, String)>> {
        let resp = self
            .http
            .get(self.file_url(sandbox_id, dir))
            .bearer_auth(self.effective_key())
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SandboxError::FileNotFound(dir.to_string()));
        }
        let body_text = Self::body_text(resp).await;
        if !status.is_success() {
            return Err(Self::api_error(status, body_text));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body_text).map_err(|e| {
            SandboxError::Other(format!("Failed to parse listing of {dir}: {e}\nBody: {body_text}"))
        })?;
        let entries = parsed.as_array().ok_or_else(|| {
            SandboxError::Other(format!("Listing of {dir} is not an array: {body_text}"))
        })?;

        Ok(entries
            .iter()
            .filter_map(|entry| {
                let name = entry["name"].as_str()?;
                let kind = entry["type"].as_str().unwrap_or("file");
                Some((name.to_string(), kind.to_string()))
            })
            .collect())
    }
}

#[async_trait]
impl SandboxClient for E2bSandboxClient {
    async fn create_sandbox(&self, template: &str, timeout_ms: u64) -> SandboxResult<String> {
        let api_key = self.effective_key();
        if api_key.is_empty() {
            return Err(SandboxError::Other("E2B_API_KEY is not set".to_string()));
        }

        let url = format!("{}/v0/sandboxes", self.base_url);
        let body = serde_json::json!({
            "templateID": template,
            "timeout": timeout_ms / 1000,
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let body_text = Self::body_text(resp).await;
        if !status.is_success() {
            return Err(Self::api_error(status, body_text));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body_text).map_err(|e| {
            SandboxError::Other(format!("Failed to parse E2B response: {e}\nBody: {body_text}"))
        })?;

        let sandbox_id = parsed["sandboxID"]
            .as_str()
            .or_else(|| parsed["sandbox_id"].as_str())
            .unwrap_or("")
            .to_string();

        if sandbox_id.is_empty() {
            return Err(SandboxError::Other(format!(
                "E2B returned no sandbox_id. Response: {body_text}"
            )));
        }

        Ok(sandbox_id)
    }

    async fn pause_sandbox(&self, sandbox_id: &str) -> SandboxResult<()> {
        let resp = self
            .http
            .post(self.sandbox_url(sandbox_id, "/pause"))
            .bearer_auth(self.effective_key())
            .send()
            .await?;

        match resp.status() {
            // 409: already paused
            s if s.is_success() || s == StatusCode::CONFLICT => Ok(()),
            StatusCode::NOT_FOUND => Err(SandboxError::NotFound(sandbox_id.to_string())),
            s => Err(Self::api_error(s, Self::body_text(resp).await)),
        }
    }

    async fn resume_sandbox(&self, sandbox_id: &str, timeout_ms: u64) -> SandboxResult<()> {
        let resp = self
            .http
            .post(self.sandbox_url(sandbox_id, "/resume"))
            .bearer_auth(self.effective_key())
            .json(&serde_json::json!({ "timeout": timeout_ms / 1000 }))
            .send()
            .await?;

        match resp.status() {
            // 409: already running
            s if s.is_success() || s == StatusCode::CONFLICT => Ok(()),
            StatusCode::NOT_FOUND => Err(SandboxError::NotFound(sandbox_id.to_string())),
            s => Err(Self::api_error(s, Self::body_text(resp).await)),
        }
    }

    async fn kill_sandbox(&self, sandbox_id: &str) -> SandboxResult<()> {
        let resp = self
            .http
            .delete(self.sandbox_url(sandbox_id, ""))
            .bearer_auth(self.effective_key())
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::api_error(status, Self::body_text(resp).await))
        }
    }

    async fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
        workdir: &str,
        timeout_ms: u64,
    ) -> SandboxResult<CommandOutput> {
        let body = serde_json::json!({
            "cmd": command,
            "workdir": workdir,
            "timeout": timeout_ms / 1000,
        });

        let resp = self
            .http
            .post(self.sandbox_url(sandbox_id, "/commands"))
            .bearer_auth(self.effective_key())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let body_text = Self::body_text(resp).await;
        if status == StatusCode::NOT_FOUND {
            return Err(SandboxError::NotFound(sandbox_id.to_string()));
        }
        if !status.is_success() {
            return Err(Self::api_error(status, body_text));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body_text).map_err(|e| {
            SandboxError::Other(format!("Failed to parse E2B response: {e}\nBody: {body_text}"))
        })?;

        Ok(CommandOutput {
            stdout: parsed["stdout"].as_str().unwrap_or("").to_string(),
            stderr: parsed["stderr"].as_str().unwrap_or("").to_string(),
            exit_code: parsed["exitCode"]
                .as_i64()
                .or_else(|| parsed["exit_code"].as_i64())
                .unwrap_or(0),
        })
    }

    async fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> SandboxResult<()> {
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();

        let part = reqwest::multipart::Part::bytes(content.as_bytes().to_vec())
            .file_name(file_name)
            .mime_str("text/plain")?;
        let form = reqwest::multipart::Form::new()
            .text("path", path.to_string())
            .part("file", part);

        let resp = self
            .http
            .post(self.sandbox_url(sandbox_id, "/files"))
            .bearer_auth(self.effective_key())
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::api_error(status, Self::body_text(resp).await));
        }

        Ok(())
    }

    async fn read_file(&self, sandbox_id: &str, path: &str) -> SandboxResult<String> {
        let resp = self
            .http
            .get(self.file_url(sandbox_id, path))
            .bearer_auth(self.effective_key())
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SandboxError::FileNotFound(path.to_string()));
        }

        let body_text = Self::body_text(resp).await;
        if !status.is_success() {
            return Err(Self::api_error(status, body_text));
        }

        Ok(body_text)
    }

    async fn remove_file(&self, sandbox_id: &str, path: &str) -> SandboxResult<()> {
        let resp = self
            .http
            .delete(self.file_url(sandbox_id, path))
            .bearer_auth(self.effective_key())
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(SandboxError::FileNotFound(path.to_string())),
            s => Err(Self::api_error(s, Self::body_text(resp).await)),
        }
    }

    async fn list_files(
        &self,
        sandbox_id: &str,
        root: &str,
        prune: &[String],
    ) -> SandboxResult<Vec<String>> {
        let root = root.trim_end_matches('/').to_string();
        let mut files = Vec::new();
        let mut dirs_to_visit = vec![root.clone()];

        while let Some(dir) = dirs_to_visit.pop() {
            let entries = match self.list_dir(sandbox_id, &dir).await {
                Ok(entries) => entries,
                // A missing root means the sandbox is gone.
                Err(SandboxError::FileNotFound(_)) if dir == root => {
                    return Err(SandboxError::NotFound(sandbox_id.to_string()));
                }
                // A subdirectory vanishing mid-walk is not fatal.
                Err(SandboxError::FileNotFound(_)) => {
                    tracing::warn!("Skipping vanished directory {dir} in sandbox {sandbox_id}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            for (name, entry_type) in entries {
                let full_path = format!("{dir}/{name}");
                if entry_type == "dir" || entry_type == "directory" {
                    if !prune.iter().any(|p| p == &name) {
                        dirs_to_visit.push(full_path);
                    }
                } else {
                    files.push(full_path);
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> E2bSandboxClient {
        E2bSandboxClient::new("test-key").with_base_url(&server.uri())
    }

    #[tokio::test]
    async fn create_sandbox_parses_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/sandboxes"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"sandboxID": "sb-1"})),
            )
            .mount(&server)
            .await;

        let id = client_for(&server)
            .await
            .create_sandbox("nextjs-app", 600_000)
            .await
            .unwrap();
        assert_eq!(id, "sb-1");
    }

    #[tokio::test]
    async fn create_sandbox_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/sandboxes"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .create_sandbox("nextjs-app", 600_000)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn pause_treats_conflict_as_already_paused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/sandboxes/sb-1/pause"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        assert!(client_for(&server)
            .await
            .pause_sandbox("sb-1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn resume_missing_sandbox_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/sandboxes/gone/resume"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .resume_sandbox("gone", 600_000)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotFound(id) if id == "gone"));
    }

    #[tokio::test]
    async fn read_missing_file_is_file_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-1/files"))
            .and(query_param("path", "/home/user/project/missing.ts"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .read_file("sb-1", "/home/user/project/missing.ts")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn run_command_reads_exit_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/sandboxes/sb-1/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "stdout": "hi\n",
                "stderr": "",
                "exitCode": 3
            })))
            .mount(&server)
            .await;

        let out = client_for(&server)
            .await
            .run_command("sb-1", "echo hi", "/home/user/project", 30_000)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, "hi\n");
    }

    #[tokio::test]
    async fn list_files_walks_and_prunes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-1/files"))
            .and(query_param("path", "/p"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "app", "type": "dir"},
                {"name": "node_modules", "type": "dir"},
                {"name": "package.json", "type": "file"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-1/files"))
            .and(query_param("path", "/p/app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "page.tsx", "type": "file"}
            ])))
            .mount(&server)
            .await;

        let files = client_for(&server)
            .await
            .list_files("sb-1", "/p", &["node_modules".to_string()])
            .await
            .unwrap();
        assert_eq!(files, vec!["/p/app/page.tsx", "/p/package.json"]);
    }

    #[tokio::test]
    async fn list_files_missing_root_is_sandbox_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/gone/files"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .list_files("gone", "/p", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotFound(id) if id == "gone"));
    }

    #[tokio::test]
    async fn list_files_rejects_malformed_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-1/files"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .list_files("sb-1", "/p", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Other(_)));
    }

    #[tokio::test]
    async fn list_files_skips_vanished_subdirectory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-1/files"))
            .and(query_param("path", "/p"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "tmp", "type": "dir"},
                {"name": "a.ts", "type": "file"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-1/files"))
            .and(query_param("path", "/p/tmp"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let files = client_for(&server)
            .await
            .list_files("sb-1", "/p", &[])
            .await
            .unwrap();
        assert_eq!(files, vec!["/p/a.ts"]);
    }
}
