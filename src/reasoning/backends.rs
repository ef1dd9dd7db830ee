//! Language-model transports: an external CLI or an HTTP chat endpoint.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::LanguageModel;
use crate::config::{ReasoningBackend, ReasoningSettings};
use crate::errors::ReasoningError;

/// Characters of stderr quoted in failure messages.
const STDERR_EXCERPT_CHARS: usize = 400;

/// Runs a CLI (by default `claude --print --output-format json`) with the
/// prompt on stdin and returns what it prints.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandModel {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl LanguageModel for CommandModel {
    async fn complete(&self, prompt: &str) -> Result<String, ReasoningError> {
        tracing::debug!(program = %self.program, prompt_chars = prompt.len(), "invoking reasoning command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReasoningError::Unavailable(format!("failed to run {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ReasoningError::Transient(format!("failed to write prompt: {e}")))?;
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                ReasoningError::Transient(format!("failed to wait for {}: {e}", self.program))
            })?,
            Err(_) => {
                return Err(ReasoningError::Transient(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReasoningError::Transient(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.status.code(),
                stderr.trim().chars().take(STDERR_EXCERPT_CHARS).collect::<String>()
            )));
        }

        unwrap_envelope(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Strip the `{"result": ...}` envelope CLI JSON output mode wraps replies in.
fn unwrap_envelope(stdout: &str) -> Result<String, ReasoningError> {
    let trimmed = stdout.trim();
    let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(trimmed) else {
        return Ok(trimmed.to_string());
    };
    match envelope.get("result") {
        Some(Value::String(result)) => {
            if envelope.get("is_error").and_then(Value::as_bool) == Some(true) {
                return Err(ReasoningError::Unavailable(result.clone()));
            }
            Ok(result.clone())
        }
        _ => Ok(trimmed.to_string()),
    }
}

/// OpenAI-compatible `POST {base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct HttpModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    /// Null when the provider refused or filtered the reply.
    #[serde(default)]
    content: Option<String>,
}

impl HttpModel {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ReasoningError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ReasoningError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LanguageModel for HttpModel {
    async fn complete(&self, prompt: &str) -> Result<String, ReasoningError> {
        let url = self.endpoint();
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ReasoningError::Transient(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Transient(format!("{status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::MalformedOutput(format!("unreadable chat response: {e}")))?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ReasoningError::MalformedOutput("chat response had no content".into()))
    }
}

/// Build the configured transport.
pub fn model_from_settings(
    settings: &ReasoningSettings,
) -> Result<Box<dyn LanguageModel>, ReasoningError> {
    let request_timeout = Duration::from_secs(settings.timeout_secs);
    match settings.backend {
        ReasoningBackend::Command => {
            let (program, args) = settings.command.split_first().ok_or_else(|| {
                ReasoningError::Unavailable("reasoning.command is empty".into())
            })?;
            Ok(Box::new(CommandModel::new(
                program.clone(),
                args.to_vec(),
                request_timeout,
            )))
        }
        ReasoningBackend::Http => {
            let api_key = std::env::var(&settings.api_key_env).ok();
            if api_key.is_none() {
                tracing::warn!(
                    env = %settings.api_key_env,
                    "no API key in environment; sending unauthenticated requests"
                );
            }
            Ok(Box::new(HttpModel::new(
                settings.base_url.clone(),
                settings.model.clone(),
                api_key,
                request_timeout,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn shell_model(script: &str, secs: u64) -> CommandModel {
        CommandModel::new("sh", vec!["-c".into(), script.into()], Duration::from_secs(secs))
    }

    /// Serve exactly one HTTP response and hand back the captured request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&received);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if received.len() >= header_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&received).to_string()
        });
        (format!("http://{addr}/v1"), handle)
    }

    #[test]
    fn test_unwrap_envelope() {
        assert_eq!(unwrap_envelope(r#"{"result": "{\"a\": 1}"}"#).unwrap(), r#"{"a": 1}"#);
        assert_eq!(unwrap_envelope("plain text\n").unwrap(), "plain text");
        assert_eq!(unwrap_envelope(r#"{"a": 1}"#).unwrap(), r#"{"a": 1}"#);
        assert!(matches!(
            unwrap_envelope(r#"{"result": "quota exceeded", "is_error": true}"#),
            Err(ReasoningError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_command_model_reads_prompt_from_stdin() {
        let model = shell_model("cat", 10);
        assert_eq!(model.complete("echo me").await.unwrap(), "echo me");
    }

    #[tokio::test]
    async fn test_command_model_missing_program_is_unavailable() {
        let model = CommandModel::new("/nonexistent/reasoner", Vec::new(), Duration::from_secs(1));
        let err = model.complete("x").await.unwrap_err();
        assert!(matches!(err, ReasoningError::Unavailable(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_command_model_failure_is_transient() {
        let model = shell_model("cat > /dev/null; echo overloaded >&2; exit 1", 10);
        let err = model.complete("x").await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_command_model_timeout_is_transient() {
        let model = CommandModel::new(
            "sh",
            vec!["-c".into(), "sleep 10".into()],
            Duration::from_millis(200),
        );
        let err = model.complete("x").await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_http_model_returns_first_choice() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"ok\":true}"}}]}"#,
        )
        .await;
        let model = HttpModel::new(base_url, "m", Some("secret".into()), Duration::from_secs(10)).unwrap();
        assert_eq!(model.complete("hello").await.unwrap(), r#"{"ok":true}"#);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains("\"hello\""));
    }

    #[tokio::test]
    async fn test_http_model_rate_limit_is_transient() {
        let (base_url, _server) = serve_once("429 Too Many Requests", r#"{"error":"slow down"}"#).await;
        let model = HttpModel::new(base_url, "m", None, Duration::from_secs(10)).unwrap();
        assert!(model.complete("x").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_http_model_client_error_is_rejected() {
        let (base_url, _server) = serve_once("401 Unauthorized", r#"{"error":"bad key"}"#).await;
        let model = HttpModel::new(base_url, "m", None, Duration::from_secs(10)).unwrap();
        match model.complete("x").await.unwrap_err() {
            ReasoningError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad key"));
            }
            other => panic!("Expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_model_empty_choices_is_malformed() {
        let (base_url, _server) = serve_once("200 OK", r#"{"choices":[]}"#).await;
        let model = HttpModel::new(base_url, "m", None, Duration::from_secs(10)).unwrap();
        assert!(matches!(
            model.complete("x").await.unwrap_err(),
            ReasoningError::MalformedOutput(_)
        ));
    }

    #[test]
    fn test_model_from_settings_rejects_empty_command() {
        let settings = ReasoningSettings {
            command: Vec::new(),
            ..ReasoningSettings::default()
        };
        assert!(model_from_settings(&settings).is_err());
        assert!(model_from_settings(&ReasoningSettings::default()).is_ok());
    }
}
