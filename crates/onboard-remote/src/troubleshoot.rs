use crate::config::TroubleshooterConfig;
use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    pub failed_step: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TroubleshootRequest {
    pub error: ErrorInfo,
    pub context: ErrorContext,
}

/// A suggested fix for a failed step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub cause: String,
    pub fix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Resolution {
    /// The answer when no service could be consulted.
    pub fn manual() -> Self {
        Self {
            cause: "unknown".to_owned(),
            fix: "manual resolution required".to_owned(),
            command: None,
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::manual()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TroubleshootOutcome {
    Resolved(Resolution),
    /// The service is not configured, unreachable, or answered nonsense.
    Unavailable { reason: String },
}

impl TroubleshootOutcome {
    pub fn into_resolution(self) -> Resolution {
        match self {
            TroubleshootOutcome::Resolved(r) => r,
            TroubleshootOutcome::Unavailable { .. } => Resolution::manual(),
        }
    }
}

/// Diagnoses a failed step. Implementations never fail: problems talking to
/// the service are reported as [`TroubleshootOutcome::Unavailable`].
pub trait Troubleshooter: Send + Sync {
    fn diagnose(&self, request: &TroubleshootRequest) -> TroubleshootOutcome;
}

/// Used when no troubleshooting service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTroubleshooter;

impl Troubleshooter for NoTroubleshooter {
    fn diagnose(&self, _request: &TroubleshootRequest) -> TroubleshootOutcome {
        TroubleshootOutcome::Unavailable {
            reason: "no troubleshooting service configured".to_owned(),
        }
    }
}

/// POSTs the request as JSON to the configured URL and expects a
/// [`Resolution`] back.
pub struct HttpTroubleshooter {
    config: TroubleshooterConfig,
    agent: ureq::Agent,
}

impl HttpTroubleshooter {
    pub fn new(config: TroubleshooterConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();
        Self { config, agent }
    }

    fn post(&self, request: &TroubleshootRequest) -> Result<Resolution, RemoteError> {
        let body =
            serde_json::to_vec(request).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        let mut req = self
            .agent
            .post(&self.config.url)
            .header("Content-Type", "application/json");
        if let Some(ref token) = self.config.token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = req
            .send(&body[..])
            .map_err(|e| RemoteError::Http(e.to_string()))?;

        let mut reader = resp.into_body().into_reader();
        let mut payload = Vec::new();
        reader
            .read_to_end(&mut payload)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        serde_json::from_slice(&payload).map_err(|e| RemoteError::Serialization(e.to_string()))
    }
}

impl Troubleshooter for HttpTroubleshooter {
    fn diagnose(&self, request: &TroubleshootRequest) -> TroubleshootOutcome {
        debug!("POST {} for failed step '{}'", self.config.url, request.context.failed_step);
        match self.post(request) {
            Ok(resolution) => TroubleshootOutcome::Resolved(resolution),
            Err(e) => {
                warn!("troubleshooting service unavailable: {e}");
                TroubleshootOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    fn sample_request() -> TroubleshootRequest {
        TroubleshootRequest {
            error: ErrorInfo {
                kind: "install".to_owned(),
                message: "apt-get exited with 100".to_owned(),
            },
            context: ErrorContext {
                os: "linux (debian)".to_owned(),
                tool_version: Some("2.43.0".to_owned()),
                failed_step: "install".to_owned(),
            },
        }
    }

    /// Serves exactly one request with `body` and status `status`.
    fn one_shot_server(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        std::thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                    break;
                }
                if let Some(v) = line.to_lowercase().strip_prefix("content-length: ") {
                    content_length = v.trim().parse().unwrap_or(0);
                }
            }
            let mut request_body = vec![0u8; content_length];
            let _ = reader.read_exact(&mut request_body);
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        });
        addr
    }

    #[test]
    fn request_serializes_with_contract_field_names() {
        let json = serde_json::to_value(sample_request()).unwrap();
        assert_eq!(json["error"]["type"], "install");
        assert_eq!(json["context"]["toolVersion"], "2.43.0");
        assert_eq!(json["context"]["failedStep"], "install");
    }

    #[test]
    fn no_troubleshooter_falls_back_to_manual() {
        let outcome = NoTroubleshooter.diagnose(&sample_request());
        assert!(matches!(outcome, TroubleshootOutcome::Unavailable { .. }));
        assert_eq!(outcome.into_resolution(), Resolution::manual());
    }

    #[test]
    fn http_troubleshooter_returns_resolution() {
        let url = one_shot_server(
            "200 OK",
            r#"{"cause":"stale apt index","fix":"refresh the package index","command":"sudo apt-get update"}"#,
        );
        let ts = HttpTroubleshooter::new(TroubleshooterConfig::new(&url));
        let outcome = ts.diagnose(&sample_request());
        let TroubleshootOutcome::Resolved(resolution) = outcome else {
            panic!("expected a resolution, got {outcome:?}");
        };
        assert_eq!(resolution.cause, "stale apt index");
        assert_eq!(resolution.command.as_deref(), Some("sudo apt-get update"));
    }

    #[test]
    fn http_troubleshooter_error_status_is_unavailable() {
        let url = one_shot_server("500 Internal Server Error", "{}");
        let ts = HttpTroubleshooter::new(TroubleshooterConfig::new(&url));
        assert!(matches!(
            ts.diagnose(&sample_request()),
            TroubleshootOutcome::Unavailable { .. }
        ));
    }

    #[test]
    fn http_troubleshooter_garbage_body_is_unavailable() {
        let url = one_shot_server("200 OK", "not json");
        let ts = HttpTroubleshooter::new(TroubleshooterConfig::new(&url));
        assert!(matches!(
            ts.diagnose(&sample_request()),
            TroubleshootOutcome::Unavailable { .. }
        ));
    }

    #[test]
    fn unreachable_service_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let mut config = TroubleshooterConfig::new(&url);
        config.timeout_secs = 2;
        let outcome = HttpTroubleshooter::new(config).diagnose(&sample_request());
        assert_eq!(outcome.into_resolution(), Resolution::manual());
    }
}
