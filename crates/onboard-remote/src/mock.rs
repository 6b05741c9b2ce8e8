use crate::troubleshoot::{Resolution, TroubleshootOutcome, TroubleshootRequest, Troubleshooter};
use crate::{ManifestSource, RemoteError};
use onboard_schema::RepoRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory manifest source keyed by `owner/repo` and file path.
pub struct MockSource {
    files: HashMap<(String, String), String>,
    tool_available: bool,
    offline: bool,
    tool_checks: AtomicUsize,
    fetches: Mutex<Vec<String>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self {
            files: HashMap::new(),
            tool_available: true,
            offline: false,
            tool_checks: AtomicUsize::new(0),
            fetches: Mutex::new(Vec::new()),
        }
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(mut self, slug: &str, path: &str, content: &str) -> Self {
        self.files
            .insert((slug.to_owned(), path.to_owned()), content.to_owned());
        self
    }

    /// Simulate the helper tool being absent.
    #[must_use]
    pub fn without_tool(mut self) -> Self {
        self.tool_available = false;
        self
    }

    /// Every fetch fails with a transport error.
    #[must_use]
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn tool_checks(&self) -> usize {
        self.tool_checks.load(Ordering::SeqCst)
    }

    /// Paths requested so far, in order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

impl ManifestSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn ensure_available(&self) -> Result<(), RemoteError> {
        self.tool_checks.fetch_add(1, Ordering::SeqCst);
        if self.tool_available {
            Ok(())
        } else {
            Err(RemoteError::ToolUnavailable {
                tool: "mock".to_owned(),
                hint: "mock tool disabled".to_owned(),
            })
        }
    }

    fn fetch(&self, repo: &RepoRef, path: &str) -> Result<Option<String>, RemoteError> {
        if let Ok(mut f) = self.fetches.lock() {
            f.push(path.to_owned());
        }
        if self.offline {
            return Err(RemoteError::Fetch {
                slug: repo.slug(),
                path: path.to_owned(),
                reason: "network unreachable".to_owned(),
            });
        }
        Ok(self.files.get(&(repo.slug(), path.to_owned())).cloned())
    }
}

/// Troubleshooter returning a canned outcome and counting requests.
pub struct MockTroubleshooter {
    resolution: Option<Resolution>,
    requests: Mutex<Vec<TroubleshootRequest>>,
}

impl MockTroubleshooter {
    pub fn resolving(resolution: Resolution) -> Self {
        Self {
            resolution: Some(resolution),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            resolution: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<TroubleshootRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Troubleshooter for MockTroubleshooter {
    fn diagnose(&self, request: &TroubleshootRequest) -> TroubleshootOutcome {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        match self.resolution {
            Some(ref r) => TroubleshootOutcome::Resolved(r.clone()),
            None => TroubleshootOutcome::Unavailable {
                reason: "mock service down".to_owned(),
            },
        }
    }
}
