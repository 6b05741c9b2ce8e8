use crate::{ManifestSource, RemoteError};
use onboard_schema::RepoRef;
use std::process::Command;
use tracing::debug;

const INSTALL_HINT: &str = "install the GitHub CLI (https://cli.github.com) and run `gh auth login`";

/// Fetches files through the GitHub contents API via `gh api`, so the user's
/// existing `gh` authentication covers private repositories.
pub struct GhCliSource {
    program: String,
}

impl Default for GhCliSource {
    fn default() -> Self {
        Self {
            program: "gh".to_owned(),
        }
    }
}

impl GhCliSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different executable in place of `gh`.
    #[must_use]
    pub fn with_program(mut self, program: &str) -> Self {
        program.clone_into(&mut self.program);
        self
    }

    /// Arguments passed to `gh` to fetch `path` from `repo`.
    pub fn api_args(repo: &RepoRef, path: &str) -> Vec<String> {
        let mut args = vec!["api".to_owned()];
        if repo.host != "github.com" {
            args.push("--hostname".to_owned());
            args.push(repo.host.clone());
        }
        args.push(format!("repos/{}/{}/contents/{path}", repo.owner, repo.repo));
        args.push("-H".to_owned());
        args.push("Accept: application/vnd.github.raw".to_owned());
        args
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("HTTP 404") || stderr.contains("Not Found")
}

impl ManifestSource for GhCliSource {
    fn name(&self) -> &str {
        "gh"
    }

    fn ensure_available(&self) -> Result<(), RemoteError> {
        let available = Command::new(&self.program)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if available {
            Ok(())
        } else {
            Err(RemoteError::ToolUnavailable {
                tool: self.program.clone(),
                hint: INSTALL_HINT.to_owned(),
            })
        }
    }

    fn fetch(&self, repo: &RepoRef, path: &str) -> Result<Option<String>, RemoteError> {
        let args = Self::api_args(repo, path);
        debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program).args(&args).output()?;

        if output.status.success() {
            let content = String::from_utf8(output.stdout).map_err(|e| RemoteError::Fetch {
                slug: repo.slug(),
                path: path.to_owned(),
                reason: format!("response is not UTF-8: {e}"),
            })?;
            return Ok(Some(content));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            debug!("{path} not found in {}", repo.slug());
            return Ok(None);
        }
        Err(RemoteError::Fetch {
            slug: repo.slug(),
            path: path.to_owned(),
            reason: stderr.trim().lines().last().unwrap_or("unknown error").to_owned(),
        })
    }
}
