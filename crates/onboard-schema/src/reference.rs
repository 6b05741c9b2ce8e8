use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const EXPECTED_SHAPES: &str =
    "https://<host>/<owner>/<repo>[.git] or <user>@<host>:<owner>/<repo>.git";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("invalid repository reference '{input}': expected {EXPECTED_SHAPES}")]
    Invalid { input: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Https,
    Ssh,
}

/// A repository reference resolved to `(host, owner, repo)`.
///
/// The `.git` suffix is never part of `repo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoRef {
    pub kind: RefKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let trimmed = input.trim();
        let invalid = || ReferenceError::Invalid {
            input: input.to_owned(),
        };

        if let Some(rest) = trimmed.strip_prefix("https://") {
            let rest = rest.trim_end_matches('/');
            let mut parts = rest.split('/');
            let (Some(host), Some(owner), Some(repo), None) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(invalid());
            };
            return Self::build(RefKind::Https, None, host, owner, repo).ok_or_else(invalid);
        }

        if trimmed.contains("://") {
            return Err(invalid());
        }

        let (user, rest) = trimmed.split_once('@').ok_or_else(invalid)?;
        let (host, path) = rest.split_once(':').ok_or_else(invalid)?;
        let (owner, repo) = path.split_once('/').ok_or_else(invalid)?;
        if !valid_segment(user) || repo.contains('/') {
            return Err(invalid());
        }
        Self::build(RefKind::Ssh, Some(user), host, owner, repo).ok_or_else(invalid)
    }

    fn build(
        kind: RefKind,
        user: Option<&str>,
        host: &str,
        owner: &str,
        repo: &str,
    ) -> Option<Self> {
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        if !valid_host(host) || !valid_segment(owner) || !valid_segment(repo) {
            return None;
        }
        Some(Self {
            kind,
            user: user.map(str::to_owned),
            host: host.to_owned(),
            owner: owner.to_owned(),
            repo: repo.to_owned(),
        })
    }

    /// `owner/repo`, the key used for caching and display.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn is_ssh(&self) -> bool {
        self.kind == RefKind::Ssh
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RefKind::Https => write!(f, "https://{}/{}/{}", self.host, self.owner, self.repo),
            RefKind::Ssh => write!(
                f,
                "{}@{}:{}/{}.git",
                self.user.as_deref().unwrap_or("git"),
                self.host,
                self.owner,
                self.repo
            ),
        }
    }
}

impl FromStr for RepoRef {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

fn valid_host(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_with_and_without_git_suffix() {
        for input in [
            "https://github.com/acme/widgets",
            "https://github.com/acme/widgets.git",
            "https://github.com/acme/widgets/",
        ] {
            let r = RepoRef::parse(input).unwrap();
            assert_eq!(r.kind, RefKind::Https);
            assert_eq!(r.host, "github.com");
            assert_eq!(r.owner, "acme");
            assert_eq!(r.repo, "widgets", "input: {input}");
        }
    }

    #[test]
    fn parses_ssh_shorthand() {
        let r = RepoRef::parse("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(r.kind, RefKind::Ssh);
        assert_eq!(r.user.as_deref(), Some("git"));
        assert_eq!(r.host, "github.com");
        assert_eq!(r.owner, "acme");
        assert_eq!(r.repo, "widgets");
        assert!(r.is_ssh());
    }

    #[test]
    fn keeps_dots_inside_repo_names() {
        let r = RepoRef::parse("git@gitlab.example.org:team/site.config.git").unwrap();
        assert_eq!(r.repo, "site.config");
        let r = RepoRef::parse("https://git.example.org:8443/team/my_repo-2").unwrap();
        assert_eq!(r.host, "git.example.org:8443");
        assert_eq!(r.repo, "my_repo-2");
    }

    #[test]
    fn rejects_malformed_references() {
        for input in [
            "",
            "acme/widgets",
            "http://github.com/acme/widgets",
            "ssh://git@github.com/acme/widgets.git",
            "https://github.com/acme",
            "https://github.com/acme/widgets/tree/main",
            "git@github.com:acme",
            "git@github.com:acme/widgets/extra.git",
            "@github.com:acme/widgets.git",
            "git@:acme/widgets.git",
            "https://github.com/../widgets",
            "https://github.com/acme/.git",
            "git@github.com:ac me/widgets.git",
        ] {
            let err = RepoRef::parse(input).unwrap_err();
            assert!(
                err.to_string().contains("expected https://"),
                "error for '{input}' must name the expected shapes"
            );
        }
    }

    #[test]
    fn slug_and_display() {
        let r: RepoRef = "git@github.com:acme/widgets.git".parse().unwrap();
        assert_eq!(r.slug(), "acme/widgets");
        assert_eq!(r.to_string(), "git@github.com:acme/widgets.git");
        let r: RepoRef = "https://github.com/acme/widgets.git".parse().unwrap();
        assert_eq!(r.to_string(), "https://github.com/acme/widgets");
    }
}
