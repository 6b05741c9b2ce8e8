use crate::CoreError;
use onboard_remote::{ManifestSource, RemoteError};
use onboard_schema::{parse_manifest_file, parse_manifest_str, Manifest, RepoRef, MANIFEST_CANDIDATES};
use onboard_store::ManifestCache;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Consult the cache before fetching. Successful fetches are written back
    /// either way.
    pub use_cache: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self { use_cache: true }
    }
}

/// Where a resolved manifest came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ManifestOrigin {
    Cache,
    Remote { path: String },
    /// Every fetch failed; an expired cache entry was used instead.
    StaleCache { age_secs: u64 },
    Local { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub manifest: Manifest,
    pub origin: ManifestOrigin,
}

/// Turns a repository reference into a parsed manifest: fresh cache entry
/// first, then each candidate filename in order, then a stale cache entry.
pub struct ManifestResolver {
    source: Arc<dyn ManifestSource>,
    cache: ManifestCache,
}

impl ManifestResolver {
    pub fn new(source: Arc<dyn ManifestSource>, cache: ManifestCache) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &ManifestCache {
        &self.cache
    }

    pub fn resolve(
        &self,
        repo: &RepoRef,
        options: &ResolveOptions,
    ) -> Result<ResolvedManifest, CoreError> {
        if options.use_cache {
            if let Some(content) = self.cache.read(&repo.owner, &repo.repo) {
                match parse_manifest_str(&content) {
                    Ok(manifest) => {
                        debug!("manifest for {} served from cache", repo.slug());
                        return Ok(ResolvedManifest {
                            manifest,
                            origin: ManifestOrigin::Cache,
                        });
                    }
                    Err(e) => warn!("ignoring unparseable cache entry for {}: {e}", repo.slug()),
                }
            }
        }

        // Checked once for the whole resolution, not per candidate.
        self.source.ensure_available()?;

        let mut last_error: Option<RemoteError> = None;
        for candidate in MANIFEST_CANDIDATES {
            match self.source.fetch(repo, candidate) {
                Ok(Some(content)) => {
                    let manifest = parse_manifest_str(&content)?;
                    if let Err(e) = self.cache.write(&repo.owner, &repo.repo, &content) {
                        warn!("failed to cache manifest for {}: {e}", repo.slug());
                    }
                    info!("resolved {candidate} from {}", repo.slug());
                    return Ok(ResolvedManifest {
                        manifest,
                        origin: ManifestOrigin::Remote {
                            path: (*candidate).to_owned(),
                        },
                    });
                }
                Ok(None) => debug!("{candidate} not present in {}", repo.slug()),
                Err(e) => {
                    debug!("fetching {candidate} from {} failed: {e}", repo.slug());
                    last_error = Some(e);
                }
            }
        }

        if options.use_cache {
            if let Some(stale) = self.cache.read_any_age(&repo.owner, &repo.repo) {
                if let Ok(manifest) = parse_manifest_str(&stale.content) {
                    warn!(
                        "using expired cached manifest for {} ({}s old)",
                        repo.slug(),
                        stale.age.as_secs()
                    );
                    return Ok(ResolvedManifest {
                        manifest,
                        origin: ManifestOrigin::StaleCache {
                            age_secs: stale.age.as_secs(),
                        },
                    });
                }
            }
        }

        let reason = match last_error {
            Some(e) => e.to_string(),
            None => format!("none of {} exist", MANIFEST_CANDIDATES.join(", ")),
        };
        Err(CoreError::RemoteFetch {
            slug: repo.slug(),
            reason,
        })
    }

    /// Load a manifest from a local file, bypassing cache and source.
    pub fn resolve_local(path: &Path) -> Result<ResolvedManifest, CoreError> {
        let manifest = parse_manifest_file(path)?;
        Ok(ResolvedManifest {
            manifest,
            origin: ManifestOrigin::Local {
                path: path.to_path_buf(),
            },
        })
    }
}
