pub mod cache;
pub mod completions;
pub mod doctor;
pub mod init;
pub mod man_pages;
pub mod rollback;
pub mod status;
pub mod verify;

use indicatif::{ProgressBar, ProgressStyle};
use onboard_core::{CancelToken, CoreError, Engine, Settings};
use onboard_remote::{GhCliSource, HttpTroubleshooter, NoTroubleshooter, Troubleshooter};
use onboard_runtime::HostProbe;
use onboard_store::{default_cache_dir, ManifestCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Global options shared by every command.
pub struct Context {
    pub project: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub json: bool,
    pub verbose: bool,
    pub cancel: CancelToken,
}

impl Context {
    pub fn settings(&self) -> Result<Settings, String> {
        Settings::load_default().map_err(|e| core_error(&e))
    }

    pub fn cache(&self, settings: &Settings) -> Result<ManifestCache, String> {
        let dir = match self.cache_dir {
            Some(ref dir) => dir.clone(),
            None => default_cache_dir().ok_or_else(|| {
                "cannot determine the cache directory; set HOME or pass --cache-dir".to_owned()
            })?,
        };
        Ok(ManifestCache::new(dir).with_ttl(settings.cache_ttl()))
    }

    pub fn engine(&self) -> Result<Engine, String> {
        let settings = self.settings()?;
        let cache = self.cache(&settings)?;
        let troubleshooter: Arc<dyn Troubleshooter> = match settings.troubleshooter.clone() {
            Some(config) => Arc::new(HttpTroubleshooter::new(config)),
            None => Arc::new(NoTroubleshooter),
        };
        Ok(Engine::new(
            self.project.clone(),
            Arc::new(GhCliSource::new()),
            cache,
            Arc::new(HostProbe::new()),
        )
        .with_troubleshooter(troubleshooter)
        .with_settings(settings)
        .with_cancel_token(self.cancel.clone()))
    }

    /// A spinner in human mode; nothing when printing JSON.
    pub fn spinner(&self, msg: &str) -> Option<ProgressBar> {
        (!self.json).then(|| spinner(msg))
    }
}

/// Error text with the suggested remedy, if any, on a `hint:` line.
pub fn core_error(e: &CoreError) -> String {
    match e.remedy() {
        Some(remedy) => format!("{e}\nhint: {remedy}"),
        None => e.to_string(),
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, &format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, &format!("✗ {msg}"));
}

fn finish(pb: &ProgressBar, line: &str) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(line.to_owned());
}

/// Colour a step, check or rollback status word for terminal output.
pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "success" | "passed" | "created" | "succeeded" | "reversed" | "intact" => {
            Style::new().green().apply_to(status).to_string()
        }
        "partial" | "skipped" | "skipped_drift" | "modified" | "not_run" => {
            Style::new().yellow().apply_to(status).to_string()
        }
        "failed" | "errored" | "missing" => Style::new().red().bold().apply_to(status).to_string(),
        "rolled_back" | "planned" | "would_reverse" => {
            Style::new().dim().apply_to(status).to_string()
        }
        other => other.to_owned(),
    }
}

/// The serialized name of a unit enum variant, e.g. `not_run`.
pub fn status_word(value: &impl serde::Serialize) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(word)) => word,
        _ => String::new(),
    }
}

/// Icon for a pass/fail line.
pub fn mark(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗"
    }
}
