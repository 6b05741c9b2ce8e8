use crate::detect::EnvironmentProbe;
use crate::manager::PackageManager;
use crate::RuntimeError;
use onboard_schema::{Category, EnvironmentProfile, PackageName};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// In-memory package manager. Tracks what is installed and records every
/// install/uninstall call so tests can assert on side effects.
pub struct MockPackageManager {
    name: String,
    category: Category,
    installed: Mutex<HashSet<String>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl MockPackageManager {
    pub fn new(name: &str, category: Category) -> Self {
        Self {
            name: name.to_owned(),
            category,
            installed: Mutex::new(HashSet::new()),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Packages that are present before any install.
    #[must_use]
    pub fn with_installed(self, packages: &[&str]) -> Self {
        if let Ok(mut set) = self.installed.lock() {
            set.extend(packages.iter().map(|p| (*p).to_owned()));
        }
        self
    }

    /// Packages whose install and uninstall always fail.
    #[must_use]
    pub fn with_failing(mut self, packages: &[&str]) -> Self {
        self.failing
            .extend(packages.iter().map(|p| (*p).to_owned()));
        self
    }

    /// `install <pkg>` / `uninstall <pkg>` in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn has(&self, package: &str) -> bool {
        self.installed
            .lock()
            .map(|set| set.contains(package))
            .unwrap_or(false)
    }

    fn record(&self, call: String) -> Result<(), RuntimeError> {
        self.calls
            .lock()
            .map_err(|e| RuntimeError::Detection(format!("mutex poisoned: {e}")))?
            .push(call);
        Ok(())
    }

    fn fail(&self, package: &PackageName, reason: &str) -> RuntimeError {
        RuntimeError::CommandFailed {
            manager: self.name.clone(),
            package: package.to_string(),
            reason: reason.to_owned(),
        }
    }
}

impl PackageManager for MockPackageManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Category {
        self.category
    }

    fn is_installed(&self, package: &PackageName) -> Result<bool, RuntimeError> {
        Ok(self.has(package.as_str()))
    }

    fn install(&self, package: &PackageName) -> Result<(), RuntimeError> {
        self.record(format!("install {package}"))?;
        if self.failing.contains(package.as_str()) {
            return Err(self.fail(package, "mock install failure"));
        }
        self.installed
            .lock()
            .map_err(|e| RuntimeError::Detection(format!("mutex poisoned: {e}")))?
            .insert(package.to_string());
        Ok(())
    }

    fn uninstall(&self, package: &PackageName) -> Result<(), RuntimeError> {
        self.record(format!("uninstall {package}"))?;
        if self.failing.contains(package.as_str()) {
            return Err(self.fail(package, "mock uninstall failure"));
        }
        self.installed
            .lock()
            .map_err(|e| RuntimeError::Detection(format!("mutex poisoned: {e}")))?
            .remove(package.as_str());
        Ok(())
    }
}

/// Probe returning a fixed profile and a fixed set of managers.
pub struct MockProbe {
    profile: EnvironmentProfile,
    managers: Vec<Arc<dyn PackageManager>>,
}

impl MockProbe {
    /// The profile lists exactly the names of `managers`, in order.
    pub fn new(managers: Vec<Arc<dyn PackageManager>>) -> Self {
        let profile = EnvironmentProfile {
            os: "linux".to_owned(),
            distro: Some("mock".to_owned()),
            shell: Some("/bin/sh".to_owned()),
            package_managers: managers.iter().map(|m| m.name().to_owned()).collect(),
            tool_versions: [("git".to_owned(), "2.43.0".to_owned())].into(),
        };
        Self { profile, managers }
    }

    pub fn profile(&self) -> &EnvironmentProfile {
        &self.profile
    }
}

impl EnvironmentProbe for MockProbe {
    fn detect(&self) -> Result<EnvironmentProfile, RuntimeError> {
        Ok(self.profile.clone())
    }

    fn package_managers(&self, profile: &EnvironmentProfile) -> Vec<Arc<dyn PackageManager>> {
        self.managers
            .iter()
            .filter(|m| profile.has_manager(m.name()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_manager_install_and_uninstall() {
        let m = MockPackageManager::new("mock-apt", Category::System).with_installed(&["git"]);
        let jq = PackageName::new("jq");
        assert!(m.is_installed(&PackageName::new("git")).unwrap());
        assert!(!m.is_installed(&jq).unwrap());

        m.install(&jq).unwrap();
        assert!(m.has("jq"));
        m.uninstall(&jq).unwrap();
        assert!(!m.has("jq"));
        assert_eq!(m.calls(), vec!["install jq", "uninstall jq"]);
    }

    #[test]
    fn mock_manager_failures_are_typed() {
        let m = MockPackageManager::new("mock-npm", Category::Npm).with_failing(&["left-pad"]);
        let err = m.install(&PackageName::new("left-pad")).unwrap_err();
        assert!(matches!(err, RuntimeError::CommandFailed { .. }));
        assert!(!m.has("left-pad"));
    }

    #[test]
    fn mock_probe_lists_its_managers() {
        let apt: Arc<dyn PackageManager> =
            Arc::new(MockPackageManager::new("apt", Category::System));
        let probe = MockProbe::new(vec![apt]);
        let profile = probe.detect().unwrap();
        assert_eq!(profile.package_managers, vec!["apt"]);
        assert_eq!(probe.package_managers(&profile).len(), 1);

        let empty = EnvironmentProfile::default();
        assert!(probe.package_managers(&empty).is_empty());
    }
}
