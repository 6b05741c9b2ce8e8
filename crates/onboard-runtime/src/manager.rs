use crate::RuntimeError;
use onboard_schema::{Category, EnvironmentProfile, PackageName};
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// Installs and removes packages of one category on the host.
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> Category;

    /// Whether `package` is already present. A satisfied package is skipped,
    /// never reinstalled.
    fn is_installed(&self, package: &PackageName) -> Result<bool, RuntimeError>;

    fn install(&self, package: &PackageName) -> Result<(), RuntimeError>;

    fn uninstall(&self, package: &PackageName) -> Result<(), RuntimeError>;
}

/// Static description of a command-line package manager.
#[derive(Debug)]
pub struct ManagerSpec {
    pub name: &'static str,
    pub category: Category,
    /// Executable whose presence on `PATH` means the manager is available.
    pub probe: &'static str,
    pub query: &'static [&'static str],
    pub install: &'static [&'static str],
    pub uninstall: &'static [&'static str],
    /// Install and uninstall need root; `sudo` is prepended for other users.
    pub privileged: bool,
}

/// Every manager onboard can drive, in preference order within a category.
pub static KNOWN_MANAGERS: &[ManagerSpec] = &[
    ManagerSpec {
        name: "apt",
        category: Category::System,
        probe: "apt-get",
        query: &["dpkg", "-s"],
        install: &["apt-get", "install", "-y", "--no-install-recommends"],
        uninstall: &["apt-get", "remove", "-y"],
        privileged: true,
    },
    ManagerSpec {
        name: "dnf",
        category: Category::System,
        probe: "dnf",
        query: &["rpm", "-q"],
        install: &["dnf", "install", "-y", "--setopt=install_weak_deps=False"],
        uninstall: &["dnf", "remove", "-y"],
        privileged: true,
    },
    ManagerSpec {
        name: "zypper",
        category: Category::System,
        probe: "zypper",
        query: &["rpm", "-q"],
        install: &["zypper", "--non-interactive", "install", "--no-recommends"],
        uninstall: &["zypper", "--non-interactive", "remove"],
        privileged: true,
    },
    ManagerSpec {
        name: "pacman",
        category: Category::System,
        probe: "pacman",
        query: &["pacman", "-Q"],
        install: &["pacman", "-S", "--noconfirm", "--needed"],
        uninstall: &["pacman", "-R", "--noconfirm"],
        privileged: true,
    },
    ManagerSpec {
        name: "brew",
        category: Category::System,
        probe: "brew",
        query: &["brew", "list", "--versions"],
        install: &["brew", "install"],
        uninstall: &["brew", "uninstall"],
        privileged: false,
    },
    ManagerSpec {
        name: "npm",
        category: Category::Npm,
        probe: "npm",
        query: &["npm", "ls", "-g", "--depth=0"],
        install: &["npm", "install", "-g"],
        uninstall: &["npm", "uninstall", "-g"],
        privileged: false,
    },
    ManagerSpec {
        name: "pip",
        category: Category::Python,
        probe: "pip3",
        query: &["python3", "-m", "pip", "show"],
        install: &["python3", "-m", "pip", "install", "--user"],
        uninstall: &["python3", "-m", "pip", "uninstall", "-y"],
        privileged: false,
    },
];

/// Safe wrapper around libc::geteuid().
#[allow(unsafe_code)]
fn effective_uid() -> u32 {
    // SAFETY: geteuid() takes no arguments and cannot fail.
    unsafe { libc::geteuid() }
}

/// A [`PackageManager`] that shells out to the commands in its [`ManagerSpec`].
pub struct CommandManager {
    spec: &'static ManagerSpec,
}

impl CommandManager {
    pub fn new(spec: &'static ManagerSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &'static ManagerSpec {
        self.spec
    }

    /// Full argv for `base` applied to `package`, with `sudo` when required.
    pub fn command_line(&self, base: &[&str], package: &PackageName, elevate: bool) -> Vec<String> {
        let mut argv = Vec::with_capacity(base.len() + 2);
        if elevate && self.spec.privileged && effective_uid() != 0 {
            argv.push("sudo".to_owned());
        }
        argv.extend(base.iter().map(|s| (*s).to_owned()));
        argv.push(package.to_string());
        argv
    }

    fn run(&self, argv: &[String], package: &PackageName) -> Result<(), RuntimeError> {
        debug!("{}: running {}", self.spec.name, argv.join(" "));
        let output = Command::new(&argv[0]).args(&argv[1..]).output()?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map_or_else(|| format!("exited with {}", output.status), |l| l.trim().to_owned());
        Err(RuntimeError::CommandFailed {
            manager: self.spec.name.to_owned(),
            package: package.to_string(),
            reason,
        })
    }
}

impl PackageManager for CommandManager {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn category(&self) -> Category {
        self.spec.category
    }

    fn is_installed(&self, package: &PackageName) -> Result<bool, RuntimeError> {
        let argv = self.command_line(self.spec.query, package, false);
        let output = Command::new(&argv[0]).args(&argv[1..]).output()?;
        // `brew list --versions` exits 0 with empty output for unknown formulae.
        Ok(output.status.success() && !output.stdout.is_empty())
    }

    fn install(&self, package: &PackageName) -> Result<(), RuntimeError> {
        let argv = self.command_line(self.spec.install, package, true);
        self.run(&argv, package)
    }

    fn uninstall(&self, package: &PackageName) -> Result<(), RuntimeError> {
        let argv = self.command_line(self.spec.uninstall, package, true);
        self.run(&argv, package)
    }
}

pub fn select_manager(name: &str) -> Result<Arc<dyn PackageManager>, RuntimeError> {
    KNOWN_MANAGERS
        .iter()
        .find(|spec| spec.name == name)
        .map(|spec| Arc::new(CommandManager::new(spec)) as Arc<dyn PackageManager>)
        .ok_or_else(|| RuntimeError::UnknownManager(name.to_owned()))
}

/// Managers for every name the profile reports, preserving its order.
/// Unknown names are skipped.
pub fn managers_for_profile(profile: &EnvironmentProfile) -> Vec<Arc<dyn PackageManager>> {
    profile
        .package_managers
        .iter()
        .filter_map(|name| select_manager(name).ok())
        .collect()
}
