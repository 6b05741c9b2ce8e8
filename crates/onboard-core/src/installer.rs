use onboard_runtime::PackageManager;
use onboard_schema::{Category, CategoryLedger, Dependencies, EnvironmentProfile, Ledger, PackageName};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Installs declared packages through whichever managers the environment
/// exposes and records exactly what happened in a [`Ledger`].
///
/// Categories are independent: each runs on its own scoped thread, and a
/// failure in one never blocks the others. Packages inside a category install
/// sequentially because most package managers hold a global lock.
pub struct DependencyInstaller {
    managers: Vec<Arc<dyn PackageManager>>,
}

/// One category's work: its packages and the manager chosen for them.
struct CategoryPlan<'a> {
    category: Category,
    packages: &'a [PackageName],
    manager: Option<&'a Arc<dyn PackageManager>>,
}

impl DependencyInstaller {
    pub fn new(managers: Vec<Arc<dyn PackageManager>>) -> Self {
        Self { managers }
    }

    /// The first manager the profile reports for `category`.
    pub fn manager_for(
        &self,
        profile: &EnvironmentProfile,
        category: Category,
    ) -> Option<&Arc<dyn PackageManager>> {
        profile.package_managers.iter().find_map(|name| {
            self.managers
                .iter()
                .find(|m| m.name() == name && m.category() == category)
        })
    }

    fn plan<'a>(
        &'a self,
        deps: &'a Dependencies,
        profile: &EnvironmentProfile,
    ) -> Vec<CategoryPlan<'a>> {
        Category::ALL
            .into_iter()
            .filter(|c| !deps.packages(*c).is_empty())
            .map(|category| CategoryPlan {
                category,
                packages: deps.packages(category),
                manager: self.manager_for(profile, category),
            })
            .collect()
    }

    pub fn install(&self, deps: &Dependencies, profile: &EnvironmentProfile) -> Ledger {
        let plans = self.plan(deps, profile);
        let mut ledger = Ledger::default();

        std::thread::scope(|scope| {
            let handles: Vec<_> = plans
                .iter()
                .map(|plan| (plan, scope.spawn(move || install_category(plan))))
                .collect();

            for (plan, handle) in handles {
                let result = handle.join().unwrap_or_else(|_| {
                    let mut failed = CategoryLedger::default();
                    for package in plan.packages {
                        failed.record_failure(package.clone(), "installer thread panicked");
                    }
                    failed
                });
                *ledger.category_mut(plan.category) = result;
            }
        });

        ledger
    }

    /// Dry-run: the ledger a successful install would produce. Performs no
    /// installation and no package queries; packages without a manager still
    /// fail, exactly as in a real run.
    pub fn preview(&self, deps: &Dependencies, profile: &EnvironmentProfile) -> Ledger {
        let mut ledger = Ledger::default();
        for plan in self.plan(deps, profile) {
            let entry = ledger.category_mut(plan.category);
            match plan.manager {
                Some(_) => entry.installed.extend(plan.packages.iter().cloned()),
                None => {
                    for package in plan.packages {
                        entry.record_failure(package.clone(), no_manager_reason(plan.category));
                    }
                }
            }
        }
        ledger
    }
}

fn no_manager_reason(category: Category) -> String {
    format!("no package manager available for {category} packages")
}

fn install_category(plan: &CategoryPlan<'_>) -> CategoryLedger {
    let mut ledger = CategoryLedger::default();
    let Some(manager) = plan.manager else {
        warn!("no package manager for {} packages", plan.category);
        for package in plan.packages {
            ledger.record_failure(package.clone(), no_manager_reason(plan.category));
        }
        return ledger;
    };

    for package in plan.packages {
        match manager.is_installed(package) {
            Ok(true) => {
                debug!("{package} already present via {}", manager.name());
                ledger.skipped.push(package.clone());
                continue;
            }
            Ok(false) => {}
            Err(e) => warn!("cannot query {package} via {}: {e}", manager.name()),
        }
        match manager.install(package) {
            Ok(()) => {
                info!("installed {package} via {}", manager.name());
                ledger.installed.push(package.clone());
            }
            Err(e) => {
                warn!("installing {package} failed: {e}");
                ledger.record_failure(package.clone(), e.to_string());
            }
        }
    }
    ledger
}
