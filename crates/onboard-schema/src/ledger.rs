//! Installer bookkeeping: per-category installed/skipped/failed lists and the
//! pure reducer that turns them into counts.

use crate::types::PackageName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dependency category. The set is closed: OS packages plus two language
/// ecosystems.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    System,
    Npm,
    #[serde(alias = "pip")]
    Python,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::System, Category::Npm, Category::Python];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::System => write!(f, "system"),
            Category::Npm => write!(f, "npm"),
            Category::Python => write!(f, "python"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedPackage {
    pub package: PackageName,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryLedger {
    pub installed: Vec<PackageName>,
    pub skipped: Vec<PackageName>,
    pub failed: Vec<FailedPackage>,
}

impl CategoryLedger {
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }

    pub fn record_failure(&mut self, package: impl Into<PackageName>, reason: impl Into<String>) {
        self.failed.push(FailedPackage {
            package: package.into(),
            reason: reason.into(),
        });
    }
}

/// Installer output: one ledger per category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ledger {
    pub system: CategoryLedger,
    pub npm: CategoryLedger,
    pub python: CategoryLedger,
}

impl Ledger {
    pub fn category(&self, category: Category) -> &CategoryLedger {
        match category {
            Category::System => &self.system,
            Category::Npm => &self.npm,
            Category::Python => &self.python,
        }
    }

    pub fn category_mut(&mut self, category: Category) -> &mut CategoryLedger {
        match category {
            Category::System => &mut self.system,
            Category::Npm => &mut self.npm,
            Category::Python => &mut self.python,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &CategoryLedger)> {
        Category::ALL.into_iter().map(|c| (c, self.category(c)))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallSummary {
    pub installed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Reduce a ledger to totals across all categories. Performs no I/O.
pub fn calculate_summary(ledger: &Ledger) -> InstallSummary {
    ledger
        .iter()
        .fold(InstallSummary::default(), |acc, (_, cat)| InstallSummary {
            installed: acc.installed + cat.installed.len(),
            skipped: acc.skipped + cat.skipped.len(),
            failed: acc.failed + cat.failed.len(),
        })
}
