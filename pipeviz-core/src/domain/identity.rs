//! Pipeline identity types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addressable identity of one pipeline run
///
/// Derived from whichever record describes the run and never mutated.
/// Equality and hashing are structural, so two records describing the same
/// run from different sources map to the same registry slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineIdentity {
    pub provider: String,
    pub owner: String,
    pub repository: String,
    pub branch: String,
    pub build: u32,
}

impl PipelineIdentity {
    pub fn new(
        provider: impl Into<String>,
        owner: impl Into<String>,
        repository: impl Into<String>,
        branch: impl Into<String>,
        build: u32,
    ) -> Self {
        Self {
            provider: provider.into(),
            owner: owner.into(),
            repository: repository.into(),
            branch: branch.into(),
            build,
        }
    }

    /// Provider-less address of this run, as used by HTTP routes
    pub fn run_ref(&self) -> RunRef {
        RunRef {
            owner: self.owner.clone(),
            repository: self.repository.clone(),
            branch: self.branch.clone(),
            build: self.build,
        }
    }
}

impl fmt::Display for PipelineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.provider.is_empty() {
            write!(f, "{}", self.run_ref())
        } else {
            write!(f, "{}:{}", self.provider, self.run_ref())
        }
    }
}

/// Reference to a run by `owner/repository/branch/build`
///
/// This is what a viewer selects in the UI; the cluster record it points at
/// is resolved on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunRef {
    pub owner: String,
    pub repository: String,
    pub branch: String,
    pub build: u32,
}

impl RunRef {
    pub fn new(
        owner: impl Into<String>,
        repository: impl Into<String>,
        branch: impl Into<String>,
        build: u32,
    ) -> Self {
        Self {
            owner: owner.into(),
            repository: repository.into(),
            branch: branch.into(),
            build,
        }
    }

    /// Name of the cluster activity record for this run
    ///
    /// The build system names records `owner-repository-branch-build`,
    /// lowercased, with every character outside `[a-z0-9-]` replaced by `-`.
    pub fn activity_name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.owner, self.repository, self.branch, self.build
        )
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
    }
}

impl fmt::Display for RunRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.owner, self.repository, self.branch, self.build
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_equality_is_structural() {
        let a = PipelineIdentity::new("github", "acme", "widgets", "main", 42);
        let b = PipelineIdentity::new("github", "acme", "widgets", "main", 42);
        let c = PipelineIdentity::new("github", "acme", "widgets", "main", 43);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display() {
        let id = PipelineIdentity::new("github", "acme", "widgets", "main", 42);
        assert_eq!(id.to_string(), "github:acme/widgets/main/42");
        assert_eq!(id.run_ref().to_string(), "acme/widgets/main/42");

        let no_provider = PipelineIdentity::new("", "acme", "widgets", "main", 42);
        assert_eq!(no_provider.to_string(), "acme/widgets/main/42");
    }

    #[test]
    fn test_activity_name() {
        let run = RunRef::new("Acme", "widgets", "feature/Login_form", 7);
        assert_eq!(run.activity_name(), "acme-widgets-feature-login-form-7");

        let pr = RunRef::new("acme", "widgets", "PR-12", 3);
        assert_eq!(pr.activity_name(), "acme-widgets-pr-12-3");
    }
}
