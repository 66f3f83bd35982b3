//! Provider links for pipelines
//!
//! Derives repository, branch, commit and author URLs from any pipeline
//! shape. Every function here is total: an unknown provider or missing
//! field yields an empty string, never an error.

use serde::Serialize;

use crate::domain::pipeline::PipelineVariant;

/// Git providers we know how to link to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
}

/// URL substrings that identify a provider when no explicit label exists
const PROVIDER_PATTERNS: &[(&str, Provider)] = &[("github", Provider::GitHub)];

impl Provider {
    /// Resolves an explicit provider label
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "github" => Some(Self::GitHub),
            _ => None,
        }
    }

    /// Infers the provider from a git remote URL
    pub fn infer_from_url(url: &str) -> Option<Self> {
        PROVIDER_PATTERNS
            .iter()
            .find(|(pattern, _)| url.contains(pattern))
            .map(|(_, provider)| *provider)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::GitHub => "github",
        }
    }

    fn base_url(self) -> &'static str {
        match self {
            Self::GitHub => "https://github.com",
        }
    }

    fn repository_url(self, owner: &str, repository: &str) -> String {
        format!("{}/{}/{}", self.base_url(), owner, repository)
    }

    fn pull_request_url(self, owner: &str, repository: &str, number: &str) -> String {
        format!("{}/pull/{}", self.repository_url(owner, repository), number)
    }

    fn tree_url(self, owner: &str, repository: &str, branch: &str) -> String {
        format!("{}/tree/{}", self.repository_url(owner, repository), branch)
    }

    fn commit_url(self, owner: &str, repository: &str, sha: &str) -> String {
        format!("{}/commit/{}", self.repository_url(owner, repository), sha)
    }

    fn author_url(self, author: &str) -> String {
        format!("{}/{}", self.base_url(), author)
    }
}

/// All provider links of one pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineLinks {
    pub repository_url: String,
    pub branch_url: String,
    pub commit_url: String,
    pub author_url: String,
}

impl PipelineLinks {
    pub fn for_pipeline<'a>(pipeline: impl Into<PipelineVariant<'a>>) -> Self {
        let coords = GitCoordinates::of(pipeline.into());
        Self {
            repository_url: coords.repository_url(),
            branch_url: coords.branch_url(),
            commit_url: coords.commit_url(),
            author_url: coords.author_url(),
        }
    }
}

pub fn repository_url<'a>(pipeline: impl Into<PipelineVariant<'a>>) -> String {
    GitCoordinates::of(pipeline.into()).repository_url()
}

pub fn branch_url<'a>(pipeline: impl Into<PipelineVariant<'a>>) -> String {
    GitCoordinates::of(pipeline.into()).branch_url()
}

pub fn commit_url<'a>(pipeline: impl Into<PipelineVariant<'a>>) -> String {
    GitCoordinates::of(pipeline.into()).commit_url()
}

pub fn author_url<'a>(pipeline: impl Into<PipelineVariant<'a>>) -> String {
    GitCoordinates::of(pipeline.into()).author_url()
}

/// Git metadata of a pipeline, normalized across shapes
struct GitCoordinates<'a> {
    provider: Option<Provider>,
    owner: &'a str,
    repository: &'a str,
    branch: &'a str,
    pull_request: Option<String>,
    commit_sha: &'a str,
    commit_url: Option<&'a str>,
    author: &'a str,
}

impl<'a> GitCoordinates<'a> {
    fn of(pipeline: PipelineVariant<'a>) -> Self {
        match pipeline {
            PipelineVariant::Stored(p) => Self {
                provider: Provider::from_label(&p.provider),
                owner: &p.owner,
                repository: &p.repository,
                branch: &p.branch,
                pull_request: p.pull_request_number(),
                commit_sha: &p.commit_sha,
                commit_url: p.commit_url.as_deref(),
                author: &p.author,
            },
            PipelineVariant::Running(r) => Self::of(PipelineVariant::Stored(&r.pipeline)),
            PipelineVariant::Activity(a) => Self {
                provider: Provider::from_label(&a.provider()),
                owner: &a.spec.git_owner,
                repository: &a.spec.git_repository,
                branch: &a.spec.git_branch,
                pull_request: a.spec.git_branch.strip_prefix("PR-").map(str::to_string),
                commit_sha: &a.spec.last_commit_sha,
                commit_url: Some(a.spec.last_commit_url.as_str()),
                author: &a.spec.author,
            },
        }
    }

    fn repository_url(&self) -> String {
        match self.provider {
            Some(p) => p.repository_url(self.owner, self.repository),
            None => String::new(),
        }
    }

    fn branch_url(&self) -> String {
        let Some(p) = self.provider else {
            return String::new();
        };
        match &self.pull_request {
            Some(number) => p.pull_request_url(self.owner, self.repository, number),
            None => p.tree_url(self.owner, self.repository, self.branch),
        }
    }

    fn commit_url(&self) -> String {
        if let Some(url) = self.commit_url.filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        match self.provider {
            Some(p) if !self.commit_sha.is_empty() => {
                p.commit_url(self.owner, self.repository, self.commit_sha)
            }
            _ => String::new(),
        }
    }

    fn author_url(&self) -> String {
        match self.provider {
            Some(p) if !self.author.is_empty() => p.author_url(self.author),
            _ => String::new(),
        }
    }
}
