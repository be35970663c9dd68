//! Project registry: batch validation of project records and hostname lookup

use crate::config::ProjectRecord;
use std::collections::HashMap;
use tracing::warn;

/// Marker prefix for redirects that reference another project by id
const INTERNAL_REDIRECT_MARKER: char = '@';

/// Redirect target, decided once when the registry is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    /// Reference to another project's id (`@<id>` in the config)
    Internal(String),
    /// Literal URL
    External(String),
}

impl RedirectTarget {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix(INTERNAL_REDIRECT_MARKER) {
            Some(id) => RedirectTarget::Internal(id.to_string()),
            None => RedirectTarget::External(raw.to_string()),
        }
    }
}

/// A validated project. Immutable once the registry is published.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub cn: Option<String>,
    pub domain: Option<String>,
    pub redirect: Option<RedirectTarget>,
    pub page: Option<String>,
    pub title: Option<String>,
    pub page_title: Option<String>,
    pub subtitle: Option<String>,
}

impl Project {
    fn from_record(record: &ProjectRecord) -> Option<Self> {
        let id = match record.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                warn!("Missing project id. Skipping project");
                return None;
            }
        };

        Some(Self {
            redirect: record.redirect.as_deref().map(RedirectTarget::parse),
            id,
            cn: record.cn.clone(),
            domain: record.domain.clone(),
            page: record.page.clone(),
            title: record.title.clone(),
            page_title: record.page_title.clone(),
            subtitle: record.subtitle.clone(),
        })
    }
}

/// Ordered set of valid projects with an id lookup.
///
/// Built in one shot from the configuration's record list; every reload
/// constructs a fresh registry rather than mutating a published one.
#[derive(Debug, Clone, Default)]
pub struct ProjectRegistry {
    projects: Vec<Project>,
    by_id: HashMap<String, usize>,
}

impl ProjectRegistry {
    /// Build the registry as a two-phase pipeline: parse every record,
    /// then validate internal redirect relations against the full id set.
    ///
    /// Records without a non-empty id are dropped. Duplicate ids keep the
    /// first occurrence. A project whose internal redirect references an
    /// unknown id is dropped entirely; a dangling redirect is worse than
    /// no project.
    pub fn build(records: &[ProjectRecord]) -> Self {
        // Phase 1: parse
        let mut projects = Vec::with_capacity(records.len());
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for record in records {
            let Some(project) = Project::from_record(record) else {
                continue;
            };

            if by_id.contains_key(&project.id) {
                warn!(project_id = %project.id, "Duplicate project id. Skipping project");
                continue;
            }

            by_id.insert(project.id.clone(), projects.len());
            projects.push(project);
        }

        // Phase 2: validate internal redirect relations
        let invalid: Vec<String> = projects
            .iter()
            .filter_map(|project| match &project.redirect {
                Some(RedirectTarget::Internal(target)) if !by_id.contains_key(target) => {
                    warn!(
                        project_id = %project.id,
                        target = %target,
                        "Invalid redirect target: not a valid project id. Skipping project"
                    );
                    Some(project.id.clone())
                }
                _ => None,
            })
            .collect();

        if !invalid.is_empty() {
            // Stable filter: relative order of the survivors is preserved
            projects.retain(|p| !invalid.contains(&p.id));
            by_id = projects
                .iter()
                .enumerate()
                .map(|(i, p)| (p.id.clone(), i))
                .collect();
        }

        Self { projects, by_id }
    }

    /// Valid projects in insertion order
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub(crate) fn projects_mut(&mut self) -> &mut [Project] {
        &mut self.projects
    }

    pub fn get(&self, id: &str) -> Option<&Project> {
        self.by_id.get(id).map(|&i| &self.projects[i])
    }

    /// Find the project matching a request hostname. Later entries win on
    /// duplicate domains, so this scans for the last match.
    pub fn match_domain(&self, hostname: &str) -> Option<&Project> {
        self.projects
            .iter()
            .rev()
            .find(|p| p.domain.as_deref() == Some(hostname))
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
