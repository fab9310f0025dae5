// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::database::ProjectStore;

use anyhow::Result;
use common::{ProjectId, RawTaskRow, UserId};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Minimal view of a project needed to validate task rows against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    pub id: ProjectId,
    pub name: String,
    pub contributor_ids: HashSet<UserId>,
}

impl ProjectRef {
    pub fn new(id: ProjectId, name: String) -> Self {
        Self {
            id,
            name,
            contributor_ids: HashSet::new(),
        }
    }

    pub fn has_contributor(&self, user_id: UserId) -> bool {
        self.contributor_ids.contains(&user_id)
    }
}

/// Lookup table built from a single batched project fetch.
#[derive(Debug, Clone, Default)]
pub struct ResolvedProjects {
    projects: HashMap<ProjectId, ProjectRef>,
}

impl ResolvedProjects {
    pub fn get(&self, id: ProjectId) -> Option<&ProjectRef> {
        self.projects.get(&id)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

impl FromIterator<ProjectRef> for ResolvedProjects {
    fn from_iter<I: IntoIterator<Item = ProjectRef>>(iter: I) -> Self {
        Self {
            projects: iter.into_iter().map(|p| (p.id, p)).collect(),
        }
    }
}

/// Distinct project ids referenced by a batch, in ascending order.
pub fn referenced_projects(rows: &[RawTaskRow]) -> Vec<ProjectId> {
    rows.iter()
        .filter_map(|row| row.project_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Resolves every distinct id with one store call, whatever the number of rows.
///
/// Unknown ids are left out of the table; callers report them per row.
pub async fn resolve_projects<S>(store: &S, ids: &[ProjectId]) -> Result<ResolvedProjects>
where
    S: ProjectStore + ?Sized,
{
    if ids.is_empty() {
        return Ok(ResolvedProjects::default());
    }
    let found = store.find_projects_by_ids(ids).await?;
    debug!("Resolved {} of {} referenced projects.", found.len(), ids.len());
    Ok(found.into_iter().collect())
}
