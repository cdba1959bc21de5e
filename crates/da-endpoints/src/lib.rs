#![forbid(unsafe_code)]

//! URL builders for the Azure DevOps REST API.
//!
//! Every builder is pure string formatting: identifiers are trusted and
//! interpolated as given, and a malformed identifier only surfaces as a
//! failed request downstream. Builders that accept `params` splice them in
//! front of the `api-version` query parameter; `None` and `Some("")` are
//! treated alike.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://dev.azure.com";

/// Upper bound on ids accepted by a single work-item batch request.
pub const MAX_WORK_ITEM_IDS: usize = 200;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("project context field {field:?} must not be empty")]
    EmptyField { field: &'static str },
    #[error("base url {0:?} must start with http:// or https://")]
    InvalidBaseUrl(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Endpoint catalog rooted at one service host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Catalog<'a> {
    base_url: &'a str,
}

impl Default for Catalog<'static> {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL,
        }
    }
}

impl<'a> Catalog<'a> {
    /// Trailing slashes on `base_url` are ignored.
    #[must_use]
    pub fn new(base_url: &'a str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/'),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url
    }

    /// A team's iterations (sprints).
    #[must_use]
    pub fn team_iterations(&self, organization: &str, project: &str, team: &str) -> String {
        format!(
            "{}/{organization}/{project}/{team}/_apis/work/teamsettings/iterations?api-version=6.0",
            self.base_url
        )
    }

    /// All backlog levels of a team.
    #[must_use]
    pub fn team_backlog(&self, organization: &str, project: &str, team: &str) -> String {
        format!(
            "{}/{organization}/{project}/{team}/_apis/work/backlogs?api-version=6.0-preview.1",
            self.base_url
        )
    }

    /// Work items within one backlog level, e.g. `Microsoft.RequirementCategory`.
    #[must_use]
    pub fn backlog_items(&self, organization: &str, project: &str, team: &str, level: &str) -> String {
        format!(
            "{}/{organization}/{project}/{team}/_apis/work/backlogs/{level}/workItems?api-version=6.0-preview.1",
            self.base_url
        )
    }

    /// Ids of the work items planned into one iteration of a team.
    #[must_use]
    pub fn work_items_in_iteration(
        &self,
        organization: &str,
        project: &str,
        team: &str,
        iteration_id: &str,
    ) -> String {
        format!(
            "{}/{organization}/{project}/{team}/_apis/work/teamsettings/iterations/{iteration_id}/workitems?api-version=6.0-preview.1",
            self.base_url
        )
    }

    #[must_use]
    pub fn all_teams(&self, organization: &str, params: Option<&str>) -> String {
        with_version(
            format!("{}/{organization}/_apis/teams", self.base_url),
            params,
            "6.0-preview.3",
        )
    }

    #[must_use]
    pub fn team_members(
        &self,
        organization: &str,
        project: &str,
        team: &str,
        params: Option<&str>,
    ) -> String {
        with_version(
            format!(
                "{}/{organization}/_apis/projects/{project}/teams/{team}/members",
                self.base_url
            ),
            params,
            "6.1-preview.2",
        )
    }

    /// Work items by id with a field projection. The service accepts at most
    /// [`MAX_WORK_ITEM_IDS`] ids per request; see [`chunk_ids`].
    #[must_use]
    pub fn work_items(&self, organization: &str, project: &str, ids: &[i64], fields: &[&str]) -> String {
        format!(
            "{}/{organization}/{project}/_apis/wit/workitems?ids={}&fields={}&api-version=6.0",
            self.base_url,
            join_ids(ids),
            fields.join(",")
        )
    }

    #[must_use]
    pub fn wiql(&self, organization: &str, project: &str, params: Option<&str>) -> String {
        with_version(
            format!("{}/{organization}/{project}/_apis/wit/wiql", self.base_url),
            params,
            "6.0",
        )
    }

    #[must_use]
    pub fn tags(&self, organization: &str, project: &str) -> String {
        format!(
            "{}/{organization}/{project}/_apis/wit/tags?api-version=6.0-preview.1",
            self.base_url
        )
    }

    /// Build list of a project; a cheap request for probing credentials.
    #[must_use]
    pub fn builds(&self, organization: &str, project: &str) -> String {
        format!(
            "{}/{organization}/{project}/_apis/build/builds?api-version=6.0",
            self.base_url
        )
    }

    #[must_use]
    pub fn all_processes(&self, organization: &str) -> String {
        format!(
            "{}/{organization}/_apis/work/processes?api-version=4.1-preview.1",
            self.base_url
        )
    }

    #[must_use]
    pub fn work_item_types(&self, organization: &str, process_id: &str) -> String {
        format!(
            "{}/{organization}/_apis/work/processdefinitions/{process_id}/workItemTypes/",
            self.base_url
        )
    }

    /// The process with the projects that use it expanded.
    #[must_use]
    pub fn process_projects(&self, organization: &str, process_id: &str) -> String {
        format!(
            "{}/{organization}/_apis/work/processes/{process_id}?$expand=projects&api-version=6.0-preview.2",
            self.base_url
        )
    }

    #[must_use]
    pub fn process_fields(&self, organization: &str, process_id: &str, type_id: &str) -> String {
        format!(
            "{}/{organization}/_apis/work/processdefinitions/{process_id}/workItemTypes/{type_id}/fields",
            self.base_url
        )
    }
}

fn with_version(path: String, params: Option<&str>, version: &str) -> String {
    match params.filter(|params| !params.is_empty()) {
        Some(params) => format!("{path}?{params}&api-version={version}"),
        None => format!("{path}?api-version={version}"),
    }
}

#[must_use]
pub fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Comma-joined id batches of at most [`MAX_WORK_ITEM_IDS`] ids each.
#[must_use]
pub fn chunk_ids(ids: &[i64]) -> Vec<String> {
    ids.chunks(MAX_WORK_ITEM_IDS).map(join_ids).collect()
}

#[must_use]
pub fn team_iterations(organization: &str, project: &str, team: &str) -> String {
    Catalog::default().team_iterations(organization, project, team)
}

#[must_use]
pub fn team_backlog(organization: &str, project: &str, team: &str) -> String {
    Catalog::default().team_backlog(organization, project, team)
}

#[must_use]
pub fn backlog_items(organization: &str, project: &str, team: &str, level: &str) -> String {
    Catalog::default().backlog_items(organization, project, team, level)
}

#[must_use]
pub fn work_items_in_iteration(organization: &str, project: &str, team: &str, iteration_id: &str) -> String {
    Catalog::default().work_items_in_iteration(organization, project, team, iteration_id)
}

#[must_use]
pub fn all_teams(organization: &str, params: Option<&str>) -> String {
    Catalog::default().all_teams(organization, params)
}

#[must_use]
pub fn team_members(organization: &str, project: &str, team: &str, params: Option<&str>) -> String {
    Catalog::default().team_members(organization, project, team, params)
}

#[must_use]
pub fn work_items(organization: &str, project: &str, ids: &[i64], fields: &[&str]) -> String {
    Catalog::default().work_items(organization, project, ids, fields)
}

#[must_use]
pub fn wiql(organization: &str, project: &str, params: Option<&str>) -> String {
    Catalog::default().wiql(organization, project, params)
}

#[must_use]
pub fn tags(organization: &str, project: &str) -> String {
    Catalog::default().tags(organization, project)
}

#[must_use]
pub fn builds(organization: &str, project: &str) -> String {
    Catalog::default().builds(organization, project)
}

#[must_use]
pub fn all_processes(organization: &str) -> String {
    Catalog::default().all_processes(organization)
}

#[must_use]
pub fn work_item_types(organization: &str, process_id: &str) -> String {
    Catalog::default().work_item_types(organization, process_id)
}

#[must_use]
pub fn process_projects(organization: &str, process_id: &str) -> String {
    Catalog::default().process_projects(organization, process_id)
}

#[must_use]
pub fn process_fields(organization: &str, process_id: &str, type_id: &str) -> String {
    Catalog::default().process_fields(organization, process_id, type_id)
}

/// Organization / project / team coordinates the catalog is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub organization: String,
    pub project: String,
    pub team: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

impl ProjectContext {
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        team: impl Into<String>,
    ) -> Result<Self, EndpointError> {
        let context = Self {
            organization: organization.into(),
            project: project.into(),
            team: team.into(),
            base_url: default_base_url(),
        };
        context.validate()?;
        Ok(context)
    }

    /// Load from a JSON object such as
    /// `{"organization": "contoso", "project": "Fabrikam", "team": "Web"}`.
    pub fn from_json_str(input: &str) -> Result<Self, EndpointError> {
        let context: Self = serde_json::from_str(input)?;
        context.validate()?;
        Ok(context)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Result<Self, EndpointError> {
        self.base_url = base_url.into();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), EndpointError> {
        for (field, value) in [
            ("organization", &self.organization),
            ("project", &self.project),
            ("team", &self.team),
        ] {
            if value.trim().is_empty() {
                return Err(EndpointError::EmptyField { field });
            }
        }
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(EndpointError::InvalidBaseUrl(self.base_url.clone()));
        }
        Ok(())
    }

    #[must_use]
    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(&self.base_url)
    }

    #[must_use]
    pub fn team_iterations(&self) -> String {
        self.catalog()
            .team_iterations(&self.organization, &self.project, &self.team)
    }

    #[must_use]
    pub fn team_backlog(&self) -> String {
        self.catalog()
            .team_backlog(&self.organization, &self.project, &self.team)
    }

    #[must_use]
    pub fn backlog_items(&self, level: &str) -> String {
        self.catalog()
            .backlog_items(&self.organization, &self.project, &self.team, level)
    }

    #[must_use]
    pub fn work_items_in_iteration(&self, iteration_id: &str) -> String {
        self.catalog().work_items_in_iteration(
            &self.organization,
            &self.project,
            &self.team,
            iteration_id,
        )
    }

    #[must_use]
    pub fn all_teams(&self, params: Option<&str>) -> String {
        self.catalog().all_teams(&self.organization, params)
    }

    #[must_use]
    pub fn team_members(&self, params: Option<&str>) -> String {
        self.catalog()
            .team_members(&self.organization, &self.project, &self.team, params)
    }

    /// One work-item request per batch of at most [`MAX_WORK_ITEM_IDS`] ids.
    #[must_use]
    pub fn work_item_batches(&self, ids: &[i64], fields: &[&str]) -> Vec<String> {
        let catalog = self.catalog();
        ids.chunks(MAX_WORK_ITEM_IDS)
            .map(|batch| catalog.work_items(&self.organization, &self.project, batch, fields))
            .collect()
    }

    #[must_use]
    pub fn wiql(&self, params: Option<&str>) -> String {
        self.catalog().wiql(&self.organization, &self.project, params)
    }

    #[must_use]
    pub fn tags(&self) -> String {
        self.catalog().tags(&self.organization, &self.project)
    }

    #[must_use]
    pub fn builds(&self) -> String {
        self.catalog().builds(&self.organization, &self.project)
    }

    #[must_use]
    pub fn all_processes(&self) -> String {
        self.catalog().all_processes(&self.organization)
    }

    #[must_use]
    pub fn work_item_types(&self, process_id: &str) -> String {
        self.catalog().work_item_types(&self.organization, process_id)
    }

    #[must_use]
    pub fn process_projects(&self, process_id: &str) -> String {
        self.catalog().process_projects(&self.organization, process_id)
    }

    #[must_use]
    pub fn process_fields(&self, process_id: &str, type_id: &str) -> String {
        self.catalog()
            .process_fields(&self.organization, process_id, type_id)
    }
}
