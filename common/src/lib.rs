// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type UserId = i64;
pub type ProjectId = i64;
pub type TaskId = i64;

/// Error returned when a string does not name any variant of a labelled enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{label}'")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub label: String,
}

/// Declares a closed enum whose variants map to fixed wire labels.
///
/// The same label is used for JSON (serde) and for the TEXT column (sqlx),
/// and is accepted by `FromStr` so raw rows can be validated one at a time.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $variant:ident => $label:tt ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
        pub enum $name {
            $(
                #[serde(rename = $label)]
                #[sqlx(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownLabel;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    _ => Err(UnknownLabel {
                        kind: stringify!($name),
                        label: s.to_string(),
                    }),
                }
            }
        }
    };
}

labelled_enum! {
    /// Organisation-wide role of a user.
    pub enum Role {
        Employee => "employee",
        Manager => "manager",
        Admin => "admin",
    }
}

labelled_enum! {
    /// Lifecycle status of a project.
    pub enum ProjectStatus {
        Upcoming => "upcoming",
        InProgress => "in-progress",
        Completed => "completed",
    }
}

labelled_enum! {
    /// Role label a contributor holds inside one project.
    pub enum ProjectRole {
        EngagementManager => "Engagement Manager",
        SolutionArchitect => "Solution Architect",
        ImplementationLead => "Implementation Lead",
        ModuleLead => "Module Lead",
        IntegrationLead => "Integration Lead",
        SupportRole => "Support Role",
        ProjectDirector => "Project Director",
        ProjectManager => "Project Manager",
        Others => "Others",
    }
}

labelled_enum! {
    /// Kind of work a timesheet entry is logged as.
    pub enum TaskCategory {
        Implementation => "implementation",
        Integration => "integration",
        Ams => "AMS",
        Leave => "leave",
        WeekOff => "week-off",
        InternalMeeting => "internal-meeting",
        Administrative => "administrative",
        BusinessDevelopment => "business-development",
    }
}

labelled_enum! {
    /// Project phase a timesheet entry belongs to.
    pub enum TaskStage {
        Bpu => "BPU",
        StagingConfig => "Staging Config",
        Crp => "CRP",
        Ttt => "TTT",
        ProdConfig => "Prod Config",
        ProdReview => "Prod Review",
        GoLive => "Go Live",
        Hypercare => "Hypercare",
        Others => "Others",
    }
}

labelled_enum! {
    pub enum TaskStatus {
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

/// A user account.
///
/// `reports_to` is a plain back-reference to another user; nothing here
/// prevents cycles in the reporting tree.
#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub emp_id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub reports_to: Option<UserId>,
    pub joining_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// The authenticated caller of a request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
    pub name: String,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
            name: user.name.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    #[serde(rename = "projectName")]
    pub name: String,
    pub status: ProjectStatus,
    pub start_date: Option<NaiveDate>,
    pub go_live_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Binds one user to one project. At most one exists per (project, user).
#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub project_role: ProjectRole,
    pub project_modules: String,
    pub has_edit_access: bool,
}

/// A contributor joined with the identity it refers to.
#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ContributorView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub contributor: Contributor,
    pub emp_id: i64,
    pub name: String,
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub contributors: Vec<ContributorView>,
}

/// A single timesheet entry: one day's effort against one project.
///
/// Durations are in minutes. Deleted tasks are kept in storage with
/// `is_deleted` set and are never returned by listings.
#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub owner_id: UserId,
    pub project_id: ProjectId,
    pub task_date: NaiveDate,
    #[serde(rename = "projectCategory")]
    pub category: TaskCategory,
    #[serde(rename = "projectStage")]
    pub stage: TaskStage,
    #[serde(rename = "taskDescription")]
    pub description: String,
    pub planned_duration: i64,
    pub actual_duration: i64,
    pub status: TaskStatus,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-side projection of a task with owner and project names attached.
#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub task: Task,
    pub owner_name: String,
    pub owner_email: String,
    pub owner_emp_id: i64,
    pub project_name: String,
}

/// One row of a submitted timesheet batch, exactly as the client sent it.
///
/// Every field is optional and enum-valued fields stay as strings so that a
/// bad value only fails its own row instead of the whole request.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawTaskRow {
    pub task_id: Option<TaskId>,
    #[serde(alias = "project")]
    pub project_id: Option<ProjectId>,
    pub task_date: Option<String>,
    #[serde(rename = "projectCategory")]
    pub category: Option<String>,
    #[serde(rename = "projectStage")]
    pub stage: Option<String>,
    #[serde(rename = "taskDescription")]
    pub description: Option<String>,
    pub planned_duration: Option<i64>,
    pub actual_duration: Option<i64>,
    pub status: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TaskBatchPayload {
    #[serde(default)]
    pub tasks: Vec<RawTaskRow>,
}

/// A validated task ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub owner_id: UserId,
    pub project_id: ProjectId,
    pub task_date: NaiveDate,
    pub category: TaskCategory,
    pub stage: TaskStage,
    pub description: String,
    pub planned_duration: i64,
    pub actual_duration: i64,
    pub status: TaskStatus,
}

/// A validated partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub task_id: TaskId,
    pub project_id: Option<ProjectId>,
    pub task_date: Option<NaiveDate>,
    pub category: Option<TaskCategory>,
    pub stage: Option<TaskStage>,
    pub description: Option<String>,
    pub planned_duration: Option<i64>,
    pub actual_duration: Option<i64>,
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.project_id.is_none()
            && self.task_date.is_none()
            && self.category.is_none()
            && self.stage.is_none()
            && self.description.is_none()
            && self.planned_duration.is_none()
            && self.actual_duration.is_none()
            && self.status.is_none()
    }
}

/// Failure of one row in a batch. `task_id` is set for update rows.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub error: String,
}

/// Outcome of a batch submission. A successful response can still carry
/// errors; callers must inspect `errors`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub created_count: usize,
    pub updated_count: usize,
    pub failed_count: usize,
    pub errors: Vec<RowError>,
}

/// Inclusive calendar-day range used by task listings.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRange {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EmployeeTasks {
    pub range: TaskRange,
    pub count: usize,
    pub tasks: Vec<TaskView>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeTasksQuery {
    pub emp_id: Option<i64>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

/// Payload for creating a user. Required fields are optional here so that
/// a missing one produces a validation error rather than a decode failure.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserPayload {
    pub emp_id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub joining_date: Option<NaiveDate>,
    /// Employee number of the manager, not their internal id.
    pub reports_to: Option<i64>,
}

/// A user about to be inserted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub emp_id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub reports_to: Option<UserId>,
    pub joining_date: NaiveDate,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreatedUser {
    pub user: User,
    pub access_token: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectPayload {
    pub project_name: Option<String>,
    pub status: Option<ProjectStatus>,
    pub start_date: Option<NaiveDate>,
    pub go_live_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub status: ProjectStatus,
    pub start_date: Option<NaiveDate>,
    pub go_live_date: Option<NaiveDate>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AddContributorPayload {
    pub emp_id: Option<i64>,
    pub project_role: Option<ProjectRole>,
    pub project_modules: Option<String>,
    pub has_edit_access: Option<bool>,
}

/// Static enumerations plus the project list, for populating client inputs.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub categories: Vec<TaskCategory>,
    pub stages: Vec<TaskStage>,
    pub statuses: Vec<TaskStatus>,
    pub project_statuses: Vec<ProjectStatus>,
    pub project_roles: Vec<ProjectRole>,
    pub projects: Vec<Project>,
}
