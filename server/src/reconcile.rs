// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
//! Turns a submitted batch of task rows into validated inserts and updates.
//!
//! Every row is judged on its own: a bad row is reported and skipped, the
//! others still go through. Validation happens entirely against data fetched
//! up front (one call for tasks, one for projects), then all accepted rows are
//! written in one insert call and one update call.
use crate::authz;
use crate::database::{ProjectStore, TaskStore};
use crate::error::ServiceError;
use crate::resolver::{referenced_projects, resolve_projects, ResolvedProjects};
use crate::window::EditWindow;

use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use common::{
    Actor, BatchReport, NewTask, RawTaskRow, RowError, Task, TaskCategory, TaskId, TaskPatch,
    TaskStage, TaskStatus,
};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use tracing::{debug, info};

/// Why a single row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowFailure {
    #[error("missing required fields")]
    MissingRequiredFields,
    #[error("invalid date")]
    InvalidDate,
    #[error("date must be within last 15 days (no future dates)")]
    DateOutsideCreateWindow,
    #[error("invalid project")]
    InvalidProject,
    #[error("not a contributor of this project")]
    NotContributor,
    #[error("task id missing")]
    TaskIdMissing,
    #[error("task not found")]
    TaskNotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("task date outside editable 15-day window")]
    OutsideEditableWindow,
    #[error("planned duration must not be negative")]
    NegativePlannedDuration,
    #[error("actual duration must not be negative")]
    NegativeActualDuration,
    #[error("task description cannot be empty")]
    EmptyDescription,
    #[error("invalid {field} '{value}'")]
    InvalidValue { field: &'static str, value: String },
}

/// Which row shapes a batch accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Every row is a new task; `taskId` is ignored.
    Create,
    /// Every row must name an existing task.
    Update,
    /// Rows with a `taskId` update, rows without one create.
    Upsert,
}

enum RowKind {
    Create,
    Update(TaskId),
    MissingTaskId,
}

fn classify(row: &RawTaskRow, mode: ReconcileMode) -> RowKind {
    match (mode, row.task_id) {
        (ReconcileMode::Create, _) => RowKind::Create,
        (_, Some(id)) => RowKind::Update(id),
        (ReconcileMode::Update, None) => RowKind::MissingTaskId,
        (ReconcileMode::Upsert, None) => RowKind::Create,
    }
}

/// Accumulated outcome of validating a batch, before anything is written.
#[derive(Debug, Default)]
pub struct Plan {
    pub creates: Vec<NewTask>,
    pub updates: Vec<TaskPatch>,
    pub errors: Vec<RowError>,
}

impl Plan {
    fn reject(&mut self, row_index: usize, task_id: Option<TaskId>, failure: RowFailure) {
        debug!("Row {} rejected: {}", row_index, failure);
        self.errors.push(RowError {
            row_index,
            task_id,
            error: failure.to_string(),
        });
    }

    pub fn into_report(self) -> BatchReport {
        BatchReport {
            created_count: self.creates.len(),
            updated_count: self.updates.len(),
            failed_count: self.errors.len(),
            errors: self.errors,
        }
    }
}

/// Validates every row against pre-fetched tasks and projects.
///
/// Errors come out in input order.
pub fn plan(
    actor: &Actor,
    rows: &[RawTaskRow],
    mode: ReconcileMode,
    now: NaiveDateTime,
    tasks: &HashMap<TaskId, Task>,
    projects: &ResolvedProjects,
) -> Plan {
    let window = EditWindow::at(now);

    rows.iter()
        .enumerate()
        .fold(Plan::default(), |mut plan, (index, row)| {
            match classify(row, mode) {
                RowKind::Create => match validate_create(actor, row, window, projects) {
                    Ok(task) => plan.creates.push(task),
                    Err(failure) => plan.reject(index, None, failure),
                },
                RowKind::Update(id) => {
                    match validate_update(actor, id, row, window, tasks, projects) {
                        Ok(patch) => plan.updates.push(patch),
                        Err(failure) => plan.reject(index, Some(id), failure),
                    }
                }
                RowKind::MissingTaskId => plan.reject(index, None, RowFailure::TaskIdMissing),
            }
            plan
        })
}

fn validate_create(
    actor: &Actor,
    row: &RawTaskRow,
    window: EditWindow,
    projects: &ResolvedProjects,
) -> Result<NewTask, RowFailure> {
    let description = row.description.as_deref().map(str::trim).unwrap_or_default();
    let (
        Some(project_id),
        Some(category),
        Some(stage),
        Some(planned_duration),
        Some(status),
        Some(task_date),
    ) = (
        row.project_id,
        row.category.as_deref(),
        row.stage.as_deref(),
        row.planned_duration,
        row.status.as_deref(),
        row.task_date.as_deref(),
    )
    else {
        return Err(RowFailure::MissingRequiredFields);
    };
    if description.is_empty() {
        return Err(RowFailure::MissingRequiredFields);
    }

    let task_date = parse_task_date(task_date).ok_or(RowFailure::InvalidDate)?;
    if !window.contains(task_date) {
        return Err(RowFailure::DateOutsideCreateWindow);
    }

    let category = parse_label::<TaskCategory>("projectCategory", category)?;
    let stage = parse_label::<TaskStage>("projectStage", stage)?;
    let status = parse_label::<TaskStatus>("status", status)?;
    let planned_duration = non_negative(planned_duration, RowFailure::NegativePlannedDuration)?;
    let actual_duration = row
        .actual_duration
        .map(|value| non_negative(value, RowFailure::NegativeActualDuration))
        .transpose()?
        .unwrap_or(0);

    let project = projects.get(project_id).ok_or(RowFailure::InvalidProject)?;
    if !project.has_contributor(actor.id) {
        return Err(RowFailure::NotContributor);
    }

    Ok(NewTask {
        owner_id: actor.id,
        project_id,
        task_date,
        category,
        stage,
        description: description.to_string(),
        planned_duration,
        actual_duration,
        status,
    })
}

fn validate_update(
    actor: &Actor,
    task_id: TaskId,
    row: &RawTaskRow,
    window: EditWindow,
    tasks: &HashMap<TaskId, Task>,
    projects: &ResolvedProjects,
) -> Result<TaskPatch, RowFailure> {
    let task = tasks
        .get(&task_id)
        .filter(|task| !task.is_deleted)
        .ok_or(RowFailure::TaskNotFound)?;

    if !authz::can_mutate_task(actor, task) {
        return Err(RowFailure::Unauthorized);
    }

    let new_date = row
        .task_date
        .as_deref()
        .map(|raw| parse_task_date(raw).ok_or(RowFailure::InvalidDate))
        .transpose()?;
    // Applies to every field: an aged task is frozen, not just its date.
    if !window.contains(new_date.unwrap_or(task.task_date)) {
        return Err(RowFailure::OutsideEditableWindow);
    }

    let mut patch = TaskPatch::new(task_id);
    patch.task_date = new_date;
    if let Some(raw) = row.category.as_deref() {
        patch.category = Some(parse_label("projectCategory", raw)?);
    }
    if let Some(raw) = row.stage.as_deref() {
        patch.stage = Some(parse_label("projectStage", raw)?);
    }
    if let Some(value) = row.planned_duration {
        patch.planned_duration = Some(non_negative(value, RowFailure::NegativePlannedDuration)?);
    }
    if let Some(value) = row.actual_duration {
        patch.actual_duration = Some(non_negative(value, RowFailure::NegativeActualDuration)?);
    }
    if let Some(raw) = row.status.as_deref() {
        patch.status = Some(parse_label("status", raw)?);
    }
    if let Some(raw) = row.description.as_deref() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RowFailure::EmptyDescription);
        }
        patch.description = Some(trimmed.to_string());
    }
    if let Some(project_id) = row.project_id {
        if projects.get(project_id).is_none() {
            return Err(RowFailure::InvalidProject);
        }
        patch.project_id = Some(project_id);
    }

    Ok(patch)
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp. A timestamp is reduced to
/// the server's local calendar day, the same day the editing window counts in.
pub fn parse_task_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Local).date_naive())
        })
}

fn parse_label<T: FromStr>(field: &'static str, raw: &str) -> Result<T, RowFailure> {
    raw.parse().map_err(|_| RowFailure::InvalidValue {
        field,
        value: raw.to_string(),
    })
}

fn non_negative(value: i64, failure: RowFailure) -> Result<i64, RowFailure> {
    if value < 0 { Err(failure) } else { Ok(value) }
}

/// Distinct task ids that update rows of this batch refer to.
pub fn referenced_tasks(rows: &[RawTaskRow], mode: ReconcileMode) -> Vec<TaskId> {
    if mode == ReconcileMode::Create {
        return Vec::new();
    }
    rows.iter()
        .filter_map(|row| row.task_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

async fn fetch_tasks<S>(store: &S, ids: &[TaskId]) -> Result<HashMap<TaskId, Task>>
where
    S: TaskStore + ?Sized,
{
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let tasks = store.find_tasks_by_ids(ids).await?;
    Ok(tasks.into_iter().map(|task| (task.id, task)).collect())
}

/// Validates a batch for `actor` at `now` and writes the accepted rows.
///
/// Per-row failures end up in the report. Only store failures make this
/// return an error, and a failure during the write phase can leave part of
/// the accepted rows applied.
pub async fn reconcile<S>(
    store: &S,
    actor: &Actor,
    rows: &[RawTaskRow],
    mode: ReconcileMode,
    now: NaiveDateTime,
) -> Result<BatchReport>
where
    S: ProjectStore + TaskStore + ?Sized,
{
    let task_ids = referenced_tasks(rows, mode);
    let project_ids = referenced_projects(rows);

    let (tasks, projects) = tokio::try_join!(
        fetch_tasks(store, &task_ids),
        resolve_projects(store, &project_ids)
    )?;

    let plan = plan(actor, rows, mode, now, &tasks, &projects);
    debug!(
        "Batch of {} rows from user {}: {} to create, {} to update, {} rejected.",
        rows.len(),
        actor.id,
        plan.creates.len(),
        plan.updates.len(),
        plan.errors.len()
    );

    store.insert_tasks(&plan.creates).await?;
    store.update_tasks(&plan.updates).await?;

    let report = plan.into_report();
    info!(
        "Batch applied for user {}: created={}, updated={}, failed={}",
        actor.id, report.created_count, report.updated_count, report.failed_count
    );
    Ok(report)
}

/// Soft-deletes one task on behalf of its owner while its date is still editable.
pub async fn soft_delete<S>(
    store: &S,
    actor: &Actor,
    task_id: TaskId,
    now: NaiveDateTime,
) -> Result<(), ServiceError>
where
    S: TaskStore + ?Sized,
{
    let task = store
        .find_task(task_id)
        .await?
        .filter(|task| !task.is_deleted)
        .ok_or_else(|| ServiceError::not_found(format!("Task with ID {task_id} not found.")))?;

    if !authz::can_mutate_task(actor, &task) {
        return Err(ServiceError::forbidden("Not allowed to delete this task"));
    }
    if !EditWindow::at(now).contains(task.task_date) {
        return Err(ServiceError::forbidden(
            "Tasks outside the editable 15-day window cannot be deleted",
        ));
    }

    if !store.soft_delete_task(task_id, actor.id).await? {
        // Lost a race with a concurrent delete.
        return Err(ServiceError::not_found(format!(
            "Task with ID {task_id} not found."
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{seed_project, seed_user, setup_test_store};
    use crate::database::SqliteStore;
    use crate::resolver::ProjectRef;
    use async_trait::async_trait;
    use chrono::{Duration, NaiveTime, TimeZone, Utc};
    use common::{
        Contributor, NewProject, Project, ProjectDetail, ProjectId, Role, TaskRange, TaskView,
        UserId,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const OWNER: UserId = 10;
    const OTHER: UserId = 20;
    const PROJECT: ProjectId = 1;
    const FOREIGN_PROJECT: ProjectId = 2;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 20).unwrap()
    }

    fn now() -> NaiveDateTime {
        today().and_time(NaiveTime::from_hms_opt(15, 45, 0).unwrap())
    }

    fn actor(id: UserId) -> Actor {
        Actor {
            id,
            role: Role::Employee,
            name: "Dana".to_string(),
        }
    }

    fn projects() -> ResolvedProjects {
        let mut member = ProjectRef::new(PROJECT, "Ledger".to_string());
        member.contributor_ids.insert(OWNER);
        let foreign = ProjectRef::new(FOREIGN_PROJECT, "Payroll".to_string());
        [member, foreign].into_iter().collect()
    }

    fn create_row(date: NaiveDate) -> RawTaskRow {
        RawTaskRow {
            task_id: None,
            project_id: Some(PROJECT),
            task_date: Some(date.to_string()),
            category: Some("implementation".to_string()),
            stage: Some("CRP".to_string()),
            description: Some("  Map chart of accounts ".to_string()),
            planned_duration: Some(240),
            actual_duration: None,
            status: Some("in_progress".to_string()),
        }
    }

    fn stored_task(id: TaskId, owner_id: UserId, task_date: NaiveDate) -> Task {
        Task {
            id,
            owner_id,
            project_id: PROJECT,
            task_date,
            category: TaskCategory::Implementation,
            stage: TaskStage::Crp,
            description: "Map chart of accounts".to_string(),
            planned_duration: 240,
            actual_duration: 0,
            status: TaskStatus::InProgress,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Noon on `date` in the server's zone, so the local day is unambiguous.
    fn local_noon_rfc3339(date: NaiveDate) -> String {
        Local
            .from_local_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
            .single()
            .unwrap()
            .to_rfc3339()
    }

    fn update_row(task_id: TaskId) -> RawTaskRow {
        RawTaskRow {
            task_id: Some(task_id),
            ..RawTaskRow::default()
        }
    }

    fn tasks(list: Vec<Task>) -> HashMap<TaskId, Task> {
        list.into_iter().map(|t| (t.id, t)).collect()
    }

    fn plan_creates(rows: &[RawTaskRow]) -> Plan {
        plan(
            &actor(OWNER),
            rows,
            ReconcileMode::Create,
            now(),
            &HashMap::new(),
            &projects(),
        )
    }

    #[test]
    fn test_create_date_boundaries() {
        let rows = vec![
            create_row(today()),
            create_row(today() + Duration::days(1)),
            create_row(today() - Duration::days(14)),
            create_row(today() - Duration::days(15)),
        ];
        let plan = plan_creates(&rows);

        assert_eq!(plan.creates.len(), 2);
        assert_eq!(plan.creates[0].task_date, today());
        assert_eq!(plan.creates[1].task_date, today() - Duration::days(14));
        let rejected: Vec<usize> = plan.errors.iter().map(|e| e.row_index).collect();
        assert_eq!(rejected, vec![1, 3]);
        for error in &plan.errors {
            assert_eq!(
                error.error,
                "date must be within last 15 days (no future dates)"
            );
            assert_eq!(error.task_id, None);
        }
    }

    #[test]
    fn test_create_fills_owner_and_defaults() {
        let plan = plan_creates(&[create_row(today())]);
        let task = &plan.creates[0];
        assert_eq!(task.owner_id, OWNER);
        assert_eq!(task.actual_duration, 0);
        assert_eq!(task.description, "Map chart of accounts");
        assert_eq!(task.stage, TaskStage::Crp);
    }

    #[test]
    fn test_create_requires_every_field() {
        let mut no_status = create_row(today());
        no_status.status = None;
        let mut blank_description = create_row(today());
        blank_description.description = Some("   ".to_string());
        let mut no_planned = create_row(today());
        no_planned.planned_duration = None;

        let plan = plan_creates(&[no_status, blank_description, no_planned]);
        assert!(plan.creates.is_empty());
        assert_eq!(plan.errors.len(), 3);
        assert!(plan
            .errors
            .iter()
            .all(|e| e.error == "missing required fields"));
    }

    #[test]
    fn test_create_rejects_bad_values_per_row() {
        let mut bad_date = create_row(today());
        bad_date.task_date = Some("20/03/2025".to_string());
        let mut bad_category = create_row(today());
        bad_category.category = Some("gardening".to_string());
        let mut negative = create_row(today());
        negative.planned_duration = Some(-5);
        let mut unknown_project = create_row(today());
        unknown_project.project_id = Some(77);
        let mut not_member = create_row(today());
        not_member.project_id = Some(FOREIGN_PROJECT);

        let plan = plan_creates(&[
            bad_date,
            bad_category,
            negative,
            unknown_project,
            not_member,
            create_row(today()),
        ]);
        let messages: Vec<&str> = plan.errors.iter().map(|e| e.error.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "invalid date",
                "invalid projectCategory 'gardening'",
                "planned duration must not be negative",
                "invalid project",
                "not a contributor of this project",
            ]
        );
        assert_eq!(plan.creates.len(), 1);
    }

    #[test]
    fn test_create_accepts_rfc3339_dates() {
        let mut row = create_row(today());
        row.task_date = Some(local_noon_rfc3339(today() - Duration::days(1)));
        let plan = plan_creates(&[row]);
        assert_eq!(plan.creates[0].task_date, today() - Duration::days(1));
    }

    #[test]
    fn test_rfc3339_dates_use_the_server_local_day() {
        let raw = "2025-03-19T23:30:00-08:00";
        let expected = DateTime::parse_from_rfc3339(raw)
            .unwrap()
            .with_timezone(&Local)
            .date_naive();
        assert_eq!(parse_task_date(raw), Some(expected));
        assert_eq!(parse_task_date("2025-03-19"), NaiveDate::from_ymd_opt(2025, 3, 19));
        assert_eq!(parse_task_date("19/03/2025"), None);
    }

    #[test]
    fn test_update_rejections() {
        let stored = tasks(vec![
            stored_task(1, OWNER, today()),
            stored_task(2, OTHER, today()),
            stored_task(3, OWNER, today() - Duration::days(20)),
            {
                let mut deleted = stored_task(4, OWNER, today());
                deleted.is_deleted = true;
                deleted
            },
        ]);
        let mut aged = update_row(3);
        aged.status = Some("completed".to_string());
        let mut moved_out = update_row(1);
        moved_out.task_date = Some((today() + Duration::days(2)).to_string());
        let mut bad_project = update_row(1);
        bad_project.project_id = Some(99);

        let rows = vec![
            update_row(9),
            update_row(2),
            aged,
            update_row(4),
            moved_out,
            bad_project,
        ];
        let plan = plan(
            &actor(OWNER),
            &rows,
            ReconcileMode::Update,
            now(),
            &stored,
            &projects(),
        );

        assert!(plan.updates.is_empty());
        let errors: Vec<(usize, Option<TaskId>, &str)> = plan
            .errors
            .iter()
            .map(|e| (e.row_index, e.task_id, e.error.as_str()))
            .collect();
        assert_eq!(
            errors,
            vec![
                (0, Some(9), "task not found"),
                (1, Some(2), "unauthorized"),
                (2, Some(3), "task date outside editable 15-day window"),
                (3, Some(4), "task not found"),
                (4, Some(1), "task date outside editable 15-day window"),
                (5, Some(1), "invalid project"),
            ]
        );
    }

    #[test]
    fn test_update_window_lower_bound_is_inclusive() {
        let oldest = today() - Duration::days(14);
        let too_old = today() - Duration::days(15);
        let stored = tasks(vec![
            stored_task(1, OWNER, oldest),
            stored_task(2, OWNER, too_old),
            stored_task(3, OWNER, today()),
        ]);
        let mut at_edge = update_row(1);
        at_edge.status = Some("completed".to_string());
        let mut past_edge = update_row(2);
        past_edge.status = Some("completed".to_string());
        let mut moved_to_edge = update_row(3);
        moved_to_edge.task_date = Some(local_noon_rfc3339(oldest));
        let mut moved_past_edge = update_row(3);
        moved_past_edge.task_date = Some(local_noon_rfc3339(too_old));

        let plan = plan(
            &actor(OWNER),
            &[at_edge, past_edge, moved_to_edge, moved_past_edge],
            ReconcileMode::Update,
            now(),
            &stored,
            &projects(),
        );

        assert_eq!(plan.updates.len(), 2);
        assert_eq!(plan.updates[0].task_id, 1);
        assert_eq!(plan.updates[0].status, Some(TaskStatus::Completed));
        assert_eq!(plan.updates[1].task_id, 3);
        assert_eq!(plan.updates[1].task_date, Some(oldest));
        let errors: Vec<(usize, &str)> = plan
            .errors
            .iter()
            .map(|e| (e.row_index, e.error.as_str()))
            .collect();
        assert_eq!(
            errors,
            vec![
                (1, "task date outside editable 15-day window"),
                (3, "task date outside editable 15-day window"),
            ]
        );
    }

    #[test]
    fn test_update_negative_duration_discards_whole_row() {
        let stored = tasks(vec![stored_task(1, OWNER, today())]);
        let mut row = update_row(1);
        row.status = Some("completed".to_string());
        row.actual_duration = Some(-1);

        let plan = plan(
            &actor(OWNER),
            &[row],
            ReconcileMode::Update,
            now(),
            &stored,
            &projects(),
        );
        assert!(plan.updates.is_empty());
        assert_eq!(plan.errors[0].error, "actual duration must not be negative");
    }

    #[test]
    fn test_update_stages_only_supplied_fields() {
        let stored = tasks(vec![stored_task(1, OWNER, today() - Duration::days(3))]);
        let mut row = update_row(1);
        row.actual_duration = Some(200);
        row.project_id = Some(FOREIGN_PROJECT);
        row.description = Some(" Reconcile ledgers ".to_string());

        let plan = plan(
            &actor(OWNER),
            &[row],
            ReconcileMode::Update,
            now(),
            &stored,
            &projects(),
        );
        assert!(plan.errors.is_empty());
        assert_eq!(
            plan.updates[0],
            TaskPatch {
                task_id: 1,
                actual_duration: Some(200),
                project_id: Some(FOREIGN_PROJECT),
                description: Some("Reconcile ledgers".to_string()),
                ..TaskPatch::default()
            }
        );
    }

    #[test]
    fn test_update_can_move_an_aged_task_back_into_window() {
        let stored = tasks(vec![stored_task(1, OWNER, today() - Duration::days(30))]);
        let mut row = update_row(1);
        row.task_date = Some(today().to_string());

        let plan = plan(
            &actor(OWNER),
            &[row],
            ReconcileMode::Update,
            now(),
            &stored,
            &projects(),
        );
        assert_eq!(plan.updates[0].task_date, Some(today()));
    }

    #[test]
    fn test_update_mode_requires_task_id_and_upsert_classifies() {
        let stored = tasks(vec![stored_task(1, OWNER, today())]);
        let rows = vec![create_row(today()), update_row(1)];

        let update_only = plan(
            &actor(OWNER),
            &rows,
            ReconcileMode::Update,
            now(),
            &stored,
            &projects(),
        );
        assert_eq!(update_only.errors.len(), 1);
        assert_eq!(update_only.errors[0].error, "task id missing");
        assert_eq!(update_only.updates.len(), 1);

        let upsert = plan(
            &actor(OWNER),
            &rows,
            ReconcileMode::Upsert,
            now(),
            &stored,
            &projects(),
        );
        assert!(upsert.errors.is_empty());
        assert_eq!(upsert.creates.len(), 1);
        assert_eq!(upsert.updates.len(), 1);
    }

    #[test]
    fn test_referenced_tasks_ignored_in_create_mode() {
        let rows = vec![update_row(5), update_row(5), update_row(2)];
        assert!(referenced_tasks(&rows, ReconcileMode::Create).is_empty());
        assert_eq!(referenced_tasks(&rows, ReconcileMode::Update), vec![2, 5]);
    }

    /// Store wrapper that counts the batched calls the engine makes.
    struct CountingStore {
        inner: SqliteStore,
        project_lookups: AtomicUsize,
        task_lookups: AtomicUsize,
        inserts: AtomicUsize,
        updates: AtomicUsize,
    }

    impl CountingStore {
        fn new(inner: SqliteStore) -> Self {
            Self {
                inner,
                project_lookups: AtomicUsize::new(0),
                task_lookups: AtomicUsize::new(0),
                inserts: AtomicUsize::new(0),
                updates: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProjectStore for CountingStore {
        async fn list_projects(&self) -> Result<Vec<Project>> {
            self.inner.list_projects().await
        }

        async fn find_project(&self, id: ProjectId) -> Result<Option<Project>> {
            self.inner.find_project(id).await
        }

        async fn find_project_detail(&self, id: ProjectId) -> Result<Option<ProjectDetail>> {
            self.inner.find_project_detail(id).await
        }

        async fn find_projects_by_ids(&self, ids: &[ProjectId]) -> Result<Vec<ProjectRef>> {
            self.project_lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.find_projects_by_ids(ids).await
        }

        async fn insert_project(&self, project: NewProject) -> Result<Option<Project>> {
            self.inner.insert_project(project).await
        }

        async fn add_contributor(&self, contributor: Contributor) -> Result<bool> {
            self.inner.add_contributor(contributor).await
        }
    }

    #[async_trait]
    impl TaskStore for CountingStore {
        async fn find_task(&self, id: TaskId) -> Result<Option<Task>> {
            self.inner.find_task(id).await
        }

        async fn find_tasks_by_ids(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
            self.task_lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.find_tasks_by_ids(ids).await
        }

        async fn insert_tasks(&self, tasks: &[NewTask]) -> Result<usize> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.inner.insert_tasks(tasks).await
        }

        async fn update_tasks(&self, patches: &[TaskPatch]) -> Result<usize> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update_tasks(patches).await
        }

        async fn soft_delete_task(&self, id: TaskId, deleted_by: UserId) -> Result<bool> {
            self.inner.soft_delete_task(id, deleted_by).await
        }

        async fn list_tasks(&self) -> Result<Vec<TaskView>> {
            self.inner.list_tasks().await
        }

        async fn list_tasks_for_owner(
            &self,
            owner_id: UserId,
            range: TaskRange,
        ) -> Result<Vec<TaskView>> {
            self.inner.list_tasks_for_owner(owner_id, range).await
        }
    }

    #[tokio::test]
    async fn test_projects_resolved_in_one_call_for_whole_batch() {
        let sqlite = setup_test_store().await;
        let user = seed_user(&sqlite, 1, Role::Employee).await;
        let ledger = seed_project(&sqlite, "Ledger", &[user.id]).await;
        let payroll = seed_project(&sqlite, "Payroll", &[user.id]).await;
        let store = CountingStore::new(sqlite);

        let mut rows = Vec::new();
        for i in 0..30 {
            let mut row = create_row(today());
            row.project_id = Some(match i % 3 {
                0 => ledger.id,
                1 => payroll.id,
                _ => 999,
            });
            rows.push(row);
        }

        let report = reconcile(&store, &actor(user.id), &rows, ReconcileMode::Create, now())
            .await
            .unwrap();

        assert_eq!(store.project_lookups.load(Ordering::SeqCst), 1);
        assert_eq!(store.task_lookups.load(Ordering::SeqCst), 0);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
        assert_eq!(report.created_count, 20);
        assert_eq!(report.failed_count, 10);
        assert!(report.errors.iter().all(|e| e.error == "invalid project"));
        assert_eq!(store.inner.list_tasks().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_missing_task_does_not_block_the_rest_of_the_batch() {
        let sqlite = setup_test_store().await;
        let user = seed_user(&sqlite, 1, Role::Employee).await;
        let project = seed_project(&sqlite, "Ledger", &[user.id]).await;
        let owner = actor(user.id);

        let seed: Vec<RawTaskRow> = (0..4)
            .map(|_| {
                let mut row = create_row(today());
                row.project_id = Some(project.id);
                row
            })
            .collect();
        reconcile(&sqlite, &owner, &seed, ReconcileMode::Create, now())
            .await
            .unwrap();

        let store = CountingStore::new(sqlite);
        let rows: Vec<RawTaskRow> = [1, 2, 404, 3, 4]
            .into_iter()
            .map(|id| RawTaskRow {
                task_id: Some(id),
                actual_duration: Some(60),
                ..RawTaskRow::default()
            })
            .collect();

        let report = reconcile(&store, &owner, &rows, ReconcileMode::Update, now())
            .await
            .unwrap();

        assert_eq!(report.updated_count, 4);
        assert_eq!(report.failed_count, 1);
        assert_eq!(
            report.errors,
            vec![RowError {
                row_index: 2,
                task_id: Some(404),
                error: "task not found".to_string(),
            }]
        );
        assert_eq!(store.task_lookups.load(Ordering::SeqCst), 1);
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);
        for id in 1..=4 {
            let task = store.inner.find_task(id).await.unwrap().unwrap();
            assert_eq!(task.actual_duration, 60);
        }
    }

    #[tokio::test]
    async fn test_oversized_update_batch_reports_every_row() {
        let store = setup_test_store().await;
        let user = seed_user(&store, 1, Role::Employee).await;
        let rows: Vec<RawTaskRow> = (1..=33_000)
            .map(|id| RawTaskRow {
                task_id: Some(id),
                actual_duration: Some(5),
                ..RawTaskRow::default()
            })
            .collect();

        let report = reconcile(&store, &actor(user.id), &rows, ReconcileMode::Update, now())
            .await
            .unwrap();

        assert_eq!(report.updated_count, 0);
        assert_eq!(report.failed_count, 33_000);
        assert!(report.errors.iter().all(|e| e.error == "task not found"));
        assert_eq!(report.errors[32_999].task_id, Some(33_000));
    }

    #[tokio::test]
    async fn test_same_update_twice_applies_both_times() {
        let store = setup_test_store().await;
        let user = seed_user(&store, 1, Role::Employee).await;
        let project = seed_project(&store, "Ledger", &[user.id]).await;
        let owner = actor(user.id);
        let mut create = create_row(today());
        create.project_id = Some(project.id);
        reconcile(&store, &owner, &[create], ReconcileMode::Create, now())
            .await
            .unwrap();

        let mut row = update_row(1);
        row.status = Some("completed".to_string());
        row.actual_duration = Some(180);
        for _ in 0..2 {
            let report = reconcile(
                &store,
                &owner,
                std::slice::from_ref(&row),
                ReconcileMode::Update,
                now(),
            )
            .await
            .unwrap();
            assert_eq!(report.updated_count, 1);
            assert!(report.errors.is_empty());
        }

        let task = store.find_task(1).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.actual_duration, 180);
    }

    #[tokio::test]
    async fn test_soft_delete_rules() {
        let store = setup_test_store().await;
        let user = seed_user(&store, 1, Role::Employee).await;
        let colleague = seed_user(&store, 2, Role::Manager).await;
        let project = seed_project(&store, "Ledger", &[user.id]).await;
        store
            .insert_tasks(&[
                crate::database::tests::new_task(user.id, project.id, today()),
                crate::database::tests::new_task(user.id, project.id, today() - Duration::days(15)),
            ])
            .await
            .unwrap();
        let owner = actor(user.id);

        let err = soft_delete(&store, &Actor::from(&colleague), 1, now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = soft_delete(&store, &owner, 2, now()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        soft_delete(&store, &owner, 1, now()).await.unwrap();
        let err = soft_delete(&store, &owner, 1, now()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        // The row is still there, only flagged.
        let task = store.find_task(1).await.unwrap().unwrap();
        assert!(task.is_deleted);
        assert_eq!(task.deleted_by, Some(user.id));
    }
}
