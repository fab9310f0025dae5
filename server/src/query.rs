// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::authz;
use crate::database::{TaskStore, UserStore};
use crate::error::ServiceError;
use crate::window::EditWindow;

use chrono::NaiveDateTime;
use common::{Actor, EmployeeTasks, EmployeeTasksQuery, Task, TaskId, TaskRange, TaskView};
use tracing::debug;

/// Every live task, newest first, with owner and project names attached.
pub async fn list_all<S>(store: &S) -> Result<Vec<TaskView>, ServiceError>
where
    S: TaskStore + ?Sized,
{
    Ok(store.list_tasks().await?)
}

/// Uses the explicit range when both ends are given, otherwise the editable window.
pub fn resolve_range(
    query: &EmployeeTasksQuery,
    now: NaiveDateTime,
) -> Result<TaskRange, ServiceError> {
    match (query.from_date, query.to_date) {
        (Some(from_date), Some(to_date)) if from_date > to_date => Err(ServiceError::invalid(
            "fromDate must not be after toDate",
        )),
        (Some(from_date), Some(to_date)) => Ok(TaskRange { from_date, to_date }),
        _ => Ok(EditWindow::at(now).as_range()),
    }
}

/// Lists the tasks of the actor, or of another employee when `empId` is given.
///
/// The employee lookup comes before the permission check, so an unknown
/// `empId` reports "employee not found" whatever the actor's role.
pub async fn list_for_employee<S>(
    store: &S,
    actor: &Actor,
    query: &EmployeeTasksQuery,
    now: NaiveDateTime,
) -> Result<EmployeeTasks, ServiceError>
where
    S: UserStore + TaskStore + ?Sized,
{
    let target_id = match query.emp_id {
        Some(emp_id) => {
            let employee = store
                .find_user_by_emp_id(emp_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("employee not found"))?;
            if !authz::can_view_tasks_of(actor, employee.id) {
                return Err(ServiceError::forbidden(
                    "not allowed to view other users' tasks",
                ));
            }
            employee.id
        }
        None => actor.id,
    };

    let range = resolve_range(query, now)?;
    debug!(
        "Listing tasks of user {} from {} to {}",
        target_id, range.from_date, range.to_date
    );
    let tasks = store.list_tasks_for_owner(target_id, range).await?;

    Ok(EmployeeTasks {
        range,
        count: tasks.len(),
        tasks,
    })
}

/// Fetches one live task the actor is allowed to see.
pub async fn get_task<S>(store: &S, actor: &Actor, id: TaskId) -> Result<Task, ServiceError>
where
    S: TaskStore + ?Sized,
{
    let task = store
        .find_task(id)
        .await?
        .filter(|task| !task.is_deleted)
        .ok_or_else(|| ServiceError::not_found(format!("Task with ID {id} not found.")))?;

    if !authz::can_view_tasks_of(actor, task.owner_id) {
        return Err(ServiceError::forbidden("not allowed to view other users' tasks"));
    }
    Ok(task)
}
