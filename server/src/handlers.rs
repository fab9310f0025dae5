// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::auth::{self, CurrentActor};
use crate::authz;
use crate::database::{ProjectStore, SessionStore, UserStore};
use crate::error::ServiceError;
use crate::query;
use crate::reconcile::{self, ReconcileMode};
use crate::routes::AppState;
use axum::{
    extract::{Json, Path, Query, State},
    http::{StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use common::{
    Actor, AddContributorPayload, BatchReport, Contributor, CreateProjectPayload,
    CreateUserPayload, CreatedUser, EmployeeTasks, EmployeeTasksQuery, Metadata, NewProject,
    NewUser, Project, ProjectDetail, ProjectId, ProjectRole, ProjectStatus, Task,
    TaskBatchPayload, TaskCategory, TaskId, TaskStage, TaskStatus, TaskView,
};
use tracing::{debug, error, info};

/// Handler returning the authenticated caller.
pub async fn current_user(CurrentActor { actor, .. }: CurrentActor) -> Json<Actor> {
    Json(actor)
}

/// Handler revoking the presented session token and clearing its cookie.
pub async fn logout(
    State(state): State<AppState>,
    CurrentActor { actor, token }: CurrentActor,
) -> Result<impl IntoResponse, AppError> {
    state.store.delete_session(&token).await?;
    info!("User {} logged out.", actor.id);
    Ok((
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, auth::clear_session_cookie())],
    ))
}

/// Handler for creating a user account (admin only).
pub async fn create_user(
    State(state): State<AppState>,
    CurrentActor { actor, .. }: CurrentActor,
    Json(payload): Json<CreateUserPayload>,
) -> Result<(StatusCode, Json<CreatedUser>), AppError> {
    if !authz::can_create_user(&actor) {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "Only administrators can create users.",
        ));
    }

    let (Some(emp_id), Some(name), Some(email), Some(role), Some(joining_date)) = (
        payload.emp_id,
        payload.name.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        payload.email.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        payload.role,
        payload.joining_date,
    ) else {
        error!("Validation failed: required user fields are missing.");
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "Required fields are missing.",
        ));
    };
    let email = email.to_lowercase();

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "User with this email already exists.",
        ));
    }
    if state.store.find_user_by_emp_id(emp_id).await?.is_some() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            &format!("User with empId {emp_id} already exists."),
        ));
    }

    let reports_to = match payload.reports_to {
        Some(manager_emp_id) => {
            let manager = state
                .store
                .find_user_by_emp_id(manager_emp_id)
                .await?
                .ok_or_else(|| {
                    AppError::new(StatusCode::BAD_REQUEST, "reporting manager not found")
                })?;
            Some(manager.id)
        }
        None => None,
    };

    let user = state
        .store
        .insert_user(NewUser {
            emp_id,
            name: name.to_string(),
            email,
            role,
            reports_to,
            joining_date,
        })
        .await?
        .ok_or_else(|| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                "User with this email or empId already exists.",
            )
        })?;
    let access_token =
        auth::issue_session(state.store.as_ref(), user.id, state.clock.now_utc()).await?;

    info!("User created with ID {} by admin {}", user.id, actor.id);
    Ok((
        StatusCode::CREATED,
        Json(CreatedUser { user, access_token }),
    ))
}

/// Handler listing every project.
pub async fn list_projects(
    State(state): State<AppState>,
    _actor: CurrentActor,
) -> Result<Json<Vec<Project>>, AppError> {
    let projects = state.store.list_projects().await?;
    info!("Successfully retrieved {} projects.", projects.len());
    Ok(Json(projects))
}

/// Handler returning one project with its contributors.
pub async fn get_project(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path(project_id): Path<ProjectId>,
) -> Result<Json<ProjectDetail>, AppError> {
    let detail = state
        .store
        .find_project_detail(project_id)
        .await?
        .ok_or_else(|| project_not_found(project_id))?;
    Ok(Json(detail))
}

/// Handler for creating a project (admin only).
pub async fn create_project(
    State(state): State<AppState>,
    CurrentActor { actor, .. }: CurrentActor,
    Json(payload): Json<CreateProjectPayload>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    if !authz::can_create_project(&actor) {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "Only administrators can create projects.",
        ));
    }

    let name = payload
        .project_name
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if name.is_empty() {
        error!("Validation failed: project name is empty.");
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "Project name is required.",
        ));
    }

    let project = state
        .store
        .insert_project(NewProject {
            name: name.to_string(),
            status: payload.status.unwrap_or(ProjectStatus::Upcoming),
            start_date: payload.start_date,
            go_live_date: payload.go_live_date,
        })
        .await?
        .ok_or_else(|| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                "A project with this name already exists.",
            )
        })?;

    info!("Project created successfully with ID: {}", project.id);
    Ok((StatusCode::CREATED, Json(project)))
}

/// Handler adding an employee to a project (admin only).
pub async fn add_contributor(
    State(state): State<AppState>,
    CurrentActor { actor, .. }: CurrentActor,
    Path(project_id): Path<ProjectId>,
    Json(payload): Json<AddContributorPayload>,
) -> Result<(StatusCode, Json<ProjectDetail>), AppError> {
    let project = state
        .store
        .find_project(project_id)
        .await?
        .ok_or_else(|| project_not_found(project_id))?;

    if !authz::can_add_contributor(&actor, &project) {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "Only administrators can add contributors.",
        ));
    }

    let (Some(emp_id), Some(project_role)) = (payload.emp_id, payload.project_role) else {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "Invalid fields."));
    };

    let employee = state
        .store
        .find_user_by_emp_id(emp_id)
        .await?
        .ok_or_else(|| {
            AppError::new(
                StatusCode::NOT_FOUND,
                "Employee with given empId does not exist.",
            )
        })?;

    let added = state
        .store
        .add_contributor(Contributor {
            project_id,
            user_id: employee.id,
            project_role,
            project_modules: payload
                .project_modules
                .map(|m| m.trim().to_string())
                .unwrap_or_default(),
            has_edit_access: payload.has_edit_access.unwrap_or(false),
        })
        .await?;
    if !added {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "employee already added to this project",
        ));
    }

    info!(
        "Employee {} added to project {} as {}",
        emp_id, project_id, project_role
    );
    let detail = state
        .store
        .find_project_detail(project_id)
        .await?
        .ok_or_else(|| project_not_found(project_id))?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// Handler returning the selectable enumerations and the project list.
pub async fn metadata(
    State(state): State<AppState>,
    _actor: CurrentActor,
) -> Result<Json<Metadata>, AppError> {
    let projects = state.store.list_projects().await?;
    Ok(Json(Metadata {
        categories: TaskCategory::ALL.to_vec(),
        stages: TaskStage::ALL.to_vec(),
        statuses: TaskStatus::ALL.to_vec(),
        project_statuses: ProjectStatus::ALL.to_vec(),
        project_roles: ProjectRole::ALL.to_vec(),
        projects,
    }))
}

/// Handler for listing every live task.
pub async fn list_tasks(
    State(state): State<AppState>,
    _actor: CurrentActor,
) -> Result<Json<Vec<TaskView>>, AppError> {
    let tasks = query::list_all(state.store.as_ref()).await?;
    info!("Successfully retrieved {} tasks.", tasks.len());
    Ok(Json(tasks))
}

/// Handler for listing the tasks of the caller or of another employee.
pub async fn list_employee_tasks(
    State(state): State<AppState>,
    CurrentActor { actor, .. }: CurrentActor,
    Query(params): Query<EmployeeTasksQuery>,
) -> Result<Json<EmployeeTasks>, AppError> {
    let listed =
        query::list_for_employee(state.store.as_ref(), &actor, &params, state.clock.now()).await?;
    info!(
        "Successfully retrieved {} tasks between {} and {}.",
        listed.count, listed.range.from_date, listed.range.to_date
    );
    Ok(Json(listed))
}

/// Handler returning one task.
pub async fn get_task(
    State(state): State<AppState>,
    CurrentActor { actor, .. }: CurrentActor,
    Path(task_id): Path<TaskId>,
) -> Result<Json<Task>, AppError> {
    let task = query::get_task(state.store.as_ref(), &actor, task_id).await?;
    Ok(Json(task))
}

/// Handler for submitting a batch of new tasks.
pub async fn create_tasks(
    state: State<AppState>,
    actor: CurrentActor,
    payload: Json<TaskBatchPayload>,
) -> Result<Json<BatchReport>, AppError> {
    run_batch(state, actor, payload, ReconcileMode::Create).await
}

/// Handler for submitting a batch of updates to existing tasks.
pub async fn update_tasks(
    state: State<AppState>,
    actor: CurrentActor,
    payload: Json<TaskBatchPayload>,
) -> Result<Json<BatchReport>, AppError> {
    run_batch(state, actor, payload, ReconcileMode::Update).await
}

/// Handler for a mixed batch: rows with `taskId` update, the rest create.
pub async fn sync_tasks(
    state: State<AppState>,
    actor: CurrentActor,
    payload: Json<TaskBatchPayload>,
) -> Result<Json<BatchReport>, AppError> {
    run_batch(state, actor, payload, ReconcileMode::Upsert).await
}

async fn run_batch(
    State(state): State<AppState>,
    CurrentActor { actor, .. }: CurrentActor,
    Json(payload): Json<TaskBatchPayload>,
    mode: ReconcileMode,
) -> Result<Json<BatchReport>, AppError> {
    debug!(
        "Received {:?} batch of {} rows from user {}",
        mode,
        payload.tasks.len(),
        actor.id
    );
    if payload.tasks.is_empty() {
        error!("Validation failed: empty task batch.");
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "Tasks array is required.",
        ));
    }

    let report = reconcile::reconcile(
        state.store.as_ref(),
        &actor,
        &payload.tasks,
        mode,
        state.clock.now(),
    )
    .await?;
    Ok(Json(report))
}

/// Handler for soft-deleting a task by ID.
pub async fn delete_task(
    State(state): State<AppState>,
    CurrentActor { actor, .. }: CurrentActor,
    Path(task_id): Path<TaskId>, // Extract task ID from the URL path
) -> Result<StatusCode, AppError> {
    debug!("Attempting to delete task with ID: {}", task_id);

    reconcile::soft_delete(state.store.as_ref(), &actor, task_id, state.clock.now()).await?;

    info!("Task with ID {} deleted successfully.", task_id);
    Ok(StatusCode::NO_CONTENT) // 204 No Content for successful deletion
}

fn project_not_found(project_id: ProjectId) -> AppError {
    AppError::new(
        StatusCode::NOT_FOUND,
        &format!("Project with ID {project_id} not found."),
    )
}

// --- Custom Error Handling ---

/// Our custom error type for the application.
#[derive(Debug)]
pub struct AppError {
    code: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(code: StatusCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

/// Allows converting an `anyhow::Error` (coming from `database.rs`)
/// into our `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Log the internal error for debugging.
        tracing::error!("Internal server error: {:?}", err);
        Self {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            message: "An internal error occurred.".to_string(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(message) => Self::new(StatusCode::NOT_FOUND, &message),
            ServiceError::Forbidden(message) => Self::new(StatusCode::FORBIDDEN, &message),
            ServiceError::Invalid(message) => Self::new(StatusCode::BAD_REQUEST, &message),
            ServiceError::Store(err) => err.into(),
        }
    }
}

/// Allows Axum to convert our `AppError` into an HTTP `Response`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(
            "Responding with error: status_code={}, message={}",
            self.code.as_u16(),
            self.message
        );
        (
            self.code,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
