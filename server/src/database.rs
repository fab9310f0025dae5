// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::resolver::ProjectRef;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    Contributor, ContributorView, NewProject, NewTask, NewUser, Project, ProjectDetail, ProjectId,
    Task, TaskId, TaskPatch, TaskRange, TaskView, User, UserId,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{migrate::MigrateDatabase, QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Rows per multi-row INSERT, keeps each statement well under SQLite's bind limit.
const INSERT_CHUNK: usize = 500;
/// Ids per `IN (...)` list, for the same reason.
const LOOKUP_CHUNK: usize = 500;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        emp_id INTEGER NOT NULL UNIQUE,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL,
        reports_to INTEGER NULL REFERENCES users(id),
        joining_date DATE NOT NULL,
        created_at TIMESTAMP NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        start_date DATE NULL,
        go_live_date DATE NULL,
        created_at TIMESTAMP NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_contributors (
        project_id INTEGER NOT NULL REFERENCES projects(id),
        user_id INTEGER NOT NULL REFERENCES users(id),
        project_role TEXT NOT NULL,
        project_modules TEXT NOT NULL,
        has_edit_access BOOLEAN NOT NULL DEFAULT 0,
        PRIMARY KEY (project_id, user_id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL REFERENCES users(id),
        project_id INTEGER NOT NULL REFERENCES projects(id),
        task_date DATE NOT NULL,
        category TEXT NOT NULL,
        stage TEXT NOT NULL,
        description TEXT NOT NULL,
        planned_duration INTEGER NOT NULL CHECK (planned_duration >= 0),
        actual_duration INTEGER NOT NULL DEFAULT 0 CHECK (actual_duration >= 0),
        status TEXT NOT NULL,
        is_deleted BOOLEAN NOT NULL DEFAULT 0,
        deleted_at TIMESTAMP WITH TIME ZONE NULL,
        deleted_by INTEGER NULL REFERENCES users(id),
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_owner_date ON tasks (owner_id, task_date);",
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id),
        created_at TIMESTAMP NOT NULL,
        -- Unix seconds.
        expires_at INTEGER NOT NULL
    );
    "#,
];

const TASK_VIEW_SELECT: &str = r#"
    SELECT t.*, u.name AS owner_name, u.email AS owner_email, u.emp_id AS owner_emp_id,
           p.name AS project_name
    FROM tasks t
    JOIN users u ON u.id = t.owner_id
    JOIN projects p ON p.id = t.project_id
"#;

/// Establishes the database connection pool.
/// If the database does not exist, it creates it, then makes sure every table exists.
pub async fn establish_connection_pool(database_url: &str) -> Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:");

    let mut options = SqlitePoolOptions::new();
    if in_memory {
        // Each connection to :memory: is its own database, so keep exactly one alive.
        options = options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!("Creating database {}", database_url);
        if let Some(parent) = database_file(database_url).and_then(Path::parent) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        Sqlite::create_database(database_url)
            .await
            .context("Failed to create database")?;
    } else {
        info!("Database already exists.");
    }

    let pool = options
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Creates all tables and indexes if they are missing.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to create schema")?;
    }
    info!("Database schema is ready.");
    Ok(())
}

fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

fn database_file(database_url: &str) -> Option<&Path> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    (!path.is_empty()).then(|| Path::new(path))
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<User>>;
    async fn find_user_by_emp_id(&self, emp_id: i64) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn count_users(&self) -> Result<i64>;
    /// Returns `None` when the empId or email is already taken.
    async fn insert_user(&self, user: NewUser) -> Result<Option<User>>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn find_project(&self, id: ProjectId) -> Result<Option<Project>>;
    async fn find_project_detail(&self, id: ProjectId) -> Result<Option<ProjectDetail>>;
    /// Looks up every id in one call. Unknown ids are simply absent from the result.
    async fn find_projects_by_ids(&self, ids: &[ProjectId]) -> Result<Vec<ProjectRef>>;
    /// Returns `None` when the name is already taken.
    async fn insert_project(&self, project: NewProject) -> Result<Option<Project>>;
    /// Returns false when the user already contributes to the project.
    async fn add_contributor(&self, contributor: Contributor) -> Result<bool>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Returns the task even when it is soft-deleted.
    async fn find_task(&self, id: TaskId) -> Result<Option<Task>>;
    async fn find_tasks_by_ids(&self, ids: &[TaskId]) -> Result<Vec<Task>>;
    async fn insert_tasks(&self, tasks: &[NewTask]) -> Result<usize>;
    async fn update_tasks(&self, patches: &[TaskPatch]) -> Result<usize>;
    async fn soft_delete_task(&self, id: TaskId, deleted_by: UserId) -> Result<bool>;
    async fn list_tasks(&self) -> Result<Vec<TaskView>>;
    async fn list_tasks_for_owner(&self, owner_id: UserId, range: TaskRange)
    -> Result<Vec<TaskView>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        token: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
    /// Resolves a token that has not expired at `now`.
    async fn find_session_user(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>>;
    async fn delete_session(&self, token: &str) -> Result<bool>;
}

/// SQLite-backed implementation of every store trait.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch user {id}"))
    }

    async fn find_user_by_emp_id(&self, emp_id: i64) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE emp_id = ?")
            .bind(emp_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch user with empId {emp_id}"))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by email")
    }

    async fn count_users(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")
    }

    async fn insert_user(&self, user: NewUser) -> Result<Option<User>> {
        let created_at = Utc::now();
        debug!(
            "Insert user: emp_id={}, email={}, role={}",
            user.emp_id, user.email, user.role
        );

        let result = sqlx::query(
            "INSERT INTO users (emp_id, name, email, role, reports_to, joining_date, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.emp_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role)
        .bind(user.reports_to)
        .bind(user.joining_date)
        .bind(created_at)
        .execute(&self.pool)
        .await;
        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => {
                debug!(
                    "User with empId {} or email {} already exists.",
                    user.emp_id, user.email
                );
                return Ok(None);
            }
            Err(e) => return Err(e).context("Failed to insert user into DB"),
        };

        Ok(Some(User {
            id,
            emp_id: user.emp_id,
            name: user.name,
            email: user.email,
            role: user.role,
            reports_to: user.reports_to,
            joining_date: user.joining_date,
            created_at,
        }))
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list projects")
    }

    async fn find_project(&self, id: ProjectId) -> Result<Option<Project>> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch project {id}"))
    }

    async fn find_project_detail(&self, id: ProjectId) -> Result<Option<ProjectDetail>> {
        let Some(project) = self.find_project(id).await? else {
            return Ok(None);
        };

        let contributors = sqlx::query_as::<_, ContributorView>(
            r#"
            SELECT c.*, u.emp_id, u.name, u.email
            FROM project_contributors c
            JOIN users u ON u.id = c.user_id
            WHERE c.project_id = ?
            ORDER BY u.name ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch contributors of project {id}"))?;

        Ok(Some(ProjectDetail {
            project,
            contributors,
        }))
    }

    async fn find_projects_by_ids(&self, ids: &[ProjectId]) -> Result<Vec<ProjectRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_project: HashMap<ProjectId, ProjectRef> = HashMap::new();
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT id, name FROM projects WHERE id IN (");
            push_id_list(&mut qb, chunk);
            let projects: Vec<(ProjectId, String)> = qb
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch projects by id")?;
            by_project.extend(
                projects
                    .into_iter()
                    .map(|(id, name)| (id, ProjectRef::new(id, name))),
            );

            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT project_id, user_id FROM project_contributors WHERE project_id IN (",
            );
            push_id_list(&mut qb, chunk);
            let memberships: Vec<(ProjectId, UserId)> = qb
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch project contributors by project id")?;
            for (project_id, user_id) in memberships {
                if let Some(project) = by_project.get_mut(&project_id) {
                    project.contributor_ids.insert(user_id);
                }
            }
        }

        Ok(by_project.into_values().collect())
    }

    async fn insert_project(&self, project: NewProject) -> Result<Option<Project>> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO projects (name, status, start_date, go_live_date, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&project.name)
        .bind(project.status)
        .bind(project.start_date)
        .bind(project.go_live_date)
        .bind(created_at)
        .execute(&self.pool)
        .await;
        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => {
                debug!("Project named {:?} already exists.", project.name);
                return Ok(None);
            }
            Err(e) => return Err(e).context("Failed to insert project into DB"),
        };

        Ok(Some(Project {
            id,
            name: project.name,
            status: project.status,
            start_date: project.start_date,
            go_live_date: project.go_live_date,
            created_at,
        }))
    }

    async fn add_contributor(&self, contributor: Contributor) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO project_contributors (project_id, user_id, project_role, project_modules, has_edit_access)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (project_id, user_id) DO NOTHING
            "#,
        )
        .bind(contributor.project_id)
        .bind(contributor.user_id)
        .bind(contributor.project_role)
        .bind(&contributor.project_modules)
        .bind(contributor.has_edit_access)
        .execute(&self.pool)
        .await
        .context("Failed to add project contributor")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn find_task(&self, id: TaskId) -> Result<Option<Task>> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch task {id}"))
    }

    async fn find_tasks_by_ids(&self, ids: &[TaskId]) -> Result<Vec<Task>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tasks = Vec::new();
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT * FROM tasks WHERE id IN (");
            push_id_list(&mut qb, chunk);
            let found = qb
                .build_query_as::<Task>()
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch tasks by id")?;
            tasks.extend(found);
        }
        Ok(tasks)
    }

    async fn insert_tasks(&self, tasks: &[NewTask]) -> Result<usize> {
        if tasks.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut inserted = 0;

        for chunk in tasks.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO tasks (owner_id, project_id, task_date, category, stage, description, planned_duration, actual_duration, status, is_deleted, created_at, updated_at) ",
            );
            qb.push_values(chunk, |mut b, task| {
                b.push_bind(task.owner_id)
                    .push_bind(task.project_id)
                    .push_bind(task.task_date)
                    .push_bind(task.category)
                    .push_bind(task.stage)
                    .push_bind(task.description.clone())
                    .push_bind(task.planned_duration)
                    .push_bind(task.actual_duration)
                    .push_bind(task.status)
                    .push_bind(false)
                    .push_bind(now)
                    .push_bind(now);
            });

            let result = qb
                .build()
                .execute(&self.pool)
                .await
                .context("Failed to insert tasks into DB")?;
            inserted += result.rows_affected() as usize;
        }

        info!("Inserted {} tasks.", inserted);
        Ok(inserted)
    }

    async fn update_tasks(&self, patches: &[TaskPatch]) -> Result<usize> {
        if patches.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to start task update transaction")?;
        let mut updated = 0;

        for patch in patches {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tasks SET updated_at = ");
            qb.push_bind(now);
            if let Some(project_id) = patch.project_id {
                qb.push(", project_id = ").push_bind(project_id);
            }
            if let Some(task_date) = patch.task_date {
                qb.push(", task_date = ").push_bind(task_date);
            }
            if let Some(category) = patch.category {
                qb.push(", category = ").push_bind(category);
            }
            if let Some(stage) = patch.stage {
                qb.push(", stage = ").push_bind(stage);
            }
            if let Some(description) = &patch.description {
                qb.push(", description = ").push_bind(description.clone());
            }
            if let Some(planned) = patch.planned_duration {
                qb.push(", planned_duration = ").push_bind(planned);
            }
            if let Some(actual) = patch.actual_duration {
                qb.push(", actual_duration = ").push_bind(actual);
            }
            if let Some(status) = patch.status {
                qb.push(", status = ").push_bind(status);
            }
            qb.push(" WHERE id = ")
                .push_bind(patch.task_id)
                .push(" AND is_deleted = 0");

            let result = qb
                .build()
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to update task {}", patch.task_id))?;
            updated += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .context("Failed to commit task updates")?;

        info!("Updated {} tasks.", updated);
        Ok(updated)
    }

    /// Marks a task deleted without removing the row.
    /// Returns false if no live task with the given ID was found.
    async fn soft_delete_task(&self, id: TaskId, deleted_by: UserId) -> Result<bool> {
        debug!("Attempting to soft delete task with ID: {}", id);
        let now: DateTime<Utc> = Utc::now();
        let result = sqlx::query(
            "UPDATE tasks SET is_deleted = 1, deleted_at = ?, deleted_by = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(now)
        .bind(deleted_by)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to soft delete task with ID: {id}"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_tasks(&self) -> Result<Vec<TaskView>> {
        let sql = format!(
            "{TASK_VIEW_SELECT} WHERE t.is_deleted = 0 ORDER BY t.created_at DESC, t.id DESC"
        );
        sqlx::query_as::<_, TaskView>(&sql)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list tasks")
    }

    async fn list_tasks_for_owner(
        &self,
        owner_id: UserId,
        range: TaskRange,
    ) -> Result<Vec<TaskView>> {
        let sql = format!(
            "{TASK_VIEW_SELECT} WHERE t.owner_id = ? AND t.is_deleted = 0 AND t.task_date BETWEEN ? AND ? ORDER BY t.created_at DESC, t.id DESC"
        );
        sqlx::query_as::<_, TaskView>(&sql)
            .bind(owner_id)
            .bind(range.from_date)
            .bind(range.to_date)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list tasks of user {owner_id}"))
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(
        &self,
        token: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token)
        .bind(user_id)
        .bind(Utc::now())
        .bind(expires_at.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to create session")?;
        Ok(())
    }

    async fn find_session_user(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT u.* FROM sessions s JOIN users u ON u.id = s.user_id WHERE s.token = ? AND s.expires_at > ?",
        )
        .bind(token)
        .bind(now.timestamp())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve session")
    }

    async fn delete_session(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("Failed to delete session")?;
        Ok(result.rows_affected() > 0)
    }
}
