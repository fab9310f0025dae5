// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::database::SqliteStore;
use crate::handlers;
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Source of "now" for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    /// Local wall-clock time, so the editable window follows local calendar days.
    System,
    Fixed(NaiveDateTime),
}

impl Clock {
    pub fn now(&self) -> NaiveDateTime {
        match self {
            Clock::System => Local::now().naive_local(),
            Clock::Fixed(now) => *now,
        }
    }

    /// The current instant, for session expiry. A fixed clock reads as UTC.
    pub fn now_utc(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(now) => now.and_utc(),
        }
    }
}

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub clock: Clock,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            store: Arc::new(SqliteStore::new(pool)),
            clock: Clock::System,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// Creates and configures the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/me", get(handlers::current_user))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/users", post(handlers::create_user))
        .route(
            "/api/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route("/api/projects/{id}", get(handlers::get_project))
        .route(
            "/api/projects/{id}/contributors",
            post(handlers::add_contributor),
        )
        // `GET` lists every task, `POST` creates a batch, `PUT` updates a batch
        .route(
            "/api/tasks",
            get(handlers::list_tasks)
                .post(handlers::create_tasks)
                .put(handlers::update_tasks),
        )
        .route("/api/tasks/employee", get(handlers::list_employee_tasks))
        .route("/api/tasks/sync", post(handlers::sync_tasks))
        .route(
            "/api/tasks/{id}",
            get(handlers::get_task).delete(handlers::delete_task),
        )
        .route("/api/meta", get(handlers::metadata))
        .layer(TraceLayer::new_for_http())
        // Adds the shared store and clock to the application state
        .with_state(state)
}
