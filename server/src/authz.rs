// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
//! Role and ownership predicates. Callers turn `false` into an error.
use common::{Actor, Project, Role, Task, UserId};

/// Only the owner may edit or delete a task, whatever their role.
pub fn can_mutate_task(actor: &Actor, task: &Task) -> bool {
    actor.id == task.owner_id
}

pub fn can_view_tasks_of(actor: &Actor, target: UserId) -> bool {
    actor.id == target || matches!(actor.role, Role::Admin | Role::Manager)
}

pub fn can_create_project(actor: &Actor) -> bool {
    actor.role == Role::Admin
}

pub fn can_add_contributor(actor: &Actor, _project: &Project) -> bool {
    actor.role == Role::Admin
}

pub fn can_create_user(actor: &Actor) -> bool {
    actor.role == Role::Admin
}
