use crate::access::{self, Session};
use crate::auth::SharedState;
use crate::sla::{self, SlaReport};
use crate::task::{Task, TaskRecord};
use crate::workflow::{self, TaskStatus};
use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A task as one caller sees it: the raw record plus everything the UI
/// would otherwise recompute inline.
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub status_label: String,
    pub next_status: Option<TaskStatus>,
    pub read_only: bool,
    pub can_write: bool,
    pub can_assign: bool,
    pub sla: SlaReport,
}

impl TaskView {
    pub fn new(task: &Task, session: &Session, now: DateTime<Utc>) -> Self {
        TaskView {
            record: task.to_record(),
            status_label: workflow::display_label(task.status.as_str()).into_owned(),
            next_status: task.status.next(),
            read_only: task.is_read_only(),
            can_write: access::can_write(task, Some(session)),
            can_assign: access::can_assign(task, Some(session)),
            sla: sla::sla_health(task.priority, task.sla_deadline, task.status, now),
        }
    }
}

// GET /api/tasks
pub async fn list_tasks(
    State(state): State<SharedState>,
    Extension(session): Extension<Session>,
) -> Json<Vec<TaskView>> {
    let now = Utc::now();
    let world = state.world();
    let mut views: Vec<TaskView> = world
        .visible_tasks(&session)
        .map(|t| TaskView::new(t, &session, now))
        .collect();
    views.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
    Json(views)
}

// GET /api/tasks/queue
pub async fn production_queue(
    State(state): State<SharedState>,
    Extension(session): Extension<Session>,
) -> Json<Vec<TaskView>> {
    let now = Utc::now();
    let world = state.world();
    let views = world
        .production_queue(&session)
        .into_iter()
        .map(|t| TaskView::new(t, &session, now))
        .collect();
    Json(views)
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub revision: u64,
}

// GET /api/health
pub async fn health(State(state): State<SharedState>) -> (StatusCode, Json<Health>) {
    let revision = state.world().revision;
    (StatusCode::OK, Json(Health { status: "ok", revision }))
}
