use crate::access::{self, Action, Grant, Module, OrgRole, Session};
use crate::sla::{self, Priority};
use crate::task::{DocumentRef, Task, Visibility};
use crate::workflow::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Events kept for reconnect replay. Older clients get a full snapshot.
pub const LOG_CAPACITY: usize = 1024;

// ── Accounts ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub super_admin: bool,
    pub org_id: Option<Uuid>,
    pub role: Option<OrgRole>,
    pub department: Option<String>,
    pub grants: HashSet<Grant>,
}

impl Account {
    pub fn session(&self) -> Session {
        Session {
            user_id: self.id,
            super_admin: self.super_admin,
            org_id: self.org_id,
            role: self.role,
            department: self.department.clone(),
            grants: self.grants.clone(),
        }
    }
}

// ── Commands (client → server) ────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    CreateTask {
        title: String,
        description: Option<String>,
        priority: Priority,
        visibility: Visibility,
        department: Option<String>,
        assignees: Vec<Uuid>,
        deadline: Option<DateTime<Utc>>,
        document: Option<DocumentRef>,
    },
    /// Move one stage forward. `expected` rejects the command if another
    /// client advanced the task first.
    AdvanceStatus {
        task_id: Uuid,
        expected: Option<TaskStatus>,
    },
    ArchiveTask {
        task_id: Uuid,
    },
    /// `None` leaves a field unchanged. For description and deadline,
    /// `Some(None)` clears it.
    EditTask {
        task_id: Uuid,
        title: Option<String>,
        description: Option<Option<String>>,
        priority: Option<Priority>,
        deadline: Option<Option<DateTime<Utc>>>,
    },
    Reassign {
        task_id: Uuid,
        assignees: Vec<Uuid>,
        visibility: Visibility,
        department: Option<String>,
    },
    DeleteTask {
        task_id: Uuid,
    },
}

// ── Events (server → clients) ─────────────────────────────────

/// What actually happened. Each event carries the revision it was applied
/// at and the task as it stands afterwards (before removal, for deletes),
/// so every recipient can be filtered by visibility. A reassignment also
/// carries the task as it stood before, since it may change who can see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TaskCreated { revision: u64, task: Task },
    StatusAdvanced { revision: u64, from: TaskStatus, task: Task },
    TaskArchived { revision: u64, task: Task },
    TaskEdited { revision: u64, task: Task },
    TaskReassigned { revision: u64, previous: Task, task: Task },
    TaskDeleted { revision: u64, task: Task },
}

impl Event {
    pub fn revision(&self) -> u64 {
        match self {
            Event::TaskCreated { revision, .. }
            | Event::StatusAdvanced { revision, .. }
            | Event::TaskArchived { revision, .. }
            | Event::TaskEdited { revision, .. }
            | Event::TaskReassigned { revision, .. }
            | Event::TaskDeleted { revision, .. } => *revision,
        }
    }

    pub fn task(&self) -> &Task {
        match self {
            Event::TaskCreated { task, .. }
            | Event::StatusAdvanced { task, .. }
            | Event::TaskArchived { task, .. }
            | Event::TaskEdited { task, .. }
            | Event::TaskReassigned { task, .. }
            | Event::TaskDeleted { task, .. } => task,
        }
    }

    /// The task before the change, for events that can alter its audience.
    pub fn previous(&self) -> Option<&Task> {
        match self {
            Event::TaskReassigned { previous, .. } => Some(previous),
            _ => None,
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// Also returned for tasks the caller is not allowed to see.
    #[error("task not found")]
    TaskNotFound,
    #[error("not permitted")]
    Forbidden,
    #[error("no active organization")]
    NoOrganization,
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("department visibility needs a department")]
    MissingDepartment,
    #[error("cannot move from {from:?}")]
    InvalidTransition { from: TaskStatus },
    #[error("task is {0:?} and read-only")]
    ReadOnly(TaskStatus),
    #[error("expected {expected:?}, task is {actual:?}")]
    StaleStatus { expected: TaskStatus, actual: TaskStatus },
}

// ── The World ──────────────────────────────────────────────────

/// Authoritative state. Lives in memory, loaded from redb on boot.
/// All mutations go through apply().
pub struct World {
    pub tasks: HashMap<Uuid, Task>,
    pub accounts: HashMap<Uuid, Account>,
    pub revision: u64,
    pub log: Vec<(u64, Event)>,
}

impl Default for World {
    fn default() -> Self {
        World::new()
    }
}

impl World {
    pub fn new() -> Self {
        World {
            tasks: HashMap::new(),
            accounts: HashMap::new(),
            revision: 0,
            log: Vec::new(),
        }
    }

    /// Apply a command on behalf of `session`. Every state change goes
    /// through here; a rejected command changes nothing.
    pub fn apply(&mut self, cmd: Command, session: &Session, now: DateTime<Utc>) -> Result<Event, WorldError> {
        match cmd {
            Command::CreateTask { title, description, priority, visibility, department, assignees, deadline, document } => {
                if !access::has_permission(Some(session), Module::Tasks, Action::Create) {
                    return Err(WorldError::Forbidden);
                }
                let org_id = session.org_id.ok_or(WorldError::NoOrganization)?;
                let title = non_empty_title(title)?;
                let department = normalize_department(department);
                if visibility == Visibility::Department && department.is_none() {
                    return Err(WorldError::MissingDepartment);
                }

                let task = Task {
                    id: Uuid::new_v4(),
                    org_id,
                    title,
                    description,
                    status: TaskStatus::Pending,
                    priority,
                    visibility,
                    department,
                    assignees: dedup(assignees),
                    deadline,
                    sla_deadline: Some(sla::sla_deadline(priority, now)),
                    document,
                    created_by: session.user_id,
                    created_at: now,
                    updated_at: now,
                };
                self.tasks.insert(task.id, task.clone());
                Ok(self.record(|revision| Event::TaskCreated { revision, task }))
            }

            Command::AdvanceStatus { task_id, expected } => {
                let task = self.visible_mut(task_id, session)?;
                if !access::can_write(task, Some(session)) {
                    return Err(WorldError::Forbidden);
                }
                if let Some(expected) = expected {
                    if expected != task.status {
                        return Err(WorldError::StaleStatus { expected, actual: task.status });
                    }
                }
                let from = task.status;
                let next = from.next().ok_or(WorldError::InvalidTransition { from })?;

                task.status = next;
                task.updated_at = now;
                let task = task.clone();
                Ok(self.record(|revision| Event::StatusAdvanced { revision, from, task }))
            }

            Command::ArchiveTask { task_id } => {
                let task = self.visible_mut(task_id, session)?;
                if !access::can_write(task, Some(session)) || !access::can_remove(task, Some(session)) {
                    return Err(WorldError::Forbidden);
                }
                if !task.status.can_transition_to(TaskStatus::Archived) {
                    return Err(WorldError::InvalidTransition { from: task.status });
                }

                task.status = TaskStatus::Archived;
                task.updated_at = now;
                let task = task.clone();
                Ok(self.record(|revision| Event::TaskArchived { revision, task }))
            }

            Command::EditTask { task_id, title, description, priority, deadline } => {
                let task = self.visible_mut(task_id, session)?;
                if !access::can_write(task, Some(session)) {
                    return Err(WorldError::Forbidden);
                }
                if task.is_read_only() {
                    return Err(WorldError::ReadOnly(task.status));
                }
                let title = title.map(non_empty_title).transpose()?;

                if let Some(title) = title {
                    task.title = title;
                }
                if let Some(description) = description {
                    task.description = description.filter(|d| !d.trim().is_empty());
                }
                if let Some(priority) = priority {
                    // The SLA clock always runs from creation, not from the edit.
                    task.priority = priority;
                    task.sla_deadline = Some(sla::sla_deadline(priority, task.created_at));
                }
                if let Some(deadline) = deadline {
                    task.deadline = deadline;
                }
                task.updated_at = now;
                let task = task.clone();
                Ok(self.record(|revision| Event::TaskEdited { revision, task }))
            }

            Command::Reassign { task_id, assignees, visibility, department } => {
                let task = self.visible_mut(task_id, session)?;
                if !access::can_assign(task, Some(session)) {
                    return Err(WorldError::Forbidden);
                }
                let department = normalize_department(department);
                if visibility == Visibility::Department && department.is_none() {
                    return Err(WorldError::MissingDepartment);
                }

                let previous = task.clone();
                task.assignees = dedup(assignees);
                task.visibility = visibility;
                task.department = department;
                task.updated_at = now;
                let task = task.clone();
                Ok(self.record(|revision| Event::TaskReassigned { revision, previous, task }))
            }

            Command::DeleteTask { task_id } => {
                let task = self.visible_mut(task_id, session)?;
                if !access::can_remove(task, Some(session)) {
                    return Err(WorldError::Forbidden);
                }
                let task = self.tasks.remove(&task_id).ok_or(WorldError::TaskNotFound)?;
                Ok(self.record(|revision| Event::TaskDeleted { revision, task }))
            }
        }
    }

    /// Bump the revision, build the event, append it to the log.
    fn record(&mut self, make: impl FnOnce(u64) -> Event) -> Event {
        self.revision += 1;
        let event = make(self.revision);
        self.log.push((self.revision, event.clone()));
        if self.log.len() > LOG_CAPACITY {
            let excess = self.log.len() - LOG_CAPACITY;
            self.log.drain(..excess);
        }
        event
    }

    fn visible_mut(&mut self, task_id: Uuid, session: &Session) -> Result<&mut Task, WorldError> {
        let visible = self
            .tasks
            .get(&task_id)
            .is_some_and(|t| access::can_read(t, Some(session)));
        if !visible {
            return Err(WorldError::TaskNotFound);
        }
        self.tasks.get_mut(&task_id).ok_or(WorldError::TaskNotFound)
    }

    /// Linear scan, fine for a shop-sized staff list.
    pub fn get_account_by_username(&self, username: &str) -> Option<&Account> {
        self.accounts.values().find(|a| a.username == username)
    }

    pub fn session_for(&self, user_id: Uuid) -> Option<Session> {
        self.accounts.get(&user_id).map(Account::session)
    }

    pub fn visible_tasks<'a>(&'a self, session: &'a Session) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.values().filter(move |t| access::can_read(t, Some(session)))
    }

    /// Open jobs the caller can see, soonest SLA deadline first, then by
    /// priority (urgent first). Jobs without an SLA go last.
    pub fn production_queue<'a>(&'a self, session: &'a Session) -> Vec<&'a Task> {
        let mut open: Vec<&Task> = self
            .visible_tasks(session)
            .filter(|t| !t.status.is_terminal())
            .collect();
        open.sort_by(|a, b| {
            let by_deadline = match (a.sla_deadline, b.sla_deadline) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            by_deadline
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        open
    }

    /// Events after `since_rev`, or None if the log no longer reaches back
    /// that far (caller should send a full snapshot).
    pub fn events_since(&self, since_rev: u64) -> Option<&[(u64, Event)]> {
        if since_rev >= self.revision {
            return Some(&[]);
        }
        let first = self.log.first()?.0;
        if first > since_rev + 1 {
            return None;
        }
        let idx = self.log.iter().position(|(rev, _)| *rev > since_rev)?;
        Some(&self.log[idx..])
    }
}

// ── Validation helpers ─────────────────────────────────────────

fn non_empty_title(title: String) -> Result<String, WorldError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(WorldError::EmptyTitle);
    }
    Ok(trimmed.to_string())
}

fn normalize_department(department: Option<String>) -> Option<String> {
    department
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

fn dedup(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const ORG: Uuid = Uuid::from_bytes([0x0A; 16]);
    const OWNER: Uuid = Uuid::from_bytes([0x01; 16]);
    const DESIGNER: Uuid = Uuid::from_bytes([0x02; 16]);
    const PRESS: Uuid = Uuid::from_bytes([0x03; 16]);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 11, 8, 0, 0).unwrap()
    }

    fn session(user_id: Uuid, role: OrgRole, department: Option<&str>) -> Session {
        Session {
            user_id,
            super_admin: false,
            org_id: Some(ORG),
            role: Some(role),
            department: department.map(str::to_string),
            grants: access::default_grants(role),
        }
    }

    fn owner() -> Session {
        session(OWNER, OrgRole::Owner, None)
    }

    fn create(w: &mut World, s: &Session, visibility: Visibility, department: Option<&str>) -> Uuid {
        let event = w
            .apply(
                Command::CreateTask {
                    title: "Flyers A5 x2000".into(),
                    description: None,
                    priority: Priority::Urgent,
                    visibility,
                    department: department.map(str::to_string),
                    assignees: vec![DESIGNER],
                    deadline: None,
                    document: None,
                },
                s,
                t0(),
            )
            .unwrap();

        match event {
            Event::TaskCreated { task, .. } => task.id,
            _ => panic!("expected TaskCreated"),
        }
    }

    fn advance(w: &mut World, s: &Session, id: Uuid) -> Result<Event, WorldError> {
        w.apply(Command::AdvanceStatus { task_id: id, expected: None }, s, t0())
    }

    #[test]
    fn create_task_starts_pending_with_sla() {
        let mut w = World::new();
        let id = create(&mut w, &owner(), Visibility::Public, None);

        let task = &w.tasks[&id];
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.org_id, ORG);
        assert_eq!(task.created_by, OWNER);
        assert_eq!(task.sla_deadline, Some(t0() + Duration::hours(8)));
        assert_eq!(w.revision, 1);
    }

    #[test]
    fn create_requires_grant_and_organization() {
        let mut w = World::new();
        let mut s = session(PRESS, OrgRole::Member, None);
        s.grants.clear();
        let cmd = Command::CreateTask {
            title: "x".into(),
            description: None,
            priority: Priority::Low,
            visibility: Visibility::Public,
            department: None,
            assignees: vec![],
            deadline: None,
            document: None,
        };
        assert_eq!(w.apply(cmd.clone(), &s, t0()).unwrap_err(), WorldError::Forbidden);

        let root = Session { user_id: PRESS, super_admin: true, ..Session::default() };
        assert_eq!(w.apply(cmd, &root, t0()).unwrap_err(), WorldError::NoOrganization);
        assert_eq!(w.revision, 0);
    }

    #[test]
    fn create_validates_title_and_department() {
        let mut w = World::new();
        let mut cmd = Command::CreateTask {
            title: "   ".into(),
            description: None,
            priority: Priority::Low,
            visibility: Visibility::Public,
            department: None,
            assignees: vec![],
            deadline: None,
            document: None,
        };
        assert_eq!(w.apply(cmd.clone(), &owner(), t0()).unwrap_err(), WorldError::EmptyTitle);

        if let Command::CreateTask { title, visibility, .. } = &mut cmd {
            *title = "Stickers".into();
            *visibility = Visibility::Department;
        }
        assert_eq!(w.apply(cmd, &owner(), t0()).unwrap_err(), WorldError::MissingDepartment);
    }

    #[test]
    fn advance_walks_forward_to_delivered() {
        let mut w = World::new();
        let s = owner();
        let id = create(&mut w, &s, Visibility::Public, None);

        for expected in [TaskStatus::Design, TaskStatus::Printing, TaskStatus::Packaging, TaskStatus::Delivered] {
            advance(&mut w, &s, id).unwrap();
            assert_eq!(w.tasks[&id].status, expected);
        }

        let err = advance(&mut w, &s, id).unwrap_err();
        assert_eq!(err, WorldError::InvalidTransition { from: TaskStatus::Delivered });
        assert_eq!(w.revision, 5);
    }

    #[test]
    fn advance_with_stale_expectation_is_rejected() {
        let mut w = World::new();
        let s = owner();
        let id = create(&mut w, &s, Visibility::Public, None);
        advance(&mut w, &s, id).unwrap();

        let err = w
            .apply(Command::AdvanceStatus { task_id: id, expected: Some(TaskStatus::Pending) }, &s, t0())
            .unwrap_err();
        assert_eq!(err, WorldError::StaleStatus { expected: TaskStatus::Pending, actual: TaskStatus::Design });
        assert_eq!(w.tasks[&id].status, TaskStatus::Design);
    }

    #[test]
    fn member_without_edit_grant_cannot_advance_public_task() {
        let mut w = World::new();
        let id = create(&mut w, &owner(), Visibility::Public, None);

        let press = session(PRESS, OrgRole::Member, None);
        assert_eq!(advance(&mut w, &press, id).unwrap_err(), WorldError::Forbidden);

        let manager = session(PRESS, OrgRole::Manager, None);
        advance(&mut w, &manager, id).unwrap();
    }

    #[test]
    fn invisible_task_looks_missing() {
        let mut w = World::new();
        let id = create(&mut w, &owner(), Visibility::Private, None);

        let press = session(PRESS, OrgRole::Manager, None);
        assert_eq!(advance(&mut w, &press, id).unwrap_err(), WorldError::TaskNotFound);

        // The assignee can see and move it.
        let designer = session(DESIGNER, OrgRole::Member, None);
        advance(&mut w, &designer, id).unwrap();
    }

    #[test]
    fn archive_only_from_open_stages() {
        let mut w = World::new();
        let s = owner();
        let id = create(&mut w, &s, Visibility::Public, None);
        advance(&mut w, &s, id).unwrap();

        w.apply(Command::ArchiveTask { task_id: id }, &s, t0()).unwrap();
        assert_eq!(w.tasks[&id].status, TaskStatus::Archived);

        let err = w.apply(Command::ArchiveTask { task_id: id }, &s, t0()).unwrap_err();
        assert_eq!(err, WorldError::InvalidTransition { from: TaskStatus::Archived });
        assert_eq!(advance(&mut w, &s, id).unwrap_err(), WorldError::InvalidTransition { from: TaskStatus::Archived });
    }

    #[test]
    fn manager_cannot_archive_without_delete_grant() {
        let mut w = World::new();
        let id = create(&mut w, &owner(), Visibility::Public, None);
        let manager = session(PRESS, OrgRole::Manager, None);
        let err = w.apply(Command::ArchiveTask { task_id: id }, &manager, t0()).unwrap_err();
        assert_eq!(err, WorldError::Forbidden);
    }

    #[test]
    fn edit_recomputes_sla_from_creation() {
        let mut w = World::new();
        let s = owner();
        let id = create(&mut w, &s, Visibility::Public, None);

        w.apply(
            Command::EditTask {
                task_id: id,
                title: Some("Flyers A5 x5000".into()),
                description: None,
                priority: Some(Priority::Low),
                deadline: None,
            },
            &s,
            t0() + Duration::hours(5),
        )
        .unwrap();

        let task = &w.tasks[&id];
        assert_eq!(task.title, "Flyers A5 x5000");
        assert_eq!(task.sla_deadline, Some(t0() + Duration::hours(72)));
        assert_eq!(task.updated_at, t0() + Duration::hours(5));
    }

    #[test]
    fn edit_sets_and_clears_description_and_deadline() {
        let mut w = World::new();
        let s = owner();
        let id = create(&mut w, &s, Visibility::Public, None);
        let due = t0() + Duration::hours(30);

        let edit = |description, deadline| Command::EditTask {
            task_id: id,
            title: None,
            description,
            priority: None,
            deadline,
        };

        w.apply(edit(Some(Some("Matte, 350gsm".into())), Some(Some(due))), &s, t0()).unwrap();
        assert_eq!(w.tasks[&id].description.as_deref(), Some("Matte, 350gsm"));
        assert_eq!(w.tasks[&id].deadline, Some(due));

        // Unchanged when omitted.
        w.apply(edit(None, None), &s, t0()).unwrap();
        assert_eq!(w.tasks[&id].description.as_deref(), Some("Matte, 350gsm"));
        assert_eq!(w.tasks[&id].deadline, Some(due));

        w.apply(edit(Some(None), Some(None)), &s, t0()).unwrap();
        assert_eq!(w.tasks[&id].description, None);
        assert_eq!(w.tasks[&id].deadline, None);
    }

    #[test]
    fn delivered_task_content_is_read_only_but_reassignable() {
        let mut w = World::new();
        let s = owner();
        let id = create(&mut w, &s, Visibility::Public, None);
        for _ in 0..4 {
            advance(&mut w, &s, id).unwrap();
        }

        let err = w
            .apply(
                Command::EditTask { task_id: id, title: Some("New".into()), description: None, priority: None, deadline: None },
                &s,
                t0(),
            )
            .unwrap_err();
        assert_eq!(err, WorldError::ReadOnly(TaskStatus::Delivered));

        w.apply(
            Command::Reassign { task_id: id, assignees: vec![PRESS], visibility: Visibility::Public, department: None },
            &s,
            t0(),
        )
        .unwrap();
        assert_eq!(w.tasks[&id].assignees, vec![PRESS]);
        assert_eq!(w.tasks[&id].status, TaskStatus::Delivered);
    }

    #[test]
    fn reassign_never_touches_status() {
        let mut w = World::new();
        let s = owner();
        let id = create(&mut w, &s, Visibility::Public, None);
        advance(&mut w, &s, id).unwrap();

        w.apply(
            Command::Reassign {
                task_id: id,
                assignees: vec![PRESS, PRESS, DESIGNER],
                visibility: Visibility::Department,
                department: Some(" Press ".into()),
            },
            &s,
            t0(),
        )
        .unwrap();

        let task = &w.tasks[&id];
        assert_eq!(task.status, TaskStatus::Design);
        assert_eq!(task.assignees, vec![PRESS, DESIGNER]);
        assert_eq!(task.visibility, Visibility::Department);
        assert_eq!(task.department.as_deref(), Some("Press"));
    }

    #[test]
    fn reassign_event_keeps_the_previous_audience() {
        let mut w = World::new();
        let s = owner();
        let id = create(&mut w, &s, Visibility::Public, None);

        let event = w
            .apply(
                Command::Reassign { task_id: id, assignees: vec![], visibility: Visibility::Private, department: None },
                &s,
                t0(),
            )
            .unwrap();

        let press = session(PRESS, OrgRole::Member, None);
        let previous = event.previous().unwrap();
        assert_eq!(previous.visibility, Visibility::Public);
        assert!(access::can_read(previous, Some(&press)));
        assert!(!access::can_read(event.task(), Some(&press)));
    }

    #[test]
    fn delete_task() {
        let mut w = World::new();
        let s = owner();
        let id = create(&mut w, &s, Visibility::Public, None);

        let event = w.apply(Command::DeleteTask { task_id: id }, &s, t0()).unwrap();
        assert!(matches!(event, Event::TaskDeleted { .. }));
        assert_eq!(event.task().id, id);
        assert!(!w.tasks.contains_key(&id));
    }

    #[test]
    fn delete_nonexistent_task() {
        let mut w = World::new();
        let err = w.apply(Command::DeleteTask { task_id: Uuid::new_v4() }, &owner(), t0()).unwrap_err();
        assert_eq!(err, WorldError::TaskNotFound);
    }

    #[test]
    fn visible_tasks_respect_department() {
        let mut w = World::new();
        let s = owner();
        create(&mut w, &s, Visibility::Public, None);
        create(&mut w, &s, Visibility::Department, Some("Finishing"));
        create(&mut w, &s, Visibility::Private, None);

        let press = session(PRESS, OrgRole::Member, Some("Press"));
        assert_eq!(w.visible_tasks(&press).count(), 1);

        let finishing = session(PRESS, OrgRole::Member, Some("Finishing"));
        assert_eq!(w.visible_tasks(&finishing).count(), 2);

        assert_eq!(w.visible_tasks(&s).count(), 3);
    }

    #[test]
    fn production_queue_orders_by_sla_then_priority() {
        let mut w = World::new();
        let s = owner();
        let mk = |w: &mut World, title: &str, priority: Priority, at: DateTime<Utc>| {
            let event = w
                .apply(
                    Command::CreateTask {
                        title: title.into(),
                        description: None,
                        priority,
                        visibility: Visibility::Public,
                        department: None,
                        assignees: vec![],
                        deadline: None,
                        document: None,
                    },
                    &s,
                    at,
                )
                .unwrap();
            event.task().id
        };

        let low = mk(&mut w, "Low", Priority::Low, t0());
        let urgent = mk(&mut w, "Urgent", Priority::Urgent, t0());
        let high = mk(&mut w, "High", Priority::High, t0());
        // Same deadline as `high`, lower priority.
        let medium = mk(&mut w, "Medium", Priority::Medium, t0() - Duration::hours(24));
        let done = mk(&mut w, "Done", Priority::Urgent, t0());
        for _ in 0..4 {
            advance(&mut w, &s, done).unwrap();
        }

        let queue: Vec<Uuid> = w.production_queue(&s).iter().map(|t| t.id).collect();
        assert_eq!(queue, vec![urgent, high, medium, low]);
    }

    #[test]
    fn revision_increments_on_every_mutation() {
        let mut w = World::new();
        let s = owner();
        assert_eq!(w.revision, 0);

        let id = create(&mut w, &s, Visibility::Public, None);
        assert_eq!(w.revision, 1);

        advance(&mut w, &s, id).unwrap();
        assert_eq!(w.revision, 2);

        w.apply(Command::ArchiveTask { task_id: id }, &s, t0()).unwrap();
        assert_eq!(w.revision, 3);
        assert_eq!(w.log.len(), 3);
        assert_eq!(w.log[2].1.revision(), 3);
    }

    #[test]
    fn events_since_for_reconnect() {
        let mut w = World::new();
        let s = owner();
        create(&mut w, &s, Visibility::Public, None);
        create(&mut w, &s, Visibility::Public, None);
        create(&mut w, &s, Visibility::Public, None);

        let events = w.events_since(1).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, 2);
        assert_eq!(events[1].0, 3);

        assert_eq!(w.events_since(3).unwrap().len(), 0);
        assert_eq!(w.events_since(0).unwrap().len(), 3);
    }

    #[test]
    fn trimmed_log_asks_for_snapshot() {
        let mut w = World::new();
        let s = owner();
        for _ in 0..LOG_CAPACITY + 5 {
            create(&mut w, &s, Visibility::Public, None);
        }
        assert_eq!(w.log.len(), LOG_CAPACITY);
        assert!(w.events_since(0).is_none());
        assert_eq!(w.events_since(5).unwrap().len(), LOG_CAPACITY);
    }

    #[test]
    fn failed_commands_dont_change_state() {
        let mut w = World::new();
        let s = owner();
        let id = create(&mut w, &s, Visibility::Public, None);
        let rev_before = w.revision;
        let log_len_before = w.log.len();

        let _ = w.apply(Command::DeleteTask { task_id: Uuid::new_v4() }, &s, t0());
        let _ = advance(&mut w, &session(PRESS, OrgRole::Member, None), id);

        assert_eq!(w.revision, rev_before);
        assert_eq!(w.log.len(), log_len_before);
        assert_eq!(w.tasks[&id].status, TaskStatus::Pending);
    }

    #[test]
    fn account_session_carries_membership() {
        let account = Account {
            id: PRESS,
            username: "press".into(),
            password_hash: String::new(),
            super_admin: false,
            org_id: Some(ORG),
            role: Some(OrgRole::Member),
            department: Some("Press".into()),
            grants: access::default_grants(OrgRole::Member),
        };
        let mut w = World::new();
        w.accounts.insert(account.id, account);

        assert!(w.get_account_by_username("press").is_some());
        let s = w.session_for(PRESS).unwrap();
        assert_eq!(s.department.as_deref(), Some("Press"));
        assert!(s.has_grant(Module::Tasks, Action::Create));
        assert!(w.session_for(OWNER).is_none());
    }
}
