//! Binary wire protocol for the live WebSocket.
//!
//! Fixed-stride packed records, readable by JS DataView at known offsets.
//! Strings are fixed-size zero-padded UTF-8, cut on a char boundary.
//! Timestamps are i64 LE unix seconds, 0 meaning "none".
//!
//! JSON is never used on this socket. Postcard is only used for redb
//! persistence (persist.rs).

use crate::sla::Priority;
use crate::task::{Task, Visibility};
use crate::workflow::TaskStatus;
use crate::world::{Command, Event, WorldError};
use chrono::{DateTime, Utc};
use uuid::Uuid;

// ── Layout constants ───────────────────────────────────────────
// Shared knowledge between server and client.

pub mod msg {
    // Server → Client
    pub const SNAPSHOT: u8 = 0x01;
    pub const TASK_CREATED: u8 = 0x02;
    pub const STATUS_ADVANCED: u8 = 0x03;
    pub const TASK_ARCHIVED: u8 = 0x04;
    pub const TASK_EDITED: u8 = 0x05;
    pub const TASK_REASSIGNED: u8 = 0x06;
    pub const TASK_DELETED: u8 = 0x07;
    /// The task still exists but this client may no longer see it.
    pub const TASK_REVOKED: u8 = 0x08;
    pub const REJECTED: u8 = 0xFE;
    pub const ERROR: u8 = 0xFF;

    // Client → Server
    pub const CMD_CREATE_TASK: u8 = 0x10;
    pub const CMD_ADVANCE_STATUS: u8 = 0x11;
    pub const CMD_ARCHIVE_TASK: u8 = 0x12;
    pub const CMD_REASSIGN: u8 = 0x13;
    pub const CMD_DELETE_TASK: u8 = 0x14;
    pub const CMD_EDIT_TASK: u8 = 0x15;
}

/// Byte meaning "no value" for optional enum fields in commands.
pub const NONE_BYTE: u8 = 0xFF;

/// Edit command deadline operation.
pub mod deadline_op {
    pub const UNCHANGED: u8 = 0;
    pub const SET: u8 = 1;
    pub const CLEAR: u8 = 2;
}

/// Task record stride (bytes).
///
/// ```text
/// [0..16]    id (UUID)
/// [16]       status (u8: 0=Pending 1=Design 2=Printing 3=Packaging 4=Delivered 5=Archived)
/// [17]       priority (u8: 0=Low 1=Medium 2=High 3=Urgent)
/// [18]       visibility (u8: 0=Public 1=Private 2=Department)
/// [19]       assignee_count (u8, saturating)
/// [20..28]   sla_deadline (i64 LE unix seconds, 0 = none)
/// [28..36]   deadline (i64 LE unix seconds, 0 = none)
/// [36..52]   created_by (UUID)
/// [52..68]   first assignee (UUID, zeroed = unassigned)
///            the full list is served by GET /api/tasks
/// [68..100]  department (32 bytes, UTF-8, zero-padded)
/// [100..228] title (128 bytes, UTF-8, zero-padded)
/// [228..232] _reserved
/// ```
pub const TASK_STRIDE: usize = 232;
pub const DEPARTMENT_MAX: usize = 32;
pub const TITLE_MAX: usize = 128;

/// Snapshot header size (bytes).
///
/// ```text
/// [0]        msg type (0x01)
/// [1..9]     revision (u64 LE)
/// [9..13]    task_count (u32 LE)
/// [13..]     task records
/// ```
pub const SNAPSHOT_HEADER: usize = 13;

/// Task-carrying event: type, revision, then one task record.
/// StatusAdvanced appends one byte, the previous status.
pub const TASK_EVENT_LEN: usize = 9 + TASK_STRIDE;

/// Delete and revoke events: type, revision, task id.
pub const EVENT_HEADER: usize = 25;

// ── Packing (Server → Client) ──────────────────────────────────

/// Pack a snapshot of the given tasks (already filtered for the recipient).
pub fn pack_snapshot<'a>(revision: u64, tasks: impl ExactSizeIterator<Item = &'a Task>) -> Vec<u8> {
    let task_count = tasks.len();
    let mut buf = vec![0u8; SNAPSHOT_HEADER + task_count * TASK_STRIDE];

    buf[0] = msg::SNAPSHOT;
    buf[1..9].copy_from_slice(&revision.to_le_bytes());
    buf[9..13].copy_from_slice(&(task_count as u32).to_le_bytes());

    let mut offset = SNAPSHOT_HEADER;
    for task in tasks {
        pack_task(&mut buf[offset..offset + TASK_STRIDE], task);
        offset += TASK_STRIDE;
    }

    buf
}

fn pack_task(buf: &mut [u8], task: &Task) {
    buf[0..16].copy_from_slice(task.id.as_bytes());
    buf[16] = task.status as u8;
    buf[17] = task.priority as u8;
    buf[18] = task.visibility as u8;
    buf[19] = task.assignees.len().min(u8::MAX as usize) as u8;
    buf[20..28].copy_from_slice(&timestamp(task.sla_deadline).to_le_bytes());
    buf[28..36].copy_from_slice(&timestamp(task.deadline).to_le_bytes());
    buf[36..52].copy_from_slice(task.created_by.as_bytes());
    buf[52..68].copy_from_slice(task.assignees.first().copied().unwrap_or(Uuid::nil()).as_bytes());
    put_str(&mut buf[68..100], task.department.as_deref().unwrap_or(""));
    put_str(&mut buf[100..228], &task.title);
}

pub fn pack_event(event: &Event) -> Vec<u8> {
    let (kind, revision, task) = match event {
        Event::TaskDeleted { revision, task } => return pack_removal(msg::TASK_DELETED, *revision, task.id),
        Event::StatusAdvanced { revision, from, task } => {
            let mut buf = vec![0u8; TASK_EVENT_LEN + 1];
            buf[0] = msg::STATUS_ADVANCED;
            buf[1..9].copy_from_slice(&revision.to_le_bytes());
            pack_task(&mut buf[9..TASK_EVENT_LEN], task);
            buf[TASK_EVENT_LEN] = *from as u8;
            return buf;
        }
        Event::TaskCreated { revision, task } => (msg::TASK_CREATED, revision, task),
        Event::TaskArchived { revision, task } => (msg::TASK_ARCHIVED, revision, task),
        Event::TaskEdited { revision, task } => (msg::TASK_EDITED, revision, task),
        Event::TaskReassigned { revision, task, .. } => (msg::TASK_REASSIGNED, revision, task),
    };

    let mut buf = vec![0u8; TASK_EVENT_LEN];
    buf[0] = kind;
    buf[1..9].copy_from_slice(&revision.to_le_bytes());
    pack_task(&mut buf[9..TASK_EVENT_LEN], task);
    buf
}

/// Tell a client to drop a task it can no longer see.
pub fn pack_revoked(revision: u64, task_id: Uuid) -> Vec<u8> {
    pack_removal(msg::TASK_REVOKED, revision, task_id)
}

fn pack_removal(kind: u8, revision: u64, task_id: Uuid) -> Vec<u8> {
    let mut buf = vec![0u8; EVENT_HEADER];
    buf[0] = kind;
    buf[1..9].copy_from_slice(&revision.to_le_bytes());
    buf[9..25].copy_from_slice(task_id.as_bytes());
    buf
}

/// Sent only to the client whose command was refused.
pub fn pack_rejection(err: &WorldError) -> Vec<u8> {
    let code = match err {
        WorldError::TaskNotFound => 1,
        WorldError::Forbidden => 2,
        WorldError::NoOrganization => 3,
        WorldError::EmptyTitle => 4,
        WorldError::MissingDepartment => 5,
        WorldError::InvalidTransition { .. } => 6,
        WorldError::ReadOnly(_) => 7,
        WorldError::StaleStatus { .. } => 8,
    };
    vec![msg::REJECTED, code]
}

/// Sent when a frame could not be decoded at all.
pub fn pack_error(err: &WireError) -> Vec<u8> {
    let text = err.to_string();
    let mut buf = Vec::with_capacity(1 + text.len());
    buf.push(msg::ERROR);
    buf.extend_from_slice(text.as_bytes());
    buf
}

// ── Unpacking (Client → Server) ────────────────────────────────

pub fn unpack_command(data: &[u8]) -> Result<Command, WireError> {
    let Some(&kind) = data.first() else {
        return Err(WireError::TooShort);
    };

    match kind {
        msg::CMD_CREATE_TASK => {
            // [0]        msg type
            // [1]        priority
            // [2]        visibility
            // [3..35]    department (32 bytes)
            // [35..43]   deadline (i64 LE, 0 = none)
            // [43]       assignee count N
            // [44..+16N] assignees (UUIDs)
            // [..]       title (rest of frame)
            need(data, 44)?;
            let priority = Priority::from_u8(data[1]).ok_or(WireError::InvalidField("priority"))?;
            let visibility = Visibility::from_u8(data[2]).ok_or(WireError::InvalidField("visibility"))?;
            let department = optional_str(&data[3..35])?;
            let deadline = from_timestamp(i64::from_le_bytes(array(&data[35..43])))?;
            let (assignees, rest) = uuid_list(data, 43)?;
            let title = string_from_bytes(&data[rest..])?;

            Ok(Command::CreateTask {
                title,
                description: None,
                priority,
                visibility,
                department,
                assignees,
                deadline,
                document: None,
            })
        }

        msg::CMD_ADVANCE_STATUS => {
            // [1..17] task_id, [17] expected status (0xFF = don't check)
            need(data, 18)?;
            let task_id = uuid_from_bytes(&data[1..17]);
            let expected = match data[17] {
                NONE_BYTE => None,
                b => Some(TaskStatus::from_u8(b).ok_or(WireError::InvalidField("status"))?),
            };
            Ok(Command::AdvanceStatus { task_id, expected })
        }

        msg::CMD_ARCHIVE_TASK => {
            need(data, 17)?;
            Ok(Command::ArchiveTask { task_id: uuid_from_bytes(&data[1..17]) })
        }

        msg::CMD_REASSIGN => {
            // [1..17]    task_id
            // [17]       visibility
            // [18..50]   department
            // [50]       assignee count N (0 = unassign everyone)
            // [51..+16N] assignees (UUIDs)
            need(data, 51)?;
            let task_id = uuid_from_bytes(&data[1..17]);
            let visibility = Visibility::from_u8(data[17]).ok_or(WireError::InvalidField("visibility"))?;
            let department = optional_str(&data[18..50])?;
            let (assignees, _) = uuid_list(data, 50)?;
            Ok(Command::Reassign { task_id, assignees, visibility, department })
        }

        msg::CMD_DELETE_TASK => {
            need(data, 17)?;
            Ok(Command::DeleteTask { task_id: uuid_from_bytes(&data[1..17]) })
        }

        msg::CMD_EDIT_TASK => {
            // [1..17]  task_id
            // [17]     priority (0xFF = unchanged)
            // [18]     deadline op (0 = unchanged, 1 = set, 2 = clear)
            // [19..27] deadline (i64 LE, read only for op 1)
            // [27..]   title (empty = unchanged)
            need(data, 27)?;
            let task_id = uuid_from_bytes(&data[1..17]);
            let priority = match data[17] {
                NONE_BYTE => None,
                b => Some(Priority::from_u8(b).ok_or(WireError::InvalidField("priority"))?),
            };
            let deadline = match data[18] {
                deadline_op::UNCHANGED => None,
                deadline_op::SET => {
                    let at = from_timestamp(i64::from_le_bytes(array(&data[19..27])))?;
                    Some(Some(at.ok_or(WireError::InvalidField("deadline"))?))
                }
                deadline_op::CLEAR => Some(None),
                _ => return Err(WireError::InvalidField("deadline op")),
            };
            let title = optional_str(&data[27..])?;
            Ok(Command::EditTask { task_id, title, description: None, priority, deadline })
        }

        other => Err(WireError::UnknownMessage(other)),
    }
}

// ── Helpers ────────────────────────────────────────────────────

fn need(data: &[u8], len: usize) -> Result<(), WireError> {
    if data.len() < len {
        return Err(WireError::TooShort);
    }
    Ok(())
}

fn array<const N: usize>(b: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&b[..N]);
    out
}

fn uuid_from_bytes(b: &[u8]) -> Uuid {
    Uuid::from_bytes(array(b))
}

/// Count-prefixed UUID list at `at`. Returns the ids and the offset just
/// past them. Nil ids are skipped.
fn uuid_list(data: &[u8], at: usize) -> Result<(Vec<Uuid>, usize), WireError> {
    let count = data[at] as usize;
    let start = at + 1;
    let end = start + count * 16;
    need(data, end)?;
    let ids = data[start..end]
        .chunks_exact(16)
        .map(uuid_from_bytes)
        .filter(|id| !id.is_nil())
        .collect();
    Ok((ids, end))
}

fn timestamp(at: Option<DateTime<Utc>>) -> i64 {
    at.map_or(0, |t| t.timestamp())
}

fn from_timestamp(secs: i64) -> Result<Option<DateTime<Utc>>, WireError> {
    if secs == 0 {
        return Ok(None);
    }
    DateTime::from_timestamp(secs, 0)
        .map(Some)
        .ok_or(WireError::InvalidField("timestamp"))
}

/// Zero-padded copy, cut at the last char boundary that fits.
fn put_str(buf: &mut [u8], s: &str) {
    let mut len = s.len().min(buf.len());
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    buf[..len].copy_from_slice(&s.as_bytes()[..len]);
}

fn string_from_bytes(b: &[u8]) -> Result<String, WireError> {
    let end = b.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1);
    std::str::from_utf8(&b[..end])
        .map(|s| s.to_string())
        .map_err(|_| WireError::InvalidUtf8)
}

fn optional_str(b: &[u8]) -> Result<Option<String>, WireError> {
    let s = string_from_bytes(b)?;
    Ok((!s.is_empty()).then_some(s))
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame too short")]
    TooShort,
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessage(u8),
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

// ── Tests ──────────────────────────────────────────────────────
