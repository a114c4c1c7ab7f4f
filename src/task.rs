//! The task entity and its flat, string-typed record form.

use crate::sla::Priority;
use crate::workflow::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Visibility {
    Public = 0,
    Private = 1,
    Department = 2,
}

impl Visibility {
    pub const ALL: [Visibility; 3] = [Visibility::Public, Visibility::Private, Visibility::Department];

    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Department => "department",
        }
    }

    pub fn parse(raw: &str) -> Option<Visibility> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            "department" => Some(Visibility::Department),
            _ => None,
        }
    }

    /// Unknown scoping is treated as the narrowest one.
    pub fn from_raw(raw: &str) -> Visibility {
        Visibility::parse(raw).unwrap_or(Visibility::Private)
    }

    pub fn from_u8(b: u8) -> Option<Visibility> {
        Visibility::ALL.get(b as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    Challan,
    Quotation,
}

/// Link from a job to the sales document it fulfils.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub kind: DocumentKind,
    pub id: Uuid,
}

/// A print-production job.
///
/// `sla_deadline` is derived from `priority` and `created_at`; it is stored
/// so records written by other clients keep whatever deadline they carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub org_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub visibility: Visibility,
    pub department: Option<String>,
    pub assignees: Vec<Uuid>,
    pub deadline: Option<DateTime<Utc>>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub document: Option<DocumentRef>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_assignee(&self, user_id: Uuid) -> bool {
        self.assignees.contains(&user_id)
    }

    /// Content fields are frozen once the job is delivered or archived.
    pub fn is_read_only(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id,
            org_id: self.org_id,
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status.as_str().to_string(),
            priority: self.priority.as_str().to_string(),
            visibility: self.visibility.as_str().to_string(),
            department: self.department.clone(),
            assignees: self.assignees.clone(),
            deadline: self.deadline,
            sla_deadline: self.sla_deadline,
            document: self.document,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Lenient: unknown enum strings fall back to their conservative
    /// defaults rather than failing the whole record.
    pub fn from_record(record: TaskRecord) -> Task {
        Task {
            id: record.id,
            org_id: record.org_id,
            title: record.title,
            description: record.description,
            status: TaskStatus::from_raw(&record.status),
            priority: Priority::from_raw(&record.priority),
            visibility: Visibility::from_raw(&record.visibility),
            department: record.department.filter(|d| !d.trim().is_empty()),
            assignees: record.assignees,
            deadline: record.deadline,
            sla_deadline: record.sla_deadline,
            document: record.document,
            created_by: record.created_by,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// The shape tasks take outside the process: enums as snake_case strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub visibility: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default)]
    pub assignees: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentRef>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
