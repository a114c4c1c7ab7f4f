//! Production workflow: the fixed status sequence a print job moves through.
//!
//! ```text
//! Pending → Design → Printing → Packaging → Delivered
//!    └──────────┴─────────┴──────────┴──→ Archived (withdrawn)
//! ```
//!
//! Delivered and Archived are terminal. A terminal task is read-only for
//! content fields.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskStatus {
    Pending = 0,
    Design = 1,
    Printing = 2,
    Packaging = 3,
    Delivered = 4,
    Archived = 5,
}

/// The forward sequence. Archived is not a production step; it is reachable
/// from any non-terminal stage.
pub const SEQUENCE: [TaskStatus; 5] = [
    TaskStatus::Pending,
    TaskStatus::Design,
    TaskStatus::Printing,
    TaskStatus::Packaging,
    TaskStatus::Delivered,
];

pub const ALL: [TaskStatus; 6] = [
    TaskStatus::Pending,
    TaskStatus::Design,
    TaskStatus::Printing,
    TaskStatus::Packaging,
    TaskStatus::Delivered,
    TaskStatus::Archived,
];

impl TaskStatus {
    /// Immediate successor in the production sequence, or None if terminal.
    pub fn next(self) -> Option<TaskStatus> {
        match self {
            TaskStatus::Pending => Some(TaskStatus::Design),
            TaskStatus::Design => Some(TaskStatus::Printing),
            TaskStatus::Printing => Some(TaskStatus::Packaging),
            TaskStatus::Packaging => Some(TaskStatus::Delivered),
            TaskStatus::Delivered | TaskStatus::Archived => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            TaskStatus::Delivered | TaskStatus::Archived => true,
            TaskStatus::Pending
            | TaskStatus::Design
            | TaskStatus::Printing
            | TaskStatus::Packaging => false,
        }
    }

    /// Canonical stored form.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Design => "design",
            TaskStatus::Printing => "printing",
            TaskStatus::Packaging => "packaging",
            TaskStatus::Delivered => "delivered",
            TaskStatus::Archived => "archived",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Design => "Design",
            TaskStatus::Printing => "Printing",
            TaskStatus::Packaging => "Packaging",
            TaskStatus::Delivered => "Delivered",
            TaskStatus::Archived => "Archived",
        }
    }

    /// Strict parse of a canonical value or a known legacy alias.
    pub fn parse(raw: &str) -> Option<TaskStatus> {
        let status = match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => TaskStatus::Pending,
            "design" => TaskStatus::Design,
            "printing" => TaskStatus::Printing,
            "packaging" => TaskStatus::Packaging,
            "delivered" => TaskStatus::Delivered,
            "archived" => TaskStatus::Archived,
            // Legacy values written before the print workflow existed.
            "in_progress" => TaskStatus::Design,
            "completed" | "done" => TaskStatus::Delivered,
            "cancelled" | "canceled" => TaskStatus::Archived,
            _ => return None,
        };
        Some(status)
    }

    /// Lenient parse: anything unrecognised lands on Pending.
    pub fn from_raw(raw: &str) -> TaskStatus {
        TaskStatus::parse(raw).unwrap_or(TaskStatus::Pending)
    }

    pub fn from_u8(b: u8) -> Option<TaskStatus> {
        ALL.get(b as usize).copied()
    }

    /// True if `to` is a legal single move from `self`: the next stage, or
    /// Archived from any non-terminal stage.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == TaskStatus::Archived || self.next() == Some(to)
    }
}

pub fn next_status(status: TaskStatus) -> Option<TaskStatus> {
    status.next()
}

pub fn is_terminal(status: TaskStatus) -> bool {
    status.is_terminal()
}

/// Display label for a raw stored status. Unknown values get a fallback
/// label instead of being silently renamed.
pub fn display_label(raw: &str) -> Cow<'static, str> {
    match TaskStatus::parse(raw) {
        Some(status) => Cow::Borrowed(status.label()),
        None => Cow::Owned(format!("Unknown ({})", raw.trim())),
    }
}
