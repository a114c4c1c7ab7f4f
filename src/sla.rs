//! SLA windows and the three-state health indicator.
//!
//! Health is recomputed from the supplied clock on every call. Nothing is
//! cached, so a stale reading lasts only until the caller asks again.

use crate::workflow::TaskStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Fixed warning window before breach, in hours.
///
/// Absolute, not a fraction of the priority's SLA window: an urgent job
/// spends a quarter of its window in warning, a low-priority job under 3%.
/// Kept as-is pending product review.
pub const WARNING_WINDOW_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
    Urgent = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::Low, Priority::Medium, Priority::High, Priority::Urgent];

    pub fn sla_hours(self) -> i64 {
        match self {
            Priority::Urgent => 8,
            Priority::High => 24,
            Priority::Medium => 48,
            Priority::Low => 72,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(raw: &str) -> Option<Priority> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" | "normal" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }

    /// Unknown priorities get the longest window (Low) so they never
    /// trigger a false breach.
    pub fn from_raw(raw: &str) -> Priority {
        Priority::parse(raw).unwrap_or(Priority::Low)
    }

    pub fn from_u8(b: u8) -> Option<Priority> {
        Priority::ALL.get(b as usize).copied()
    }
}

/// Deadline for a task created at `created_at` with the given priority.
pub fn sla_deadline(priority: Priority, created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + Duration::hours(priority.sla_hours())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaHealth {
    OnTrack,
    Warning,
    Breached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlaReport {
    pub health: SlaHealth,
    pub message: String,
    /// The priority's full SLA window, for display next to the message.
    pub window_hours: i64,
}

pub fn sla_health(
    priority: Priority,
    sla_deadline: Option<DateTime<Utc>>,
    status: TaskStatus,
    now: DateTime<Utc>,
) -> SlaReport {
    let report = |health, message: String| SlaReport {
        health,
        message,
        window_hours: priority.sla_hours(),
    };

    match status {
        TaskStatus::Delivered => return report(SlaHealth::OnTrack, "Completed".to_string()),
        TaskStatus::Archived => return report(SlaHealth::OnTrack, "Archived".to_string()),
        TaskStatus::Pending | TaskStatus::Design | TaskStatus::Printing | TaskStatus::Packaging => {}
    }

    let Some(deadline) = sla_deadline else {
        return report(SlaHealth::OnTrack, "No SLA".to_string());
    };

    let remaining = deadline - now;
    if remaining <= Duration::zero() {
        return report(
            SlaHealth::Breached,
            format!("Overdue by {}", format_duration(-remaining)),
        );
    }

    let health = if remaining <= Duration::hours(WARNING_WINDOW_HOURS) {
        SlaHealth::Warning
    } else {
        SlaHealth::OnTrack
    };
    report(health, format!("{} left", format_duration(remaining)))
}

/// `sla_health` against the wall clock.
pub fn sla_health_now(
    priority: Priority,
    sla_deadline: Option<DateTime<Utc>>,
    status: TaskStatus,
) -> SlaReport {
    sla_health(priority, sla_deadline, status, Utc::now())
}

/// Minutes / hours / days buckets. Seconds are truncated.
pub fn format_duration(d: Duration) -> String {
    let minutes = d.num_minutes().max(0);
    if minutes < 60 {
        format!("{minutes}m")
    } else if minutes < 24 * 60 {
        format!("{}h {}m", minutes / 60, minutes % 60)
    } else {
        let hours = minutes / 60;
        format!("{}d {}h", hours / 24, hours % 24)
    }
}
