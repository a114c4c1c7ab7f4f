//! Who may see and touch a task.
//!
//! Every predicate takes the acting session explicitly. `None` means there
//! is no authenticated caller, and every check fails.

use crate::task::{Task, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Owner,
    Admin,
    Manager,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Tasks,
    Invoices,
    Quotations,
    Challans,
    Bills,
    Payroll,
    Reports,
    Branding,
    Settings,
    AuditLogs,
}

impl Module {
    pub const ALL: [Module; 10] = [
        Module::Tasks,
        Module::Invoices,
        Module::Quotations,
        Module::Challans,
        Module::Bills,
        Module::Payroll,
        Module::Reports,
        Module::Branding,
        Module::Settings,
        Module::AuditLogs,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Assign,
}

impl Action {
    pub const ALL: [Action; 5] = [Action::View, Action::Create, Action::Edit, Action::Delete, Action::Assign];
}

pub type Grant = (Module, Action);

/// The acting caller: identity, organization membership and grants.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub super_admin: bool,
    pub org_id: Option<Uuid>,
    pub role: Option<OrgRole>,
    pub department: Option<String>,
    pub grants: HashSet<Grant>,
}

impl Session {
    pub fn member_of(&self, org_id: Uuid) -> bool {
        self.org_id == Some(org_id) && self.role.is_some()
    }

    pub fn is_owner_of(&self, org_id: Uuid) -> bool {
        self.member_of(org_id) && self.role == Some(OrgRole::Owner)
    }

    /// Super-admin, or owner/admin of `org_id`.
    pub fn is_admin_of(&self, org_id: Uuid) -> bool {
        self.super_admin
            || (self.member_of(org_id) && matches!(self.role, Some(OrgRole::Owner | OrgRole::Admin)))
    }

    pub fn has_grant(&self, module: Module, action: Action) -> bool {
        self.grants.contains(&(module, action))
    }
}

/// Starting permission matrix for a role. Owners need none: they bypass.
pub fn default_grants(role: OrgRole) -> HashSet<Grant> {
    match role {
        OrgRole::Owner | OrgRole::Admin => Module::ALL
            .iter()
            .flat_map(|m| Action::ALL.iter().map(move |a| (*m, *a)))
            .collect(),
        OrgRole::Manager => {
            let mut grants: HashSet<Grant> = Module::ALL.iter().map(|m| (*m, Action::View)).collect();
            grants.extend([
                (Module::Tasks, Action::Create),
                (Module::Tasks, Action::Edit),
                (Module::Tasks, Action::Assign),
            ]);
            grants
        }
        OrgRole::Member => HashSet::from([
            (Module::Tasks, Action::View),
            (Module::Tasks, Action::Create),
            (Module::Reports, Action::View),
        ]),
    }
}

/// Module-level check within the session's active organization.
pub fn has_permission(session: Option<&Session>, module: Module, action: Action) -> bool {
    let Some(s) = session else { return false };
    if s.super_admin {
        return true;
    }
    match s.role {
        Some(OrgRole::Owner) => true,
        Some(OrgRole::Admin | OrgRole::Manager | OrgRole::Member) => s.has_grant(module, action),
        None => false,
    }
}

/// Tri-state shortcut: Some(true) for bypass, Some(false) for no access at
/// all, None when the visibility rules decide.
fn bypass(task: &Task, session: Option<&Session>) -> Option<bool> {
    let Some(s) = session else { return Some(false) };
    if s.super_admin {
        return Some(true);
    }
    if !s.member_of(task.org_id) {
        return Some(false);
    }
    if s.is_owner_of(task.org_id) {
        return Some(true);
    }
    None
}

fn is_involved(task: &Task, s: &Session) -> bool {
    task.created_by == s.user_id || task.is_assignee(s.user_id)
}

pub fn can_read(task: &Task, session: Option<&Session>) -> bool {
    if let Some(decided) = bypass(task, session) {
        return decided;
    }
    let Some(s) = session else { return false };

    match task.visibility {
        Visibility::Public => true,
        Visibility::Private => is_involved(task, s) || s.is_admin_of(task.org_id),
        Visibility::Department => {
            let same_department = match (&task.department, &s.department) {
                (Some(t), Some(u)) => t == u,
                _ => false,
            };
            same_department || is_involved(task, s) || s.is_admin_of(task.org_id)
        }
    }
}

pub fn can_write(task: &Task, session: Option<&Session>) -> bool {
    if let Some(decided) = bypass(task, session) {
        return decided;
    }
    let Some(s) = session else { return false };
    if !can_read(task, session) {
        return false;
    }

    match task.visibility {
        Visibility::Private => is_involved(task, s) || s.is_admin_of(task.org_id),
        Visibility::Public | Visibility::Department => {
            task.created_by == s.user_id || s.has_grant(Module::Tasks, Action::Edit)
        }
    }
}

pub fn can_assign(task: &Task, session: Option<&Session>) -> bool {
    if let Some(decided) = bypass(task, session) {
        return decided;
    }
    let Some(s) = session else { return false };

    can_read(task, session) && (task.created_by == s.user_id || s.has_grant(Module::Tasks, Action::Assign))
}

/// Archiving and deleting are destructive: they need the delete grant or an
/// admin-equivalent role on top of whatever else the caller may do.
pub fn can_remove(task: &Task, session: Option<&Session>) -> bool {
    if let Some(decided) = bypass(task, session) {
        return decided;
    }
    let Some(s) = session else { return false };

    can_read(task, session) && (s.is_admin_of(task.org_id) || s.has_grant(Module::Tasks, Action::Delete))
}
