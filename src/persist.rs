//! World ↔ redb persistence.
//!
//! redb is a save file: loaded on boot, flushed on every mutation.
//! Never queried at runtime, World is the runtime truth.

use crate::access::{self, OrgRole};
use crate::task::Task;
use crate::world::{Account, Event, World};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
#[cfg(feature = "profile")]
use std::time::Instant;
use uuid::Uuid;

const TASKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tasks");
const ACCOUNTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("accounts");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Thin handle to the redb file. Cloneable (Arc inside).
#[derive(Clone)]
pub struct SaveFile {
    db: Arc<Database>,
}

/// Owner account created on first boot.
#[derive(Debug, Clone)]
pub struct DefaultOwner<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub org_id: Uuid,
}

impl SaveFile {
    /// Open (or create) the save file. Creates tables if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SaveFileError> {
        let db = Database::create(path.as_ref())?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(TASKS)?;
            let _ = txn.open_table(ACCOUNTS)?;
            let _ = txn.open_table(META)?;
        }
        txn.commit()?;

        Ok(SaveFile { db: Arc::new(db) })
    }

    /// Load the entire World. Called once at boot.
    pub fn load_world(&self) -> Result<World, SaveFileError> {
        let mut world = World::new();
        let txn = self.db.begin_read()?;

        let tasks = txn.open_table(TASKS)?;
        for entry in tasks.iter()? {
            let (_, value) = entry?;
            let task: Task = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            world.tasks.insert(task.id, task);
        }

        let accounts = txn.open_table(ACCOUNTS)?;
        for entry in accounts.iter()? {
            let (_, value) = entry?;
            let account: Account = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            world.accounts.insert(account.id, account);
        }

        let meta = txn.open_table(META)?;
        if let Some(rev) = meta.get("revision")? {
            let bytes: [u8; 8] = rev
                .value()
                .try_into()
                .map_err(|_| SaveFileError::Decode("revision is not 8 bytes".to_string()))?;
            world.revision = u64::from_le_bytes(bytes);
        }

        tracing::debug!(
            tasks = world.tasks.len(),
            accounts = world.accounts.len(),
            revision = world.revision,
            "loaded world"
        );
        Ok(world)
    }

    /// Flush one applied event: the affected task row plus the revision, in
    /// one transaction.
    pub fn flush(&self, world: &World, event: &Event) -> Result<(), SaveFileError> {
        #[cfg(feature = "profile")]
        let total_start = Instant::now();
        let txn = self.db.begin_write()?;
        {
            let mut tasks = txn.open_table(TASKS)?;
            let mut meta = txn.open_table(META)?;

            match event {
                Event::TaskDeleted { task, .. } => {
                    tasks.remove(task.id.as_bytes().as_slice())?;
                }
                Event::TaskCreated { task, .. }
                | Event::StatusAdvanced { task, .. }
                | Event::TaskArchived { task, .. }
                | Event::TaskEdited { task, .. }
                | Event::TaskReassigned { task, .. } => {
                    let bytes = postcard::to_allocvec(task)
                        .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                    tasks.insert(task.id.as_bytes().as_slice(), bytes.as_slice())?;
                }
            }

            meta.insert("revision", world.revision.to_le_bytes().as_slice())?;
        }
        #[cfg(feature = "profile")]
        let commit_start = Instant::now();
        txn.commit()?;
        #[cfg(feature = "profile")]
        tracing::debug!(
            commit_us = commit_start.elapsed().as_micros() as u64,
            total_us = total_start.elapsed().as_micros() as u64,
            "flush committed transaction"
        );
        Ok(())
    }

    pub fn save_account(&self, account: &Account) -> Result<(), SaveFileError> {
        let txn = self.db.begin_write()?;
        {
            let mut accounts = txn.open_table(ACCOUNTS)?;
            let bytes = postcard::to_allocvec(account)
                .map_err(|e| SaveFileError::Encode(e.to_string()))?;
            accounts.insert(account.id.as_bytes().as_slice(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Seed an organization owner if no accounts exist. Returns true if created.
    pub fn ensure_default_owner(&self, world: &mut World, owner: &DefaultOwner<'_>) -> Result<bool, SaveFileError> {
        if !world.accounts.is_empty() {
            return Ok(false);
        }

        let account = new_account(owner.username, owner.password, owner.org_id, OrgRole::Owner, None)?;
        self.save_account(&account)?;
        world.accounts.insert(account.id, account);
        Ok(true)
    }
}

/// Argon2id with a fresh random salt, PHC string output.
pub fn hash_password(password: &str) -> Result<String, SaveFileError> {
    use argon2::{
        password_hash::{rand_core::OsRng, SaltString},
        Argon2, PasswordHasher,
    };

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| SaveFileError::Hash(e.to_string()))
}

/// Fresh account with the role's default grants and a hashed password.
pub fn new_account(
    username: &str,
    password: &str,
    org_id: Uuid,
    role: OrgRole,
    department: Option<String>,
) -> Result<Account, SaveFileError> {
    Ok(Account {
        id: Uuid::new_v4(),
        username: username.to_string(),
        password_hash: hash_password(password)?,
        super_admin: false,
        org_id: Some(org_id),
        role: Some(role),
        department,
        grants: access::default_grants(role),
    })
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SaveFileError {
    #[error("redb: {0}")]
    Redb(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("encode: {0}")]
    Encode(String),
    #[error("password hash: {0}")]
    Hash(String),
}

// redb 2.x has many error types. Blanket them all into SaveFileError::Redb.
macro_rules! from_redb {
    ($($t:ty),*) => {
        $(impl From<$t> for SaveFileError {
            fn from(e: $t) -> Self { SaveFileError::Redb(e.to_string()) }
        })*
    };
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sla::Priority;
    use crate::task::Visibility;
    use crate::workflow::TaskStatus;
    use crate::world::Command;
    use chrono::Utc;
    use std::fs;
    use std::path::PathBuf;

    const ORG: Uuid = Uuid::from_bytes([0x0A; 16]);

    fn temp_save(name: &str) -> (SaveFile, PathBuf) {
        let path = std::env::temp_dir().join(format!("printflow_test_{name}_{}.redb", std::process::id()));
        let _ = fs::remove_file(&path);
        let sf = SaveFile::open(&path).unwrap();
        (sf, path)
    }

    fn cleanup(path: &Path) {
        let _ = fs::remove_file(path);
    }

    fn owner() -> DefaultOwner<'static> {
        DefaultOwner { username: "owner", password: "owner", org_id: ORG }
    }

    fn create_cmd(title: &str) -> Command {
        Command::CreateTask {
            title: title.into(),
            description: Some("<p>spot UV</p>".into()),
            priority: Priority::High,
            visibility: Visibility::Department,
            department: Some("Press".into()),
            assignees: vec![Uuid::from_bytes([7; 16])],
            deadline: None,
            document: None,
        }
    }

    #[test]
    fn round_trip_empty_world() {
        let (sf, path) = temp_save("empty");

        let world = sf.load_world().unwrap();
        assert_eq!(world.tasks.len(), 0);
        assert_eq!(world.accounts.len(), 0);
        assert_eq!(world.revision, 0);

        cleanup(&path);
    }

    #[test]
    fn seed_and_reload() {
        let (sf, path) = temp_save("seed");

        let mut world = sf.load_world().unwrap();
        assert!(sf.ensure_default_owner(&mut world, &owner()).unwrap());

        let world2 = sf.load_world().unwrap();
        assert_eq!(world2.accounts.len(), 1);
        let account = world2.get_account_by_username("owner").unwrap();
        assert_eq!(account.role, Some(OrgRole::Owner));
        assert_eq!(account.org_id, Some(ORG));
        assert!(account.password_hash.starts_with("$argon2"));

        let mut world3 = sf.load_world().unwrap();
        assert!(!sf.ensure_default_owner(&mut world3, &owner()).unwrap());

        cleanup(&path);
    }

    #[test]
    fn flush_and_reload_tasks() {
        let (sf, path) = temp_save("tasks");

        let mut world = sf.load_world().unwrap();
        sf.ensure_default_owner(&mut world, &owner()).unwrap();
        let session = world.get_account_by_username("owner").unwrap().session();

        let event = world.apply(create_cmd("Catalogue 24pp"), &session, Utc::now()).unwrap();
        sf.flush(&world, &event).unwrap();
        let task_id = event.task().id;

        let event = world
            .apply(Command::AdvanceStatus { task_id, expected: None }, &session, Utc::now())
            .unwrap();
        sf.flush(&world, &event).unwrap();

        let world2 = sf.load_world().unwrap();
        assert_eq!(world2.revision, 2);
        assert_eq!(world2.tasks.len(), 1);

        let task = &world2.tasks[&task_id];
        assert_eq!(task, &world.tasks[&task_id]);
        assert_eq!(task.status, TaskStatus::Design);
        assert_eq!(task.visibility, Visibility::Department);
        assert_eq!(task.department.as_deref(), Some("Press"));

        cleanup(&path);
    }

    #[test]
    fn delete_task_removes_from_disk() {
        let (sf, path) = temp_save("delete");

        let mut world = sf.load_world().unwrap();
        sf.ensure_default_owner(&mut world, &owner()).unwrap();
        let session = world.get_account_by_username("owner").unwrap().session();

        let event = world.apply(create_cmd("Doomed"), &session, Utc::now()).unwrap();
        sf.flush(&world, &event).unwrap();
        let task_id = event.task().id;

        let event = world.apply(Command::DeleteTask { task_id }, &session, Utc::now()).unwrap();
        sf.flush(&world, &event).unwrap();

        let world2 = sf.load_world().unwrap();
        assert_eq!(world2.tasks.len(), 0);
        assert_eq!(world2.revision, 2);

        cleanup(&path);
    }

    #[test]
    fn new_account_gets_role_defaults() {
        let account = new_account("press", "pw", ORG, OrgRole::Member, Some("Press".into())).unwrap();
        assert_eq!(account.grants, access::default_grants(OrgRole::Member));
        assert_ne!(account.password_hash, "pw");
    }
}
