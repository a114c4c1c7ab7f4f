//---------------------------------------
// Pure workflow core
pub mod workflow;
pub mod sla;
pub mod task;
pub mod access;
//---------------------------------------

//---------------------------------------
// State, storage, protocol
pub mod world;
pub mod persist;
pub mod wire;
pub mod config;
//---------------------------------------

//---------------------------------------
// HTTP / WebSocket surface
pub mod auth;
pub mod api;
pub mod live;
//---------------------------------------

pub use access::{can_assign, can_read, can_write, has_permission, Session};
pub use sla::{sla_health, sla_health_now, Priority, SlaHealth, SlaReport};
pub use task::{Task, TaskRecord, Visibility};
pub use workflow::{is_terminal, next_status, TaskStatus};
