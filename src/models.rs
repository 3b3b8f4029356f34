//! Domain models shared by the reconciler and the event daemon.
//!
//! Defines server records, backend instances, job references and the
//! normalized job event published to the exchange.

use serde::{Deserialize, Serialize};

/// Message type tag carried by every published job event.
pub const OP_EVENT_TYPE: &str = "ganeti-op-status";

/// Operational state of a server as recorded in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperState {
    Build,     // creation in progress
    Started,   // powered on ("UP")
    Stopped,   // powered off ("DOWN")
    Error,     // creation failed
    Destroyed, // removal acknowledged, record tombstoned
}

impl OperState {
    /// Returns true if the state maps to a running instance.
    pub fn is_up(&self) -> bool {
        matches!(self, OperState::Started)
    }

    /// Returns true for settled power states (STARTED/STOPPED).
    ///
    /// Only settled states participate in unsynced-state detection; a
    /// record mid-transition would race the operation in progress.
    pub fn is_settled(&self) -> bool {
        matches!(self, OperState::Started | OperState::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperState::Build => "BUILD",
            OperState::Started => "STARTED",
            OperState::Stopped => "STOPPED",
            OperState::Error => "ERROR",
            OperState::Destroyed => "DESTROYED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "BUILD" => Some(OperState::Build),
            "STARTED" => Some(OperState::Started),
            "STOPPED" => Some(OperState::Stopped),
            "ERROR" => Some(OperState::Error),
            "DESTROYED" => Some(OperState::Destroyed),
            _ => None,
        }
    }
}

/// Ganeti instance opcodes the state machine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    InstanceCreate,
    InstanceStartup,
    InstanceShutdown,
    InstanceReboot,
    InstanceRemove,
}

impl Opcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::InstanceCreate => "OP_INSTANCE_CREATE",
            Opcode::InstanceStartup => "OP_INSTANCE_STARTUP",
            Opcode::InstanceShutdown => "OP_INSTANCE_SHUTDOWN",
            Opcode::InstanceReboot => "OP_INSTANCE_REBOOT",
            Opcode::InstanceRemove => "OP_INSTANCE_REMOVE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OP_INSTANCE_CREATE" => Some(Opcode::InstanceCreate),
            "OP_INSTANCE_STARTUP" => Some(Opcode::InstanceStartup),
            "OP_INSTANCE_SHUTDOWN" => Some(Opcode::InstanceShutdown),
            "OP_INSTANCE_REBOOT" => Some(Opcode::InstanceReboot),
            "OP_INSTANCE_REMOVE" => Some(Opcode::InstanceRemove),
            _ => None,
        }
    }
}

/// Status of a Ganeti job operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Queued,
    Waiting,
    Running,
    Canceled,
    Success,
    Error,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpStatus::Queued => "queued",
            OpStatus::Waiting => "waiting",
            OpStatus::Running => "running",
            OpStatus::Canceled => "canceled",
            OpStatus::Success => "success",
            OpStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(OpStatus::Queued),
            "waiting" => Some(OpStatus::Waiting),
            "running" => Some(OpStatus::Running),
            "canceled" => Some(OpStatus::Canceled),
            "success" => Some(OpStatus::Success),
            "error" => Some(OpStatus::Error),
            _ => None,
        }
    }
}

/// Reference to the job that triggered a state transition.
///
/// Synthetic events produced by reconciliation repairs carry their own
/// tagged reference so they can never collide with a real job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRef {
    Real(u64),
    Synthetic,
}

impl JobRef {
    pub fn as_db_str(&self) -> String {
        match self {
            JobRef::Real(id) => format!("job-{}", id),
            JobRef::Synthetic => "synthetic".to_string(),
        }
    }
}

/// System-of-record view of a compute instance.
///
/// Rows are tombstoned via `deleted`, never physically removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// Stable numeric identifier (primary key).
    pub id: i64,
    /// Externally visible instance name sent to the backend (`<prefix><id>`).
    pub backend_id: String,
    /// Current operational state.
    pub operstate: OperState,
    /// Tombstone flag set by a successful remove.
    pub deleted: bool,
    /// Reference to the last job applied to this record.
    pub last_job: Option<String>,
    /// Creation time (Unix timestamp).
    pub created_at: i64,
    /// Last mutation time (Unix timestamp).
    pub updated_at: i64,
}

/// Derive the backend instance name for a server id.
///
/// The prefix is fixed per deployment; this is the join key between the
/// database and the backend instance list.
pub fn backend_id_of(prefix: &str, id: i64) -> String {
    format!("{}{}", prefix, id)
}

/// Live view of an instance as reported by the cluster backend.
///
/// Ephemeral: exists only as a query result, never persisted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInstance {
    /// Instance name, matches `ServerRecord::backend_id` for our records.
    pub name: String,
    /// Power state reported by the backend.
    pub running: bool,
}

/// Normalized notification derived from one operation of a completed job.
///
/// Wire format matches the original notification daemon: `type` tag,
/// camelCase `jobId`, and a `message` mirror of the last log line when one
/// exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub instance: String,
    pub operation: String,
    #[serde(rename = "jobId")]
    pub job_id: u64,
    pub status: String,
    pub logmsg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobEvent {
    pub fn new(
        job_id: u64,
        instance: String,
        operation: String,
        status: String,
        logmsg: Option<String>,
    ) -> Self {
        JobEvent {
            event_type: OP_EVENT_TYPE.to_string(),
            instance,
            operation,
            job_id,
            status,
            message: logmsg.clone(),
            logmsg,
        }
    }
}
