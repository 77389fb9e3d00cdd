use serde::{Deserialize, Serialize};

/// The JSON payload stored at a worker key.
///
/// Parsing tolerates unknown fields for forward compatibility; it does not
/// use `deny_unknown_fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: i64,
    pub datacenter_id: i64,
    pub ip: String,
    /// UNIX seconds.
    pub register_time: i64,
    /// UNIX seconds.
    pub last_heartbeat: i64,
    /// Fencing token unique to this process incarnation. Proves ownership
    /// on heartbeat refresh.
    pub instance_id: String,
}

impl WorkerRecord {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("WorkerRecord fields are always serializable")
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
