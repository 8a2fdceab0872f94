//! Names of the EDSM API families and the endpoints we query by name.
//!
//! An API family maps to the first path segment (`{base}/{api}/{endpoint}`).

pub const COMMANDER_V1: &str = "api-commander-v1";
pub const LOGS_V1: &str = "api-logs-v1";
pub const JOURNAL_V1: &str = "api-journal-v1";
pub const SYSTEM_V1: &str = "api-system-v1";
pub const SYSTEMS_V1: &str = "api-systems-v1";
pub const STATUS_V1: &str = "api-status-v1";

/// `api-system-v1/bodies`: bodies known to EDSM for one system.
pub const SYSTEM_V1_BODIES: &str = "bodies";
/// `api-status-v1/elite-server`: game server status.
pub const STATUS_V1_ELITE_SERVER: &str = "elite-server";
