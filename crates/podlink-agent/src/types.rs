//! Request and response types exchanged with the agent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The runtime identifier of a container, as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Create a container ID from its runtime string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the runtime string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A command to run inside a container after files are synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cmd {
    /// Program and arguments.
    pub argv: Vec<String>,
}

/// A request to update files in a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateContainerRequest {
    /// Container to update.
    pub container_id: ContainerId,
    /// Tar archive of files to extract into the container.
    pub archive: Vec<u8>,
    /// Paths to remove from the container.
    pub files_to_delete: Vec<String>,
    /// Commands to run once the archive is extracted.
    pub commands: Vec<Cmd>,
    /// Restart the container process in place instead of the container.
    pub hot_reload: bool,
}

impl UpdateContainerRequest {
    /// Create an update with an archive and nothing else.
    #[must_use]
    pub fn new(container_id: ContainerId, archive: Vec<u8>) -> Self {
        Self {
            container_id,
            archive,
            files_to_delete: Vec::new(),
            commands: Vec::new(),
            hot_reload: false,
        }
    }
}
