//! Message policy checks
//!
//! Two gates run between parsing and persistence: the schema version check,
//! which only warns, and the organization allow-list, which rejects.

use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

use crate::codec::IncomingMessage;
use crate::error::ProcessingError;
use crate::types::{BrokerMessage, OrgId, SchemaVersion};

/// Schema version the consumer understands unless configured otherwise.
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = 2;

/// Header of the allow-list file.
const ALLOW_LIST_HEADER: &str = "OrgID";

/// Compare the message schema version with the expected one.
///
/// A mismatch is logged and processing continues.
pub fn check_message_version(
    message: &IncomingMessage,
    broker_message: &BrokerMessage,
    expected: SchemaVersion,
) -> bool {
    if message.version == expected {
        return true;
    }
    warn!(
        offset = broker_message.offset(),
        partition = broker_message.partition(),
        topic = %broker_message.topic(),
        version = message.version,
        expected,
        "Received data with unexpected version"
    );
    false
}

/// Errors while loading an allow-list file
#[derive(Debug, thiserror::Error)]
pub enum AllowListError {
    #[error("failed to read allow list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("allow list {path}: expected header 'OrgID', found '{found}'")]
    MissingHeader { path: String, found: String },
    #[error("allow list {path} line {line}: invalid organization ID '{value}'")]
    InvalidOrgId {
        path: String,
        line: usize,
        value: String,
    },
}

/// Organizations whose messages may be processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OrgAllowList {
    /// Filtering switched off; every organization passes
    #[default]
    Disabled,
    /// Filtering on. `None` means no list is loaded, which allows nothing.
    Enabled(Option<HashSet<OrgId>>),
}

impl OrgAllowList {
    pub fn disabled() -> Self {
        Self::Disabled
    }

    pub fn enabled(allowed: Option<HashSet<OrgId>>) -> Self {
        Self::Enabled(allowed)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// Reject messages from organizations outside the list.
    pub fn check(&self, org_id: OrgId) -> Result<(), ProcessingError> {
        let allowed = match self {
            Self::Disabled => true,
            Self::Enabled(Some(orgs)) => orgs.contains(&org_id),
            Self::Enabled(None) => false,
        };

        if allowed {
            Ok(())
        } else {
            debug!(org_id, "Organization is not in allow list");
            Err(ProcessingError::OrganizationNotAllowed(org_id))
        }
    }

    /// Build an enabled list from inline IDs and an optional file, merged.
    ///
    /// With neither source present the list stays unloaded.
    pub fn load(inline: &[OrgId], file: Option<&Path>) -> Result<Self, AllowListError> {
        let mut orgs: Option<HashSet<OrgId>> = if inline.is_empty() {
            None
        } else {
            Some(inline.iter().copied().collect())
        };

        if let Some(path) = file {
            let from_file = load_allow_list_file(path)?;
            orgs.get_or_insert_with(HashSet::new).extend(from_file);
        }

        Ok(Self::Enabled(orgs))
    }
}

/// Read an allow-list file: an `OrgID` header followed by one ID per line.
pub fn load_allow_list_file(path: &Path) -> Result<HashSet<OrgId>, AllowListError> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| AllowListError::Io {
        path: display.clone(),
        source,
    })?;
    parse_allow_list(&content, &display)
}

fn parse_allow_list(content: &str, path: &str) -> Result<HashSet<OrgId>, AllowListError> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    match lines.next() {
        Some((_, header)) if header == ALLOW_LIST_HEADER => {}
        Some((_, other)) => {
            return Err(AllowListError::MissingHeader {
                path: path.to_string(),
                found: other.to_string(),
            })
        }
        None => {
            return Err(AllowListError::MissingHeader {
                path: path.to_string(),
                found: String::new(),
            })
        }
    }

    lines
        .map(|(line, value)| {
            value
                .parse::<OrgId>()
                .map_err(|_| AllowListError::InvalidOrgId {
                    path: path.to_string(),
                    line,
                    value: value.to_string(),
                })
        })
        .collect()
}
