//! Mass-assignment allow-list for [`Snapshot`](crate::Snapshot).

use serde::{Deserialize, Serialize};
use std::fmt;
use vsm_core::error::{Result, SnapshotError};

/// Attributes a caller may set through mass assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Name,
    Description,
}

impl Attribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Name => "name",
            Attribute::Description => "description",
        }
    }

    /// Label used when rendering error messages.
    pub fn human_name(&self) -> &'static str {
        match self {
            Attribute::Name => "Name",
            Attribute::Description => "Description",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes that exist on a snapshot but are owned by the backend.
pub const FORBIDDEN_ATTRIBUTES: &[&str] = &["id", "host_id", "raw_snapshot", "parent", "create_time"];

/// Check every key of `attrs` against the allow-list.
///
/// Returns the permitted pairs in input order. A single forbidden or unknown
/// key rejects the whole batch, so callers can apply the result without
/// partial updates.
pub fn sanitize_for_mass_assignment<K, V, I>(attrs: I) -> Result<Vec<(Attribute, V)>>
where
    K: AsRef<str>,
    I: IntoIterator<Item = (K, V)>,
{
    let mut permitted = Vec::new();
    let mut forbidden = Vec::new();

    for (key, value) in attrs {
        match key.as_ref() {
            "name" => permitted.push((Attribute::Name, value)),
            "description" => permitted.push((Attribute::Description, value)),
            key if FORBIDDEN_ATTRIBUTES.contains(&key) => forbidden.push(key.to_string()),
            key => return Err(SnapshotError::UnknownAttribute(key.to_string())),
        }
    }

    if forbidden.is_empty() {
        Ok(permitted)
    } else {
        Err(SnapshotError::ForbiddenAttributes(forbidden))
    }
}
