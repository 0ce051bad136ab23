use std::fmt;

use crate::error::EventError;

pub const PROP_KEY_ROLE: &str = "role";

/// Role of a resource, or the role a peer reports over a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    Primary,
    Secondary,
    #[default]
    Unknown,
}

impl Role {
    pub fn parse(label: &str) -> Result<Self, EventError> {
        match label {
            "Primary" => Ok(Self::Primary),
            "Secondary" => Ok(Self::Secondary),
            "Unknown" => Ok(Self::Unknown),
            other => Err(EventError::malformed(format!("invalid role '{other}'"))),
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Primary => "Primary",
            Self::Secondary => "Secondary",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
