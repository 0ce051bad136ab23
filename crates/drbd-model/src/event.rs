//! Decoding of `drbdsetup events2` lines into event records.

use std::fmt;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::warn;

use crate::error::EventError;

/// Properties of one event, in line order, keys unique.
pub type PropsMap = IndexMap<SmolStr, SmolStr>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventMode {
    Exists,
    Create,
    Change,
    Rename,
    Destroy,
}

impl EventMode {
    /// `None` for modes the model does not track, such as `call`.
    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "exists" => Some(Self::Exists),
            "create" => Some(Self::Create),
            "change" => Some(Self::Change),
            "rename" => Some(Self::Rename),
            "destroy" => Some(Self::Destroy),
            _ => None,
        }
    }

    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::Create => "create",
            Self::Change => "change",
            Self::Rename => "rename",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for EventMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Resource,
    Connection,
    Device,
    PeerDevice,
    /// The `-` placeholder of the end-of-initial-state marker.
    None,
}

impl ObjectType {
    /// `None` for object types the model does not track, such as `path`.
    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "resource" => Some(Self::Resource),
            "connection" => Some(Self::Connection),
            "device" => Some(Self::Device),
            "peer-device" => Some(Self::PeerDevice),
            "-" => Some(Self::None),
            _ => None,
        }
    }

    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Connection => "connection",
            Self::Device => "device",
            Self::PeerDevice => "peer-device",
            Self::None => "-",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One decoded event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub mode: EventMode,
    pub object: ObjectType,
    pub props: PropsMap,
    /// Keys that appeared more than once; only their first value is kept.
    pub dropped_keys: Vec<SmolStr>,
}

impl EventRecord {
    /// Decodes a line of whitespace separated tokens.
    ///
    /// Returns `Ok(None)` for blank lines and for modes or object types the
    /// model ignores. Tokens without a colon carry no property and are
    /// skipped; a leading timestamp token is skipped the same way.
    pub fn parse(line: &str) -> Result<Option<Self>, EventError> {
        let mut tokens = line.split_whitespace().skip_while(|token| is_timestamp(token));
        let Some(mode_token) = tokens.next() else {
            return Ok(None);
        };
        let object_token = tokens
            .next()
            .ok_or_else(|| EventError::malformed(format!("missing object type after '{mode_token}'")))?;
        let (Some(mode), Some(object)) = (EventMode::parse(mode_token), ObjectType::parse(object_token))
        else {
            return Ok(None);
        };

        let mut props = PropsMap::new();
        let mut dropped_keys = Vec::new();
        for token in tokens {
            let Some((key, value)) = token.split_once(':') else {
                continue;
            };
            if props.contains_key(key) {
                warn!(key, line, "duplicate event property dropped");
                dropped_keys.push(SmolStr::new(key));
                continue;
            }
            props.insert(SmolStr::new(key), SmolStr::new(value));
        }
        Ok(Some(Self {
            mode,
            object,
            props,
            dropped_keys,
        }))
    }
}

/// `--timestamps` prefixes lines with an ISO 8601 time such as
/// `2024-05-01T10:00:00.000000+00:00`.
fn is_timestamp(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() >= 19
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[10] == b'T'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mode_type_and_properties_in_order() {
        let record = EventRecord::parse(
            "change peer-device name:r0 peer-node-id:1 conn-name:peerA volume:0 replication:SyncTarget done:45.07",
        )
        .expect("valid line")
        .expect("tracked event");
        assert_eq!(record.mode, EventMode::Change);
        assert_eq!(record.object, ObjectType::PeerDevice);
        let keys: Vec<_> = record.props.keys().map(SmolStr::as_str).collect();
        assert_eq!(
            keys,
            vec!["name", "peer-node-id", "conn-name", "volume", "replication", "done"]
        );
        assert!(record.dropped_keys.is_empty());
    }

    #[test]
    fn value_keeps_colons_after_the_first() {
        let record = EventRecord::parse("exists connection name:r0 conn-name:peerA path:ipv4:10.0.0.1:7789")
            .expect("valid line")
            .expect("tracked event");
        assert_eq!(
            record.props.get("path").map(SmolStr::as_str),
            Some("ipv4:10.0.0.1:7789")
        );
    }

    #[test]
    fn duplicate_key_keeps_first_value() {
        let record = EventRecord::parse("change resource name:r0 role:Primary role:Secondary")
            .expect("valid line")
            .expect("tracked event");
        assert_eq!(record.props.get("role").map(SmolStr::as_str), Some("Primary"));
        assert_eq!(record.dropped_keys, vec![SmolStr::new("role")]);
    }

    #[test]
    fn skips_timestamps_and_unknown_vocabulary() {
        let record = EventRecord::parse("2024-05-01T10:00:00.000000+00:00 exists -")
            .expect("valid line")
            .expect("tracked event");
        assert_eq!(record.mode, EventMode::Exists);
        assert_eq!(record.object, ObjectType::None);

        assert_eq!(EventRecord::parse("call helper name:r0"), Ok(None));
        assert_eq!(EventRecord::parse("change path name:r0"), Ok(None));
        assert_eq!(EventRecord::parse("   "), Ok(None));
        assert!(EventRecord::parse("change").is_err());
    }
}
