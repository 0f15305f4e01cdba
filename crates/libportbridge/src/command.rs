use serde::{Deserialize, Deserializer};

/// What a control message asks the bridge to do with a port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CommandKind {
    Forward,
    Clear,
    /// Anything else on the topic. Recognized as valid JSON but acted on by
    /// nobody, so other message types can share the topic.
    #[default]
    Unknown,
}

impl<'de> Deserialize<'de> for CommandKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kind = String::deserialize(deserializer)?;
        Ok(match kind.as_str() {
            "FWD" => CommandKind::Forward,
            "CLR" => CommandKind::Clear,
            _ => CommandKind::Unknown,
        })
    }
}

/// A control message as it appears on the wire. The field names are the
/// contract with existing publishers, hence the renames. Missing fields
/// decode to their zero values.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PortCommand {
    #[serde(rename = "Type", default)]
    pub kind: CommandKind,
    #[serde(rename = "Port", default)]
    pub port: u16,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
}

pub fn decode(payload: &[u8]) -> serde_json::Result<PortCommand> {
    serde_json::from_slice(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_forward() {
        let cmd = decode(br#"{"Type": "FWD", "Port": 8080, "Description": "test"}"#).unwrap();
        assert_eq!(
            cmd,
            PortCommand {
                kind: CommandKind::Forward,
                port: 8080,
                description: Some("test".to_owned()),
            }
        );
    }

    #[test]
    fn test_decode_clear_without_description() {
        let cmd = decode(br#"{"Type": "CLR", "Port": 8080}"#).unwrap();
        assert_eq!(cmd.kind, CommandKind::Clear);
        assert_eq!(cmd.port, 8080);
        assert_eq!(cmd.description, None);
    }

    #[test]
    fn test_unrecognized_type_decodes_as_unknown() {
        let cmd = decode(br#"{"Type": "XYZ", "Port": 8080}"#).unwrap();
        assert_eq!(cmd.kind, CommandKind::Unknown);
    }

    #[test]
    fn test_missing_fields_decode_to_zero_values() {
        let cmd = decode(b"{}").unwrap();
        assert_eq!(cmd.kind, CommandKind::Unknown);
        assert_eq!(cmd.port, 0);
        assert_eq!(cmd.description, None);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(decode(b"not json at all").is_err());
    }

    #[test]
    fn test_port_out_of_u16_range_is_a_decode_error() {
        assert!(decode(br#"{"Type": "FWD", "Port": 123456}"#).is_err());
    }
}
