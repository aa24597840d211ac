//! Command envelope wire format shared by the CLI and mesh nodes.
//!
//! All commands travel over one shared channel pair. A request is published
//! with its [`CommandTag`] request tag, and every node answers with the
//! matching response tag, which is derived from the request tag by adding
//! [`RESPONSE_TAG_OFFSET`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version of the request envelope layout.
pub const PROTOCOL_VERSION: u32 = 1;

/// Distance between a request tag and its response tag.
pub const RESPONSE_TAG_OFFSET: u32 = 0x1000;

/// Remote command kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandTag {
    /// Upload the packaged source code and compile it.
    Upload,

    /// Create a deployment and start it.
    Create,

    /// Remove the current deployment.
    Remove,

    /// Query deployment status.
    Status,

    /// Tail deployment logs.
    Logs,
}

impl CommandTag {
    /// Every supported command, in request tag order.
    pub const ALL: [CommandTag; 5] = [
        CommandTag::Upload,
        CommandTag::Create,
        CommandTag::Remove,
        CommandTag::Status,
        CommandTag::Logs,
    ];

    /// Tag used to publish a request of this kind.
    pub const fn request_tag(self) -> u32 {
        match self {
            CommandTag::Upload => 0xE201,
            CommandTag::Create => 0xE202,
            CommandTag::Remove => 0xE205,
            CommandTag::Status => 0xE206,
            CommandTag::Logs => 0xE207,
        }
    }

    /// Tag nodes use to answer a request of this kind.
    pub const fn response_tag(self) -> u32 {
        self.request_tag() + RESPONSE_TAG_OFFSET
    }

    /// Resolve a request tag. Response tags never resolve here.
    pub fn from_request_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.request_tag() == tag)
    }

    /// Resolve a response tag back to its command.
    pub fn from_response_tag(tag: u32) -> Option<Self> {
        tag.checked_sub(RESPONSE_TAG_OFFSET)
            .and_then(Self::from_request_tag)
    }

    /// Lowercase command name, as used on the command line.
    pub const fn name(self) -> &'static str {
        match self {
            CommandTag::Upload => "upload",
            CommandTag::Create => "create",
            CommandTag::Remove => "remove",
            CommandTag::Status => "status",
            CommandTag::Logs => "logs",
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Request envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request<T> {
    /// Envelope layout version.
    pub version: u32,

    /// Session identifier responses are routed back to.
    pub target: String,

    /// Name of the serverless tool this command applies to.
    pub sfn_name: String,

    /// Command-specific payload.
    pub msg: T,
}

impl<T> Request<T> {
    /// Wrap a payload into a current-version envelope.
    pub fn new(target: impl Into<String>, sfn_name: impl Into<String>, msg: T) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            target: target.into(),
            sfn_name: sfn_name.into(),
            msg,
        }
    }
}

/// Response envelope sent by a single mesh node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Zone the responding node belongs to.
    pub mesh_zone: String,

    /// Responding node, if the zone reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_node: Option<String>,

    /// Whether this node finished handling the command.
    #[serde(default)]
    pub done: bool,

    /// Error text, empty when the node reported no error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,

    /// Progress or result message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg: String,
}

impl Response {
    /// Human-readable origin, `zone` or `zone.node`.
    pub fn origin(&self) -> String {
        match self.mesh_node.as_deref() {
            Some(node) if !node.is_empty() => format!("{}.{node}", self.mesh_zone),
            _ => self.mesh_zone.clone(),
        }
    }
}

/// `upload` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadMsg {
    /// ZIP archive with the source code.
    #[serde(with = "base64_bytes")]
    pub zip_data: Vec<u8>,
}

/// `create` payload.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateMsg {
    /// Environment variables in `KEY=VALUE` form.
    #[serde(default)]
    pub envs: Vec<String>,
}

/// `remove` payload.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RemoveMsg {}

/// `status` payload.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatusMsg {}

/// `logs` payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogsMsg {
    /// Number of trailing log lines to replay before following.
    pub tail: u32,
}

/// Archive bytes travel as a standard base64 string.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
