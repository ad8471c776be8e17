use serde::{Deserialize, Serialize};

/// Body posted to the gateway's send endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GatewayMessage {
    pub target: String,
    pub message: String,
}

/// Reply body. Gateways answer `200` with `status: false` for some
/// delivery refusals, so the flag is checked as well as the HTTP status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct GatewayReply {
    #[serde(default = "default_status")]
    pub status: bool,
    #[serde(default, alias = "reason", alias = "message")]
    pub detail: Option<String>,
}

fn default_status() -> bool {
    true
}

impl GatewayReply {
    /// Parses a reply body; bodies that are not JSON count as accepted.
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or(Self { status: true, detail: None })
    }
}
