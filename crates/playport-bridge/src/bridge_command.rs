//! Closed command table for frame-originated envelopes.
//!
//! Every recognized wire method maps to exactly one [`BridgeMethod`] variant,
//! decodes into a [`BridgeCommand`], and is routed by an exhaustive match in
//! [`route_bridge_command`]. Adding a method without a route fails to compile;
//! only wire values this host does not know are dropped at runtime.

use serde_json::Value;

use crate::bridge_envelope::FrameEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Enumerates supported `BridgeMethod` values.
pub enum BridgeMethod {
    Authorize,
    AuthorizeAndWait,
    GetUsers,
    GetSaveData,
    SetSaveData,
    Logout,
    SayHello,
    ShowPayment,
    ToggleFullscreen,
    ShowCampaign,
}

impl BridgeMethod {
    pub const ALL: [BridgeMethod; 10] = [
        Self::Authorize,
        Self::AuthorizeAndWait,
        Self::GetUsers,
        Self::GetSaveData,
        Self::SetSaveData,
        Self::Logout,
        Self::SayHello,
        Self::ShowPayment,
        Self::ToggleFullscreen,
        Self::ShowCampaign,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::AuthorizeAndWait => "authorizeAndWait",
            Self::GetUsers => "getUsers",
            Self::GetSaveData => "getSaveData",
            Self::SetSaveData => "setSaveData",
            Self::Logout => "logout",
            Self::SayHello => "sayHello",
            Self::ShowPayment => "showPayment",
            Self::ToggleFullscreen => "toggleFullscreen",
            Self::ShowCampaign => "showCampaign",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == raw)
    }

    /// Only the greeting exchange may carry list-shaped `data`.
    pub fn permits_list_data(self) -> bool {
        matches!(self, Self::SayHello)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Decoded frame command with its payload.
pub enum BridgeCommand {
    Authorize,
    AuthorizeAndWait,
    GetUsers(Value),
    GetSaveData(Value),
    SetSaveData(Value),
    Logout,
    SayHello,
    ShowPayment { token: String },
    ToggleFullscreen,
    ShowCampaign(Value),
}

impl BridgeCommand {
    pub fn method(&self) -> BridgeMethod {
        match self {
            Self::Authorize => BridgeMethod::Authorize,
            Self::AuthorizeAndWait => BridgeMethod::AuthorizeAndWait,
            Self::GetUsers(_) => BridgeMethod::GetUsers,
            Self::GetSaveData(_) => BridgeMethod::GetSaveData,
            Self::SetSaveData(_) => BridgeMethod::SetSaveData,
            Self::Logout => BridgeMethod::Logout,
            Self::SayHello => BridgeMethod::SayHello,
            Self::ShowPayment { .. } => BridgeMethod::ShowPayment,
            Self::ToggleFullscreen => BridgeMethod::ToggleFullscreen,
            Self::ShowCampaign(_) => BridgeMethod::ShowCampaign,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Requests served by the stateless capability handlers.
pub enum CapabilityRequest {
    Authorize { wait_for_result: bool },
    GetUsers(Value),
    GetSaveData(Value),
    SetSaveData(Value),
    Logout,
    SayHello,
}

impl CapabilityRequest {
    pub fn method(&self) -> BridgeMethod {
        match self {
            Self::Authorize {
                wait_for_result: false,
            } => BridgeMethod::Authorize,
            Self::Authorize {
                wait_for_result: true,
            } => BridgeMethod::AuthorizeAndWait,
            Self::GetUsers(_) => BridgeMethod::GetUsers,
            Self::GetSaveData(_) => BridgeMethod::GetSaveData,
            Self::SetSaveData(_) => BridgeMethod::SetSaveData,
            Self::Logout => BridgeMethod::Logout,
            Self::SayHello => BridgeMethod::SayHello,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Commands owned by the session state machine.
pub enum SessionCommand {
    ToggleFullscreen,
    ShowPayment { token: String },
}

#[derive(Debug, Clone, PartialEq)]
/// Destination of a decoded command.
pub enum CommandRoute {
    Capability(CapabilityRequest),
    Session(SessionCommand),
    Campaign(Value),
}

pub fn route_bridge_command(command: BridgeCommand) -> CommandRoute {
    match command {
        BridgeCommand::Authorize => CommandRoute::Capability(CapabilityRequest::Authorize {
            wait_for_result: false,
        }),
        BridgeCommand::AuthorizeAndWait => {
            CommandRoute::Capability(CapabilityRequest::Authorize {
                wait_for_result: true,
            })
        }
        BridgeCommand::GetUsers(data) => CommandRoute::Capability(CapabilityRequest::GetUsers(data)),
        BridgeCommand::GetSaveData(data) => {
            CommandRoute::Capability(CapabilityRequest::GetSaveData(data))
        }
        BridgeCommand::SetSaveData(data) => {
            CommandRoute::Capability(CapabilityRequest::SetSaveData(data))
        }
        BridgeCommand::Logout => CommandRoute::Capability(CapabilityRequest::Logout),
        BridgeCommand::SayHello => CommandRoute::Capability(CapabilityRequest::SayHello),
        BridgeCommand::ShowPayment { token } => {
            CommandRoute::Session(SessionCommand::ShowPayment { token })
        }
        BridgeCommand::ToggleFullscreen => CommandRoute::Session(SessionCommand::ToggleFullscreen),
        BridgeCommand::ShowCampaign(data) => CommandRoute::Campaign(data),
    }
}

/// Decodes a validated envelope. Unknown methods and payment requests without
/// a usable token yield `None`.
pub fn decode_bridge_command(envelope: &FrameEnvelope) -> Option<BridgeCommand> {
    let method = BridgeMethod::parse(&envelope.method)?;
    let data = envelope.data.clone();
    let command = match method {
        BridgeMethod::Authorize => BridgeCommand::Authorize,
        BridgeMethod::AuthorizeAndWait => BridgeCommand::AuthorizeAndWait,
        BridgeMethod::GetUsers => BridgeCommand::GetUsers(data),
        BridgeMethod::GetSaveData => BridgeCommand::GetSaveData(data),
        BridgeMethod::SetSaveData => BridgeCommand::SetSaveData(data),
        BridgeMethod::Logout => BridgeCommand::Logout,
        BridgeMethod::SayHello => BridgeCommand::SayHello,
        BridgeMethod::ShowPayment => BridgeCommand::ShowPayment {
            token: payment_token(&data)?,
        },
        BridgeMethod::ToggleFullscreen => BridgeCommand::ToggleFullscreen,
        BridgeMethod::ShowCampaign => BridgeCommand::ShowCampaign(data),
    };
    Some(command)
}

fn payment_token(data: &Value) -> Option<String> {
    let raw = match data {
        Value::String(token) => token.as_str(),
        Value::Object(fields) => fields.get("token")?.as_str()?,
        _ => return None,
    };
    // Tokens are opaque; only a blank one is unusable.
    if raw.trim().is_empty() {
        return None;
    }
    Some(raw.to_string())
}
