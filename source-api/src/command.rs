//! Outbound commands and their outcomes

use std::fmt;

use serde_json::{json, Value};

use crate::types::{DiscoveredEndpoint, SourceId};

/// Class of operation a command (or failure) belongs to
///
/// Errors are remembered per class and cleared by the next success of the
/// same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    SourceSelection,
    Playback,
    Connection,
    Discovery,
    Settings,
    StatusPull,
    /// Failures the backend reports on its own, outside any command
    Backend,
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationClass::SourceSelection => "source-selection",
            OperationClass::Playback => "playback",
            OperationClass::Connection => "connection",
            OperationClass::Discovery => "discovery",
            OperationClass::Settings => "settings",
            OperationClass::StatusPull => "status-pull",
            OperationClass::Backend => "backend",
        };
        f.write_str(name)
    }
}

/// Identifies a pending inbound connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    RequestId(String),
    Host(String),
}

/// A command for the backend control interface
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Switch the active source (`None` stops everything)
    SelectSource(SourceId),
    /// Generic source command such as play, pause, next, previous or seek
    SourceCommand {
        source: SourceId,
        command: String,
        data: Value,
    },
    SetRoutingMode(String),
    SetEqualizer(bool),
    DiscoverEndpoints,
    /// Connect the multiroom client to a discovered server
    ConnectEndpoint { host: String },
    /// Drop the current peer of the given source
    Disconnect(SourceId),
    AcceptConnection(ConnectionTarget),
    RejectConnection(ConnectionTarget),
}

impl Command {
    pub fn play(source: SourceId) -> Self {
        Self::source_command(source, "play", Value::Null)
    }

    pub fn pause(source: SourceId) -> Self {
        Self::source_command(source, "pause", Value::Null)
    }

    pub fn next(source: SourceId) -> Self {
        Self::source_command(source, "next", Value::Null)
    }

    pub fn previous(source: SourceId) -> Self {
        Self::source_command(source, "previous", Value::Null)
    }

    pub fn seek(source: SourceId, position_ms: u64) -> Self {
        Self::source_command(source, "seek", json!({ "position_ms": position_ms }))
    }

    fn source_command(source: SourceId, command: &str, data: Value) -> Self {
        Command::SourceCommand {
            source,
            command: command.to_string(),
            data,
        }
    }

    /// Operation class used for error bookkeeping
    pub fn class(&self) -> OperationClass {
        match self {
            Command::SelectSource(_) => OperationClass::SourceSelection,
            Command::SourceCommand { .. } => OperationClass::Playback,
            Command::SetRoutingMode(_) | Command::SetEqualizer(_) => OperationClass::Settings,
            Command::DiscoverEndpoints => OperationClass::Discovery,
            Command::ConnectEndpoint { .. }
            | Command::Disconnect(_)
            | Command::AcceptConnection(_)
            | Command::RejectConnection(_) => OperationClass::Connection,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::SelectSource(_) => "select_source",
            Command::SourceCommand { .. } => "source_command",
            Command::SetRoutingMode(_) => "set_routing_mode",
            Command::SetEqualizer(_) => "set_equalizer",
            Command::DiscoverEndpoints => "discover",
            Command::ConnectEndpoint { .. } => "connect",
            Command::Disconnect(_) => "disconnect",
            Command::AcceptConnection(_) => "accept_connection",
            Command::RejectConnection(_) => "reject_connection",
        }
    }

    /// Route and body this command maps to on the backend's HTTP interface
    pub fn request(&self) -> CommandRequest {
        match self {
            Command::SelectSource(source) => {
                CommandRequest::new(format!("api/audio/source/{}", source.as_str()), None)
            }
            Command::SourceCommand {
                source,
                command,
                data,
            } => control(*source, command, data.clone()),
            Command::SetRoutingMode(mode) => {
                CommandRequest::new("api/audio/routing", Some(json!({ "mode": mode })))
            }
            Command::SetEqualizer(enabled) => {
                CommandRequest::new("api/audio/equalizer", Some(json!({ "enabled": enabled })))
            }
            Command::DiscoverEndpoints => CommandRequest::new("api/snapclient/discover", None),
            Command::ConnectEndpoint { host } => control(
                SourceId::MultiroomClient,
                "connect",
                json!({ "host": host }),
            ),
            Command::Disconnect(source) => control(*source, "disconnect", Value::Null),
            Command::AcceptConnection(target) => control(
                SourceId::MultiroomClient,
                "accept_connection",
                target.to_json(),
            ),
            Command::RejectConnection(target) => control(
                SourceId::MultiroomClient,
                "reject_connection",
                target.to_json(),
            ),
        }
    }
}

impl ConnectionTarget {
    fn to_json(&self) -> Value {
        match self {
            ConnectionTarget::RequestId(id) => json!({ "request_id": id }),
            ConnectionTarget::Host(host) => json!({ "host": host }),
        }
    }
}

fn control(source: SourceId, command: &str, data: Value) -> CommandRequest {
    let data = if data.is_null() { json!({}) } else { data };
    CommandRequest::new(
        format!("api/audio/control/{}", source.as_str()),
        Some(json!({ "command": command, "data": data })),
    )
}

/// Transport-neutral description of a command call
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Path relative to the backend base URL, without a leading slash
    pub path: String,
    pub body: Option<Value>,
}

impl CommandRequest {
    fn new(path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            path: path.into(),
            body,
        }
    }
}

/// What the backend said about a command
///
/// Acceptance only means the backend took the command; the resulting state
/// change arrives later as an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Accepted { response: Value },
    Rejected { reason: String },
}

impl CommandOutcome {
    pub fn accepted() -> Self {
        CommandOutcome::Accepted {
            response: Value::Null,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        CommandOutcome::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandOutcome::Accepted { .. })
    }

    /// Endpoints carried by a discovery response (`{"servers": [...]}`)
    pub fn discovered_endpoints(&self) -> Option<Vec<DiscoveredEndpoint>> {
        let CommandOutcome::Accepted { response } = self else {
            return None;
        };
        let servers = response.get("servers")?.clone();
        serde_json::from_value(servers).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_source_route() {
        let request = Command::SelectSource(SourceId::Bluetooth).request();
        assert_eq!(request.path, "api/audio/source/bluetooth");
        assert!(request.body.is_none());
    }

    #[test]
    fn test_seek_is_a_playback_control_command() {
        let command = Command::seek(SourceId::StreamClient, 30_000);
        assert_eq!(command.class(), OperationClass::Playback);

        let request = command.request();
        assert_eq!(request.path, "api/audio/control/librespot");
        assert_eq!(
            request.body,
            Some(json!({ "command": "seek", "data": { "position_ms": 30000 } }))
        );
    }

    #[test]
    fn test_connection_commands_target_multiroom_client() {
        let request = Command::ConnectEndpoint {
            host: "10.0.0.4".into(),
        }
        .request();
        assert_eq!(request.path, "api/audio/control/snapclient");
        assert_eq!(
            request.body,
            Some(json!({ "command": "connect", "data": { "host": "10.0.0.4" } }))
        );

        let request =
            Command::RejectConnection(ConnectionTarget::RequestId("req-1".into())).request();
        assert_eq!(
            request.body,
            Some(json!({ "command": "reject_connection", "data": { "request_id": "req-1" } }))
        );
    }

    #[test]
    fn test_discovery_outcome_parses_servers() {
        let outcome = CommandOutcome::Accepted {
            response: json!({
                "servers": [
                    { "host": "10.0.0.4", "name": "Kitchen", "port": 1704 },
                    { "host": "10.0.0.5", "name": "Office" }
                ],
                "count": 2
            }),
        };

        let endpoints = outcome.discovered_endpoints().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[1].port, 1704);
        assert!(CommandOutcome::rejected("nope").discovered_endpoints().is_none());
    }
}
