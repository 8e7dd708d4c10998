//! Control messages accepted on the WebSocket.
//!
//! Clients send either the literal `ping` or a JSON object tagged by
//! `command`. Every command gets exactly one JSON reply tagged by `type`.
//! A foreground `start` is answered from its own task once the job ends, so
//! the connection keeps serving commands meanwhile.

use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::broadcast::{Connection, ConnectionId, Replier};
use crate::jobs::model::{CancelResponse, JobId, JobResult, JobStatusResponse};
use crate::jobs::orchestrator::QUEUED_MESSAGE;
use crate::jobs::SubmitOutcome;
use crate::types::ResearchRequest;

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Submit a job and subscribe this connection to it
    Start(ResearchRequest),
    Status { research_id: String },
    Cancel { research_id: String },
    Subscribe { research_id: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    Queued {
        research_id: JobId,
        message: &'static str,
    },
    Finished {
        result: JobResult,
    },
    Status(JobStatusResponse),
    Cancel(CancelResponse),
    Subscribed {
        research_id: String,
    },
    Error {
        error: String,
    },
}

impl ControlReply {
    fn error(error: impl ToString) -> Self {
        ControlReply::Error {
            error: error.to_string(),
        }
    }
}

/// Handle one text frame from `conn`.
///
/// Returns the reply frame, or `None` when the reply is sent later through
/// the connection's [`Replier`].
pub async fn handle_text(state: &AppState, conn: &Connection, text: &str) -> Option<String> {
    if text.trim() == PING {
        return Some(PONG.to_string());
    }

    let command = match serde_json::from_str::<ControlCommand>(text) {
        Ok(command) => command,
        Err(e) => return Some(encode(&ControlReply::error(format!("Invalid command: {}", e)))),
    };

    match command {
        ControlCommand::Start(request) if !request.generate_in_background => {
            spawn_foreground(state.clone(), conn.replier(), request);
            None
        }
        command => Some(encode(&dispatch(state, conn.id(), command).await)),
    }
}

fn encode(reply: &ControlReply) -> String {
    serde_json::to_string(reply).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize control reply");
        r#"{"type":"error","error":"internal error"}"#.to_string()
    })
}

fn spawn_foreground(state: AppState, replier: Replier, request: ResearchRequest) {
    tokio::spawn(async move {
        let reply = start(&state, replier.id(), request).await;
        if let Err(e) = replier.reply(encode(&reply)) {
            tracing::debug!(conn_id = %replier.id(), error = %e, "foreground result not delivered");
        }
    });
}

async fn start(state: &AppState, conn: ConnectionId, request: ResearchRequest) -> ControlReply {
    match state.orchestrator.submit(request, Some(conn)).await {
        Ok(SubmitOutcome::Queued { research_id }) => ControlReply::Queued {
            research_id,
            message: QUEUED_MESSAGE,
        },
        Ok(SubmitOutcome::Finished(result)) => ControlReply::Finished { result },
        Err(e) => ControlReply::error(e),
    }
}

async fn dispatch(state: &AppState, conn: ConnectionId, command: ControlCommand) -> ControlReply {
    match command {
        ControlCommand::Start(request) => start(state, conn, request).await,
        ControlCommand::Status { research_id } => {
            match state.orchestrator.get_result(&research_id) {
                Ok(lookup) => {
                    ControlReply::Status(JobStatusResponse::new(JobId::from(research_id), lookup))
                }
                Err(e) => ControlReply::error(e),
            }
        }
        ControlCommand::Cancel { research_id } => match state.orchestrator.cancel(&research_id) {
            Ok(outcome) => ControlReply::Cancel(CancelResponse {
                research_id: JobId::from(research_id),
                outcome,
            }),
            Err(e) => ControlReply::error(e),
        },
        ControlCommand::Subscribe { research_id } => {
            if let Err(e) = state.orchestrator.summary(&research_id) {
                return ControlReply::error(e);
            }
            match state.broadcast.subscribe(&conn, &JobId::from(research_id.as_str())) {
                Ok(()) => ControlReply::Subscribed { research_id },
                Err(e) => ControlReply::error(e),
            }
        }
    }
}
