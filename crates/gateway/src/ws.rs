//! Per-connection protocol handler.
//!
//! One task per accepted WebSocket, driving the connection through its
//! lifecycle: authenticate the session token, bind a PTY session, then a
//! strictly sequential message loop — the next inbound frame is not read
//! until the previous reply has been sent, so replies always arrive in
//! request order. Teardown runs on every exit path and is idempotent.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use protocol::{parse_request, ClientRequest, ServerMessage};

use crate::auth::TokenOutcome;
use crate::server::AppState;
use crate::session::ConnectionId;

/// Budget for the flush-empty-command run used on policy rejections.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Drives one accepted WebSocket connection to completion.
///
/// `token` is the `session` cookie value extracted from the handshake
/// request, if any. No PTY session exists until the token validates; a
/// connection that fails the handshake never touches the registry.
pub async fn handle_connection(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let conn_id = ConnectionId::new();

    // Authenticating
    let Some(token) = token else {
        tracing::debug!(connection_id = %conn_id, "unauthorized request denied: no session cookie");
        let _ = send(
            &mut socket,
            &ServerMessage::error("unauthorized: missing session token"),
        )
        .await;
        return;
    };

    let claims = match state.validator.validate(&token) {
        TokenOutcome::Valid(claims) => claims,
        TokenOutcome::Expired => {
            tracing::debug!(connection_id = %conn_id, "session token expired");
            let _ = send(
                &mut socket,
                &ServerMessage::error("unauthorized: invalid token"),
            )
            .await;
            return;
        }
        TokenOutcome::Invalid => {
            tracing::debug!(connection_id = %conn_id, "session token rejected");
            let _ = send(
                &mut socket,
                &ServerMessage::error("unauthorized: invalid token"),
            )
            .await;
            return;
        }
    };

    tracing::info!(connection_id = %conn_id, user = %claims.sub, "authenticated user");

    // Active: bind a PTY session to this connection.
    let session = match state.registry.create_and_register(conn_id) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(connection_id = %conn_id, error = %e, "failed to create session");
            let _ = send(
                &mut socket,
                &ServerMessage::error("failed to start shell session"),
            )
            .await;
            return;
        }
    };

    // First reply: whatever the shell printed during the quiet period.
    let quiet = Duration::from_secs_f64(state.config.session.init_quiet_secs);
    let banner = session.collect_initial_output(quiet).await;
    if send(&mut socket, &ServerMessage::output(banner)).await.is_err() {
        state.registry.teardown(conn_id).await;
        return;
    }

    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            // Binary frames are not part of the protocol; ping/pong are
            // handled by the transport.
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(connection_id = %conn_id, error = %e, "receive failed");
                break;
            }
        };

        tracing::debug!(connection_id = %conn_id, frame = %text, "received");

        if let Some(reply) = handle_frame(&state, conn_id, &claims.sub, &text).await {
            if send(&mut socket, &reply).await.is_err() {
                break;
            }
        }
    }

    // Closed: expected disconnects and faults funnel through the same
    // idempotent teardown.
    state.registry.teardown(conn_id).await;
    tracing::info!(connection_id = %conn_id, user = %claims.sub, "connection closed");
}

/// Validates one inbound frame and produces its reply, if any.
async fn handle_frame(
    state: &AppState,
    conn_id: ConnectionId,
    user: &str,
    text: &str,
) -> Option<ServerMessage> {
    let request = match parse_request(text) {
        Ok(request) => request,
        Err(e) => return Some(ServerMessage::error(e.to_string())),
    };

    match request {
        ClientRequest::Unknown { message_type } => {
            // Reserved for future message types; ignore and stay active.
            tracing::debug!(connection_id = %conn_id, message_type = %message_type, "ignoring unrecognized message type");
            None
        }
        ClientRequest::Cmd { cmd, timeout } => {
            let timeout = timeout.unwrap_or(state.config.session.default_timeout_secs);
            Some(run_cmd(state, conn_id, user, &cmd, timeout).await)
        }
    }
}

/// Executes (or rejects) one `cmd` request against the bound session.
async fn run_cmd(
    state: &AppState,
    conn_id: ConnectionId,
    user: &str,
    cmd: &str,
    timeout_secs: f64,
) -> ServerMessage {
    let Some(session) = state.registry.get(conn_id) else {
        return ServerMessage::error("no session");
    };

    if !session.is_running() {
        // The shell exited underneath us; release the dead session now so
        // every later cmd fails fast.
        tracing::warn!(connection_id = %conn_id, "shell exited, tearing down session");
        state.registry.teardown(conn_id).await;
        return ServerMessage::error("no session");
    }

    let name = leading_token(cmd);
    if !state
        .config
        .session
        .allowed_commands
        .iter()
        .any(|allowed| allowed == name)
    {
        // The rejected command is never written to the shell. Run an empty
        // command to flush any stray output so the reply still reads like a
        // terminal round trip.
        let flushed = session
            .run_command("", FLUSH_TIMEOUT)
            .await
            .unwrap_or_default();
        tracing::info!(connection_id = %conn_id, user = %user, cmd = %cmd, "rejected disallowed command");
        return ServerMessage::output(format!(
            "{cmd}\r\n'{name}' command not allowed\r\n\r\n{flushed}"
        ));
    }

    match session
        .run_command(cmd, Duration::from_secs_f64(timeout_secs))
        .await
    {
        Ok(output) => {
            tracing::info!(connection_id = %conn_id, user = %user, cmd = %cmd, "ran command");
            ServerMessage::output(output)
        }
        Err(e) => {
            tracing::warn!(connection_id = %conn_id, error = %e, "command failed, tearing down session");
            state.registry.teardown(conn_id).await;
            ServerMessage::error("no session")
        }
    }
}

/// The bare leading token the allow-list is matched against.
///
/// Matching happens before any shell interpretation, so operators inside
/// the command line (`;`, `&&`, pipes) are not examined here.
fn leading_token(cmd: &str) -> &str {
    cmd.split(' ').next().unwrap_or("").trim()
}

async fn send(socket: &mut WebSocket, msg: &ServerMessage) -> anyhow::Result<()> {
    let text = msg.to_json()?;
    socket.send(Message::Text(text)).await?;
    Ok(())
}
