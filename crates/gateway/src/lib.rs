//! # Shellgate Gateway Library
//!
//! This crate provides the gateway (server) functionality for Shellgate,
//! giving authenticated browser clients command access to a shell on the
//! host machine.
//!
//! ## Overview
//!
//! Each WebSocket connection is bound to its own PTY-backed shell for the
//! lifetime of the connection. The gateway provides:
//!
//! - **PTY Session Management**: One pseudo-terminal shell per connection,
//!   with background output draining and escape-sequence cleanup
//! - **Session Tokens**: HS256 JWTs minted by the GitHub OAuth flow and
//!   carried in the `session` cookie
//! - **Command Policy**: An allow-list gate on the leading token of every
//!   submitted command line
//! - **HTTP Surface**: Health introspection, the WebSocket endpoint, and
//!   the OAuth routes, with CORS pinned to the configured frontend
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       axum Router                        │
//! │   /healthz    /ws    /auth/github/*        (CORS)        │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌───────────────┐   ┌────────────────────────────────┐  │
//! │  │ TokenValidator │  │  Connection handler (per /ws)  │  │
//! │  └───────────────┘   └───────────────┬────────────────┘  │
//! │                                      │                   │
//! │  ┌───────────────────────────────────▼────────────────┐  │
//! │  │  SessionRegistry: ConnectionId -> PtySession       │  │
//! │  │  (spawn shell, drain actor, fixed-wait commands)   │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use gateway::auth::TokenValidator;
//! use gateway::config::{Config, Secrets};
//! use gateway::server::{router, AppState};
//! use gateway::session::{SessionRegistry, ShellSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!     let secrets = Secrets::from_env()?;
//!
//!     let state = AppState {
//!         registry: Arc::new(SessionRegistry::new(ShellSpec {
//!             program: config.session.shell.clone(),
//!             cwd: config.session.cwd.clone(),
//!         })),
//!         validator: Arc::new(TokenValidator::new(
//!             &secrets.jwt_secret,
//!             Duration::from_secs(config.auth.token_ttl_secs),
//!         )),
//!         config: Arc::new(config),
//!         secrets: Arc::new(secrets),
//!         http: reqwest::Client::new(),
//!     };
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, router(state)).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod oauth;
pub mod server;
pub mod session;
pub mod ws;

pub use auth::{Claims, TokenOutcome, TokenValidator};
pub use config::{Config, Secrets};
pub use server::{router, AppState};
pub use session::{ConnectionId, PtySession, SessionRegistry, ShellSpec};
