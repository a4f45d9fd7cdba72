//! # Vessel
//!
//! Terminal session manager and split-pane workspace layout engine.
//!
//! ## Overview
//!
//! Vessel hosts many shell sessions and arranges them into workspaces of
//! split panes:
//!
//! - **Session Management**: spawn shells behind pseudo-terminals, route
//!   keystrokes and resizes to them, stream their output, report each exit
//!   exactly once
//! - **Layout**: a binary split tree per workspace, an ordered workspace
//!   registry and a focus pointer
//! - **Bridge**: the message contract between a UI-side caller and the
//!   session manager, served over a Unix socket
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐           ┌──────────────────────────────┐
//! │          UI side             │           │        Manager side          │
//! │                              │  bridge   │                              │
//! │  LayoutEngine<BridgeClient>  │◄─────────►│  BridgeServer                │
//! │   workspaces / focus / tree  │  frames   │   SessionManagerImpl         │
//! │                              │           │    Session ─ PTY ─ shell     │
//! └──────────────────────────────┘           └──────────────────────────────┘
//! ```
//!
//! Both [`SessionManagerImpl`] and [`BridgeClient`] implement
//! [`SessionManager`], so a [`LayoutEngine`] runs the same in-process or
//! across the bridge.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vessel::config::SessionConfig;
//! use vessel::layout::{LayoutEngine, LayoutOptions, SplitDirection};
//! use vessel::session::{EventSink, SessionManagerImpl};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (sink, _events) = EventSink::new();
//!     let sessions = SessionManagerImpl::new(SessionConfig::default(), sink);
//!     let mut engine = LayoutEngine::new(sessions, LayoutOptions::default());
//!
//!     let workspace = engine.create_workspace("main").await?;
//!     let (ws, first) = (workspace.id().to_string(), workspace.terminal_ids()[0].clone());
//!     engine.split_pane(&ws, &first, SplitDirection::Vertical).await?;
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY session creation and management
//! - [`layout`]: Split trees, workspaces and focus
//! - [`bridge`]: Bridge server, listener and client

pub mod bridge;
pub mod config;
pub mod layout;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{
    EventSink, SessionError, SessionEvent, SessionId, SessionManager, SessionManagerImpl,
};

// Re-export layout types for convenience
pub use layout::{LayoutEngine, LayoutError, LayoutOptions, SplitDirection, SplitNode, Workspace};

// Re-export bridge types for convenience
pub use bridge::{exit_notice, get_socket_path, BridgeClient, BridgeError, BridgeServer};
