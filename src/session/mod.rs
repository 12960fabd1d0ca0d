//! Client Sessions
//!
//! The device- and dashboard-side end of the relay socket.
//!
//! - `client`: [`ReconnectingSession`], one socket with fixed-delay reconnects,
//!   and [`send_once`] for single control frames
//! - `state`: [`DashboardState`] and the [`LinkState`] machine
//! - `history`: [`RollingHistory`] of the most recent readings
//!
//! # Example
//!
//! ```rust,ignore
//! use fieldrelay::session::{ReconnectingSession, SessionOptions, SessionRole};
//!
//! let session = ReconnectingSession::spawn(
//!     SessionRole::Consumer { key: "frontend-1234".into() },
//!     SessionOptions::new("ws://localhost:3000"),
//! );
//! let state = session.current_state().await;
//! ```

mod client;
mod history;
mod state;

pub use client::{send_once, ReconnectingSession, SessionError, SessionOptions, SessionRole};
pub use history::{HistoryEntry, RollingHistory, DEFAULT_HISTORY_CAPACITY};
pub use state::{DashboardState, LinkState};
