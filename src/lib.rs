//! Client library for the SWI-Prolog Machine Query Interface (MQI).
//!
//! This crate embeds a Prolog engine as a child process and talks to it
//! over a framed socket protocol, so a host application can issue queries
//! and pattern-match on structured answers:
//!
//! ```text
//! ┌───────────────┐     loopback TCP / unix socket      ┌────────────────┐
//! │  Host (Rust)  │ ◄─────────────────────────────────► │  Prolog engine │
//! │ Engine/Session│     length-prefixed MQI frames      │  (child proc)  │
//! └───────────────┘                                     └────────────────┘
//! ```
//!
//! - [`engine`] - spawn/supervise/terminate the engine child and parse its
//!   connection handshake
//! - [`session`] - the per-connection request/response state machine
//! - [`framing`] - the length-prefixed, heartbeat-absorbing wire codec
//! - [`term`] - typed answer terms, solutions, and query results
//! - [`transport`] - loopback TCP and Unix-socket byte streams
//! - [`error`] - the closed error set
//!
//! # Usage
//!
//! ```ignore
//! use prolog_mqi::{Engine, EngineConfig};
//!
//! let engine = Engine::launch(EngineConfig::default()).await?;
//! let mut session = engine.open_session().await?;
//!
//! let result = session.run("member(X, [1,2,3])", None).await?;
//! for solution in result.solutions().unwrap_or_default() {
//!     println!("X = {:?}", solution.get("X"));
//! }
//!
//! session.close().await?;
//! engine.shutdown().await?;
//! ```
//!
//! Engine handles and sessions are scoped: dropping them kills the child
//! and releases the socket even on panics. `shutdown`/`close` are the
//! graceful, acknowledged variants.

pub mod engine;
pub mod error;
pub mod framing;
pub mod session;
pub mod term;
pub mod transport;

pub use engine::{Engine, EngineConfig};
pub use error::MqiError;
pub use session::{PollOutcome, Session, SessionState};
pub use term::{QueryResult, Solution, Term};
pub use transport::Endpoint;
