//! Environment Abstraction Layer for the tokenomics session orchestrator
//!
//! This crate provides the "Sans-IO" seam allowing the orchestrator to run
//! in both **Production** (tokio + WebSocket) and **Simulation** (virtual
//! clock + in-memory channel) environments.
//!
//! # Core Concept: The Reactor Pattern
//!
//! Everything that would make a session test non-reproducible is intercepted:
//! - Time (`now()`, `sleep()`), used by reconnection backoff
//! - Task spawning (`spawn()`), used by provider calls and the channel pump
//! - The streamed channel (`connect()`, `send()`, `recv()`)
//!
//! # Example
//!
//! ```ignore
//! use tokensim_env::{ChannelConnection, ChannelConnector, TokenSimContext};
//!
//! async fn pump<Ctx: TokenSimContext, C: ChannelConnector>(ctx: &Ctx, connector: &C) {
//!     let conn = connector.connect(None).await?;
//!     while let Some(frame) = conn.recv().await {
//!         route(frame);
//!     }
//!     ctx.sleep(Duration::from_millis(1000)).await;
//! }
//! ```

mod channel;
mod context;
mod error;
mod tokio_impl;
mod types;
mod ws;

pub use channel::{ChannelConnection, ChannelConnector};
pub use context::TokenSimContext;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use types::{ChannelFrame, ConnectionId, Credential};
pub use ws::{WsConnection, WsConnector};
