//! Tastytrade Adapters
//!
//! - **auth**: REST session lifecycle and quote tokens
//! - **streamer**: DXLink streaming client (JSON frames over WebSocket)
//! - **codec** / **messages**: DXLink wire format
//! - **keepalive** / **reconnect**: connection health and backoff

pub mod auth;
pub mod codec;
pub mod keepalive;
pub mod messages;
pub mod reconnect;
pub mod streamer;
pub mod writer;

pub use auth::{AuthError, QuoteToken, SessionConfig, SessionManager};
pub use codec::{CodecError, DxLinkCodec};
pub use keepalive::{KeepaliveConfig, KeepaliveEvent, KeepaliveManager, KeepaliveState};
pub use messages::{ClientFrame, ServerFrame};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectManager};
pub use streamer::{StreamEndpoint, StreamError, StreamingClient, StreamingClientConfig};
pub use writer::{FrameWriter, WriteError};
