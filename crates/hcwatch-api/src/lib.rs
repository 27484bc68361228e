// hcwatch-api: Async Rust client for the Home Connect appliance cloud

pub mod auth;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod sse;
pub mod throttle;
pub mod transport;

pub use auth::{
    BearerAuth, ClientCredentials, FileTokenStore, MemoryTokenStore, OAuthClient, RefreshHook,
    Token, TokenStore,
};
pub use client::HomeConnectClient;
pub use endpoints::{Deployment, Endpoints};
pub use error::Error;
pub use sse::SseFramer;
pub use throttle::{RequestThrottler, ThrottleConfig};
pub use transport::{ByteStream, Transport, TransportConfig};
