//! Modelmux - model-routing proxy
//!
//! Receives requests in a canonical message format, picks a provider
//! handler from the model string's prefix, translates to that provider's
//! dialect, and translates the answer back. Routing configuration comes
//! from the merged `.oss` config files.
//!
//! # Modules
//!
//! - [`canonical`] - The provider-neutral request/response types
//! - [`handlers`] - Provider dialects and prefix routing
//! - [`server`] - The axum HTTP surface
//! - [`error`] - Error taxonomy and status mapping

pub mod canonical;
pub mod error;
pub mod handlers;
pub mod server;

pub use canonical::{CanonicalRequest, CanonicalResponse, ContentBlock, Message, MessageContent, Role, StopReason, Usage};
pub use error::ProxyError;
pub use handlers::{HandlerRegistry, OllamaHandler, OpenRouterHandler, ProviderHandler};
pub use server::{DEFAULT_PORT, router, serve};
