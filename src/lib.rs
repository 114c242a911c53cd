//! Resilient, cached client for EC2 instance metadata.
//!
//! This crate fetches instance metadata and identity information from the
//! link-local metadata service, using IMDSv2 session tokens, bounded
//! exponential-backoff retries, and a process-wide cache of single values.
//!
//! # Features
//!
//! - Async ([`Ec2Metadata`]) and blocking ([`BlockingEc2Metadata`]) clients
//! - Pluggable transports behind [`Transport`] and [`BlockingTransport`]
//! - Reactor thread pools shared across transports with reference-counted
//!   handles ([`ResourceHandle`], [`ResourceManager`])
//! - Typed identity document and per-interface accessors
//!
//! # Example
//!
//! ```ignore
//! use instance_metadata::{Ec2Metadata, MetadataConfig, MetadataError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MetadataError> {
//!     let metadata = Ec2Metadata::new(MetadataConfig::default())?;
//!
//!     // Cached after the first successful fetch
//!     let instance_id = metadata.instance_id().await?;
//!
//!     // Parsed out of the identity document; `None` if unavailable
//!     let region = metadata.ec2_instance_region().await?;
//!
//!     for interface in metadata.network_interfaces().await? {
//!         println!("{} {:?}", interface.mac_address(), interface.subnet_id().await?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Failure model
//!
//! | Condition | Result |
//! |-----------|--------|
//! | Disabled switch on | `Err(MetadataError::Disabled)`, no request made |
//! | Every attempt failed | `Err(MetadataError::AttemptsExhausted)` |
//! | Token endpoint answered `400` | `Err(MetadataError::TokenRejected)` |
//! | Any other token failure | request proceeds without a token |
//! | Path answered `404` | `Ok(None)` |
//! | Malformed identity document | `Ok(None)` |

pub mod blocking;
mod cache;
mod config;
mod document;
mod error;
mod interface;
mod metadata;
mod protocol;
pub mod reactor;
pub mod resource;
pub mod retry;
pub mod token;
pub mod transport;

pub use blocking::{BlockingEc2Metadata, BlockingNetworkInterface};
pub use cache::MetadataCache;
pub use config::{
    DisabledSwitch, EndpointProvider, EnvironmentEndpoint, MetadataConfig, StaticEndpoint,
};
pub use document::InstanceIdentityDocument;
pub use error::{MetadataError, TransportError};
pub use interface::NetworkInterface;
pub use metadata::Ec2Metadata;
pub use reactor::ReactorPool;
pub use resource::{Completion, Ownership, ResourceHandle, ResourceManager, Teardown};
pub use retry::RetryPolicy;
pub use transport::{
    BlockingTransport, HttpTransport, PendingResponse, PooledTransport, Transport,
    TransportConfig, TransportRequest,
};
