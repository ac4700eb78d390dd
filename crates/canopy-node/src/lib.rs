//! Canopy Node - unlock tree progression daemon
//!
//! Loads a tree definition, syncs it into the progression engine and serves
//! a local admin socket until interrupted.
//!
//! # Architecture
//!
//! - **Node**: config from environment, boot sequence and graceful shutdown
//! - **Admin Socket**: Unix socket speaking JSON lines (canopy-admin CLI)
//!
//! # Example
//!
//! ```no_run
//! use canopy_node::{CanopyNode, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = CanopyNode::new(NodeConfig::from_env()).await?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin_socket;
pub mod error;
pub mod node;

pub use admin_socket::{AdminCommand, AdminResponse, AdminSocket};
pub use error::{Error, Result};
pub use node::{CanopyNode, NodeConfig};
