//! Hypervisor Client
//!
//! A Rust client for the agent running on each hypervisor. The agent pulls
//! container images, writes files onto the host and runs pods; every
//! operation is idempotent on the agent side.
//!
//! # Example
//!
//! ```no_run
//! use hypervisor_client::{Container, HypervisorClient, HypervisorClientTrait, Pod, Privileges};
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HypervisorClient::new("https://10.0.0.5:9443".to_string(), None)?;
//!
//! client.ensure_images(&["k8s.gcr.io/etcd:3.4.3-0".to_string()]).await?;
//!
//! let pod = Pod::new(
//!     "etcd-demo",
//!     vec![Container::new("etcd", "k8s.gcr.io/etcd:3.4.3-0").with_command(["etcd"])],
//!     BTreeMap::from([(32001, 2379)]),
//!     Privileges::Unprivileged,
//! );
//! let handle = client.run_pod("demo", &pod).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod hypervisor_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::HypervisorClient;
pub use common::HttpClient;
pub use error::HypervisorError;
pub use models::*;
pub use hypervisor_trait::HypervisorClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockHypervisorClient;
