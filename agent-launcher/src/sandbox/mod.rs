//! Lifecycle of the single supervised container.

mod config;
mod manager;

pub use config::{PortMapping, SandboxConfig, VolumeMapping};
pub use manager::SandboxManager;
