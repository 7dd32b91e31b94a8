//! Container instance configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Host to container port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// Host path bind-mounted into the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMapping {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeMapping {
    /// Writable bind mount
    pub fn read_write(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// Read-only bind mount
    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::read_write(host_path, container_path)
        }
    }

    /// `-v` argument in engine syntax
    pub fn to_arg(&self) -> String {
        let mut arg = format!(
            "{}:{}",
            self.host_path.display(),
            self.container_path.display()
        );
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Everything the engine needs to run the one supervised container.
///
/// Built once during initialization and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    pub container_name: String,
    pub image_name: String,
    pub build_context: PathBuf,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub volumes: Vec<VolumeMapping>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl SandboxConfig {
    pub fn new(container_name: impl Into<String>, image_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            image_name: image_name.into(),
            build_context: PathBuf::from("."),
            ports: Vec::new(),
            volumes: Vec::new(),
            environment: BTreeMap::new(),
        }
    }

    pub fn with_build_context(mut self, build_context: impl Into<PathBuf>) -> Self {
        self.build_context = build_context.into();
        self
    }

    pub fn with_port(mut self, host: u16, container: u16) -> Self {
        self.ports.push(PortMapping { host, container });
        self
    }

    pub fn with_volume(mut self, volume: VolumeMapping) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// First host port, used to reach the workload's HTTP server
    pub fn primary_host_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.host)
    }
}
