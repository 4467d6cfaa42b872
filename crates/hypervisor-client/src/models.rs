//! Hypervisor agent data models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Privilege level a pod's containers run with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Privileges {
    #[default]
    Unprivileged,
    Privileged,
}

/// One container of a pod
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Host path to container path bind mounts
    #[serde(default)]
    pub mounts: BTreeMap<String, String>,
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            args: Vec::new(),
            mounts: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_mount(mut self, host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        self.mounts.insert(host_path.into(), container_path.into());
        self
    }

    /// Value following `flag` in the argument list
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Pod specification handed to a hypervisor.
///
/// A value, not an entity: two equal pods describe the same desired state and
/// the agent does nothing when asked to run a pod equal to the running one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub name: String,
    pub containers: Vec<Container>,
    /// Host port to container port
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,
    #[serde(default)]
    pub privileges: Privileges,
}

impl Pod {
    pub fn new(
        name: impl Into<String>,
        containers: Vec<Container>,
        ports: BTreeMap<u16, u16>,
        privileges: Privileges,
    ) -> Self {
        Self {
            name: name.into(),
            containers,
            ports,
            privileges,
        }
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Reference to a pod running on a hypervisor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodHandle {
    pub id: String,
}

/// Request body for `POST /v1/images/ensure`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsureImagesRequest {
    pub images: Vec<String>,
}

/// Request body for `PUT /v1/files`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFilesRequest {
    pub files: BTreeMap<String, String>,
}
