//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Sentinel the scheduler prints for a field that has no value yet
pub const ABSENT: &str = "--";

/// Identifier of a session opened through a [`ProcessLauncher`](crate::traits::ProcessLauncher)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Device classes the cluster tags its compute nodes with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Core,
    Xeon,
    Fpga,
    Gpu,
}

impl DeviceClass {
    /// Every recognized class, in prompt order
    pub const ALL: [DeviceClass; 4] = [
        DeviceClass::Core,
        DeviceClass::Xeon,
        DeviceClass::Fpga,
        DeviceClass::Gpu,
    ];

    /// Property tag as the scheduler spells it
    pub fn tag(&self) -> &'static str {
        match self {
            DeviceClass::Core => "core",
            DeviceClass::Xeon => "xeon",
            DeviceClass::Fpga => "fpga",
            DeviceClass::Gpu => "gpu",
        }
    }

    /// Whether a node property string mentions this class
    pub fn matches(&self, property: &str) -> bool {
        property.contains(self.tag())
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceClass::ALL
            .into_iter()
            .find(|c| c.tag().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown device class: {}", s))
    }
}

/// A free compute node as reported by the scheduler inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeNode {
    /// Node name, e.g. `s001-n042`
    pub name: String,
    /// Property tags, e.g. `{"xeon", "skl", "gold6128", "ram192gb"}`
    pub property_tags: BTreeSet<String>,
}

impl ComputeNode {
    /// Build a node from a comma separated property list
    pub fn new(name: impl Into<String>, properties: &str) -> Self {
        Self {
            name: name.into(),
            property_tags: properties
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Device classes carried by this node
    pub fn device_classes(&self) -> impl Iterator<Item = DeviceClass> + '_ {
        DeviceClass::ALL
            .into_iter()
            .filter(|c| self.property_tags.iter().any(|t| c.matches(t)))
    }

    /// Whether the node carries the given class
    pub fn has_class(&self, class: DeviceClass) -> bool {
        self.device_classes().any(|c| c == class)
    }

    /// Properties joined the way the scheduler joins resource tags
    pub fn properties(&self) -> String {
        self.property_tags
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// One parsed status line for the tunnel job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QstatRecord {
    pub job_id: String,
    pub node_name: String,
}

impl QstatRecord {
    /// The "nothing known" record
    pub fn absent() -> Self {
        Self {
            job_id: ABSENT.to_string(),
            node_name: ABSENT.to_string(),
        }
    }

    /// Whether a job exists at all
    pub fn has_job(&self) -> bool {
        self.job_id != ABSENT
    }

    /// Whether the job has been placed on a node
    pub fn is_placed(&self) -> bool {
        self.has_job() && self.node_name != ABSENT
    }
}

/// Where the tunnel job may run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Any free node of this class
    AnyOf(DeviceClass),
    /// This exact node
    Node(String),
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::AnyOf(class) => write!(f, "any {} node", class),
            Placement::Node(name) => write!(f, "node {}", name),
        }
    }
}

/// Connection state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    VerifyingFingerprint,
    ConnectingHead,
    SubmittingJob,
    AwaitingPlacement,
    ConnectingCompute,
    Active,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::VerifyingFingerprint => "verifying fingerprint",
            ConnectionState::ConnectingHead => "connecting to head node",
            ConnectionState::SubmittingJob => "submitting job",
            ConnectionState::AwaitingPlacement => "awaiting placement",
            ConnectionState::ConnectingCompute => "connecting to compute node",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
        };
        f.write_str(s)
    }
}
