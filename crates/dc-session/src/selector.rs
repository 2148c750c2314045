//! Compute node selection
//!
//! Builds a snapshot of free nodes from the scheduler inventory and turns the
//! user's choice of device class and node into a [`Placement`].

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use dc_core::error::SelectorError;
use dc_core::traits::Prompter;
use dc_core::types::{ComputeNode, DeviceClass, Placement};

use crate::patterns;
use crate::scheduler::SchedulerClient;

/// Snapshot of free compute nodes
#[derive(Debug, Default)]
pub struct ComputeNodeSelector {
    nodes: Vec<ComputeNode>,
    classes: BTreeSet<DeviceClass>,
}

impl ComputeNodeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-run the inventory query and rebuild the snapshot
    pub async fn refresh(
        &mut self,
        scheduler: &SchedulerClient,
        cancel: &CancellationToken,
    ) -> Result<(), SelectorError> {
        self.clear();
        let output = scheduler.node_inventory(cancel).await?;
        self.refresh_from_output(&output)
    }

    /// Rebuild the snapshot from `pbsnodes` output
    pub fn refresh_from_output(&mut self, output: &str) -> Result<(), SelectorError> {
        self.clear();

        self.nodes = patterns::parse_free_nodes(output);
        if self.nodes.is_empty() {
            return Err(SelectorError::NoFreeNodes);
        }

        self.classes = self
            .nodes
            .iter()
            .flat_map(|node| node.device_classes())
            .collect();
        if self.classes.is_empty() {
            return Err(SelectorError::NoKnownDeviceClasses);
        }

        tracing::debug!(
            "{} free nodes across classes {:?}",
            self.nodes.len(),
            self.classes
        );
        Ok(())
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.classes.clear();
    }

    pub fn nodes(&self) -> &[ComputeNode] {
        &self.nodes
    }

    /// Device classes seen among free nodes, in prompt order
    pub fn classes(&self) -> Vec<DeviceClass> {
        self.classes.iter().copied().collect()
    }

    /// Free nodes carrying `class`
    pub fn nodes_of(&self, class: DeviceClass) -> Vec<&ComputeNode> {
        self.nodes.iter().filter(|n| n.has_class(class)).collect()
    }

    /// Ask for a device class, then for any node of it or a concrete one
    pub async fn select_placement(
        &self,
        prompter: &dyn Prompter,
        preferred: Option<DeviceClass>,
    ) -> Result<Placement, SelectorError> {
        let classes = self.classes();
        if classes.is_empty() {
            return Err(SelectorError::NoKnownDeviceClasses);
        }

        let class_choices: Vec<String> = classes
            .iter()
            .map(|c| format!("{} ({} free)", c, self.nodes_of(*c).len()))
            .collect();
        let default = preferred.and_then(|p| classes.iter().position(|c| *c == p));

        let picked = prompter
            .choose("Select a device class", &class_choices, default)
            .await?;
        let class = *classes
            .get(picked)
            .ok_or(SelectorError::NoKnownDeviceClasses)?;

        let nodes = self.nodes_of(class);
        if nodes.is_empty() {
            return Err(SelectorError::NoNodesInClass(class));
        }

        let mut node_choices = vec![format!("any {} node", class)];
        node_choices.extend(
            nodes
                .iter()
                .map(|n| format!("{} ({})", n.name, n.properties())),
        );

        let picked = prompter
            .choose("Select a compute node", &node_choices, Some(0))
            .await?;

        let placement = match picked {
            0 => Placement::AnyOf(class),
            i => nodes
                .get(i - 1)
                .map(|n| Placement::Node(n.name.clone()))
                .ok_or(SelectorError::NoNodesInClass(class))?,
        };

        tracing::info!("Selected placement: {}", placement);
        Ok(placement)
    }
}
