use std::collections::{HashMap, HashSet, VecDeque};

use latch_core::error::{GraphError, Result};
use serde_json::Value;

use crate::channel::{AggregateOp, ChannelSpec};
use crate::compiled::CompiledStateGraph;
use crate::constants::{END, START};
use crate::edge::{ConditionalEdge, Edge};
use crate::node::NodeFn;

/// Builder for constructing a state graph.
///
/// Use `add_node`, `add_edge`, `add_conditional_edges`, etc. to define
/// the graph topology, then call `compile()` to validate and produce
/// a `CompiledStateGraph`.
pub struct StateGraph {
    channel_specs: HashMap<String, ChannelSpec>,
    nodes: HashMap<String, NodeFn>,
    edges: Vec<Edge>,
    conditional_edges: Vec<ConditionalEdge>,
    entry_point: Option<String>,
    finish_points: Vec<String>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self {
            channel_specs: HashMap::new(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            conditional_edges: Vec::new(),
            entry_point: None,
            finish_points: Vec::new(),
        }
    }

    /// Add a channel spec for a state key.
    pub fn add_channel(&mut self, name: impl Into<String>, spec: ChannelSpec) -> &mut Self {
        self.channel_specs.insert(name.into(), spec);
        self
    }

    /// Convenience: add a `LastValue` channel with the given default.
    pub fn add_last_value_channel(&mut self, name: impl Into<String>, default: Value) -> &mut Self {
        self.add_channel(name, ChannelSpec::LastValue { default })
    }

    /// Convenience: add an `AppendChannel`.
    pub fn add_append_channel(&mut self, name: impl Into<String>) -> &mut Self {
        self.add_channel(name, ChannelSpec::Append)
    }

    /// Convenience: add a `BinaryOperatorAggregate` channel.
    pub fn add_binary_operator_channel(
        &mut self,
        name: impl Into<String>,
        default: Value,
        op: AggregateOp,
    ) -> &mut Self {
        self.add_channel(name, ChannelSpec::BinaryOperator { default, op })
    }

    /// Add a node to the graph.
    ///
    /// Returns an error if a node with the same name already exists
    /// or if the name is a reserved sentinel (`__start__` / `__end__`).
    pub fn add_node(&mut self, node: NodeFn) -> Result<&mut Self> {
        let name = node.name().to_string();

        if name == START || name == END {
            return Err(GraphError::InvalidGraph(format!(
                "Cannot add node with reserved name '{name}'"
            ))
            .into());
        }

        if self.nodes.contains_key(&name) {
            return Err(GraphError::InvalidGraph(format!("Duplicate node name: '{name}'")).into());
        }

        self.nodes.insert(name, node);
        Ok(self)
    }

    /// Add a static edge between two nodes.
    ///
    /// Both `from` and `to` can be node names or sentinels (`START` / `END`).
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// Add a conditional edge from a source node (or from `START`).
    pub fn add_conditional_edges(&mut self, edge: ConditionalEdge) -> &mut Self {
        self.conditional_edges.push(edge);
        self
    }

    /// Set the entry point. Equivalent to `add_edge(START, node)`.
    pub fn set_entry_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.entry_point = Some(node.into());
        self
    }

    /// Add a finish point (node that leads to `END`).
    pub fn set_finish_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.finish_points.push(node.into());
        self
    }

    /// Validate the graph and produce a `CompiledStateGraph`.
    pub fn compile(self) -> Result<CompiledStateGraph> {
        self.validate()?;

        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(entry) = &self.entry_point {
            adjacency
                .entry(START.to_string())
                .or_default()
                .push(entry.clone());
        }
        for edge in &self.edges {
            let targets = adjacency.entry(edge.from.clone()).or_default();
            if !targets.contains(&edge.to) {
                targets.push(edge.to.clone());
            }
        }
        for fp in &self.finish_points {
            adjacency
                .entry(fp.clone())
                .or_default()
                .push(END.to_string());
        }

        Ok(CompiledStateGraph::new(
            self.nodes,
            adjacency,
            self.conditional_edges,
            self.channel_specs,
        ))
    }

    /// Validate the graph structure.
    fn validate(&self) -> Result<()> {
        // 1. Something must leave START
        let has_start_edge = self.entry_point.is_some()
            || self.edges.iter().any(|e| e.from == START)
            || self.conditional_edges.iter().any(|ce| ce.from == START);
        if !has_start_edge {
            return Err(GraphError::InvalidGraph("Entry point not set".to_string()).into());
        }

        // 2. Entry point node must exist
        if let Some(entry) = &self.entry_point {
            if !self.nodes.contains_key(entry) {
                return Err(GraphError::InvalidGraph(format!(
                    "Entry point node '{entry}' does not exist"
                ))
                .into());
            }
        }

        // 3. All edges must reference existing nodes (or sentinels)
        for edge in &self.edges {
            if edge.from == END {
                let msg = "END cannot have outgoing edges";
                return Err(GraphError::InvalidGraph(msg.into()).into());
            }
            if edge.to == START {
                let msg = "START cannot be an edge target";
                return Err(GraphError::InvalidGraph(msg.into()).into());
            }
            self.validate_node_ref(&edge.from, "edge source")?;
            self.validate_node_ref(&edge.to, "edge target")?;
        }

        // 4. Conditional edges: existing source, and every known target exists
        for ce in &self.conditional_edges {
            self.validate_node_ref(&ce.from, "conditional edge source")?;
            for target in ce.possible_targets().unwrap_or_default() {
                self.validate_node_ref(target, "conditional edge target")?;
            }
        }

        // 5. All finish points must reference existing nodes
        for fp in &self.finish_points {
            if !self.nodes.contains_key(fp) {
                return Err(GraphError::InvalidGraph(format!(
                    "Finish point node '{fp}' does not exist"
                ))
                .into());
            }
        }

        // 6. BFS reachability check from START (cycles are allowed)
        self.validate_reachability()
    }

    /// Check that a node reference is valid (exists as a node or is a sentinel).
    fn validate_node_ref(&self, name: &str, context: &str) -> Result<()> {
        if name == START || name == END {
            return Ok(());
        }
        if !self.nodes.contains_key(name) {
            return Err(GraphError::InvalidGraph(format!(
                "Unknown node '{name}' referenced as {context}"
            ))
            .into());
        }
        Ok(())
    }

    /// BFS from START to check that all user-defined nodes are reachable.
    fn validate_reachability(&self) -> Result<()> {
        let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();

        if let Some(entry) = &self.entry_point {
            adj.entry(START).or_default().push(entry.as_str());
        }
        for edge in &self.edges {
            adj.entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }

        // Conditional edges without declared targets may route anywhere.
        let all_node_names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        for ce in &self.conditional_edges {
            let targets = ce
                .possible_targets()
                .unwrap_or_else(|| all_node_names.clone());
            adj.entry(ce.from.as_str()).or_default().extend(targets);
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(START);
        visited.insert(START);

        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = adj.get(current) {
                for &next in neighbors {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        for name in self.nodes.keys() {
            if !visited.contains(name.as_str()) {
                return Err(GraphError::InvalidGraph(format!(
                    "Node '{name}' is not reachable from START"
                ))
                .into());
            }
        }

        Ok(())
    }
}

impl Default for StateGraph {
    fn default() -> Self {
        Self::new()
    }
}
