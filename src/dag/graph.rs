// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap};

use crate::dag::descriptor::{InputDescriptor, OutputDescriptor, ProcessorDescriptor};
use crate::dag::validate::{topological_order, validate_builder};
use crate::errors::Result;
use crate::types::{
    DataMovementType, DataSourceType, GroupId, NodeId, Resource, SchedulingType, VertexId,
};

/// Task count of a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    Fixed(u32),
    /// Resolved when the vertex starts (e.g. from input split computation).
    Deferred,
}

/// One stage of the computation. Immutable once the DAG is built.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub name: String,
    pub processor: ProcessorDescriptor,
    pub parallelism: Parallelism,
    pub resource: Resource,
    pub inputs: BTreeMap<String, InputDescriptor>,
    pub outputs: BTreeMap<String, OutputDescriptor>,
    /// Preferred nodes for this vertex's tasks, most preferred first.
    pub location_hints: Vec<NodeId>,
}

impl Vertex {
    pub fn new(
        name: impl Into<String>,
        processor: ProcessorDescriptor,
        parallelism: Parallelism,
        resource: Resource,
    ) -> Self {
        Self {
            name: name.into(),
            processor,
            parallelism,
            resource,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            location_hints: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, input: InputDescriptor) -> Self {
        self.inputs.insert(name.into(), input);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, output: OutputDescriptor) -> Self {
        self.outputs.insert(name.into(), output);
        self
    }

    pub fn with_location_hint(mut self, node: NodeId) -> Self {
        self.location_hints.push(node);
        self
    }

    /// Outputs of this vertex that must pass the commit gate.
    pub fn committed_outputs(&self) -> impl Iterator<Item = (&str, &OutputDescriptor)> {
        self.outputs
            .iter()
            .filter(|(_, od)| od.requires_commit())
            .map(|(name, od)| (name.as_str(), od))
    }

    pub fn requires_commit(&self) -> bool {
        self.committed_outputs().next().is_some()
    }
}

/// Data-movement contract of an edge.
#[derive(Debug, Clone)]
pub struct EdgeProperty {
    pub movement: DataMovementType,
    pub source_type: DataSourceType,
    pub scheduling: SchedulingType,
    pub output: OutputDescriptor,
    pub input: InputDescriptor,
}

impl EdgeProperty {
    pub fn new(
        movement: DataMovementType,
        source_type: DataSourceType,
        scheduling: SchedulingType,
        output: OutputDescriptor,
        input: InputDescriptor,
    ) -> Self {
        Self {
            movement,
            source_type,
            scheduling,
            output,
            input,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub source: VertexId,
    pub destination: VertexId,
    pub property: EdgeProperty,
}

/// A named union of vertices whose outputs feed one consumer.
#[derive(Debug, Clone)]
pub struct VertexGroup {
    pub name: String,
    pub members: Vec<VertexId>,
    /// Shared output contracts; every member declares an output of the
    /// same name and class.
    pub outputs: BTreeMap<String, OutputDescriptor>,
}

impl VertexGroup {
    pub fn has_committed_outputs(&self) -> bool {
        self.outputs.values().any(OutputDescriptor::requires_commit)
    }
}

/// Edge whose source is a vertex group.
#[derive(Debug, Clone)]
pub struct GroupInputEdge {
    pub group: GroupId,
    pub destination: VertexId,
    pub property: EdgeProperty,
    /// Input contract that merges the per-member inputs on the consumer.
    pub merged_input: InputDescriptor,
}

/// An upstream dependency of a vertex, after group edges are expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upstream {
    pub vertex: VertexId,
    pub movement: DataMovementType,
    pub scheduling: SchedulingType,
}

#[derive(Debug, Clone)]
pub(crate) struct EdgeSpec {
    pub from: String,
    pub to: String,
    pub property: EdgeProperty,
}

#[derive(Debug, Clone)]
pub(crate) struct GroupSpec {
    pub name: String,
    pub members: Vec<String>,
    pub outputs: BTreeMap<String, OutputDescriptor>,
}

#[derive(Debug, Clone)]
pub(crate) struct GroupEdgeSpec {
    pub group: String,
    pub to: String,
    pub property: EdgeProperty,
    pub merged_input: InputDescriptor,
}

/// Collects vertices, edges and groups by name; [`DagBuilder::build`]
/// validates everything and resolves names into ids.
#[derive(Debug, Clone)]
pub struct DagBuilder {
    pub(crate) name: String,
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) edges: Vec<EdgeSpec>,
    pub(crate) groups: Vec<GroupSpec>,
    pub(crate) group_edges: Vec<GroupEdgeSpec>,
}

impl DagBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vertices: Vec::new(),
            edges: Vec::new(),
            groups: Vec::new(),
            group_edges: Vec::new(),
        }
    }

    pub fn add_vertex(&mut self, vertex: Vertex) -> &mut Self {
        self.vertices.push(vertex);
        self
    }

    pub fn add_edge(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        property: EdgeProperty,
    ) -> &mut Self {
        self.edges.push(EdgeSpec {
            from: from.into(),
            to: to.into(),
            property,
        });
        self
    }

    pub fn create_vertex_group(&mut self, name: impl Into<String>, members: &[&str]) -> &mut Self {
        self.groups.push(GroupSpec {
            name: name.into(),
            members: members.iter().map(|m| m.to_string()).collect(),
            outputs: BTreeMap::new(),
        });
        self
    }

    /// Declare a shared output on an existing group.
    ///
    /// Members are not modified; each must declare the output itself.
    pub fn add_group_output(
        &mut self,
        group: &str,
        name: impl Into<String>,
        output: OutputDescriptor,
    ) -> &mut Self {
        if let Some(g) = self.groups.iter_mut().find(|g| g.name == group) {
            g.outputs.insert(name.into(), output);
        } else {
            // Recorded so that validation reports the unknown group.
            let mut outputs = BTreeMap::new();
            outputs.insert(name.into(), output);
            self.groups.push(GroupSpec {
                name: group.to_string(),
                members: Vec::new(),
                outputs,
            });
        }
        self
    }

    pub fn add_group_edge(
        &mut self,
        group: impl Into<String>,
        to: impl Into<String>,
        property: EdgeProperty,
        merged_input: InputDescriptor,
    ) -> &mut Self {
        self.group_edges.push(GroupEdgeSpec {
            group: group.into(),
            to: to.into(),
            property,
            merged_input,
        });
        self
    }

    /// Validate and freeze the DAG.
    pub fn build(&self) -> Result<Dag> {
        validate_builder(self)?;

        let by_name: HashMap<String, VertexId> = self
            .vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (v.name.clone(), VertexId(i as u32)))
            .collect();

        // Names were checked by validation, so lookups below cannot miss.
        let id = |name: &str| by_name[name];

        let edges: Vec<Edge> = self
            .edges
            .iter()
            .map(|e| Edge {
                source: id(e.from.as_str()),
                destination: id(e.to.as_str()),
                property: e.property.clone(),
            })
            .collect();

        let groups: Vec<VertexGroup> = self
            .groups
            .iter()
            .map(|g| VertexGroup {
                name: g.name.clone(),
                members: g.members.iter().map(|m| id(m.as_str())).collect(),
                outputs: g.outputs.clone(),
            })
            .collect();

        let group_ids: HashMap<&str, GroupId> = groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.name.as_str(), GroupId(i as u32)))
            .collect();

        let group_edges: Vec<GroupInputEdge> = self
            .group_edges
            .iter()
            .map(|ge| GroupInputEdge {
                group: group_ids[ge.group.as_str()],
                destination: id(ge.to.as_str()),
                property: ge.property.clone(),
                merged_input: ge.merged_input.clone(),
            })
            .collect();

        let vertex_count = self.vertices.len();
        let mut upstream: Vec<Vec<Upstream>> = vec![Vec::new(); vertex_count];
        let mut downstream: Vec<Vec<VertexId>> = vec![Vec::new(); vertex_count];

        let mut link = |src: VertexId, dst: VertexId, property: &EdgeProperty| {
            upstream[dst.0 as usize].push(Upstream {
                vertex: src,
                movement: property.movement,
                scheduling: property.scheduling,
            });
            if !downstream[src.0 as usize].contains(&dst) {
                downstream[src.0 as usize].push(dst);
            }
        };

        for edge in &edges {
            link(edge.source, edge.destination, &edge.property);
        }
        for ge in &group_edges {
            for member in &groups[ge.group.0 as usize].members {
                link(*member, ge.destination, &ge.property);
            }
        }

        let mut depth = vec![0u32; vertex_count];
        for v in topological_order(self)? {
            let vid = by_name[v.as_str()];
            let d = upstream[vid.0 as usize]
                .iter()
                .map(|u| depth[u.vertex.0 as usize] + 1)
                .max()
                .unwrap_or(0);
            depth[vid.0 as usize] = d;
        }

        let mut committing_group = HashMap::new();
        for (i, g) in groups.iter().enumerate() {
            if g.has_committed_outputs() {
                for m in &g.members {
                    committing_group.insert(*m, GroupId(i as u32));
                }
            }
        }

        Ok(Dag {
            name: self.name.clone(),
            vertices: self.vertices.clone(),
            edges,
            groups,
            group_edges,
            by_name,
            upstream,
            downstream,
            depth,
            committing_group,
        })
    }
}

/// Validated, immutable description of the computation.
#[derive(Debug, Clone)]
pub struct Dag {
    name: String,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    groups: Vec<VertexGroup>,
    group_edges: Vec<GroupInputEdge>,
    by_name: HashMap<String, VertexId>,
    upstream: Vec<Vec<Upstream>>,
    downstream: Vec<Vec<VertexId>>,
    depth: Vec<u32>,
    committing_group: HashMap<VertexId, GroupId>,
}

impl Dag {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        (0..self.vertices.len()).map(|i| VertexId(i as u32))
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.0 as usize]
    }

    pub fn vertex_id(&self, name: &str) -> Option<VertexId> {
        self.by_name.get(name).copied()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn groups(&self) -> &[VertexGroup] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> &VertexGroup {
        &self.groups[id.0 as usize]
    }

    pub fn group_edges(&self) -> &[GroupInputEdge] {
        &self.group_edges
    }

    /// Direct upstream vertices, with group edges expanded per member.
    pub fn upstream_of(&self, id: VertexId) -> &[Upstream] {
        &self.upstream[id.0 as usize]
    }

    pub fn downstream_of(&self, id: VertexId) -> &[VertexId] {
        &self.downstream[id.0 as usize]
    }

    /// Longest distance from any root; roots have depth 0.
    pub fn depth(&self, id: VertexId) -> u32 {
        self.depth[id.0 as usize]
    }

    pub fn roots(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertex_ids().filter(|v| self.upstream_of(*v).is_empty())
    }

    /// The group with committed outputs this vertex belongs to, if any.
    pub fn committing_group(&self, id: VertexId) -> Option<GroupId> {
        self.committing_group.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(name: &str, n: u32) -> Vertex {
        Vertex::new(
            name,
            ProcessorDescriptor::new("noop"),
            Parallelism::Fixed(n),
            Resource::default(),
        )
    }

    fn sg() -> EdgeProperty {
        EdgeProperty::new(
            DataMovementType::ScatterGather,
            DataSourceType::Persisted,
            SchedulingType::Sequential,
            OutputDescriptor::new("sorted-output"),
            InputDescriptor::new("shuffled-input"),
        )
    }

    /// map1, map2 unioned into checker; map3 feeds checker directly.
    fn union_builder() -> DagBuilder {
        let parts = OutputDescriptor::new("file-output").with_commit_dir("/out/parts");
        let mut b = DagBuilder::new("union");
        b.add_vertex(vertex("map1", 2).with_output("parts", parts.clone()))
            .add_vertex(vertex("map2", 3).with_output("parts", parts.clone()))
            .add_vertex(vertex("map3", 1))
            .add_vertex(vertex("checker", 1))
            .create_vertex_group("union", &["map1", "map2"])
            .add_group_output("union", "parts", parts)
            .add_edge("map3", "checker", sg())
            .add_group_edge("union", "checker", sg(), InputDescriptor::new("concat"));
        b
    }

    #[test]
    fn group_edges_expand_into_member_dependencies() {
        let dag = union_builder().build().unwrap();
        let checker = dag.vertex_id("checker").unwrap();
        let mut ups: Vec<_> = dag
            .upstream_of(checker)
            .iter()
            .map(|u| dag.vertex(u.vertex).name.clone())
            .collect();
        ups.sort();
        assert_eq!(ups, vec!["map1", "map2", "map3"]);
        assert_eq!(dag.depth(checker), 1);
        assert_eq!(dag.roots().count(), 3);
    }

    #[test]
    fn members_of_committing_group_are_indexed() {
        let dag = union_builder().build().unwrap();
        let map1 = dag.vertex_id("map1").unwrap();
        let map3 = dag.vertex_id("map3").unwrap();
        assert_eq!(dag.committing_group(map1), Some(GroupId(0)));
        assert_eq!(dag.committing_group(map3), None);
        assert!(dag.vertex(map1).requires_commit());
    }

    #[test]
    fn depth_follows_longest_path() {
        let mut b = DagBuilder::new("chain");
        b.add_vertex(vertex("a", 1))
            .add_vertex(vertex("b", 1))
            .add_vertex(vertex("c", 1))
            .add_edge("a", "b", sg())
            .add_edge("b", "c", sg())
            .add_edge("a", "c", sg());
        let dag = b.build().unwrap();
        assert_eq!(dag.depth(dag.vertex_id("c").unwrap()), 2);
        assert_eq!(dag.downstream_of(dag.vertex_id("a").unwrap()).len(), 2);
    }
}
