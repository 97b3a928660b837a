// src/dag/validate.rs

//! Structural validation of a [`DagBuilder`] before it is frozen.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::dag::graph::{DagBuilder, Parallelism};
use crate::errors::{EngineError, Result};

pub(crate) fn validate_builder(b: &DagBuilder) -> Result<()> {
    ensure_has_vertices(b)?;
    validate_vertices(b)?;
    validate_groups(b)?;
    validate_edges(b)?;
    topological_order(b)?;
    validate_group_independence(b)?;
    Ok(())
}

fn ensure_has_vertices(b: &DagBuilder) -> Result<()> {
    if b.vertices.is_empty() {
        return Err(EngineError::Config(format!(
            "DAG '{}' must contain at least one vertex",
            b.name
        )));
    }
    Ok(())
}

fn validate_vertices(b: &DagBuilder) -> Result<()> {
    let mut seen = HashSet::new();
    for v in &b.vertices {
        if v.name.trim().is_empty() {
            return Err(EngineError::Config("vertex name must not be empty".into()));
        }
        if !seen.insert(v.name.as_str()) {
            return Err(EngineError::Config(format!(
                "duplicate vertex name '{}'",
                v.name
            )));
        }
        if v.parallelism == Parallelism::Fixed(0) {
            return Err(EngineError::Config(format!(
                "vertex '{}' must have parallelism >= 1 (got 0)",
                v.name
            )));
        }
        let mut dirs = HashSet::new();
        for (name, od) in v.committed_outputs() {
            if let Some(dir) = &od.commit_dir {
                if !dirs.insert(dir) {
                    return Err(EngineError::Config(format!(
                        "vertex '{}' output '{}' reuses commit directory {:?}",
                        v.name, name, dir
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_groups(b: &DagBuilder) -> Result<()> {
    let vertices: HashMap<&str, _> = b.vertices.iter().map(|v| (v.name.as_str(), v)).collect();
    let mut group_names = HashSet::new();
    // vertex -> committing group it already belongs to
    let mut committing_member: HashMap<&str, &str> = HashMap::new();

    for g in &b.groups {
        if !group_names.insert(g.name.as_str()) {
            return Err(EngineError::Config(format!(
                "duplicate vertex group '{}'",
                g.name
            )));
        }
        if vertices.contains_key(g.name.as_str()) {
            return Err(EngineError::Config(format!(
                "vertex group '{}' clashes with a vertex of the same name",
                g.name
            )));
        }

        let distinct: HashSet<&str> = g.members.iter().map(|m| m.as_str()).collect();
        if distinct.len() < 2 {
            return Err(EngineError::Config(format!(
                "vertex group '{}' needs at least 2 distinct members (got {})",
                g.name,
                distinct.len()
            )));
        }

        let committing = g.outputs.values().any(|od| od.requires_commit());

        for member in &g.members {
            let Some(vertex) = vertices.get(member.as_str()) else {
                return Err(EngineError::Config(format!(
                    "vertex group '{}' has unknown member '{}'",
                    g.name, member
                )));
            };

            for (out_name, group_out) in &g.outputs {
                match vertex.outputs.get(out_name) {
                    Some(od) if od.class_name == group_out.class_name => {}
                    Some(od) => {
                        return Err(EngineError::Config(format!(
                            "member '{}' of group '{}' declares output '{}' as '{}' but the group uses '{}'",
                            member, g.name, out_name, od.class_name, group_out.class_name
                        )));
                    }
                    None => {
                        return Err(EngineError::Config(format!(
                            "member '{}' of group '{}' does not declare group output '{}'",
                            member, g.name, out_name
                        )));
                    }
                }
            }

            if committing {
                if let Some(other) = committing_member.insert(member.as_str(), g.name.as_str()) {
                    return Err(EngineError::Config(format!(
                        "vertex '{}' belongs to two groups with committed outputs ('{}' and '{}')",
                        member, other, g.name
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_edges(b: &DagBuilder) -> Result<()> {
    let vertices: HashSet<&str> = b.vertices.iter().map(|v| v.name.as_str()).collect();
    let groups: HashMap<&str, _> = b.groups.iter().map(|g| (g.name.as_str(), g)).collect();

    for e in &b.edges {
        for endpoint in [&e.from, &e.to] {
            if !vertices.contains(endpoint.as_str()) {
                return Err(EngineError::Config(format!(
                    "edge {} -> {} refers to unknown vertex '{}'",
                    e.from, e.to, endpoint
                )));
            }
        }
        if e.from == e.to {
            return Err(EngineError::Config(format!(
                "vertex '{}' cannot have an edge to itself",
                e.from
            )));
        }
    }

    for ge in &b.group_edges {
        let Some(group) = groups.get(ge.group.as_str()) else {
            return Err(EngineError::Config(format!(
                "group edge {} -> {} refers to unknown vertex group '{}'",
                ge.group, ge.to, ge.group
            )));
        };
        if !vertices.contains(ge.to.as_str()) {
            return Err(EngineError::Config(format!(
                "group edge {} -> {} refers to unknown vertex '{}'",
                ge.group, ge.to, ge.to
            )));
        }
        if group.members.iter().any(|m| *m == ge.to) {
            return Err(EngineError::Config(format!(
                "vertex '{}' cannot consume group '{}' it is a member of",
                ge.to, ge.group
            )));
        }
    }
    Ok(())
}

/// Members of a group with committed outputs wait for each other at the
/// commit barrier, so none of them may depend on another.
fn validate_group_independence(b: &DagBuilder) -> Result<()> {
    let graph = dependency_graph(b);
    for g in b.groups.iter().filter(|g| g.outputs.values().any(|od| od.requires_commit())) {
        for from in &g.members {
            for to in &g.members {
                if from != to && has_path_connecting(&graph, from.as_str(), to.as_str(), None) {
                    return Err(EngineError::Config(format!(
                        "vertex group '{}' commits together but member '{}' depends on member '{}'",
                        g.name, to, from
                    )));
                }
            }
        }
    }
    Ok(())
}

fn dependency_graph(b: &DagBuilder) -> DiGraphMap<&str, ()> {
    // Edge direction: source -> destination.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for v in &b.vertices {
        graph.add_node(v.name.as_str());
    }
    for e in &b.edges {
        graph.add_edge(e.from.as_str(), e.to.as_str(), ());
    }
    for ge in &b.group_edges {
        if let Some(g) = b.groups.iter().find(|g| g.name == ge.group) {
            for member in &g.members {
                graph.add_edge(member.as_str(), ge.to.as_str(), ());
            }
        }
    }
    graph
}

/// Vertex names in topological order; group edges count as one edge per
/// member.
pub(crate) fn topological_order(b: &DagBuilder) -> Result<Vec<String>> {
    let graph = dependency_graph(b);
    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(EngineError::DagCycle(format!(
            "cycle detected in DAG '{}' involving vertex '{}'",
            b.name,
            cycle.node_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::descriptor::{InputDescriptor, OutputDescriptor, ProcessorDescriptor};
    use crate::dag::graph::{EdgeProperty, Vertex};
    use crate::types::{DataMovementType, DataSourceType, Resource, SchedulingType};

    fn vertex(name: &str) -> Vertex {
        Vertex::new(
            name,
            ProcessorDescriptor::new("noop"),
            Parallelism::Fixed(1),
            Resource::default(),
        )
    }

    fn edge() -> EdgeProperty {
        EdgeProperty::new(
            DataMovementType::OneToOne,
            DataSourceType::Persisted,
            SchedulingType::Sequential,
            OutputDescriptor::new("out"),
            InputDescriptor::new("in"),
        )
    }

    fn config_message(result: Result<crate::dag::Dag>) -> String {
        match result {
            Err(EngineError::Config(msg)) => msg,
            Err(e) => panic!("expected Config error, got {e:?}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn cycle_is_reported_as_dag_cycle() {
        let mut b = DagBuilder::new("cyclic");
        b.add_vertex(vertex("a"))
            .add_vertex(vertex("b"))
            .add_edge("a", "b", edge())
            .add_edge("b", "a", edge());

        match b.build() {
            Err(EngineError::DagCycle(msg)) => assert!(msg.contains("cycle detected")),
            other => panic!("expected DagCycle, got {other:?}"),
        }
    }

    #[test]
    fn cycle_through_group_edge_is_detected() {
        let mut b = DagBuilder::new("cyclic-group");
        b.add_vertex(vertex("m1"))
            .add_vertex(vertex("m2"))
            .add_vertex(vertex("sink"))
            .create_vertex_group("g", &["m1", "m2"])
            .add_group_edge("g", "sink", edge(), InputDescriptor::new("merged"))
            .add_edge("sink", "m2", edge());
        assert!(matches!(b.build(), Err(EngineError::DagCycle(_))));
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let mut b = DagBuilder::new("dangling");
        b.add_vertex(vertex("a")).add_edge("a", "ghost", edge());
        let msg = config_message(b.build());
        assert!(msg.contains("unknown vertex 'ghost'"));
    }

    #[test]
    fn group_member_must_declare_group_output() {
        let parts = OutputDescriptor::new("file-output").with_commit_dir("/out");
        let mut b = DagBuilder::new("union");
        b.add_vertex(vertex("m1").with_output("parts", parts.clone()))
            .add_vertex(vertex("m2"))
            .create_vertex_group("g", &["m1", "m2"])
            .add_group_output("g", "parts", parts);
        let msg = config_message(b.build());
        assert!(msg.contains("'m2'"));
        assert!(msg.contains("does not declare group output 'parts'"));
    }

    #[test]
    fn group_needs_two_members() {
        let mut b = DagBuilder::new("tiny");
        b.add_vertex(vertex("m1")).create_vertex_group("g", &["m1", "m1"]);
        let msg = config_message(b.build());
        assert!(msg.contains("at least 2 distinct members"));
    }

    #[test]
    fn vertex_in_two_committing_groups_is_rejected() {
        let out = OutputDescriptor::new("file-output").with_commit_dir("/out");
        let mut b = DagBuilder::new("overlap");
        b.add_vertex(vertex("a").with_output("o", out.clone()))
            .add_vertex(vertex("b").with_output("o", out.clone()))
            .add_vertex(vertex("c").with_output("o", out.clone()))
            .create_vertex_group("g1", &["a", "b"])
            .add_group_output("g1", "o", out.clone())
            .create_vertex_group("g2", &["b", "c"])
            .add_group_output("g2", "o", out);
        let msg = config_message(b.build());
        assert!(msg.contains("two groups with committed outputs"));
    }

    #[test]
    fn dependent_members_cannot_commit_together() {
        let out = OutputDescriptor::new("file-output").with_commit_dir("/out");
        let mut b = DagBuilder::new("chained-union");
        b.add_vertex(vertex("a").with_output("o", out.clone()))
            .add_vertex(vertex("b").with_output("o", out.clone()))
            .add_edge("a", "b", edge())
            .create_vertex_group("g", &["a", "b"])
            .add_group_output("g", "o", out);
        let msg = config_message(b.build());
        assert!(msg.contains("member 'b' depends on member 'a'"));
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let mut b = DagBuilder::new("empty");
        b.add_vertex(Vertex::new(
            "a",
            ProcessorDescriptor::new("noop"),
            Parallelism::Fixed(0),
            Resource::default(),
        ));
        assert!(config_message(b.build()).contains("parallelism >= 1"));
    }
}
