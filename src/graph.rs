//! Stage-graph validation and execution-group computation.
//!
//! Every sequential stage forms a group of its own; every named parallel
//! group forms one group with all its members. Groups are ordered
//! topologically, ties broken by declaration order, so a pipeline declared
//! in dependency order runs exactly in declaration order.

use crate::error::Result;
use crate::stage::StageDefinition;
use crate::PipelineError;
use std::collections::{BTreeSet, HashMap};

/// Stages dispatched together. Members never depend on each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionGroup {
    /// Parallel group name; `None` for a sequential stage.
    pub name: Option<String>,
    /// Indices into the stage list, in declaration order.
    pub members: Vec<usize>,
}

impl ExecutionGroup {
    pub fn is_parallel(&self) -> bool {
        self.name.is_some()
    }
}

/// Validate `definitions` and compute the order in which to run them.
///
/// Rejects, with [`PipelineError::InvalidConfig`]: an empty list, duplicate
/// identities, dependencies on unknown stages or on the stage itself,
/// dependencies between members of one parallel group, and cycles.
pub fn execution_groups(definitions: &[StageDefinition]) -> Result<Vec<ExecutionGroup>> {
    if definitions.is_empty() {
        return Err(invalid("pipeline has no stages".to_string()));
    }

    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, def) in definitions.iter().enumerate() {
        if def.id.trim().is_empty() {
            return Err(invalid(format!("stage #{} has an empty id", i + 1)));
        }
        if index.insert(def.id.as_str(), i).is_some() {
            return Err(invalid(format!("duplicate stage id '{}'", def.id)));
        }
    }

    // Units: one per sequential stage, one per named group.
    let mut units: Vec<ExecutionGroup> = Vec::new();
    let mut unit_of: Vec<usize> = vec![0; definitions.len()];
    let mut group_unit: HashMap<&str, usize> = HashMap::new();
    for (i, def) in definitions.iter().enumerate() {
        let unit = match def.group() {
            Some(name) => *group_unit.entry(name).or_insert_with(|| {
                units.push(ExecutionGroup {
                    name: Some(name.to_string()),
                    members: Vec::new(),
                });
                units.len() - 1
            }),
            None => {
                units.push(ExecutionGroup {
                    name: None,
                    members: Vec::new(),
                });
                units.len() - 1
            }
        };
        units[unit].members.push(i);
        unit_of[i] = unit;
    }

    let mut upstream: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); units.len()];
    for (i, def) in definitions.iter().enumerate() {
        for dep in &def.depends_on {
            if dep == &def.id {
                return Err(invalid(format!("stage '{}' depends on itself", def.id)));
            }
            let Some(&dep_idx) = index.get(dep.as_str()) else {
                return Err(invalid(format!(
                    "stage '{}' depends on unknown stage '{}'",
                    def.id, dep
                )));
            };
            if unit_of[dep_idx] == unit_of[i] {
                return Err(invalid(format!(
                    "stage '{}' depends on '{}' in the same parallel group",
                    def.id, dep
                )));
            }
            upstream[unit_of[i]].insert(unit_of[dep_idx]);
        }
    }

    // Kahn's algorithm, always taking the earliest-declared ready unit.
    let mut done = vec![false; units.len()];
    let mut order: Vec<usize> = Vec::with_capacity(units.len());
    while order.len() < units.len() {
        let ready = (0..units.len()).find(|&u| !done[u] && upstream[u].iter().all(|&d| done[d]));
        match ready {
            Some(u) => {
                done[u] = true;
                order.push(u);
            }
            None => {
                let stuck: Vec<&str> = (0..units.len())
                    .filter(|&u| !done[u])
                    .flat_map(|u| units[u].members.iter().map(|&m| definitions[m].id.as_str()))
                    .collect();
                return Err(invalid(format!(
                    "dependency cycle among stages: {}",
                    stuck.join(", ")
                )));
            }
        }
    }

    let mut slots: Vec<Option<ExecutionGroup>> = units.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|u| slots[u].take()).collect())
}

fn invalid(message: String) -> PipelineError {
    PipelineError::InvalidConfig(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(defs: &[StageDefinition], groups: &[ExecutionGroup]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|g| g.members.iter().map(|&m| defs[m].id.clone()).collect())
            .collect()
    }

    fn diamond() -> Vec<StageDefinition> {
        vec![
            StageDefinition::new("a"),
            StageDefinition::new("b").depends_on(&["a"]).in_group("fan"),
            StageDefinition::new("c").depends_on(&["a"]).in_group("fan"),
            StageDefinition::new("d").depends_on(&["b", "c"]),
        ]
    }

    #[test]
    fn test_diamond_batches() {
        let defs = diamond();
        let groups = execution_groups(&defs).unwrap();
        assert_eq!(ids(&defs, &groups), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        assert!(!groups[0].is_parallel());
        assert_eq!(groups[1].name.as_deref(), Some("fan"));
    }

    #[test]
    fn test_declaration_order_kept_when_already_sorted() {
        let defs = vec![
            StageDefinition::new("x"),
            StageDefinition::new("y"),
            StageDefinition::new("z").depends_on(&["x"]),
        ];
        let groups = execution_groups(&defs).unwrap();
        assert_eq!(ids(&defs, &groups), vec![vec!["x"], vec!["y"], vec!["z"]]);
    }

    #[test]
    fn test_out_of_order_declaration_is_sorted() {
        let defs = vec![
            StageDefinition::new("report").depends_on(&["collect"]),
            StageDefinition::new("collect"),
        ];
        let groups = execution_groups(&defs).unwrap();
        assert_eq!(ids(&defs, &groups), vec![vec!["collect"], vec!["report"]]);
    }

    #[test]
    fn test_non_contiguous_group_members_batched() {
        let defs = vec![
            StageDefinition::new("a"),
            StageDefinition::new("b").depends_on(&["a"]).in_group("g"),
            StageDefinition::new("x").depends_on(&["a"]),
            StageDefinition::new("c").depends_on(&["a"]).in_group("g"),
        ];
        let groups = execution_groups(&defs).unwrap();
        assert_eq!(ids(&defs, &groups), vec![vec!["a"], vec!["b", "c"], vec!["x"]]);
    }

    fn err_message(defs: &[StageDefinition]) -> String {
        match execution_groups(defs) {
            Err(PipelineError::InvalidConfig(msg)) => msg,
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_empty() {
        assert!(err_message(&[]).contains("no stages"));
    }

    #[test]
    fn test_rejects_duplicates() {
        let defs = vec![StageDefinition::new("a"), StageDefinition::new("a")];
        assert!(err_message(&defs).contains("duplicate"));
    }

    #[test]
    fn test_rejects_unknown_and_self_dependencies() {
        let unknown = vec![StageDefinition::new("a").depends_on(&["ghost"])];
        assert!(err_message(&unknown).contains("unknown stage 'ghost'"));

        let selfish = vec![StageDefinition::new("a").depends_on(&["a"])];
        assert!(err_message(&selfish).contains("itself"));
    }

    #[test]
    fn test_rejects_dependency_inside_group() {
        let defs = vec![
            StageDefinition::new("b").in_group("g"),
            StageDefinition::new("c").depends_on(&["b"]).in_group("g"),
        ];
        assert!(err_message(&defs).contains("same parallel group"));
    }

    #[test]
    fn test_rejects_cycles() {
        let defs = vec![
            StageDefinition::new("a").depends_on(&["c"]),
            StageDefinition::new("b").depends_on(&["a"]),
            StageDefinition::new("c").depends_on(&["b"]),
            StageDefinition::new("free"),
        ];
        let msg = err_message(&defs);
        assert!(msg.contains("cycle"));
        assert!(msg.contains("a, b, c"));
        assert!(!msg.contains("free"));
    }
}
