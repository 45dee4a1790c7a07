use std::collections::HashMap;

use serde_json::{Map, Value};
use shared_types::{Edge, Graph, Progress, Step, StepStatus};

use crate::parsers::{value_as_index, StepListPayload};

// ── Base detection ───────────────────────────────────────────────────────────

/// Index base of each axis of a dependency map.
///
/// An axis is 0-based iff its smallest integer entry is exactly 0. Targets
/// shift when either axis is 0-based, since a 0-based plan often omits its
/// root step as a key (`{"1": [0], "2": [1]}`). Sources shift only when the
/// values themselves are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyBase {
    pub keys_zero_based: bool,
    pub values_zero_based: bool,
}

impl DependencyBase {
    pub fn detect(dependencies: &Map<String, Value>) -> Self {
        let min_key = dependencies
            .keys()
            .filter_map(|key| key.trim().parse::<i64>().ok())
            .min();
        let min_value = dependencies
            .values()
            .filter_map(|sources| sources.as_array())
            .flatten()
            .filter_map(value_as_index)
            .min();

        Self {
            keys_zero_based: min_key == Some(0),
            values_zero_based: min_value == Some(0),
        }
    }

    /// 1-based target id, `None` when the shift overflows.
    fn target_id(&self, raw: i64) -> Option<i64> {
        if self.keys_zero_based || self.values_zero_based {
            raw.checked_add(1)
        } else {
            Some(raw)
        }
    }

    /// 1-based source id, `None` when the shift overflows.
    fn source_id(&self, raw: i64) -> Option<i64> {
        if self.values_zero_based {
            raw.checked_add(1)
        } else {
            Some(raw)
        }
    }
}

// ── Graph construction ───────────────────────────────────────────────────────

/// Normalized, in-range, non-self dependencies per 1-based target id.
fn normalized_dependencies(
    dependencies: &Map<String, Value>,
    step_count: usize,
) -> HashMap<u32, Vec<u32>> {
    let base = DependencyBase::detect(dependencies);
    let in_range = |id: i64| id >= 1 && id <= step_count as i64;
    let mut by_target: HashMap<u32, Vec<u32>> = HashMap::new();

    for (raw_key, sources) in dependencies {
        let Some(key) = raw_key.trim().parse::<i64>().ok() else {
            tracing::debug!(key = %raw_key, "Skipping non-integer dependency key");
            continue;
        };
        let Some(target) = base.target_id(key).filter(|id| in_range(*id)) else {
            tracing::debug!(key, step_count, "Skipping out-of-range dependency target");
            continue;
        };
        let Some(sources) = sources.as_array() else {
            continue;
        };

        let target = target as u32;
        let entry = by_target.entry(target).or_default();
        for raw_source in sources {
            let Some(source) = value_as_index(raw_source).and_then(|raw| base.source_id(raw)) else {
                tracing::debug!(target_id = target, source = %raw_source, "Dropping non-integer dependency");
                continue;
            };
            if !in_range(source) || source == i64::from(target) {
                tracing::debug!(target_id = target, source, "Dropping invalid dependency");
                continue;
            }
            let source = source as u32;
            if !entry.contains(&source) {
                entry.push(source);
            }
        }
    }

    by_target
}

/// Build the dependency graph for a step list.
///
/// Node ids are positional (index + 1). An empty step list yields an empty
/// graph; malformed dependency entries are dropped, never errors.
pub fn build_graph(
    steps: &[String],
    dependencies: &Map<String, Value>,
    statuses: &HashMap<String, String>,
) -> Graph {
    if steps.is_empty() {
        return Graph::default();
    }

    let mut by_target = normalized_dependencies(dependencies, steps.len());

    let nodes: Vec<Step> = steps
        .iter()
        .enumerate()
        .map(|(index, source_name)| {
            let id = index as u32 + 1;
            let status = statuses
                .get(source_name)
                .and_then(|raw| StepStatus::from_wire(raw))
                .unwrap_or_default();
            Step {
                id,
                name: format!("step{id}"),
                source_name: source_name.clone(),
                status,
                dependencies: by_target.remove(&id).unwrap_or_default(),
            }
        })
        .collect();

    let edges = nodes
        .iter()
        .flat_map(|node| {
            node.dependencies.iter().map(move |source| Edge {
                source: *source,
                target: node.id,
            })
        })
        .collect();

    let progress = Progress::from_steps(&nodes);
    Graph {
        title: None,
        nodes,
        edges,
        progress,
    }
}

/// Graph for a decoded step-list envelope, keeping its title and reported
/// progress when present.
pub fn graph_from_payload(payload: &StepListPayload) -> Graph {
    let mut graph = build_graph(
        &payload.steps,
        &payload.dependencies,
        &payload.step_statuses,
    );
    if graph.is_empty() {
        return graph;
    }
    graph.title = payload.title.clone();
    if let Some(progress) = payload.progress {
        graph.progress = progress;
    }
    graph
}
