use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use shared_types::Graph;

pub const MIN_NODE_SPACING: f64 = 80.0;
pub const MIN_LEVEL_WIDTH: f64 = 150.0;
pub const VERTICAL_PADDING: f64 = 50.0;
pub const HORIZONTAL_PADDING: f64 = 200.0;
pub const HALF_SCREEN_LEVEL_FACTOR: f64 = 0.6;
pub const HALF_SCREEN_SPACING_FACTOR: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl CanvasSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self::new(1200.0, 800.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphLayout {
    pub layers: Vec<Vec<u32>>,
    pub positions: BTreeMap<u32, NodePosition>,
    pub level_width: f64,
    pub node_spacing: f64,
}

impl GraphLayout {
    pub fn position(&self, node_id: u32) -> Option<NodePosition> {
        self.positions.get(&node_id).copied()
    }
}

// ── Layering ─────────────────────────────────────────────────────────────────

/// Kahn layering: each layer is every node whose in-degree reached zero once
/// the previous layers were removed, sorted by id. Nodes on a cycle never
/// reach zero and are left out.
pub fn compute_layers(graph: &Graph) -> Vec<Vec<u32>> {
    let known: BTreeSet<u32> = graph.nodes.iter().map(|node| node.id).collect();
    let mut successors: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut in_degree: HashMap<u32, usize> = known.iter().map(|id| (*id, 0)).collect();

    let unique_edges: BTreeSet<(u32, u32)> = graph
        .edges
        .iter()
        .filter(|edge| known.contains(&edge.source) && known.contains(&edge.target))
        .map(|edge| (edge.source, edge.target))
        .collect();
    for (source, target) in unique_edges {
        successors.entry(source).or_default().push(target);
        if let Some(degree) = in_degree.get_mut(&target) {
            *degree += 1;
        }
    }

    let mut layers = Vec::new();
    let mut current: Vec<u32> = known
        .iter()
        .copied()
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    while !current.is_empty() {
        current.sort_unstable();
        let mut next = Vec::new();
        for node in &current {
            for successor in successors.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(successor) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        next.push(*successor);
                    }
                }
            }
        }
        layers.push(std::mem::take(&mut current));
        current = next;
    }

    let placed: usize = layers.iter().map(Vec::len).sum();
    if placed < known.len() {
        tracing::warn!(
            dropped = known.len() - placed,
            "Dependency cycle detected; cycle members left out of layout"
        );
    }

    layers
}

// ── Coordinates ──────────────────────────────────────────────────────────────

/// Deterministic hierarchical layout: layers run left to right, nodes of a
/// layer are stacked and centered vertically.
pub fn layout(graph: &Graph, canvas: CanvasSize, half_screen: bool) -> GraphLayout {
    let layers = compute_layers(graph);
    if layers.is_empty() {
        return GraphLayout::default();
    }

    let max_layer_size = layers.iter().map(Vec::len).max().unwrap_or(1).max(1);
    let level_gaps = layers.len().saturating_sub(1).max(1);

    let available_height = canvas.height - 2.0 * VERTICAL_PADDING;
    let available_width = canvas.width - 2.0 * HORIZONTAL_PADDING;
    let mut node_spacing = MIN_NODE_SPACING.max(available_height / max_layer_size as f64);
    let mut level_width = MIN_LEVEL_WIDTH.max(available_width / level_gaps as f64);
    if half_screen {
        level_width *= HALF_SCREEN_LEVEL_FACTOR;
        node_spacing *= HALF_SCREEN_SPACING_FACTOR;
    }

    let total_width = (layers.len() - 1) as f64 * level_width;
    let start_x = HORIZONTAL_PADDING.max((canvas.width - total_width) / 2.0);

    let mut positions = BTreeMap::new();
    for (level_index, layer) in layers.iter().enumerate() {
        let x = start_x + level_index as f64 * level_width;
        let level_height = (layer.len() - 1) as f64 * node_spacing;
        let start_y = VERTICAL_PADDING.max(canvas.height / 2.0 - level_height / 2.0);
        for (node_index, node_id) in layer.iter().enumerate() {
            positions.insert(
                *node_id,
                NodePosition {
                    x,
                    y: start_y + node_index as f64 * node_spacing,
                },
            );
        }
    }

    GraphLayout {
        layers,
        positions,
        level_width,
        node_spacing,
    }
}
