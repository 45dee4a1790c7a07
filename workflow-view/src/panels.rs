//! PanelController - open/closed state and rows of per-step tool panels.
//!
//! Rendering is external; this only tracks which panels exist, what rows they
//! hold and where they are anchored.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use shared_types::ToolCallView;

use crate::layout::{GraphLayout, NodePosition};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub node_id: u32,
    pub title: String,
    /// Newest first.
    pub rows: Vec<ToolCallView>,
    pub anchor: Option<NodePosition>,
}

#[derive(Debug, Default)]
pub struct PanelController {
    open: BTreeMap<u32, Panel>,
    auto_opened: BTreeSet<u32>,
}

impl PanelController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, node_id: u32) -> bool {
        self.open.contains_key(&node_id)
    }

    pub fn panel(&self, node_id: u32) -> Option<&Panel> {
        self.open.get(&node_id)
    }

    pub fn open_panels(&self) -> impl Iterator<Item = &Panel> {
        self.open.values()
    }

    #[cfg(test)]
    pub fn was_auto_opened(&self, node_id: u32) -> bool {
        self.auto_opened.contains(&node_id)
    }

    /// Open a panel. Returns false if it was already open.
    pub fn show_panel(&mut self, node_id: u32, title: impl Into<String>) -> bool {
        if self.open.contains_key(&node_id) {
            return false;
        }
        self.open.insert(
            node_id,
            Panel {
                node_id,
                title: title.into(),
                rows: Vec::new(),
                anchor: None,
            },
        );
        true
    }

    /// Open a panel for a step's first tool event, once per step per session.
    pub fn auto_open(&mut self, node_id: u32, title: impl Into<String>) -> bool {
        if self.open.contains_key(&node_id) || !self.auto_opened.insert(node_id) {
            return false;
        }
        self.show_panel(node_id, title)
    }

    /// Insert or replace the row keyed by `row.id`. Returns false when the
    /// panel is not open.
    pub fn update_panel(&mut self, node_id: u32, row: ToolCallView) -> bool {
        let Some(panel) = self.open.get_mut(&node_id) else {
            return false;
        };
        match panel.rows.iter_mut().find(|existing| existing.id == row.id) {
            Some(existing) => *existing = row,
            None => panel.rows.insert(0, row),
        }
        true
    }

    /// Retitle an open panel, e.g. once the step list names its node.
    pub fn set_title(&mut self, node_id: u32, title: impl Into<String>) -> bool {
        match self.open.get_mut(&node_id) {
            Some(panel) => {
                panel.title = title.into();
                true
            }
            None => false,
        }
    }

    pub fn open_ids(&self) -> Vec<u32> {
        self.open.keys().copied().collect()
    }

    /// Close a panel. Returns false if it was not open.
    pub fn close_panel(&mut self, node_id: u32) -> bool {
        self.open.remove(&node_id).is_some()
    }

    /// User click on a node. Returns whether the panel is open afterwards.
    ///
    /// `rows` are the step's current rows in record order; they are shown
    /// newest first.
    pub fn toggle_panel(
        &mut self,
        node_id: u32,
        title: impl Into<String>,
        rows: Vec<ToolCallView>,
    ) -> bool {
        if self.close_panel(node_id) {
            return false;
        }
        self.show_panel(node_id, title);
        for row in rows {
            self.update_panel(node_id, row);
        }
        true
    }

    /// Re-anchor open panels to their node coordinates. Returns the ids of
    /// panels whose anchor changed.
    pub fn reposition(&mut self, layout: &GraphLayout) -> Vec<u32> {
        let mut moved = Vec::new();
        for panel in self.open.values_mut() {
            let anchor = layout.position(panel.node_id);
            if panel.anchor != anchor {
                panel.anchor = anchor;
                moved.push(panel.node_id);
            }
        }
        moved
    }

    /// Close every panel and forget which steps were auto-opened.
    pub fn reset(&mut self) -> Vec<u32> {
        self.auto_opened.clear();
        let closed = self.open.keys().copied().collect();
        self.open.clear();
        closed
    }
}
