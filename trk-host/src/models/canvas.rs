//! Canvas (palette) document model
//!
//! A palette is a named collection of positioned nodes and groups edited by
//! the visual canvas. The whole document is stored as one JSON value and
//! guarded by a per-document [`VersionToken`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use trk_common::{Error, Result};

/// Default palette name when none is supplied
pub const DEFAULT_PALETTE_NAME: &str = "Untitled";

/// A 2D position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct XY {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// Node size in canvas units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    #[serde(default)]
    pub w: i64,
    #[serde(default)]
    pub h: i64,
}

/// A node entry in the canvas palette
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub feature: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub position: Option<XY>,
    #[serde(default)]
    pub size: Option<Size>,
    #[serde(default)]
    pub props_overrides: Map<String, Value>,
    #[serde(default)]
    pub style_overrides: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Named set of node ids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Top-level canvas document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasDoc {
    pub id: String,
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default = "default_grid_size")]
    pub grid_size: i64,
    #[serde(default = "default_snap")]
    pub snap: bool,
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    #[serde(default)]
    pub viewport: Map<String, Value>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

fn default_name() -> String {
    DEFAULT_PALETTE_NAME.to_string()
}

fn default_grid_size() -> i64 {
    8
}

fn default_snap() -> bool {
    true
}

fn default_zoom() -> f64 {
    1.0
}

impl CanvasDoc {
    /// Empty document with display defaults
    pub fn new(id: String, name: Option<String>, experiment_id: Option<String>) -> Self {
        Self {
            id,
            experiment_id,
            name: name.unwrap_or_else(default_name),
            nodes: Vec::new(),
            groups: Vec::new(),
            grid_size: default_grid_size(),
            snap: default_snap(),
            zoom: default_zoom(),
            viewport: Map::new(),
            meta: Map::new(),
        }
    }

    /// Check document-wide invariants
    pub fn validate(&self) -> Result<()> {
        if self.grid_size <= 0 {
            return Err(Error::InvalidInput(format!(
                "grid_size must be positive, got {}",
                self.grid_size
            )));
        }
        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "zoom must be a positive number, got {}",
                self.zoom
            )));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(Error::InvalidInput("node id must not be empty".to_string()));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(Error::InvalidInput(format!("duplicate node id: {}", node.id)));
            }
        }

        let mut seen_groups = HashSet::new();
        for group in &self.groups {
            if group.id.trim().is_empty() {
                return Err(Error::InvalidInput("group id must not be empty".to_string()));
            }
            if !seen_groups.insert(group.id.as_str()) {
                return Err(Error::InvalidInput(format!("duplicate group id: {}", group.id)));
            }
        }

        Ok(())
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == node_id)
    }

    /// Remove a node and every group membership pointing at it
    pub fn remove_node(&mut self, node_id: &str) -> Option<Node> {
        let index = self.nodes.iter().position(|n| n.id == node_id)?;
        let removed = self.nodes.remove(index);
        for group in &mut self.groups {
            group.nodes.retain(|id| id != node_id);
        }
        Some(removed)
    }
}

/// POST /api/palettes body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaletteCreate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub experiment_id: Option<String>,
}

/// PATCH /api/palettes/:id body; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PalettePatch {
    pub name: Option<String>,
    pub experiment_id: Option<String>,
    pub grid_size: Option<i64>,
    pub snap: Option<bool>,
    pub zoom: Option<f64>,
    pub viewport: Option<Map<String, Value>>,
    pub meta: Option<Map<String, Value>>,
    pub nodes: Option<Vec<Node>>,
    pub groups: Option<Vec<Group>>,
}

impl PalettePatch {
    pub fn apply(self, doc: &mut CanvasDoc) {
        if let Some(name) = self.name {
            doc.name = name;
        }
        if let Some(experiment_id) = self.experiment_id {
            doc.experiment_id = Some(experiment_id);
        }
        if let Some(grid_size) = self.grid_size {
            doc.grid_size = grid_size;
        }
        if let Some(snap) = self.snap {
            doc.snap = snap;
        }
        if let Some(zoom) = self.zoom {
            doc.zoom = zoom;
        }
        if let Some(viewport) = self.viewport {
            doc.viewport = viewport;
        }
        if let Some(meta) = self.meta {
            doc.meta = meta;
        }
        if let Some(nodes) = self.nodes {
            doc.nodes = nodes;
        }
        if let Some(groups) = self.groups {
            doc.groups = groups;
        }
    }
}

/// POST /api/palettes/:id/nodes body; the id is generated when omitted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeCreate {
    pub id: Option<String>,
    pub feature: Option<String>,
    pub component: Option<String>,
    pub variant: Option<String>,
    pub position: Option<XY>,
    pub size: Option<Size>,
    pub props_overrides: Option<Map<String, Value>>,
    pub style_overrides: Option<Map<String, Value>>,
    pub tags: Option<Vec<String>>,
}

impl NodeCreate {
    pub fn into_node(self) -> Node {
        Node {
            id: self
                .id
                .unwrap_or_else(|| format!("n_{}", trk_common::uuid_utils::short_id())),
            feature: self.feature,
            component: self.component,
            variant: self.variant,
            position: self.position,
            size: self.size,
            props_overrides: self.props_overrides.unwrap_or_default(),
            style_overrides: self.style_overrides.unwrap_or_default(),
            tags: self.tags.unwrap_or_default(),
        }
    }
}

/// PATCH /api/palettes/:id/nodes/:node_id body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodePatch {
    pub feature: Option<String>,
    pub component: Option<String>,
    pub variant: Option<String>,
    pub position: Option<XY>,
    pub size: Option<Size>,
    pub props_overrides: Option<Map<String, Value>>,
    pub style_overrides: Option<Map<String, Value>>,
    pub tags: Option<Vec<String>>,
}

impl NodePatch {
    pub fn apply(self, node: &mut Node) {
        if self.feature.is_some() {
            node.feature = self.feature;
        }
        if self.component.is_some() {
            node.component = self.component;
        }
        if self.variant.is_some() {
            node.variant = self.variant;
        }
        if self.position.is_some() {
            node.position = self.position;
        }
        if self.size.is_some() {
            node.size = self.size;
        }
        if let Some(props) = self.props_overrides {
            node.props_overrides = props;
        }
        if let Some(style) = self.style_overrides {
            node.style_overrides = style;
        }
        if let Some(tags) = self.tags {
            node.tags = tags;
        }
    }
}

/// Optimistic-concurrency token of a stored palette
///
/// A per-document counter: every successful write advances it by one, so two
/// writes never share a token even when they land in the same instant.
/// Rendered on the wire as an entity tag, e.g. `"7"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(pub i64);

impl VersionToken {
    pub const INITIAL: VersionToken = VersionToken(1);

    pub fn next(self) -> VersionToken {
        VersionToken(self.0 + 1)
    }

    /// Quoted entity-tag form used in `ETag` headers
    pub fn to_etag(self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionToken {
    type Err = Error;

    /// Accepts `7`, `"7"` and weak `W/"7"` forms
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("W/").unwrap_or(trimmed);
        let trimmed = trimmed.trim_matches('"');
        trimmed
            .parse::<i64>()
            .map(VersionToken)
            .map_err(|_| Error::InvalidInput(format!("malformed version token: {}", s)))
    }
}
