//! Persisted diagram data model.
//!
//! A `Diagram` owns every element by id: layers, nodes, edges and
//! stylesheets. Containment is expressed with ordered id lists: the diagram
//! orders its layers and stylesheets, a layer orders its top-level elements
//! (z-order), and a node orders its child nodes. Raw `insert_*`/`remove_*`
//! calls only touch the id-keyed storage; keeping the ordering lists in step
//! is the job of the transactional layer built on top.

use crate::error::{Error, Result};
use crate::id::ElementId;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};

// ─── Colors & Props ──────────────────────────────────────────────────────

/// RGBA color. Stored as 4 × f32 [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl Color {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#RGB`, `#RRGGBB` or `#RRGGBBAA` (the `#` is optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        let bytes = hex.as_bytes();
        let pair = |i: usize| -> Option<f32> {
            Some(((hex_val(bytes[i])? << 4) | hex_val(bytes[i + 1])?) as f32 / 255.0)
        };

        match bytes.len() {
            3 => {
                let short = |i: usize| -> Option<f32> { Some((hex_val(bytes[i])? * 17) as f32 / 255.0) };
                Some(Self::rgba(short(0)?, short(1)?, short(2)?, 1.0))
            }
            6 => Some(Self::rgba(pair(0)?, pair(2)?, pair(4)?, 1.0)),
            8 => Some(Self::rgba(pair(0)?, pair(2)?, pair(4)?, pair(6)?)),
            _ => None,
        }
    }

    /// Emit as `#RRGGBB`, or `#RRGGBBAA` when not fully opaque.
    pub fn to_hex(&self) -> String {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let (r, g, b, a) = (channel(self.r), channel(self.g), channel(self.b), channel(self.a));
        if a == 255 {
            format!("#{r:02X}{g:02X}{b:02X}")
        } else {
            format!("#{r:02X}{g:02X}{b:02X}{a:02X}")
        }
    }
}

/// A single property value on a node, edge or stylesheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Color(Color),
}

/// Ordered property bag. `BTreeMap` keeps snapshots deterministic.
pub type Props = BTreeMap<String, PropValue>;

// ─── Geometry ────────────────────────────────────────────────────────────

/// Axis-aligned bounds with rotation `r` in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub r: f64,
}

impl Bounds {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h, r: 0.0 }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// A free-standing point (edge waypoints, free endpoints).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

// ─── Elements ────────────────────────────────────────────────────────────

/// The kinds of element a diagram contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Diagram,
    Layer,
    Node,
    Edge,
    Stylesheet,
}

impl ElementKind {
    pub const ALL: [ElementKind; 5] = [
        ElementKind::Diagram,
        ElementKind::Layer,
        ElementKind::Node,
        ElementKind::Edge,
        ElementKind::Stylesheet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Diagram => "diagram",
            ElementKind::Layer => "layer",
            ElementKind::Node => "node",
            ElementKind::Edge => "edge",
            ElementKind::Stylesheet => "stylesheet",
        }
    }
}

/// Root-level persisted fields of a diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramRoot {
    pub id: ElementId,
    pub name: String,
    /// Layers bottom → top.
    pub layers: Vec<ElementId>,
    pub stylesheets: Vec<ElementId>,
    pub active_layer: Option<ElementId>,
}

/// A layer: an ordered set of top-level nodes and edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: ElementId,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    /// Top-level element ids, back → front.
    pub elements: Vec<ElementId>,
}

impl Layer {
    pub fn new(id: ElementId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            visible: true,
            locked: false,
            elements: Vec::new(),
        }
    }
}

/// A shape on the canvas. Nodes nest: `children` are child node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramNode {
    pub id: ElementId,
    /// Shape name from the stencil library (`rect`, `circle`, `group`, …).
    pub node_type: String,
    pub layer: ElementId,
    /// Containing node, `None` for top-level nodes.
    pub parent: Option<ElementId>,
    pub bounds: Bounds,
    pub text: String,
    pub style: Option<ElementId>,
    pub props: Props,
    pub children: SmallVec<[ElementId; 4]>,
}

impl DiagramNode {
    pub fn new(id: ElementId, node_type: impl Into<String>, layer: ElementId, bounds: Bounds) -> Self {
        Self {
            id,
            node_type: node_type.into(),
            layer,
            parent: None,
            bounds,
            text: String::new(),
            style: None,
            props: Props::new(),
            children: SmallVec::new(),
        }
    }
}

/// One end of an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Endpoint {
    /// Not attached to anything.
    Free { x: f64, y: f64 },
    /// Attached to an anchor of a node.
    Connected { node: ElementId, anchor: String },
}

impl Endpoint {
    pub fn node(&self) -> Option<ElementId> {
        match self {
            Endpoint::Connected { node, .. } => Some(*node),
            Endpoint::Free { .. } => None,
        }
    }
}

/// A connector between two endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramEdge {
    pub id: ElementId,
    pub layer: ElementId,
    pub start: Endpoint,
    pub end: Endpoint,
    pub waypoints: SmallVec<[Point; 2]>,
    pub style: Option<ElementId>,
    pub props: Props,
}

impl DiagramEdge {
    pub fn new(id: ElementId, layer: ElementId, start: Endpoint, end: Endpoint) -> Self {
        Self {
            id,
            layer,
            start,
            end,
            waypoints: SmallVec::new(),
            style: None,
            props: Props::new(),
        }
    }
}

/// What a stylesheet applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StylesheetKind {
    Node,
    Edge,
    Text,
}

/// A named, shared property set referenced by nodes and edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stylesheet {
    pub id: ElementId,
    pub kind: StylesheetKind,
    pub name: String,
    pub props: Props,
}

impl Stylesheet {
    pub fn new(id: ElementId, kind: StylesheetKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            props: Props::new(),
        }
    }
}

// ─── Diagram ─────────────────────────────────────────────────────────────

/// The complete diagram: root fields plus id-keyed element storage.
#[derive(Debug, Clone)]
pub struct Diagram {
    root: DiagramRoot,
    layers: HashMap<ElementId, Layer>,
    nodes: HashMap<ElementId, DiagramNode>,
    edges: HashMap<ElementId, DiagramEdge>,
    stylesheets: HashMap<ElementId, Stylesheet>,
}

impl Diagram {
    /// Create an empty diagram with no layers.
    #[must_use]
    pub fn new(id: ElementId, name: impl Into<String>) -> Self {
        Self {
            root: DiagramRoot {
                id,
                name: name.into(),
                layers: Vec::new(),
                stylesheets: Vec::new(),
                active_layer: None,
            },
            layers: HashMap::new(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
            stylesheets: HashMap::new(),
        }
    }

    pub fn id(&self) -> ElementId {
        self.root.id
    }

    pub fn root(&self) -> &DiagramRoot {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut DiagramRoot {
        &mut self.root
    }

    /// Which kind of element `id` names, if it exists.
    pub fn kind_of(&self, id: ElementId) -> Option<ElementKind> {
        if id == self.root.id {
            Some(ElementKind::Diagram)
        } else if self.layers.contains_key(&id) {
            Some(ElementKind::Layer)
        } else if self.nodes.contains_key(&id) {
            Some(ElementKind::Node)
        } else if self.edges.contains_key(&id) {
            Some(ElementKind::Edge)
        } else if self.stylesheets.contains_key(&id) {
            Some(ElementKind::Stylesheet)
        } else {
            None
        }
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.kind_of(id).is_some()
    }

    fn ensure_free(&self, id: ElementId) -> Result<()> {
        if self.contains(id) {
            return Err(Error::DuplicateId(id));
        }
        Ok(())
    }

    // ─── Lookup ──────────────────────────────────────────────────────────

    pub fn layer(&self, id: ElementId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn layer_mut(&mut self, id: ElementId) -> Option<&mut Layer> {
        self.layers.get_mut(&id)
    }

    pub fn node(&self, id: ElementId) -> Option<&DiagramNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: ElementId) -> Option<&mut DiagramNode> {
        self.nodes.get_mut(&id)
    }

    pub fn edge(&self, id: ElementId) -> Option<&DiagramEdge> {
        self.edges.get(&id)
    }

    pub fn edge_mut(&mut self, id: ElementId) -> Option<&mut DiagramEdge> {
        self.edges.get_mut(&id)
    }

    pub fn stylesheet(&self, id: ElementId) -> Option<&Stylesheet> {
        self.stylesheets.get(&id)
    }

    pub fn stylesheet_mut(&mut self, id: ElementId) -> Option<&mut Stylesheet> {
        self.stylesheets.get_mut(&id)
    }

    /// Layers in z-order (bottom → top). Ids without storage are skipped.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.root.layers.iter().filter_map(|id| self.layers.get(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DiagramNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &DiagramEdge> {
        self.edges.values()
    }

    pub fn stylesheets(&self) -> impl Iterator<Item = &Stylesheet> {
        self.root.stylesheets.iter().filter_map(|id| self.stylesheets.get(id))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges with either endpoint connected to `node`, sorted by id text.
    pub fn edges_connected_to(&self, node: ElementId) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self
            .edges
            .values()
            .filter(|e| e.start.node() == Some(node) || e.end.node() == Some(node))
            .map(|e| e.id)
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    // ─── Raw storage ─────────────────────────────────────────────────────

    /// Store a layer without touching `root().layers`.
    pub fn insert_layer(&mut self, layer: Layer) -> Result<()> {
        self.ensure_free(layer.id)?;
        self.layers.insert(layer.id, layer);
        Ok(())
    }

    /// Store a node without touching any parent's ordering.
    pub fn insert_node(&mut self, node: DiagramNode) -> Result<()> {
        self.ensure_free(node.id)?;
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Store an edge without touching the owning layer's ordering.
    pub fn insert_edge(&mut self, edge: DiagramEdge) -> Result<()> {
        self.ensure_free(edge.id)?;
        self.edges.insert(edge.id, edge);
        Ok(())
    }

    /// Store a stylesheet without touching `root().stylesheets`.
    pub fn insert_stylesheet(&mut self, stylesheet: Stylesheet) -> Result<()> {
        self.ensure_free(stylesheet.id)?;
        self.stylesheets.insert(stylesheet.id, stylesheet);
        Ok(())
    }

    pub fn remove_layer(&mut self, id: ElementId) -> Option<Layer> {
        self.layers.remove(&id)
    }

    pub fn remove_node(&mut self, id: ElementId) -> Option<DiagramNode> {
        self.nodes.remove(&id)
    }

    pub fn remove_edge(&mut self, id: ElementId) -> Option<DiagramEdge> {
        self.edges.remove(&id)
    }

    pub fn remove_stylesheet(&mut self, id: ElementId) -> Option<Stylesheet> {
        self.stylesheets.remove(&id)
    }
}
