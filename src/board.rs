use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Corner node of the hex grid.
pub type NodeId = u16;
/// Edge between two corner nodes, stored with the smaller id first.
pub type EdgeId = (NodeId, NodeId);
/// Index into the resolved tile list.
pub type TileIdx = usize;

pub const SQRT3: f64 = 1.732_050_807_568_877_2;

/// Step used to quantize corner coordinates when deduplicating corners shared
/// by adjacent tiles. Tile size is ~60, so 0.5 is far below corner spacing.
const QUANT_STEP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Wood,
    Brick,
    Sheep,
    Wheat,
    Ore,
}

pub const RESOURCES: [Resource; 5] = [
    Resource::Wood,
    Resource::Brick,
    Resource::Sheep,
    Resource::Wheat,
    Resource::Ore,
];

impl Resource {
    pub fn index(&self) -> usize {
        match self {
            Resource::Wood => 0,
            Resource::Brick => 1,
            Resource::Sheep => 2,
            Resource::Wheat => 3,
            Resource::Ore => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    Forest,
    Hills,
    Pasture,
    Fields,
    Mountains,
    Desert,
    Sea,
    Gold,
}

impl Terrain {
    /// Resource yielded on a matching roll. Desert and sea yield nothing;
    /// gold yields a player choice handled by the pending-action flow.
    pub fn resource(&self) -> Option<Resource> {
        match self {
            Terrain::Forest => Some(Resource::Wood),
            Terrain::Hills => Some(Resource::Brick),
            Terrain::Pasture => Some(Resource::Sheep),
            Terrain::Fields => Some(Resource::Wheat),
            Terrain::Mountains => Some(Resource::Ore),
            Terrain::Desert | Terrain::Sea | Terrain::Gold => None,
        }
    }
}

/// A resolved tile: axial coordinate, terrain, optional number token and the
/// planar center used for corner generation. Immutable once the map resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tile {
    pub q: i32,
    pub r: i32,
    pub terrain: Terrain,
    pub number: Option<u8>,
    pub center: (f64, f64),
}

/// Trade ratio granted by a port to whoever owns an adjacent node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// 3:1 on any resource.
    Generic,
    /// 2:1 on one specific resource.
    Specific(Resource),
}

pub fn axial_to_planar(q: i32, r: i32, size: f64) -> (f64, f64) {
    let x = size * SQRT3 * (q as f64 + r as f64 / 2.0);
    let y = size * 1.5 * r as f64;
    (x, y)
}

fn hex_corners(center: (f64, f64), size: f64) -> [(f64, f64); 6] {
    let (cx, cy) = center;
    let mut pts = [(0.0, 0.0); 6];
    for (i, p) in pts.iter_mut().enumerate() {
        let ang = (30.0 + 60.0 * i as f64).to_radians();
        *p = (cx + size * ang.cos(), cy + size * ang.sin());
    }
    pts
}

fn quant_key(p: (f64, f64)) -> (i64, i64) {
    (
        (p.0 / QUANT_STEP).round() as i64,
        (p.1 / QUANT_STEP).round() as i64,
    )
}

pub fn edge_key(a: NodeId, b: NodeId) -> EdgeId {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Serialize edge-keyed maps as `[[ [a, b], value ], ...]` — JSON object keys
/// must be strings, so tuple keys go through an entry list instead.
pub mod edge_map_serde {
    use super::EdgeId;
    use serde::de::Deserializer;
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    pub fn serialize<V, S>(map: &HashMap<EdgeId, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        V: Serialize + Clone,
        S: Serializer,
    {
        let mut entries: Vec<(EdgeId, V)> =
            map.iter().map(|(k, v)| (*k, v.clone())).collect();
        entries.sort_by_key(|(k, _)| *k);
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, V, D>(deserializer: D) -> Result<HashMap<EdgeId, V>, D::Error>
    where
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let entries = Vec::<(EdgeId, V)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

/// Navigable graph derived from a tile layout: corner nodes, edges and the
/// node/edge to tile adjacency. Built once per match, never mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardGraph {
    pub node_positions: HashMap<NodeId, (f64, f64)>,
    pub edges: Vec<EdgeId>,
    pub node_neighbors: HashMap<NodeId, Vec<NodeId>>,
    pub node_tiles: HashMap<NodeId, Vec<TileIdx>>,
    #[serde(with = "edge_map_serde")]
    pub edge_tiles: HashMap<EdgeId, Vec<TileIdx>>,
}

impl BoardGraph {
    /// Derive the graph from an already-validated tile list. Corners of
    /// adjacent tiles land on the same quantized key and collapse into a
    /// single node; each hex contributes its six boundary segments to the
    /// edge set.
    pub fn build(tiles: &[Tile], size: f64) -> Self {
        let mut key_to_node: HashMap<(i64, i64), NodeId> = HashMap::new();
        let mut node_positions: HashMap<NodeId, (f64, f64)> = HashMap::new();
        let mut node_tiles: HashMap<NodeId, Vec<TileIdx>> = HashMap::new();
        let mut edge_tiles: HashMap<EdgeId, Vec<TileIdx>> = HashMap::new();
        let mut node_neighbors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut edges: Vec<EdgeId> = Vec::new();

        for (ti, tile) in tiles.iter().enumerate() {
            let corners = hex_corners(tile.center, size);
            let mut ids = [0 as NodeId; 6];
            for (ci, p) in corners.iter().enumerate() {
                let key = quant_key(*p);
                let id = *key_to_node.entry(key).or_insert_with(|| {
                    let id = node_positions.len() as NodeId;
                    node_positions.insert(id, *p);
                    id
                });
                ids[ci] = id;
                node_tiles.entry(id).or_default().push(ti);
            }

            for i in 0..6 {
                let a = ids[i];
                let b = ids[(i + 1) % 6];
                let e = edge_key(a, b);
                let incident = edge_tiles.entry(e).or_default();
                if incident.is_empty() {
                    edges.push(e);
                    node_neighbors.entry(a).or_default().push(b);
                    node_neighbors.entry(b).or_default().push(a);
                }
                incident.push(ti);
            }
        }

        edges.sort_unstable();

        BoardGraph {
            node_positions,
            edges,
            node_neighbors,
            node_tiles,
            edge_tiles,
        }
    }

    pub fn contains_edge(&self, e: EdgeId) -> bool {
        self.edge_tiles.contains_key(&e)
    }

    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        self.node_neighbors
            .get(&node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tiles_at_node(&self, node: NodeId) -> &[TileIdx] {
        self.node_tiles
            .get(&node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tiles_at_edge(&self, e: EdgeId) -> &[TileIdx] {
        self.edge_tiles.get(&e).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Edges incident to a node, in sorted edge order.
    pub fn edges_at_node(&self, node: NodeId) -> Vec<EdgeId> {
        self.neighbors(node)
            .iter()
            .map(|&nb| edge_key(node, nb))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Base-board axial layout: rows of 3-4-5-4-3 hexes.
    pub(crate) fn base_axial() -> Vec<(i32, i32)> {
        let mut coords = Vec::new();
        coords.extend([(0, -2), (1, -2), (2, -2)]);
        coords.extend([(-1, -1), (0, -1), (1, -1), (2, -1)]);
        coords.extend([(-2, 0), (-1, 0), (0, 0), (1, 0), (2, 0)]);
        coords.extend([(-2, 1), (-1, 1), (0, 1), (1, 1)]);
        coords.extend([(-2, 2), (-1, 2), (0, 2)]);
        coords
    }

    fn base_tiles(size: f64) -> Vec<Tile> {
        base_axial()
            .into_iter()
            .map(|(q, r)| Tile {
                q,
                r,
                terrain: Terrain::Fields,
                number: Some(6),
                center: axial_to_planar(q, r, size),
            })
            .collect()
    }

    #[test]
    fn base_board_has_expected_graph_shape() {
        let tiles = base_tiles(58.0);
        let graph = BoardGraph::build(&tiles, 58.0);

        // 19 hexes share corners down to 54 nodes and 72 edges.
        assert_eq!(graph.node_positions.len(), 54);
        assert_eq!(graph.edges.len(), 72);
    }

    #[test]
    fn interior_node_touches_three_tiles() {
        let tiles = base_tiles(58.0);
        let graph = BoardGraph::build(&tiles, 58.0);

        let max_tiles = graph
            .node_tiles
            .values()
            .map(|t| t.len())
            .max()
            .unwrap_or(0);
        assert_eq!(max_tiles, 3);

        // Every node touches at least one tile and at most three.
        for tiles in graph.node_tiles.values() {
            assert!((1..=3).contains(&tiles.len()));
        }
    }

    #[test]
    fn edges_are_normalized_and_unique() {
        let tiles = base_tiles(58.0);
        let graph = BoardGraph::build(&tiles, 58.0);

        let mut seen = std::collections::HashSet::new();
        for &(a, b) in &graph.edges {
            assert!(a < b);
            assert!(seen.insert((a, b)));
        }
    }

    #[test]
    fn coast_edges_touch_exactly_one_tile() {
        let tiles = base_tiles(58.0);
        let graph = BoardGraph::build(&tiles, 58.0);

        let coast = graph
            .edge_tiles
            .values()
            .filter(|t| t.len() == 1)
            .count();
        // The outer ring of the 19-hex board is 30 edges long.
        assert_eq!(coast, 30);
    }

    #[test]
    fn neighbors_are_symmetric() {
        let tiles = base_tiles(58.0);
        let graph = BoardGraph::build(&tiles, 58.0);

        for (&node, neighbors) in &graph.node_neighbors {
            for nb in neighbors {
                assert!(graph.neighbors(*nb).contains(&node));
            }
        }
    }
}
