use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::board::{axial_to_planar, BoardGraph, EdgeId, PortKind, Terrain, Tile, TileIdx};
use crate::errors::MapError;

pub const MAP_VERSION: u32 = 1;
pub const DEFAULT_PRESET_ID: &str = "base_standard";
pub const DEFAULT_TILE_SIZE: f64 = 58.0;

fn default_version() -> u32 {
    MAP_VERSION
}

/// Terrain field of a tile spec: either a concrete terrain or a draw from the
/// terrain deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainSpec {
    Random,
    Forest,
    Hills,
    Pasture,
    Fields,
    Mountains,
    Desert,
    Sea,
    Gold,
}

impl TerrainSpec {
    fn fixed(self) -> Option<Terrain> {
        match self {
            TerrainSpec::Random => None,
            TerrainSpec::Forest => Some(Terrain::Forest),
            TerrainSpec::Hills => Some(Terrain::Hills),
            TerrainSpec::Pasture => Some(Terrain::Pasture),
            TerrainSpec::Fields => Some(Terrain::Fields),
            TerrainSpec::Mountains => Some(Terrain::Mountains),
            TerrainSpec::Desert => Some(Terrain::Desert),
            TerrainSpec::Sea => Some(Terrain::Sea),
            TerrainSpec::Gold => Some(Terrain::Gold),
        }
    }
}

/// Marker for `"random"` in a number slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawToken {
    Random,
}

/// Number token field: a concrete 2..=12 value (never 7) or a deck draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberSpec {
    Fixed(u8),
    Draw(DrawToken),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileSpec {
    pub q: i32,
    pub r: i32,
    pub terrain: TerrainSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<NumberSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub edge: (u16, u16),
    pub kind: PortKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsAuto {
    #[serde(default = "default_port_count")]
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deck: Option<Vec<PortKind>>,
}

fn default_port_count() -> usize {
    9
}

impl Default for PortsAuto {
    fn default() -> Self {
        Self {
            count: default_port_count(),
            deck: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceLimits {
    #[serde(default = "default_roads")]
    pub roads: u8,
    #[serde(default = "default_settlements")]
    pub settlements: u8,
    #[serde(default = "default_cities")]
    pub cities: u8,
    #[serde(default = "default_ships")]
    pub ships: u8,
}

fn default_roads() -> u8 {
    15
}
fn default_settlements() -> u8 {
    5
}
fn default_cities() -> u8 {
    4
}
fn default_ships() -> u8 {
    15
}

impl Default for PieceLimits {
    fn default() -> Self {
        Self {
            roads: default_roads(),
            settlements: default_settlements(),
            cities: default_cities(),
            ships: default_ships(),
        }
    }
}

/// Rules block resolved from the map description. This is the whole rule
/// variant surface the engine supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_target_vp")]
    pub target_vp: u8,
    #[serde(default = "default_discard_limit")]
    pub discard_limit: u8,
    #[serde(default)]
    pub limits: PieceLimits,
    #[serde(default = "default_robber_count")]
    pub robber_count: u8,
    #[serde(default)]
    pub enable_seafarers: bool,
    #[serde(default)]
    pub enable_pirate: bool,
    #[serde(default)]
    pub enable_gold: bool,
    #[serde(default)]
    pub enable_move_ship: bool,
}

fn default_target_vp() -> u8 {
    10
}
fn default_discard_limit() -> u8 {
    7
}
fn default_robber_count() -> u8 {
    1
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            target_vp: default_target_vp(),
            discard_limit: default_discard_limit(),
            limits: PieceLimits::default(),
            robber_count: default_robber_count(),
            enable_seafarers: false,
            enable_pirate: false,
            enable_gold: false,
            enable_move_ship: false,
        }
    }
}

/// The already-parsed map description handed to the core by the host. The
/// core never touches files; this value arrives over the wire or from the
/// preset registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapDescription {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tiles: Vec<TileSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terrain_deck: Option<Vec<Terrain>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_deck: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports_auto: Option<PortsAuto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robber_tile: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pirate_tile: Option<usize>,
    #[serde(default)]
    pub rules: RulesConfig,
}

/// A fully resolved map: concrete tiles, concrete ports, concrete rules and
/// the derived board graph. Everything downstream of this is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedMap {
    pub map_id: String,
    pub name: String,
    pub size: f64,
    pub tiles: Vec<Tile>,
    pub graph: BoardGraph,
    pub ports: Vec<(EdgeId, PortKind)>,
    pub robber_tiles: Vec<TileIdx>,
    pub pirate_tile: Option<TileIdx>,
    pub rules: RulesConfig,
}

pub fn default_terrain_deck() -> Vec<Terrain> {
    let mut deck = Vec::with_capacity(19);
    deck.extend(std::iter::repeat(Terrain::Forest).take(4));
    deck.extend(std::iter::repeat(Terrain::Hills).take(3));
    deck.extend(std::iter::repeat(Terrain::Pasture).take(4));
    deck.extend(std::iter::repeat(Terrain::Fields).take(4));
    deck.extend(std::iter::repeat(Terrain::Mountains).take(3));
    deck.push(Terrain::Desert);
    deck
}

pub fn default_number_deck() -> Vec<u8> {
    vec![2, 3, 3, 4, 4, 5, 5, 6, 6, 8, 8, 9, 9, 10, 10, 11, 11, 12]
}

pub fn default_port_deck() -> Vec<PortKind> {
    let mut deck = vec![PortKind::Generic; 4];
    for r in crate::board::RESOURCES {
        deck.push(PortKind::Specific(r));
    }
    deck
}

fn validate(desc: &MapDescription) -> Result<(), MapError> {
    if desc.version != MAP_VERSION {
        return Err(MapError::with_detail(
            "unsupported map version",
            serde_json::json!({ "version": desc.version }),
        ));
    }
    if desc.tiles.is_empty() {
        return Err(MapError::new("tiles must be non-empty"));
    }

    let mut coords = HashSet::new();
    let mut wants_terrain_draw = false;
    let mut wants_number_draw = false;
    for (idx, t) in desc.tiles.iter().enumerate() {
        if !coords.insert((t.q, t.r)) {
            return Err(MapError::with_detail(
                "duplicate tile coordinate",
                serde_json::json!({ "index": idx, "q": t.q, "r": t.r }),
            ));
        }
        if t.terrain == TerrainSpec::Random {
            wants_terrain_draw = true;
        }
        match t.number {
            Some(NumberSpec::Draw(_)) => wants_number_draw = true,
            Some(NumberSpec::Fixed(n)) if !(2..=12).contains(&n) || n == 7 => {
                return Err(MapError::with_detail(
                    "tile number out of range",
                    serde_json::json!({ "index": idx, "number": n }),
                ));
            }
            _ => {}
        }
    }

    if wants_terrain_draw {
        let deck_len = desc
            .terrain_deck
            .as_ref()
            .map(Vec::len)
            .unwrap_or_else(|| default_terrain_deck().len());
        if deck_len == 0 {
            return Err(MapError::new("terrain_deck required for random terrain"));
        }
    }
    if wants_number_draw {
        let deck = desc.number_deck.clone().unwrap_or_else(default_number_deck);
        if deck.is_empty() {
            return Err(MapError::new("number_deck required for random numbers"));
        }
        if let Some(&bad) = deck.iter().find(|&&n| !(2..=12).contains(&n) || n == 7) {
            return Err(MapError::with_detail(
                "number_deck entry out of range",
                serde_json::json!({ "number": bad }),
            ));
        }
    }

    let n_tiles = desc.tiles.len();
    if let Some(t) = desc.robber_tile {
        if t >= n_tiles {
            return Err(MapError::with_detail(
                "robber_tile out of range",
                serde_json::json!({ "robber_tile": t }),
            ));
        }
    }
    if let Some(t) = desc.pirate_tile {
        if t >= n_tiles {
            return Err(MapError::with_detail(
                "pirate_tile out of range",
                serde_json::json!({ "pirate_tile": t }),
            ));
        }
    }
    if desc.rules.robber_count == 0 {
        return Err(MapError::new("robber_count must be at least 1"));
    }

    Ok(())
}

fn materialize_tiles(
    desc: &MapDescription,
    rng: &mut impl Rng,
    size: f64,
) -> Result<(Vec<Tile>, Option<TileIdx>), MapError> {
    let mut terrain_deck = desc.terrain_deck.clone().unwrap_or_else(default_terrain_deck);
    let mut number_deck = desc.number_deck.clone().unwrap_or_else(default_number_deck);

    if desc.tiles.iter().any(|t| t.terrain == TerrainSpec::Random) {
        terrain_deck.shuffle(rng);
    }
    if desc
        .tiles
        .iter()
        .any(|t| matches!(t.number, Some(NumberSpec::Draw(_))))
    {
        number_deck.shuffle(rng);
    }

    let mut terrain_idx = 0;
    let mut number_idx = 0;
    let mut tiles = Vec::with_capacity(desc.tiles.len());
    let mut desert_idx = None;

    for (idx, spec) in desc.tiles.iter().enumerate() {
        let terrain = match spec.terrain.fixed() {
            Some(t) => t,
            None => {
                let t = *terrain_deck.get(terrain_idx).ok_or_else(|| {
                    MapError::with_detail(
                        "terrain_deck exhausted",
                        serde_json::json!({ "index": idx }),
                    )
                })?;
                terrain_idx += 1;
                t
            }
        };

        let number = match spec.number {
            Some(NumberSpec::Fixed(n)) => Some(n),
            Some(NumberSpec::Draw(_)) => {
                // Desert and sea never carry a token even when the slot says
                // "random"; the draw is simply skipped.
                if matches!(terrain, Terrain::Desert | Terrain::Sea) {
                    None
                } else {
                    let n = *number_deck.get(number_idx).ok_or_else(|| {
                        MapError::with_detail(
                            "number_deck exhausted",
                            serde_json::json!({ "index": idx }),
                        )
                    })?;
                    number_idx += 1;
                    Some(n)
                }
            }
            None => None,
        };

        if terrain == Terrain::Desert && desert_idx.is_none() {
            desert_idx = Some(idx);
        }

        tiles.push(Tile {
            q: spec.q,
            r: spec.r,
            terrain,
            number,
            center: axial_to_planar(spec.q, spec.r, size),
        });
    }

    Ok((tiles, desert_idx))
}

/// Pick `count` port edges evenly spaced along the coastline (edges with
/// exactly one incident land tile), sorted by angle around the board center,
/// and deal kinds from the shuffled deck.
fn auto_ports(
    graph: &BoardGraph,
    tiles: &[Tile],
    deck: Vec<PortKind>,
    count: usize,
    rng: &mut impl Rng,
) -> Vec<(EdgeId, PortKind)> {
    let mut coast: Vec<EdgeId> = graph
        .edge_tiles
        .iter()
        .filter(|(_, incident)| {
            incident
                .iter()
                .filter(|&&ti| tiles[ti].terrain != Terrain::Sea)
                .count()
                == 1
        })
        .map(|(&e, _)| e)
        .collect();
    if coast.is_empty() {
        return Vec::new();
    }

    let angle_of = |e: &EdgeId| -> f64 {
        let a = graph.node_positions[&e.0];
        let b = graph.node_positions[&e.1];
        let mx = (a.0 + b.0) * 0.5;
        let my = (a.1 + b.1) * 0.5;
        my.atan2(mx)
    };
    coast.sort_by(|a, b| angle_of(a).partial_cmp(&angle_of(b)).unwrap());

    let picked: Vec<EdgeId> = if coast.len() >= count {
        (0..count)
            .map(|i| coast[i * coast.len() / count % coast.len()])
            .collect()
    } else {
        coast
    };

    let mut kinds = deck;
    kinds.shuffle(rng);
    picked
        .into_iter()
        .zip(kinds)
        .collect()
}

/// Resolve a map description into concrete tiles, ports, rules and a board
/// graph. All randomness ("random" tile draws, port dealing) happens here,
/// before the engine is ever invoked.
pub fn resolve_map(
    desc: &MapDescription,
    map_id: &str,
    rng: &mut impl Rng,
    size: f64,
) -> Result<ResolvedMap, MapError> {
    validate(desc)?;
    let (tiles, desert_idx) = materialize_tiles(desc, rng, size)?;
    let graph = BoardGraph::build(&tiles, size);

    let ports = match &desc.ports {
        Some(specs) => {
            let mut out = Vec::with_capacity(specs.len());
            for p in specs {
                let e = crate::board::edge_key(p.edge.0, p.edge.1);
                if !graph.contains_edge(e) {
                    return Err(MapError::with_detail(
                        "port edge not in graph",
                        serde_json::json!({ "edge": [p.edge.0, p.edge.1] }),
                    ));
                }
                out.push((e, p.kind));
            }
            out
        }
        None => {
            let auto = desc.ports_auto.clone().unwrap_or_default();
            let deck = auto.deck.unwrap_or_else(default_port_deck);
            auto_ports(&graph, &tiles, deck, auto.count, rng)
        }
    };

    let first_robber = desc
        .robber_tile
        .or(desert_idx)
        .unwrap_or(0);
    let mut robber_tiles = vec![first_robber];
    // Extra robbers start on distinct blockable tiles when the map has any,
    // falling back to the first robber's tile.
    let mut spare = tiles
        .iter()
        .enumerate()
        .filter(|(i, t)| *i != first_robber && matches!(t.terrain, Terrain::Desert | Terrain::Sea))
        .map(|(i, _)| i);
    for _ in 1..desc.rules.robber_count {
        robber_tiles.push(spare.next().unwrap_or(first_robber));
    }

    let pirate_tile = match desc.pirate_tile {
        Some(t) => Some(t),
        None if desc.rules.enable_pirate => tiles
            .iter()
            .position(|t| t.terrain == Terrain::Sea),
        None => None,
    };

    Ok(ResolvedMap {
        map_id: map_id.to_string(),
        name: desc
            .name
            .clone()
            .unwrap_or_else(|| map_id.to_string()),
        size,
        tiles,
        graph,
        ports,
        robber_tiles,
        pirate_tile,
        rules: desc.rules.clone(),
    })
}

// ---------------------------------------------------------------------------
// Preset registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetMeta {
    pub id: String,
    pub name: String,
    pub description: String,
}

fn base_axial_coords() -> Vec<(i32, i32)> {
    let mut coords = Vec::with_capacity(19);
    coords.extend([(0, -2), (1, -2), (2, -2)]);
    coords.extend([(-1, -1), (0, -1), (1, -1), (2, -1)]);
    coords.extend([(-2, 0), (-1, 0), (0, 0), (1, 0), (2, 0)]);
    coords.extend([(-2, 1), (-1, 1), (0, 1), (1, 1)]);
    coords.extend([(-2, 2), (-1, 2), (0, 2)]);
    coords
}

fn random_tiles(coords: &[(i32, i32)]) -> Vec<TileSpec> {
    coords
        .iter()
        .map(|&(q, r)| TileSpec {
            q,
            r,
            terrain: TerrainSpec::Random,
            number: Some(NumberSpec::Draw(DrawToken::Random)),
        })
        .collect()
}

fn sea_tiles(coords: &[(i32, i32)]) -> Vec<TileSpec> {
    coords
        .iter()
        .map(|&(q, r)| TileSpec {
            q,
            r,
            terrain: TerrainSpec::Sea,
            number: None,
        })
        .collect()
}

/// The 18 axial coordinates forming the ring just outside the 19-hex core.
fn outer_ring_coords() -> Vec<(i32, i32)> {
    let dirs = [(1, 0), (1, -1), (0, -1), (-1, 0), (-1, 1), (0, 1)];
    let radius = 3;
    let mut q = -radius;
    let mut r = radius;
    let mut out = Vec::with_capacity(18);
    for (dq, dr) in dirs {
        for _ in 0..radius {
            out.push((q, r));
            q += dq;
            r += dr;
        }
    }
    out
}

fn base_description() -> MapDescription {
    MapDescription {
        version: MAP_VERSION,
        name: Some("Base Standard".to_string()),
        tiles: random_tiles(&base_axial_coords()),
        terrain_deck: None,
        number_deck: None,
        ports: None,
        ports_auto: None,
        robber_tile: None,
        pirate_tile: None,
        rules: RulesConfig::default(),
    }
}

pub fn get_preset(id: &str) -> Option<MapDescription> {
    match id {
        "base_standard" => Some(base_description()),
        "base_rich_ore" => {
            let mut desc = base_description();
            desc.name = Some("Base: Ore Rich".to_string());
            let mut deck = Vec::with_capacity(19);
            deck.extend(std::iter::repeat(Terrain::Forest).take(4));
            deck.extend(std::iter::repeat(Terrain::Hills).take(3));
            deck.extend(std::iter::repeat(Terrain::Pasture).take(4));
            deck.extend(std::iter::repeat(Terrain::Fields).take(2));
            deck.extend(std::iter::repeat(Terrain::Mountains).take(5));
            deck.push(Terrain::Desert);
            desc.terrain_deck = Some(deck);
            Some(desc)
        }
        "base_high_prob" => {
            let mut desc = base_description();
            desc.name = Some("Base: High Probability".to_string());
            desc.number_deck = Some(vec![
                4, 4, 5, 5, 5, 6, 6, 6, 6, 8, 8, 8, 8, 9, 9, 9, 10, 10,
            ]);
            Some(desc)
        }
        "base_12vp" => {
            let mut desc = base_description();
            desc.name = Some("Base: 12 VP".to_string());
            desc.rules.target_vp = 12;
            Some(desc)
        }
        "base_20vp_multi_robbers" => {
            let mut desc = base_description();
            desc.name = Some("Base: 20 VP (Multi-Robber)".to_string());
            desc.rules.target_vp = 20;
            desc.rules.robber_count = 2;
            Some(desc)
        }
        "seafarers_simple_1" => {
            let mut tiles = random_tiles(&base_axial_coords());
            // Sea lanes flanking each land row.
            tiles.extend(sea_tiles(&[
                (-1, -2),
                (3, -2),
                (-2, -1),
                (3, -1),
                (-3, 0),
                (3, 0),
                (-3, 1),
                (2, 1),
                (-3, 2),
                (1, 2),
            ]));
            let mut desc = base_description();
            desc.name = Some("Seafarers: Coastal Lanes".to_string());
            desc.tiles = tiles;
            desc.rules.enable_seafarers = true;
            desc.rules.enable_move_ship = true;
            Some(desc)
        }
        "seafarers_simple_2" => {
            let mut tiles = random_tiles(&base_axial_coords());
            tiles.extend(sea_tiles(&outer_ring_coords()));
            let mut desc = base_description();
            desc.name = Some("Seafarers: Simple Sea Ring".to_string());
            desc.tiles = tiles;
            desc.rules.enable_seafarers = true;
            Some(desc)
        }
        _ => None,
    }
}

pub fn list_presets() -> Vec<PresetMeta> {
    [
        ("base_standard", "Base Standard", "Classic 19-hex base map with standard decks."),
        ("base_rich_ore", "Base: Ore Rich", "Extra mountains, fewer fields (resource skew)."),
        ("base_high_prob", "Base: High Probability", "More 6/8 tiles, fewer low rolls (faster economy)."),
        ("base_12vp", "Base: 12 VP", "Standard base map with victory target 12."),
        ("base_20vp_multi_robbers", "Base: 20 VP (Multi-Robber)", "Higher VP target with two robbers blocking tiles."),
        ("seafarers_simple_1", "Seafarers: Coastal Lanes", "Sea lanes on the sides with larger land core."),
        ("seafarers_simple_2", "Seafarers: Simple Sea Ring", "Coastal ring of sea tiles for ships."),
    ]
    .iter()
    .map(|(id, name, description)| PresetMeta {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
    })
    .collect()
}
