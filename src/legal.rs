use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::board::{EdgeId, NodeId, PortKind, Resource, Terrain, TileIdx};
use crate::state::{Building, GameState, Phase, Seat, SetupPiece};

// Legality queries shared by command validation and by the choices
// advertised to clients. Nothing here mutates state.

pub fn edge_touches_sea(g: &GameState, e: EdgeId) -> bool {
    g.map
        .graph
        .tiles_at_edge(e)
        .iter()
        .any(|&ti| g.map.tiles[ti].terrain == Terrain::Sea)
}

pub fn edge_touches_land(g: &GameState, e: EdgeId) -> bool {
    g.map
        .graph
        .tiles_at_edge(e)
        .iter()
        .any(|&ti| g.map.tiles[ti].terrain != Terrain::Sea)
}

fn edge_touches_pirate(g: &GameState, e: EdgeId) -> bool {
    match g.pirate_tile {
        Some(p) => g.map.graph.tiles_at_edge(e).contains(&p),
        None => false,
    }
}

/// Distance rule plus (in the main phase) the reach rule: the node must
/// touch the seat's own road/ship network.
pub fn can_place_settlement(g: &GameState, seat: Seat, node: NodeId, require_network: bool) -> bool {
    if !g.map.graph.node_positions.contains_key(&node) {
        return false;
    }
    // Settlements sit on land (or the coast), never on open water.
    let touches_land = g
        .map
        .graph
        .tiles_at_node(node)
        .iter()
        .any(|&ti| g.map.tiles[ti].terrain != Terrain::Sea);
    if !touches_land {
        return false;
    }
    if g.buildings.contains_key(&node) {
        return false;
    }
    for &nb in g.map.graph.neighbors(node) {
        if g.buildings.contains_key(&nb) {
            return false;
        }
    }
    if !require_network {
        return true;
    }
    g.map
        .graph
        .edges_at_node(node)
        .into_iter()
        .any(|e| g.edge_owner(e) == Some(seat))
}

/// Roads go on edges with at least one land tile, connected to the seat's
/// buildings or existing network. During setup the road must touch the
/// settlement just placed.
pub fn can_place_road(
    g: &GameState,
    seat: Seat,
    e: EdgeId,
    must_touch: Option<NodeId>,
) -> bool {
    if !g.map.graph.contains_edge(e) {
        return false;
    }
    if g.edge_owner(e).is_some() {
        return false;
    }
    if !edge_touches_land(g, e) {
        return false;
    }
    let (a, b) = e;
    if let Some(anchor) = must_touch {
        if a != anchor && b != anchor {
            return false;
        }
    }
    for v in [a, b] {
        if let Some(building) = g.buildings.get(&v) {
            if building.owner() == seat {
                return true;
            }
        }
    }
    g.map
        .graph
        .edges_at_node(a)
        .into_iter()
        .chain(g.map.graph.edges_at_node(b))
        .any(|other| other != e && g.edge_owner(other) == Some(seat))
}

/// Ships go on sea-adjacent edges, connect through the seat's settlements or
/// other ships (never bare road ends), and avoid the pirate's tile.
pub fn can_place_ship(g: &GameState, seat: Seat, e: EdgeId) -> bool {
    if !g.map.rules.enable_seafarers {
        return false;
    }
    if !g.map.graph.contains_edge(e) {
        return false;
    }
    if g.edge_owner(e).is_some() {
        return false;
    }
    if !edge_touches_sea(g, e) {
        return false;
    }
    if edge_touches_pirate(g, e) {
        return false;
    }
    let (a, b) = e;
    for v in [a, b] {
        if let Some(building) = g.buildings.get(&v) {
            if building.owner() == seat {
                return true;
            }
        }
    }
    g.map
        .graph
        .edges_at_node(a)
        .into_iter()
        .chain(g.map.graph.edges_at_node(b))
        .any(|other| other != e && g.ships.get(&other) == Some(&seat))
}

pub fn can_upgrade_city(g: &GameState, seat: Seat, node: NodeId) -> bool {
    matches!(g.buildings.get(&node), Some(Building::Settlement(s)) if *s == seat)
}

/// Tiles the robber may move to: land tiles not already blocked.
pub fn legal_robber_tiles(g: &GameState) -> Vec<TileIdx> {
    g.map
        .tiles
        .iter()
        .enumerate()
        .filter(|(i, t)| t.terrain != Terrain::Sea && !g.robbers.contains(i))
        .map(|(i, _)| i)
        .collect()
}

/// Tiles the pirate may move to: sea tiles other than its current one.
pub fn legal_pirate_tiles(g: &GameState) -> Vec<TileIdx> {
    g.map
        .tiles
        .iter()
        .enumerate()
        .filter(|(i, t)| t.terrain == Terrain::Sea && g.pirate_tile != Some(*i))
        .map(|(i, _)| i)
        .collect()
}

/// Seats with a building adjacent to the tile and a non-empty hand; these
/// are the robber's possible steal targets.
pub fn robber_victims(g: &GameState, tile: TileIdx, thief: Seat) -> Vec<Seat> {
    let mut victims: Vec<Seat> = g
        .buildings
        .iter()
        .filter(|(node, b)| {
            b.owner() != thief
                && g.map.graph.tiles_at_node(**node).contains(&tile)
                && g.player(b.owner()).hand_total() > 0
        })
        .map(|(_, b)| b.owner())
        .collect();
    victims.sort_unstable();
    victims.dedup();
    victims
}

/// Seats with a ship on an edge of the tile and a non-empty hand.
pub fn pirate_victims(g: &GameState, tile: TileIdx, thief: Seat) -> Vec<Seat> {
    let mut victims: Vec<Seat> = g
        .ships
        .iter()
        .filter(|(e, &owner)| {
            owner != thief
                && g.map.graph.tiles_at_edge(**e).contains(&tile)
                && g.player(owner).hand_total() > 0
        })
        .map(|(_, &owner)| owner)
        .collect();
    victims.sort_unstable();
    victims.dedup();
    victims
}

/// Port kinds reachable by the seat: a port counts when either endpoint of
/// its edge carries one of the seat's buildings.
pub fn player_ports(g: &GameState, seat: Seat) -> Vec<PortKind> {
    g.map
        .ports
        .iter()
        .filter(|(e, _)| {
            [e.0, e.1]
                .into_iter()
                .any(|v| matches!(g.buildings.get(&v), Some(b) if b.owner() == seat))
        })
        .map(|(_, kind)| *kind)
        .unique()
        .collect()
}

/// Best bank-trade ratio for giving `give`: 2 with a matching specific port,
/// 3 with a generic port, otherwise 4.
pub fn best_trade_rate(g: &GameState, seat: Seat, give: Resource) -> u8 {
    let ports = player_ports(g, seat);
    if ports.contains(&PortKind::Specific(give)) {
        2
    } else if ports.contains(&PortKind::Generic) {
        3
    } else {
        4
    }
}

/// The full legal-move set advertised to a seat, phase- and pending-aware.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegalMoves {
    pub settlements: Vec<NodeId>,
    pub roads: Vec<EdgeId>,
    pub ships: Vec<EdgeId>,
    pub cities: Vec<NodeId>,
    pub robber_tiles: Vec<TileIdx>,
    pub pirate_tiles: Vec<TileIdx>,
}

pub fn legal_settlement_nodes(g: &GameState, seat: Seat, require_network: bool) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = g
        .map
        .graph
        .node_positions
        .keys()
        .copied()
        .filter(|&n| can_place_settlement(g, seat, n, require_network))
        .collect();
    nodes.sort_unstable();
    nodes
}

pub fn legal_road_edges(g: &GameState, seat: Seat, must_touch: Option<NodeId>) -> Vec<EdgeId> {
    g.map
        .graph
        .edges
        .iter()
        .copied()
        .filter(|&e| can_place_road(g, seat, e, must_touch))
        .collect()
}

pub fn legal_ship_edges(g: &GameState, seat: Seat) -> Vec<EdgeId> {
    g.map
        .graph
        .edges
        .iter()
        .copied()
        .filter(|&e| can_place_ship(g, seat, e))
        .collect()
}

pub fn legal_city_nodes(g: &GameState, seat: Seat) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = g
        .buildings
        .iter()
        .filter(|(_, b)| matches!(b, Building::Settlement(s) if *s == seat))
        .map(|(&n, _)| n)
        .collect();
    nodes.sort_unstable();
    nodes
}

/// Compute everything the seat could legally place right now. Used both to
/// double-check client commands and to let thin clients render choices.
pub fn legal_moves(g: &GameState, seat: Seat) -> LegalMoves {
    match g.phase {
        Phase::Ended => LegalMoves::default(),
        Phase::Setup => {
            if g.setup_seat() != Some(seat) {
                return LegalMoves::default();
            }
            match g.setup.expect {
                SetupPiece::Settlement => LegalMoves {
                    settlements: legal_settlement_nodes(g, seat, false),
                    ..Default::default()
                },
                SetupPiece::Road => LegalMoves {
                    roads: legal_road_edges(g, seat, g.setup.anchor),
                    ..Default::default()
                },
            }
        }
        Phase::Main => {
            use crate::state::PendingAction;
            match &g.pending {
                Some(PendingAction::RobberMove { seat: mover }) if *mover == seat => LegalMoves {
                    robber_tiles: legal_robber_tiles(g),
                    pirate_tiles: if g.map.rules.enable_pirate {
                        legal_pirate_tiles(g)
                    } else {
                        Vec::new()
                    },
                    ..Default::default()
                },
                Some(_) => LegalMoves::default(),
                None if g.turn == seat => LegalMoves {
                    settlements: legal_settlement_nodes(g, seat, true),
                    roads: legal_road_edges(g, seat, None),
                    ships: if g.map.rules.enable_seafarers {
                        legal_ship_edges(g, seat)
                    } else {
                        Vec::new()
                    },
                    cities: legal_city_nodes(g, seat),
                    ..Default::default()
                },
                None => LegalMoves::default(),
            }
        }
    }
}
