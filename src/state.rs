use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};

use crate::board::{edge_map_serde, EdgeId, NodeId, TileIdx};
use crate::map::ResolvedMap;

/// Seat index within a match (0-based, dense).
pub type Seat = u8;

/// Per-resource card counts in resource-index order (wood, brick, sheep,
/// wheat, ore).
pub type Hand = [u8; 5];

pub const BANK_STOCK_PER_RESOURCE: u8 = 19;

pub const ROAD_COST: Hand = [1, 1, 0, 0, 0];
pub const SHIP_COST: Hand = [1, 0, 1, 0, 0];
pub const SETTLEMENT_COST: Hand = [1, 1, 1, 1, 0];
pub const CITY_COST: Hand = [0, 0, 0, 2, 3];
pub const DEVCARD_COST: Hand = [0, 0, 1, 1, 1];

pub fn hand_add(hand: &mut Hand, other: Hand) {
    for i in 0..5 {
        hand[i] += other[i];
    }
}

pub fn hand_sub(hand: &mut Hand, other: Hand) {
    for i in 0..5 {
        hand[i] -= other[i];
    }
}

pub fn hand_contains(hand: &Hand, cost: &Hand) -> bool {
    hand.iter().zip(cost.iter()).all(|(h, c)| h >= c)
}

pub fn hand_total(hand: &Hand) -> u8 {
    hand.iter().sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevCard {
    Knight,
    VictoryPoint,
    RoadBuilding,
    YearOfPlenty,
    Monopoly,
}

/// A held development card. Cards bought this turn are not playable until the
/// next turn; the flag clears at end of turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevCardHolding {
    pub card: DevCard,
    pub bought_this_turn: bool,
}

/// A settlement or city occupying a corner node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Building {
    Settlement(Seat),
    City(Seat),
}

impl Building {
    pub fn owner(&self) -> Seat {
        match self {
            Building::Settlement(s) | Building::City(s) => *s,
        }
    }

    /// Cards produced per matching roll: 1 for a settlement, 2 for a city.
    pub fn yield_count(&self) -> u8 {
        match self {
            Building::Settlement(_) => 1,
            Building::City(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Main,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPiece {
    Settlement,
    Road,
}

/// Cursor through the snake-order placement rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupState {
    pub order: Vec<Seat>,
    pub idx: usize,
    pub expect: SetupPiece,
    /// Node of the settlement placed earlier in the same visit; the road
    /// must touch it.
    pub anchor: Option<NodeId>,
}

/// Seats 0..n then n-1..0: two placements per seat, reversed second round.
pub fn snake_setup_order(num_seats: u8) -> Vec<Seat> {
    let forward = 0..num_seats;
    let backward = (0..num_seats).rev();
    forward.chain(backward).collect()
}

/// A blocking sub-obligation. While one is outstanding, only commands that
/// resolve it are accepted from the seats it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingAction {
    /// One or more seats owe a discard after a 7. All owed seats are blocked
    /// simultaneously; the roller takes the robber once the last one lands.
    Discard {
        owed: BTreeMap<Seat, u8>,
        submitted: BTreeSet<Seat>,
        roller: Seat,
    },
    /// The rolling or knight-playing seat must relocate a blocker. When the
    /// pirate is enabled this pending also accepts a pirate relocation.
    RobberMove { seat: Seat },
    /// Seats owed gold-tile picks must resolve them before play continues.
    ChooseGold { owed: BTreeMap<Seat, u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOfferStatus {
    Active,
    Accepted,
    Declined,
    Canceled,
}

/// A player-to-player offer created by the acting seat. Open offers die at
/// end of turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOffer {
    pub offer_id: u32,
    pub from: Seat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Seat>,
    pub give: Hand,
    pub take: Hand,
    pub status: TradeOfferStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub seat: Seat,
    pub name: String,
    pub hand: Hand,
    pub dev_cards: Vec<DevCardHolding>,
    pub knights_played: u8,
    pub vp: u8,
}

impl PlayerState {
    pub fn new(seat: Seat, name: String) -> Self {
        Self {
            seat,
            name,
            hand: [0; 5],
            dev_cards: Vec::new(),
            knights_played: 0,
            vp: 0,
        }
    }

    pub fn hand_total(&self) -> u8 {
        hand_total(&self.hand)
    }

    pub fn dev_vp_cards(&self) -> u8 {
        self.dev_cards
            .iter()
            .filter(|c| c.card == DevCard::VictoryPoint)
            .count() as u8
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievements {
    pub longest_road_owner: Option<Seat>,
    pub longest_road_len: u8,
    pub largest_army_owner: Option<Seat>,
    pub largest_army_size: u8,
}

fn skipped_rng() -> XorShiftRng {
    // Snapshots never carry the RNG; a deserialized state (client side) gets
    // a fixed stream it will not use.
    XorShiftRng::seed_from_u64(0)
}

/// Complete authoritative state of one match. Mutated only through
/// `GameState::apply` on the sequencer's single execution path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub seed: u64,
    pub map: ResolvedMap,
    pub players: Vec<PlayerState>,
    pub bank: Hand,
    pub dev_deck: Vec<DevCard>,

    pub phase: Phase,
    pub setup: SetupState,
    /// Acting seat for the current turn.
    pub turn: Seat,
    pub rolled: bool,
    pub last_roll: Option<u8>,
    pub pending: Option<PendingAction>,

    pub buildings: HashMap<NodeId, Building>,
    #[serde(with = "edge_map_serde")]
    pub roads: HashMap<EdgeId, Seat>,
    #[serde(with = "edge_map_serde")]
    pub ships: HashMap<EdgeId, Seat>,

    /// Tiles currently blocked. The front entry is the robber that moves
    /// next; relocation pops it and pushes the new tile at the back.
    pub robbers: Vec<TileIdx>,
    pub pirate_tile: Option<TileIdx>,

    pub achievements: Achievements,
    pub winner: Option<Seat>,

    /// Set when the acting seat plays a development card; at most one per
    /// turn.
    pub played_dev_this_turn: bool,
    /// Free road placements granted by a road-building card.
    pub free_roads: u8,
    pub moved_ship_this_turn: bool,

    pub trade_offers: Vec<TradeOffer>,
    pub next_offer_id: u32,

    #[serde(skip, default = "skipped_rng")]
    pub(crate) rng: XorShiftRng,
}

impl GameState {
    pub fn new(map: ResolvedMap, seat_names: Vec<String>, seed: u64) -> Self {
        let mut rng = XorShiftRng::seed_from_u64(seed);

        let mut dev_deck = Vec::with_capacity(25);
        dev_deck.extend(std::iter::repeat(DevCard::Knight).take(14));
        dev_deck.extend(std::iter::repeat(DevCard::VictoryPoint).take(5));
        dev_deck.extend(std::iter::repeat(DevCard::RoadBuilding).take(2));
        dev_deck.extend(std::iter::repeat(DevCard::YearOfPlenty).take(2));
        dev_deck.extend(std::iter::repeat(DevCard::Monopoly).take(2));
        dev_deck.shuffle(&mut rng);

        let players: Vec<PlayerState> = seat_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| PlayerState::new(i as Seat, name))
            .collect();
        let num_seats = players.len() as u8;

        let robbers = map.robber_tiles.clone();
        let pirate_tile = map.pirate_tile;

        GameState {
            seed,
            map,
            players,
            bank: [BANK_STOCK_PER_RESOURCE; 5],
            dev_deck,
            phase: Phase::Setup,
            setup: SetupState {
                order: snake_setup_order(num_seats),
                idx: 0,
                expect: SetupPiece::Settlement,
                anchor: None,
            },
            turn: 0,
            rolled: false,
            last_roll: None,
            pending: None,
            buildings: HashMap::new(),
            roads: HashMap::new(),
            ships: HashMap::new(),
            robbers,
            pirate_tile,
            achievements: Achievements::default(),
            winner: None,
            played_dev_this_turn: false,
            free_roads: 0,
            moved_ship_this_turn: false,
            trade_offers: Vec::new(),
            next_offer_id: 1,
            rng,
        }
    }

    pub fn num_seats(&self) -> u8 {
        self.players.len() as u8
    }

    pub fn player(&self, seat: Seat) -> &PlayerState {
        &self.players[seat as usize]
    }

    pub fn player_mut(&mut self, seat: Seat) -> &mut PlayerState {
        &mut self.players[seat as usize]
    }

    /// Seat whose setup placement is expected right now.
    pub fn setup_seat(&self) -> Option<Seat> {
        if self.phase != Phase::Setup {
            return None;
        }
        self.setup.order.get(self.setup.idx).copied()
    }

    pub fn owned_settlements(&self, seat: Seat) -> usize {
        self.buildings
            .values()
            .filter(|b| matches!(b, Building::Settlement(s) if *s == seat))
            .count()
    }

    pub fn owned_cities(&self, seat: Seat) -> usize {
        self.buildings
            .values()
            .filter(|b| matches!(b, Building::City(s) if *s == seat))
            .count()
    }

    pub fn owned_roads(&self, seat: Seat) -> usize {
        self.roads.values().filter(|&&s| s == seat).count()
    }

    pub fn owned_ships(&self, seat: Seat) -> usize {
        self.ships.values().filter(|&&s| s == seat).count()
    }

    /// Owner of a road OR ship on this edge; both count as the seat's
    /// network.
    pub fn edge_owner(&self, e: EdgeId) -> Option<Seat> {
        self.roads.get(&e).or_else(|| self.ships.get(&e)).copied()
    }

    pub fn is_tile_robbed(&self, tile: TileIdx) -> bool {
        self.robbers.contains(&tile)
    }

    /// Victory points derived purely from owned pieces, dev cards and
    /// achievement flags. The stored `vp` must always agree with this.
    pub fn recompute_vp(&self, seat: Seat) -> u8 {
        let mut vp = self.owned_settlements(seat) as u8 + 2 * self.owned_cities(seat) as u8;
        vp += self.player(seat).dev_vp_cards();
        if self.achievements.longest_road_owner == Some(seat) {
            vp += 2;
        }
        if self.achievements.largest_army_owner == Some(seat) {
            vp += 2;
        }
        vp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Resource;
    use crate::map::{get_preset, resolve_map, DEFAULT_TILE_SIZE};

    pub(crate) fn new_base_game(num_seats: u8, seed: u64) -> GameState {
        let desc = get_preset("base_standard").unwrap();
        let mut rng = XorShiftRng::seed_from_u64(seed);
        let map = resolve_map(&desc, "base_standard", &mut rng, DEFAULT_TILE_SIZE).unwrap();
        let names = (0..num_seats).map(|i| format!("P{}", i + 1)).collect();
        GameState::new(map, names, seed)
    }

    #[test]
    fn new_game_starts_in_setup_with_full_bank() {
        let g = new_base_game(3, 11);
        assert_eq!(g.phase, Phase::Setup);
        assert_eq!(g.bank, [19; 5]);
        assert_eq!(g.dev_deck.len(), 25);
        assert_eq!(g.setup.order, vec![0, 1, 2, 2, 1, 0]);
        assert_eq!(g.setup_seat(), Some(0));
    }

    #[test]
    fn snake_order_reverses() {
        assert_eq!(snake_setup_order(2), vec![0, 1, 1, 0]);
        assert_eq!(snake_setup_order(4), vec![0, 1, 2, 3, 3, 2, 1, 0]);
    }

    #[test]
    fn dev_deck_shuffle_is_seed_stable() {
        let a = new_base_game(2, 99);
        let b = new_base_game(2, 99);
        let c = new_base_game(2, 100);
        assert_eq!(a.dev_deck, b.dev_deck);
        // 25 cards: different seeds virtually always disagree somewhere.
        assert_ne!(a.dev_deck, c.dev_deck);
    }

    #[test]
    fn dev_deck_composition() {
        let g = new_base_game(2, 5);
        let count = |card: DevCard| g.dev_deck.iter().filter(|&&c| c == card).count();
        assert_eq!(count(DevCard::Knight), 14);
        assert_eq!(count(DevCard::VictoryPoint), 5);
        assert_eq!(count(DevCard::RoadBuilding), 2);
        assert_eq!(count(DevCard::YearOfPlenty), 2);
        assert_eq!(count(DevCard::Monopoly), 2);
    }

    #[test]
    fn recompute_vp_counts_pieces_and_flags() {
        let mut g = new_base_game(2, 1);
        g.buildings.insert(0, Building::Settlement(0));
        g.buildings.insert(10, Building::City(0));
        g.player_mut(0).dev_cards.push(DevCardHolding {
            card: DevCard::VictoryPoint,
            bought_this_turn: false,
        });
        g.achievements.longest_road_owner = Some(0);
        assert_eq!(g.recompute_vp(0), 1 + 2 + 1 + 2);
        assert_eq!(g.recompute_vp(1), 0);
    }

    #[test]
    fn snapshot_serializes_and_round_trips() {
        let g = new_base_game(2, 3);
        let json = serde_json::to_string(&g).unwrap();
        let back: GameState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.players.len(), 2);
        assert_eq!(back.bank, g.bank);
        assert_eq!(back.map.tiles.len(), g.map.tiles.len());
        assert_eq!(back.setup.order, g.setup.order);
    }

    #[test]
    fn hand_helpers() {
        let mut h: Hand = [2, 1, 0, 3, 0];
        assert!(hand_contains(&h, &ROAD_COST));
        assert!(!hand_contains(&h, &CITY_COST));
        hand_sub(&mut h, ROAD_COST);
        assert_eq!(h, [1, 0, 0, 3, 0]);
        hand_add(&mut h, [0, 0, 1, 0, 0]);
        assert_eq!(hand_total(&h), 5);
    }

    #[test]
    fn resource_index_matches_hand_order() {
        assert_eq!(Resource::Wood.index(), 0);
        assert_eq!(Resource::Ore.index(), 4);
    }
}
