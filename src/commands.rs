use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::board::{NodeId, Resource, TileIdx};
use crate::state::{DevCard, Hand, Seat};

fn default_qty() -> u8 {
    1
}

/// Every request a seat can make against a running match. Closed set, one
/// variant per command kind; the engine dispatches with an exhaustive match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Roll the dice. `roll` overrides the dice for tests and scripted
    /// scenarios; live play passes `None` and uses the match RNG.
    Roll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        roll: Option<u8>,
    },
    PlaceSettlement {
        node: NodeId,
    },
    PlaceRoad {
        edge: (NodeId, NodeId),
        /// Spend a road-building grant instead of paying.
        #[serde(default)]
        free: bool,
    },
    UpgradeCity {
        node: NodeId,
    },
    BuildShip {
        edge: (NodeId, NodeId),
    },
    MoveShip {
        from: (NodeId, NodeId),
        to: (NodeId, NodeId),
    },
    MoveRobber {
        tile: TileIdx,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        victim: Option<Seat>,
    },
    MovePirate {
        tile: TileIdx,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        victim: Option<Seat>,
    },
    Discard {
        resources: BTreeMap<Resource, u8>,
    },
    ChooseGold {
        resources: BTreeMap<Resource, u8>,
    },
    TradeBank {
        give: Resource,
        take: Resource,
        #[serde(default = "default_qty")]
        qty: u8,
    },
    OfferTrade {
        give: BTreeMap<Resource, u8>,
        take: BTreeMap<Resource, u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<Seat>,
    },
    AcceptTrade {
        offer_id: u32,
    },
    DeclineTrade {
        offer_id: u32,
    },
    CancelTrade {
        offer_id: u32,
    },
    BuyDev,
    PlayKnight,
    PlayRoadBuilding,
    PlayYearOfPlenty {
        first: Resource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        second: Option<Resource>,
    },
    PlayMonopoly {
        resource: Resource,
    },
    EndTurn,
}

/// Convert a wire-side resource multiset into hand order.
pub fn resources_to_hand(map: &BTreeMap<Resource, u8>) -> Hand {
    let mut hand = [0u8; 5];
    for (r, n) in map {
        hand[r.index()] += n;
    }
    hand
}

/// Log entries emitted by the engine for every accepted command. These feed
/// the match log lines; the snapshot remains the source of truth for state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    Rolled {
        seat: Seat,
        roll: u8,
    },
    DiscardRequired {
        owed: BTreeMap<Seat, u8>,
    },
    Discarded {
        seat: Seat,
        count: u8,
    },
    RobberMovePending {
        seat: Seat,
    },
    RobberMoved {
        seat: Seat,
        tile: TileIdx,
        victim: Option<Seat>,
        stolen: bool,
    },
    PirateMoved {
        seat: Seat,
        tile: TileIdx,
        victim: Option<Seat>,
        stolen: bool,
    },
    GoldRequired {
        owed: BTreeMap<Seat, u8>,
    },
    GoldChosen {
        seat: Seat,
        count: u8,
    },
    SettlementPlaced {
        seat: Seat,
        node: NodeId,
    },
    InitialResources {
        seat: Seat,
        node: NodeId,
        granted: Hand,
    },
    RoadPlaced {
        seat: Seat,
        edge: (NodeId, NodeId),
    },
    ShipPlaced {
        seat: Seat,
        edge: (NodeId, NodeId),
    },
    ShipMoved {
        seat: Seat,
        from: (NodeId, NodeId),
        to: (NodeId, NodeId),
    },
    CityUpgraded {
        seat: Seat,
        node: NodeId,
    },
    BankTraded {
        seat: Seat,
        give: Resource,
        take: Resource,
        qty: u8,
        rate: u8,
    },
    TradeOffered {
        seat: Seat,
        offer_id: u32,
    },
    TradeAccepted {
        seat: Seat,
        offer_id: u32,
    },
    TradeDeclined {
        seat: Seat,
        offer_id: u32,
    },
    TradeCanceled {
        offer_id: u32,
    },
    DevBought {
        seat: Seat,
    },
    DevPlayed {
        seat: Seat,
        card: DevCard,
    },
    MonopolyTaken {
        seat: Seat,
        resource: Resource,
        taken: u8,
    },
    LongestRoadChanged {
        owner: Option<Seat>,
        length: u8,
    },
    LargestArmyChanged {
        owner: Option<Seat>,
        size: u8,
    },
    SetupAdvanced {
        seat: Option<Seat>,
        expect: Option<crate::state::SetupPiece>,
    },
    PhaseChanged {
        phase: crate::state::Phase,
    },
    TurnEnded {
        seat: Seat,
        next: Seat,
    },
    GameWon {
        seat: Seat,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_snake_case_type_tags() {
        let cmd = Command::PlaceSettlement { node: 12 };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "place_settlement");
        assert_eq!(json["node"], 12);

        let parsed: Command = serde_json::from_str(r#"{"type":"end_turn"}"#).unwrap();
        assert_eq!(parsed, Command::EndTurn);
    }

    #[test]
    fn trade_bank_qty_defaults_to_one() {
        let parsed: Command =
            serde_json::from_str(r#"{"type":"trade_bank","give":"wood","take":"ore"}"#).unwrap();
        assert_eq!(
            parsed,
            Command::TradeBank {
                give: Resource::Wood,
                take: Resource::Ore,
                qty: 1,
            }
        );
    }

    #[test]
    fn discard_resources_parse_as_map() {
        let parsed: Command = serde_json::from_str(
            r#"{"type":"discard","resources":{"wood":2,"ore":1}}"#,
        )
        .unwrap();
        if let Command::Discard { resources } = &parsed {
            assert_eq!(resources_to_hand(resources), [2, 0, 0, 0, 1]);
        } else {
            panic!("expected discard");
        }
    }
}
