use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::Rng;

use crate::board::{edge_key, EdgeId, NodeId, Resource, Terrain, TileIdx};
use crate::commands::{resources_to_hand, Command, GameEvent};
use crate::errors::{RuleError, RuleResult};
use crate::legal::{
    best_trade_rate, can_place_road, can_place_settlement, can_place_ship, can_upgrade_city,
    pirate_victims, robber_victims,
};
use crate::state::{
    hand_add, hand_contains, hand_sub, hand_total, Building, DevCard, DevCardHolding, GameState,
    Hand, PendingAction, Phase, Seat, SetupPiece, TradeOffer, TradeOfferStatus, CITY_COST,
    DEVCARD_COST, ROAD_COST, SETTLEMENT_COST, SHIP_COST,
};

impl GameState {
    /// Apply one command for one seat. Either the whole command takes effect
    /// and the emitted events describe it, or a `RuleError` comes back and
    /// state is untouched.
    pub fn apply(&mut self, seat: Seat, cmd: &Command) -> RuleResult<Vec<GameEvent>> {
        if seat >= self.num_seats() {
            return Err(RuleError::invalid("unknown seat"));
        }
        if self.phase == Phase::Ended {
            return Err(RuleError::game_over());
        }

        // A pending action restricts the command set to whatever resolves it.
        match &self.pending {
            Some(PendingAction::Discard { .. }) => {
                if !matches!(cmd, Command::Discard { .. }) {
                    return Err(RuleError::pending("Resolve discard first"));
                }
            }
            Some(PendingAction::RobberMove { .. }) => {
                if !matches!(cmd, Command::MoveRobber { .. } | Command::MovePirate { .. }) {
                    return Err(RuleError::pending("Resolve robber move first"));
                }
            }
            Some(PendingAction::ChooseGold { .. }) => {
                if !matches!(cmd, Command::ChooseGold { .. }) {
                    return Err(RuleError::pending("Resolve gold choice first"));
                }
            }
            None => {}
        }

        match cmd {
            Command::Roll { roll } => self.cmd_roll(seat, *roll),
            Command::PlaceSettlement { node } => self.cmd_place_settlement(seat, *node),
            Command::PlaceRoad { edge, free } => {
                self.cmd_place_road(seat, edge_key(edge.0, edge.1), *free)
            }
            Command::UpgradeCity { node } => self.cmd_upgrade_city(seat, *node),
            Command::BuildShip { edge } => self.cmd_build_ship(seat, edge_key(edge.0, edge.1)),
            Command::MoveShip { from, to } => self.cmd_move_ship(
                seat,
                edge_key(from.0, from.1),
                edge_key(to.0, to.1),
            ),
            Command::MoveRobber { tile, victim } => self.cmd_move_robber(seat, *tile, *victim),
            Command::MovePirate { tile, victim } => self.cmd_move_pirate(seat, *tile, *victim),
            Command::Discard { resources } => self.cmd_discard(seat, resources),
            Command::ChooseGold { resources } => self.cmd_choose_gold(seat, resources),
            Command::TradeBank { give, take, qty } => self.cmd_trade_bank(seat, *give, *take, *qty),
            Command::OfferTrade { give, take, to } => self.cmd_offer_trade(seat, give, take, *to),
            Command::AcceptTrade { offer_id } => self.cmd_accept_trade(seat, *offer_id),
            Command::DeclineTrade { offer_id } => self.cmd_decline_trade(seat, *offer_id),
            Command::CancelTrade { offer_id } => self.cmd_cancel_trade(seat, *offer_id),
            Command::BuyDev => self.cmd_buy_dev(seat),
            Command::PlayKnight => self.cmd_play_knight(seat),
            Command::PlayRoadBuilding => self.cmd_play_road_building(seat),
            Command::PlayYearOfPlenty { first, second } => {
                self.cmd_play_year_of_plenty(seat, *first, *second)
            }
            Command::PlayMonopoly { resource } => self.cmd_play_monopoly(seat, *resource),
            Command::EndTurn => self.cmd_end_turn(seat),
        }
    }

    fn require_turn(&self, seat: Seat) -> RuleResult<()> {
        if self.phase != Phase::Main {
            return Err(RuleError::wrong_phase("Not in main phase"));
        }
        if self.turn != seat {
            return Err(RuleError::not_your_turn());
        }
        Ok(())
    }

    fn pay_to_bank(&mut self, seat: Seat, cost: Hand) {
        hand_sub(&mut self.player_mut(seat).hand, cost);
        hand_add(&mut self.bank, cost);
    }

    // -- rolling & distribution ------------------------------------------------

    fn cmd_roll(&mut self, seat: Seat, forced: Option<u8>) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        if self.rolled {
            return Err(RuleError::illegal("Already rolled this turn"));
        }
        let roll = match forced {
            Some(r) => {
                if !(2..=12).contains(&r) {
                    return Err(RuleError::invalid("roll must be 2..=12"));
                }
                r
            }
            None => self.rng.gen_range(1..=6) + self.rng.gen_range(1..=6),
        };

        self.rolled = true;
        self.last_roll = Some(roll);
        log::info!("🎲 Seat {} rolled {}", seat, roll);

        let mut events = vec![GameEvent::Rolled { seat, roll }];

        if roll == 7 {
            let mut owed = BTreeMap::new();
            for p in &self.players {
                let total = p.hand_total();
                if total > self.map.rules.discard_limit {
                    owed.insert(p.seat, total / 2);
                }
            }
            if owed.is_empty() {
                log::info!("🎲 Seven with no discards → robber move for seat {}", seat);
                self.pending = Some(PendingAction::RobberMove { seat });
                events.push(GameEvent::RobberMovePending { seat });
            } else {
                log::info!("🎲 Seven → discard owed by {:?}", owed.keys());
                events.push(GameEvent::DiscardRequired { owed: owed.clone() });
                self.pending = Some(PendingAction::Discard {
                    owed,
                    submitted: BTreeSet::new(),
                    roller: seat,
                });
            }
            return Ok(events);
        }

        let gold_owed = self.distribute_roll(roll);
        if !gold_owed.is_empty() {
            events.push(GameEvent::GoldRequired {
                owed: gold_owed.clone(),
            });
            self.pending = Some(PendingAction::ChooseGold { owed: gold_owed });
        }
        Ok(events)
    }

    /// Pay every building adjacent to a matching, unblocked tile. Gold tiles
    /// return owed picks instead of paying. Bank shortages cause partial
    /// payouts in scan order, no rollback.
    fn distribute_roll(&mut self, roll: u8) -> BTreeMap<Seat, u8> {
        let mut gold_owed: BTreeMap<Seat, u8> = BTreeMap::new();

        let mut nodes: Vec<(NodeId, Building)> = self
            .buildings
            .iter()
            .map(|(&n, &b)| (n, b))
            .collect();
        nodes.sort_by_key(|(n, _)| *n);

        for (node, building) in nodes {
            for &ti in self.map.graph.tiles_at_node(node) {
                let tile = &self.map.tiles[ti];
                if tile.number != Some(roll) {
                    continue;
                }
                if self.is_tile_robbed(ti) {
                    continue;
                }
                let amount = building.yield_count();
                if tile.terrain == Terrain::Gold {
                    if self.map.rules.enable_gold {
                        *gold_owed.entry(building.owner()).or_insert(0) += amount;
                    }
                    continue;
                }
                let Some(res) = tile.terrain.resource() else {
                    continue;
                };
                let idx = res.index();
                let give = amount.min(self.bank[idx]);
                if give > 0 {
                    self.bank[idx] -= give;
                    self.players[building.owner() as usize].hand[idx] += give;
                }
            }
        }

        gold_owed
    }

    // -- discard / robber / pirate / gold -------------------------------------

    fn cmd_discard(
        &mut self,
        seat: Seat,
        resources: &BTreeMap<Resource, u8>,
    ) -> RuleResult<Vec<GameEvent>> {
        let Some(PendingAction::Discard {
            owed, submitted, ..
        }) = &self.pending
        else {
            return Err(RuleError::illegal("No discard pending"));
        };
        let Some(&need) = owed.get(&seat) else {
            return Err(RuleError::illegal("No discard required for seat"));
        };
        if submitted.contains(&seat) {
            return Err(RuleError::illegal("Discard already submitted"));
        }
        let discard = resources_to_hand(resources);
        if hand_total(&discard) != need {
            return Err(RuleError::with_detail(
                crate::errors::RuleErrorKind::Invalid,
                "Discard count mismatch",
                serde_json::json!({ "need": need }),
            ));
        }
        if !hand_contains(&self.player(seat).hand, &discard) {
            return Err(RuleError::insufficient("Not enough cards to discard"));
        }

        self.pay_to_bank(seat, discard);
        log::info!("🗑️  Seat {} discarded {} cards", seat, need);

        let mut events = vec![GameEvent::Discarded { seat, count: need }];
        let Some(PendingAction::Discard {
            owed,
            submitted,
            roller,
        }) = &mut self.pending
        else {
            unreachable!();
        };
        submitted.insert(seat);
        if submitted.len() == owed.len() {
            let roller = *roller;
            self.pending = Some(PendingAction::RobberMove { seat: roller });
            events.push(GameEvent::RobberMovePending { seat: roller });
            log::info!("🎯 All discards in → robber move for seat {}", roller);
        }
        Ok(events)
    }

    fn steal_one(&mut self, thief: Seat, victim: Seat) -> bool {
        let total = self.player(victim).hand_total();
        if total == 0 {
            return false;
        }
        // Seeded and reproducible: pick a uniformly random card in hand.
        let pick = self.rng.gen_range(0..total);
        let mut cumulative = 0;
        for idx in 0..5 {
            cumulative += self.player(victim).hand[idx];
            if pick < cumulative {
                self.player_mut(victim).hand[idx] -= 1;
                self.player_mut(thief).hand[idx] += 1;
                return true;
            }
        }
        false
    }

    fn cmd_move_robber(
        &mut self,
        seat: Seat,
        tile: TileIdx,
        victim: Option<Seat>,
    ) -> RuleResult<Vec<GameEvent>> {
        match &self.pending {
            Some(PendingAction::RobberMove { seat: mover }) if *mover == seat => {}
            Some(PendingAction::RobberMove { .. }) => {
                return Err(RuleError::not_your_turn());
            }
            _ => return Err(RuleError::illegal("No robber move pending")),
        }
        if tile >= self.map.tiles.len() {
            return Err(RuleError::invalid("tile out of range"));
        }
        if self.map.tiles[tile].terrain == Terrain::Sea {
            return Err(RuleError::illegal("Robber cannot enter the sea"));
        }
        if self.is_tile_robbed(tile) {
            return Err(RuleError::illegal("Tile already blocked"));
        }

        let victims = robber_victims(self, tile, seat);
        let victim = match victim {
            Some(v) if victims.contains(&v) => Some(v),
            Some(_) => return Err(RuleError::illegal("Victim not adjacent to tile")),
            None => victims.first().copied(),
        };

        // The robber that has been stationary longest moves.
        self.robbers.remove(0);
        self.robbers.push(tile);

        let stolen = match victim {
            Some(v) => self.steal_one(seat, v),
            None => false,
        };
        self.pending = None;
        log::info!("🦹 Seat {} moved robber to tile {}", seat, tile);
        Ok(vec![GameEvent::RobberMoved {
            seat,
            tile,
            victim,
            stolen,
        }])
    }

    fn cmd_move_pirate(
        &mut self,
        seat: Seat,
        tile: TileIdx,
        victim: Option<Seat>,
    ) -> RuleResult<Vec<GameEvent>> {
        if !self.map.rules.enable_pirate {
            return Err(RuleError::illegal("Pirate not enabled"));
        }
        match &self.pending {
            Some(PendingAction::RobberMove { seat: mover }) if *mover == seat => {}
            Some(PendingAction::RobberMove { .. }) => {
                return Err(RuleError::not_your_turn());
            }
            _ => return Err(RuleError::illegal("No robber move pending")),
        }
        if tile >= self.map.tiles.len() {
            return Err(RuleError::invalid("tile out of range"));
        }
        if self.map.tiles[tile].terrain != Terrain::Sea {
            return Err(RuleError::illegal("Pirate must stay at sea"));
        }
        if self.pirate_tile == Some(tile) {
            return Err(RuleError::illegal("Pirate already there"));
        }

        let victims = pirate_victims(self, tile, seat);
        let victim = match victim {
            Some(v) if victims.contains(&v) => Some(v),
            Some(_) => return Err(RuleError::illegal("Victim has no ship at tile")),
            None => victims.first().copied(),
        };

        self.pirate_tile = Some(tile);
        let stolen = match victim {
            Some(v) => self.steal_one(seat, v),
            None => false,
        };
        self.pending = None;
        log::info!("🏴‍☠️ Seat {} moved pirate to tile {}", seat, tile);
        Ok(vec![GameEvent::PirateMoved {
            seat,
            tile,
            victim,
            stolen,
        }])
    }

    fn cmd_choose_gold(
        &mut self,
        seat: Seat,
        resources: &BTreeMap<Resource, u8>,
    ) -> RuleResult<Vec<GameEvent>> {
        let Some(PendingAction::ChooseGold { owed }) = &self.pending else {
            return Err(RuleError::illegal("No gold choice pending"));
        };
        let Some(&need) = owed.get(&seat) else {
            return Err(RuleError::illegal("No gold owed to seat"));
        };
        let picked = resources_to_hand(resources);
        if hand_total(&picked) != need {
            return Err(RuleError::with_detail(
                crate::errors::RuleErrorKind::Invalid,
                "Gold pick count mismatch",
                serde_json::json!({ "need": need }),
            ));
        }
        if !hand_contains(&self.bank, &picked) {
            return Err(RuleError::insufficient("Bank lacks requested resources"));
        }

        hand_sub(&mut self.bank, picked);
        hand_add(&mut self.player_mut(seat).hand, picked);

        let Some(PendingAction::ChooseGold { owed }) = &mut self.pending else {
            unreachable!();
        };
        owed.remove(&seat);
        if owed.is_empty() {
            self.pending = None;
        }
        Ok(vec![GameEvent::GoldChosen { seat, count: need }])
    }

    // -- building -------------------------------------------------------------

    fn cmd_place_settlement(&mut self, seat: Seat, node: NodeId) -> RuleResult<Vec<GameEvent>> {
        if self.phase == Phase::Setup {
            return self.setup_place_settlement(seat, node);
        }
        self.require_turn(seat)?;
        if self.owned_settlements(seat) >= self.map.rules.limits.settlements as usize {
            return Err(RuleError::illegal("Settlement limit reached"));
        }
        if !can_place_settlement(self, seat, node, true) {
            return Err(RuleError::illegal("Settlement not allowed there"));
        }
        if !hand_contains(&self.player(seat).hand, &SETTLEMENT_COST) {
            return Err(RuleError::insufficient("Not enough resources for settlement"));
        }

        self.pay_to_bank(seat, SETTLEMENT_COST);
        self.buildings.insert(node, Building::Settlement(seat));
        self.player_mut(seat).vp += 1;

        let mut events = vec![GameEvent::SettlementPlaced { seat, node }];
        // A settlement can sever a rival's longest road through this node.
        self.update_longest_road(&mut events);
        self.check_win(&mut events);
        Ok(events)
    }

    fn setup_place_settlement(&mut self, seat: Seat, node: NodeId) -> RuleResult<Vec<GameEvent>> {
        if self.setup_seat() != Some(seat) {
            return Err(RuleError::not_your_turn());
        }
        if self.setup.expect != SetupPiece::Settlement {
            return Err(RuleError::illegal("Expected a road placement"));
        }
        if !can_place_settlement(self, seat, node, false) {
            return Err(RuleError::illegal("Settlement not allowed there"));
        }

        let prior = self.owned_settlements(seat);
        self.buildings.insert(node, Building::Settlement(seat));
        self.player_mut(seat).vp += 1;
        self.setup.expect = SetupPiece::Road;
        self.setup.anchor = Some(node);

        let mut events = vec![GameEvent::SettlementPlaced { seat, node }];

        // Second settlement pays out its surrounding tiles.
        if prior + 1 == 2 {
            let mut granted: Hand = [0; 5];
            for &ti in self.map.graph.tiles_at_node(node) {
                let Some(res) = self.map.tiles[ti].terrain.resource() else {
                    continue;
                };
                let idx = res.index();
                if self.bank[idx] > 0 {
                    self.bank[idx] -= 1;
                    granted[idx] += 1;
                }
            }
            hand_add(&mut self.player_mut(seat).hand, granted);
            log::info!("🎁 Seat {} starting resources: {:?}", seat, granted);
            events.push(GameEvent::InitialResources {
                seat,
                node,
                granted,
            });
        }

        events.push(GameEvent::SetupAdvanced {
            seat: Some(seat),
            expect: Some(SetupPiece::Road),
        });
        Ok(events)
    }

    fn cmd_place_road(&mut self, seat: Seat, e: EdgeId, free: bool) -> RuleResult<Vec<GameEvent>> {
        if self.phase == Phase::Setup {
            return self.setup_place_road(seat, e);
        }
        self.require_turn(seat)?;
        if self.owned_roads(seat) >= self.map.rules.limits.roads as usize {
            return Err(RuleError::illegal("Road limit reached"));
        }
        if !can_place_road(self, seat, e, None) {
            return Err(RuleError::illegal("Road not allowed there"));
        }
        if free {
            if self.free_roads == 0 {
                return Err(RuleError::illegal("No free roads available"));
            }
        } else if !hand_contains(&self.player(seat).hand, &ROAD_COST) {
            return Err(RuleError::insufficient("Not enough resources for road"));
        }

        if free {
            self.free_roads -= 1;
        } else {
            self.pay_to_bank(seat, ROAD_COST);
        }
        self.roads.insert(e, seat);

        let mut events = vec![GameEvent::RoadPlaced { seat, edge: e }];
        self.update_longest_road(&mut events);
        self.check_win(&mut events);
        Ok(events)
    }

    fn setup_place_road(&mut self, seat: Seat, e: EdgeId) -> RuleResult<Vec<GameEvent>> {
        if self.setup_seat() != Some(seat) {
            return Err(RuleError::not_your_turn());
        }
        if self.setup.expect != SetupPiece::Road {
            return Err(RuleError::illegal("Expected a settlement placement"));
        }
        if !can_place_road(self, seat, e, self.setup.anchor) {
            return Err(RuleError::illegal("Road not allowed there"));
        }

        self.roads.insert(e, seat);
        self.setup.expect = SetupPiece::Settlement;
        self.setup.anchor = None;
        self.setup.idx += 1;

        let mut events = vec![GameEvent::RoadPlaced { seat, edge: e }];
        if self.setup.idx >= self.setup.order.len() {
            self.phase = Phase::Main;
            self.turn = 0;
            log::info!("🎯 Setup complete → main phase, seat 0 to act");
            events.push(GameEvent::PhaseChanged { phase: Phase::Main });
        } else {
            events.push(GameEvent::SetupAdvanced {
                seat: self.setup_seat(),
                expect: Some(SetupPiece::Settlement),
            });
        }
        Ok(events)
    }

    fn cmd_upgrade_city(&mut self, seat: Seat, node: NodeId) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        if self.owned_cities(seat) >= self.map.rules.limits.cities as usize {
            return Err(RuleError::illegal("City limit reached"));
        }
        if !can_upgrade_city(self, seat, node) {
            return Err(RuleError::illegal("City upgrade not allowed there"));
        }
        if !hand_contains(&self.player(seat).hand, &CITY_COST) {
            return Err(RuleError::insufficient("Not enough resources for city"));
        }

        self.pay_to_bank(seat, CITY_COST);
        self.buildings.insert(node, Building::City(seat));
        self.player_mut(seat).vp += 1;

        let mut events = vec![GameEvent::CityUpgraded { seat, node }];
        self.check_win(&mut events);
        Ok(events)
    }

    fn cmd_build_ship(&mut self, seat: Seat, e: EdgeId) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        if !self.map.rules.enable_seafarers {
            return Err(RuleError::illegal("Ships not enabled on this map"));
        }
        if self.owned_ships(seat) >= self.map.rules.limits.ships as usize {
            return Err(RuleError::illegal("Ship limit reached"));
        }
        if !can_place_ship(self, seat, e) {
            return Err(RuleError::illegal("Ship not allowed there"));
        }
        if !hand_contains(&self.player(seat).hand, &SHIP_COST) {
            return Err(RuleError::insufficient("Not enough resources for ship"));
        }

        self.pay_to_bank(seat, SHIP_COST);
        self.ships.insert(e, seat);

        let mut events = vec![GameEvent::ShipPlaced { seat, edge: e }];
        self.update_longest_road(&mut events);
        self.check_win(&mut events);
        Ok(events)
    }

    fn cmd_move_ship(&mut self, seat: Seat, from: EdgeId, to: EdgeId) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        if !self.map.rules.enable_move_ship {
            return Err(RuleError::illegal("Ship movement not enabled"));
        }
        if self.moved_ship_this_turn {
            return Err(RuleError::illegal("Already moved a ship this turn"));
        }
        if self.ships.get(&from) != Some(&seat) {
            return Err(RuleError::illegal("No own ship on that edge"));
        }
        if from == to {
            return Err(RuleError::illegal("Ship must move to a new edge"));
        }

        // Legality of the target is judged with the origin ship lifted.
        let lifted = self.ships.remove(&from);
        let ok = can_place_ship(self, seat, to);
        if !ok {
            if let Some(owner) = lifted {
                self.ships.insert(from, owner);
            }
            return Err(RuleError::illegal("Ship not allowed there"));
        }

        self.ships.insert(to, seat);
        self.moved_ship_this_turn = true;

        let mut events = vec![GameEvent::ShipMoved { seat, from, to }];
        self.update_longest_road(&mut events);
        self.check_win(&mut events);
        Ok(events)
    }

    // -- trading --------------------------------------------------------------

    fn cmd_trade_bank(
        &mut self,
        seat: Seat,
        give: Resource,
        take: Resource,
        qty: u8,
    ) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        if give == take {
            return Err(RuleError::invalid("Give and take must differ"));
        }
        if qty == 0 || qty > crate::state::BANK_STOCK_PER_RESOURCE {
            return Err(RuleError::invalid("Quantity out of range"));
        }
        let rate = best_trade_rate(self, seat, give);
        let give_qty = rate * qty;
        if self.player(seat).hand[give.index()] < give_qty {
            return Err(RuleError::insufficient("Not enough resources to trade"));
        }
        if self.bank[take.index()] < qty {
            return Err(RuleError::insufficient("Bank is out of that resource"));
        }

        self.player_mut(seat).hand[give.index()] -= give_qty;
        self.bank[give.index()] += give_qty;
        self.bank[take.index()] -= qty;
        self.player_mut(seat).hand[take.index()] += qty;

        Ok(vec![GameEvent::BankTraded {
            seat,
            give,
            take,
            qty,
            rate,
        }])
    }

    fn cmd_offer_trade(
        &mut self,
        seat: Seat,
        give: &BTreeMap<Resource, u8>,
        take: &BTreeMap<Resource, u8>,
        to: Option<Seat>,
    ) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        let give = resources_to_hand(give);
        let take = resources_to_hand(take);
        if hand_total(&give) == 0 || hand_total(&take) == 0 {
            return Err(RuleError::invalid("Offer must move resources both ways"));
        }
        if !hand_contains(&self.player(seat).hand, &give) {
            return Err(RuleError::insufficient("Not enough resources for offer"));
        }
        if let Some(target) = to {
            if target >= self.num_seats() {
                return Err(RuleError::invalid("Unknown target seat"));
            }
            if target == seat {
                return Err(RuleError::invalid("Cannot trade with yourself"));
            }
        }

        let offer_id = self.next_offer_id;
        self.next_offer_id += 1;
        self.trade_offers.push(TradeOffer {
            offer_id,
            from: seat,
            to,
            give,
            take,
            status: TradeOfferStatus::Active,
        });
        Ok(vec![GameEvent::TradeOffered { seat, offer_id }])
    }

    fn find_offer(&self, offer_id: u32) -> RuleResult<usize> {
        self.trade_offers
            .iter()
            .position(|o| o.offer_id == offer_id)
            .ok_or_else(|| RuleError::invalid("Offer not found"))
    }

    fn cmd_accept_trade(&mut self, seat: Seat, offer_id: u32) -> RuleResult<Vec<GameEvent>> {
        let idx = self.find_offer(offer_id)?;
        let offer = self.trade_offers[idx].clone();
        if offer.status != TradeOfferStatus::Active {
            return Err(RuleError::illegal("Offer no longer active"));
        }
        if offer.from == seat {
            return Err(RuleError::illegal("Cannot accept own offer"));
        }
        if let Some(target) = offer.to {
            if target != seat {
                return Err(RuleError::illegal("Offer addressed to another seat"));
            }
        }
        // Offers expire when the creator's turn ends.
        if self.phase != Phase::Main || self.turn != offer.from {
            return Err(RuleError::illegal("Offer expired"));
        }
        if !hand_contains(&self.player(offer.from).hand, &offer.give) {
            return Err(RuleError::insufficient("Offerer lacks resources"));
        }
        if !hand_contains(&self.player(seat).hand, &offer.take) {
            return Err(RuleError::insufficient("Not enough resources to accept"));
        }

        hand_sub(&mut self.player_mut(offer.from).hand, offer.give);
        hand_add(&mut self.player_mut(seat).hand, offer.give);
        hand_sub(&mut self.player_mut(seat).hand, offer.take);
        hand_add(&mut self.player_mut(offer.from).hand, offer.take);
        self.trade_offers[idx].status = TradeOfferStatus::Accepted;
        Ok(vec![GameEvent::TradeAccepted { seat, offer_id }])
    }

    fn cmd_decline_trade(&mut self, seat: Seat, offer_id: u32) -> RuleResult<Vec<GameEvent>> {
        let idx = self.find_offer(offer_id)?;
        let offer = &self.trade_offers[idx];
        if offer.status != TradeOfferStatus::Active {
            return Err(RuleError::illegal("Offer no longer active"));
        }
        if offer.from == seat {
            return Err(RuleError::illegal("Use cancel for own offers"));
        }
        if let Some(target) = offer.to {
            if target != seat {
                return Err(RuleError::illegal("Offer addressed to another seat"));
            }
        }
        self.trade_offers[idx].status = TradeOfferStatus::Declined;
        Ok(vec![GameEvent::TradeDeclined { seat, offer_id }])
    }

    fn cmd_cancel_trade(&mut self, seat: Seat, offer_id: u32) -> RuleResult<Vec<GameEvent>> {
        let idx = self.find_offer(offer_id)?;
        let offer = &self.trade_offers[idx];
        if offer.status != TradeOfferStatus::Active {
            return Err(RuleError::illegal("Offer no longer active"));
        }
        if offer.from != seat {
            return Err(RuleError::illegal("Only the creator may cancel"));
        }
        self.trade_offers[idx].status = TradeOfferStatus::Canceled;
        Ok(vec![GameEvent::TradeCanceled { offer_id }])
    }

    // -- development cards ----------------------------------------------------

    fn cmd_buy_dev(&mut self, seat: Seat) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        if self.dev_deck.is_empty() {
            return Err(RuleError::illegal("Dev deck is empty"));
        }
        if !hand_contains(&self.player(seat).hand, &DEVCARD_COST) {
            return Err(RuleError::insufficient("Not enough resources for dev card"));
        }

        self.pay_to_bank(seat, DEVCARD_COST);
        let card = self.dev_deck.pop().expect("checked non-empty");
        self.player_mut(seat).dev_cards.push(DevCardHolding {
            card,
            bought_this_turn: true,
        });

        let mut events = vec![GameEvent::DevBought { seat }];
        if card == DevCard::VictoryPoint {
            self.player_mut(seat).vp += 1;
            self.check_win(&mut events);
        }
        Ok(events)
    }

    /// Remove one playable (not bought this turn) card of the given kind.
    fn take_playable_dev(&mut self, seat: Seat, card: DevCard) -> RuleResult<()> {
        if self.played_dev_this_turn {
            return Err(RuleError::illegal("Already played a dev card this turn"));
        }
        let player = self.player_mut(seat);
        let Some(pos) = player
            .dev_cards
            .iter()
            .position(|c| c.card == card && !c.bought_this_turn)
        else {
            return Err(RuleError::illegal("No playable card of that kind"));
        };
        player.dev_cards.remove(pos);
        self.played_dev_this_turn = true;
        Ok(())
    }

    fn cmd_play_knight(&mut self, seat: Seat) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        self.take_playable_dev(seat, DevCard::Knight)?;
        self.player_mut(seat).knights_played += 1;

        let mut events = vec![GameEvent::DevPlayed {
            seat,
            card: DevCard::Knight,
        }];
        self.update_largest_army(&mut events);
        self.check_win(&mut events);
        if self.phase != Phase::Ended {
            self.pending = Some(PendingAction::RobberMove { seat });
            events.push(GameEvent::RobberMovePending { seat });
        }
        Ok(events)
    }

    fn cmd_play_road_building(&mut self, seat: Seat) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        self.take_playable_dev(seat, DevCard::RoadBuilding)?;
        self.free_roads += 2;
        Ok(vec![GameEvent::DevPlayed {
            seat,
            card: DevCard::RoadBuilding,
        }])
    }

    fn cmd_play_year_of_plenty(
        &mut self,
        seat: Seat,
        first: Resource,
        second: Option<Resource>,
    ) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        let mut wanted: Hand = [0; 5];
        wanted[first.index()] += 1;
        if let Some(second) = second {
            wanted[second.index()] += 1;
        }
        if !hand_contains(&self.bank, &wanted) {
            return Err(RuleError::insufficient("Bank lacks requested resources"));
        }
        self.take_playable_dev(seat, DevCard::YearOfPlenty)?;
        hand_sub(&mut self.bank, wanted);
        hand_add(&mut self.player_mut(seat).hand, wanted);
        Ok(vec![GameEvent::DevPlayed {
            seat,
            card: DevCard::YearOfPlenty,
        }])
    }

    fn cmd_play_monopoly(&mut self, seat: Seat, resource: Resource) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;
        self.take_playable_dev(seat, DevCard::Monopoly)?;

        let idx = resource.index();
        let mut taken = 0;
        for victim in 0..self.num_seats() {
            if victim == seat {
                continue;
            }
            let count = self.player(victim).hand[idx];
            if count > 0 {
                self.player_mut(victim).hand[idx] = 0;
                taken += count;
            }
        }
        self.player_mut(seat).hand[idx] += taken;
        Ok(vec![
            GameEvent::DevPlayed {
                seat,
                card: DevCard::Monopoly,
            },
            GameEvent::MonopolyTaken {
                seat,
                resource,
                taken,
            },
        ])
    }

    // -- turn end -------------------------------------------------------------

    fn cmd_end_turn(&mut self, seat: Seat) -> RuleResult<Vec<GameEvent>> {
        self.require_turn(seat)?;

        let mut events = Vec::new();
        for offer in &mut self.trade_offers {
            if offer.status == TradeOfferStatus::Active {
                offer.status = TradeOfferStatus::Canceled;
                events.push(GameEvent::TradeCanceled {
                    offer_id: offer.offer_id,
                });
            }
        }
        for card in &mut self.player_mut(seat).dev_cards {
            card.bought_this_turn = false;
        }
        self.played_dev_this_turn = false;
        self.free_roads = 0;
        self.moved_ship_this_turn = false;
        self.rolled = false;
        self.last_roll = None;
        self.turn = (self.turn + 1) % self.num_seats();

        events.push(GameEvent::TurnEnded {
            seat,
            next: self.turn,
        });
        Ok(events)
    }

    // -- achievements & win ---------------------------------------------------

    /// Longest simple path through the seat's roads and ships, broken by
    /// rival buildings (a path may end at one but not pass through).
    pub fn longest_route_length(&self, seat: Seat) -> u8 {
        let edges: Vec<EdgeId> = self
            .roads
            .iter()
            .chain(self.ships.iter())
            .filter(|(_, &owner)| owner == seat)
            .map(|(&e, _)| e)
            .collect();
        if edges.is_empty() {
            return 0;
        }

        let mut adjacency: BTreeMap<NodeId, Vec<EdgeId>> = BTreeMap::new();
        for &e in &edges {
            adjacency.entry(e.0).or_default().push(e);
            adjacency.entry(e.1).or_default().push(e);
        }

        let blocked = |node: NodeId| -> bool {
            matches!(self.buildings.get(&node), Some(b) if b.owner() != seat)
        };

        fn dfs(
            node: NodeId,
            came_from: Option<EdgeId>,
            used: &mut HashSet<EdgeId>,
            adjacency: &BTreeMap<NodeId, Vec<EdgeId>>,
            blocked: &dyn Fn(NodeId) -> bool,
        ) -> u8 {
            if came_from.is_some() && blocked(node) {
                return 0;
            }
            let mut best = 0;
            if let Some(edges) = adjacency.get(&node) {
                for &e in edges {
                    if used.contains(&e) {
                        continue;
                    }
                    let next = if e.0 == node { e.1 } else { e.0 };
                    used.insert(e);
                    best = best.max(1 + dfs(next, Some(e), used, adjacency, blocked));
                    used.remove(&e);
                }
            }
            best
        }

        let mut best = 0;
        for &start in adjacency.keys() {
            let mut used = HashSet::new();
            best = best.max(dfs(start, None, &mut used, &adjacency, &blocked));
        }
        best
    }

    /// Recompute the longest-road holder from scratch. Ties keep the current
    /// holder; a transfer needs a strictly longer qualifying route.
    fn update_longest_road(&mut self, events: &mut Vec<GameEvent>) {
        let lengths: Vec<u8> = (0..self.num_seats())
            .map(|s| self.longest_route_length(s))
            .collect();

        let prev_owner = self.achievements.longest_road_owner;
        let prev_len = prev_owner.map(|s| lengths[s as usize]).unwrap_or(0);

        let (new_owner, new_len) = if let Some(holder) = prev_owner {
            if prev_len >= 5 {
                // A rival must strictly beat the holder to take the title.
                let challenger = (0..self.num_seats())
                    .filter(|&s| s != holder && lengths[s as usize] > prev_len)
                    .max_by_key(|&s| (lengths[s as usize], std::cmp::Reverse(s)));
                match challenger {
                    Some(s) => (Some(s), lengths[s as usize]),
                    None => (Some(holder), prev_len),
                }
            } else {
                // Holder's route was cut below the threshold.
                let max_len = *lengths.iter().max().unwrap_or(&0);
                if max_len >= 5 {
                    let leaders: Vec<Seat> = (0..self.num_seats())
                        .filter(|&s| lengths[s as usize] == max_len)
                        .collect();
                    if leaders.len() == 1 {
                        (Some(leaders[0]), max_len)
                    } else {
                        (None, 0)
                    }
                } else {
                    (None, 0)
                }
            }
        } else {
            let max_len = *lengths.iter().max().unwrap_or(&0);
            if max_len >= 5 {
                let leaders: Vec<Seat> = (0..self.num_seats())
                    .filter(|&s| lengths[s as usize] == max_len)
                    .collect();
                if leaders.len() == 1 {
                    (Some(leaders[0]), max_len)
                } else {
                    (None, 0)
                }
            } else {
                (None, 0)
            }
        };

        if new_owner == prev_owner {
            self.achievements.longest_road_len = new_len;
            return;
        }

        if let Some(prev) = prev_owner {
            self.player_mut(prev).vp -= 2;
        }
        if let Some(new) = new_owner {
            self.player_mut(new).vp += 2;
        }
        self.achievements.longest_road_owner = new_owner;
        self.achievements.longest_road_len = new_len;
        log::info!(
            "🛣️  Longest road: {:?} (length {})",
            new_owner,
            new_len
        );
        events.push(GameEvent::LongestRoadChanged {
            owner: new_owner,
            length: new_len,
        });
    }

    /// Three or more knights, strictly more than every rival; ties keep the
    /// current holder.
    fn update_largest_army(&mut self, events: &mut Vec<GameEvent>) {
        let counts: Vec<u8> = self.players.iter().map(|p| p.knights_played).collect();
        let prev_owner = self.achievements.largest_army_owner;
        let prev_count = prev_owner.map(|s| counts[s as usize]).unwrap_or(0);

        let max_count = *counts.iter().max().unwrap_or(&0);
        let new_owner = if let Some(holder) = prev_owner {
            if max_count > prev_count {
                (0..self.num_seats()).find(|&s| counts[s as usize] == max_count)
            } else {
                Some(holder)
            }
        } else if max_count >= 3 {
            (0..self.num_seats()).find(|&s| counts[s as usize] == max_count)
        } else {
            None
        };

        self.achievements.largest_army_size =
            new_owner.map(|s| counts[s as usize]).unwrap_or(0);
        if new_owner == prev_owner {
            return;
        }

        if let Some(prev) = prev_owner {
            self.player_mut(prev).vp -= 2;
        }
        if let Some(new) = new_owner {
            self.player_mut(new).vp += 2;
        }
        self.achievements.largest_army_owner = new_owner;
        log::info!(
            "⚔️  Largest army: {:?} ({} knights)",
            new_owner,
            self.achievements.largest_army_size
        );
        events.push(GameEvent::LargestArmyChanged {
            owner: new_owner,
            size: self.achievements.largest_army_size,
        });
    }

    fn check_win(&mut self, events: &mut Vec<GameEvent>) {
        if self.winner.is_some() {
            return;
        }
        let target = self.map.rules.target_vp;
        for p in &self.players {
            if p.vp >= target {
                self.winner = Some(p.seat);
                self.phase = Phase::Ended;
                log::info!("🏆 Seat {} wins with {} VP", p.seat, p.vp);
                events.push(GameEvent::GameWon { seat: p.seat });
                return;
            }
        }
    }
}
