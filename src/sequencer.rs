use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commands::{Command, GameEvent};
use crate::errors::RuleError;
use crate::state::{GameState, Seat};

/// Acknowledgment returned for every in-order (or duplicate) command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub cmd_id: String,
    pub seq: u64,
    /// Highest sequence number consumed for the seat, -1 before the first.
    pub last_seq_applied: i64,
    /// False when the engine rejected the command; the sequence number is
    /// consumed either way.
    pub applied: bool,
    pub duplicate: bool,
}

/// A command whose sequence number is not the next expected one. No state is
/// consumed; the client resynchronizes from `expected_seq`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("out of order: expected seq {expected_seq}")]
pub struct OutOfOrder {
    pub expected_seq: u64,
}

/// Result of an in-order submission: the ack, the engine events when the
/// command applied, and the rule rejection when it did not.
#[derive(Debug)]
pub struct Submission {
    pub ack: CommandAck,
    pub events: Vec<GameEvent>,
    pub rejection: Option<RuleError>,
}

#[derive(Debug, Default)]
struct SeatSequencer {
    next_seq: u64,
    /// Outcome (applied flag) per consumed command id, for duplicate acks.
    seen: HashMap<String, (u64, bool)>,
}

impl SeatSequencer {
    fn last_seq_applied(&self) -> i64 {
        self.next_seq as i64 - 1
    }
}

/// Per-match sequence discipline. Every mutation of the match's `GameState`
/// flows through `submit`, which makes it the single serialization point:
/// strictly increasing per-seat sequence numbers, duplicate suppression by
/// command id, at most one command applied at a time.
#[derive(Debug)]
pub struct CommandSequencer {
    seats: Vec<SeatSequencer>,
}

impl CommandSequencer {
    pub fn new(num_seats: u8) -> Self {
        Self {
            seats: (0..num_seats).map(|_| SeatSequencer::default()).collect(),
        }
    }

    pub fn last_seq_applied(&self, seat: Seat) -> i64 {
        self.seats
            .get(seat as usize)
            .map(|s| s.last_seq_applied())
            .unwrap_or(-1)
    }

    /// Run one command against the engine under sequence discipline.
    ///
    /// - A command id already consumed is acknowledged as a duplicate with
    ///   its original outcome and is NOT re-applied.
    /// - A sequence number other than `last + 1` is refused without
    ///   consuming anything.
    /// - Otherwise the sequence number is consumed and the engine decides;
    ///   an engine rejection still consumes the number (`applied: false`)
    ///   so the client does not have to re-number its queue.
    pub fn submit(
        &mut self,
        game: &mut GameState,
        seat: Seat,
        seq: u64,
        cmd_id: &str,
        cmd: &Command,
    ) -> Result<Submission, OutOfOrder> {
        let entry = &mut self.seats[seat as usize];

        if let Some(&(orig_seq, applied)) = entry.seen.get(cmd_id) {
            log::debug!("↩️  Duplicate cmd {} from seat {}", cmd_id, seat);
            return Ok(Submission {
                ack: CommandAck {
                    cmd_id: cmd_id.to_string(),
                    seq: orig_seq,
                    last_seq_applied: entry.last_seq_applied(),
                    applied,
                    duplicate: true,
                },
                events: Vec::new(),
                rejection: None,
            });
        }

        if seq != entry.next_seq {
            return Err(OutOfOrder {
                expected_seq: entry.next_seq,
            });
        }

        let (applied, events, rejection) = match game.apply(seat, cmd) {
            Ok(events) => (true, events, None),
            Err(err) => (false, Vec::new(), Some(err)),
        };

        let entry = &mut self.seats[seat as usize];
        entry.next_seq = seq + 1;
        entry.seen.insert(cmd_id.to_string(), (seq, applied));

        Ok(Submission {
            ack: CommandAck {
                cmd_id: cmd_id.to_string(),
                seq,
                last_seq_applied: entry.last_seq_applied(),
                applied,
                duplicate: false,
            },
            events,
            rejection,
        })
    }
}
