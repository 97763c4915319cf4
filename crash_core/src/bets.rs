//! A single bet panel driven purely by engine snapshots.
//!
//! The panel never touches engine state: bets are placed and cashed out
//! against whatever snapshot the caller last observed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{Phase, Snapshot};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BetError {
    #[error("bets are only accepted while waiting (round is {0:?})")]
    BettingClosed(Phase),
    #[error("a bet is already placed for round {0}")]
    AlreadyPlaced(u64),
    #[error("stake must be a positive amount, got {0}")]
    InvalidStake(f64),
    #[error("auto cash-out target must be above 1.00, got {0}")]
    InvalidTarget(f64),
    #[error("no bet placed for round {0}")]
    NoBet(u64),
    #[error("cash out is only possible while flying (round is {0:?})")]
    NotFlying(Phase),
    #[error("bet for round {0} is already settled")]
    AlreadySettled(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BetStatus {
    Pending,
    CashedOut { multiplier: f64, payout: f64 },
    Lost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub round_id: u64,
    pub stake: f64,
    pub status: BetStatus,
}

/// What `observe` did on the panel's behalf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PanelEvent {
    Placed { round_id: u64, stake: f64 },
    CashedOut { multiplier: f64, payout: f64 },
    Lost { stake: f64 },
}

#[derive(Debug, Clone, Default)]
pub struct BetPanel {
    bet: Option<Bet>,
    auto_bet: Option<f64>,
    auto_cash_out: Option<f64>,
}

impl BetPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bet(&self) -> Option<&Bet> {
        self.bet.as_ref()
    }

    /// Re-place `stake` at the start of every round, or stop with `None`.
    pub fn set_auto_bet(&mut self, stake: Option<f64>) -> Result<(), BetError> {
        if let Some(stake) = stake {
            validate_stake(stake)?;
        }
        self.auto_bet = stake;
        Ok(())
    }

    pub fn set_auto_cash_out(&mut self, target: Option<f64>) -> Result<(), BetError> {
        if let Some(t) = target {
            if !t.is_finite() || t <= 1.0 {
                return Err(BetError::InvalidTarget(t));
            }
        }
        self.auto_cash_out = target;
        Ok(())
    }

    pub fn place(&mut self, snapshot: &Snapshot, stake: f64) -> Result<&Bet, BetError> {
        validate_stake(stake)?;
        if snapshot.phase != Phase::Waiting {
            return Err(BetError::BettingClosed(snapshot.phase));
        }
        if self.bet.as_ref().is_some_and(|b| b.round_id == snapshot.round_id) {
            return Err(BetError::AlreadyPlaced(snapshot.round_id));
        }
        let bet = self.bet.insert(Bet {
            round_id: snapshot.round_id,
            stake,
            status: BetStatus::Pending,
        });
        Ok(&*bet)
    }

    /// Settle the bet at the snapshot's multiplier. Returns the payout.
    pub fn cash_out(&mut self, snapshot: &Snapshot) -> Result<f64, BetError> {
        let bet = self
            .bet
            .as_mut()
            .filter(|b| b.round_id == snapshot.round_id)
            .ok_or(BetError::NoBet(snapshot.round_id))?;
        if snapshot.phase != Phase::Flying {
            return Err(BetError::NotFlying(snapshot.phase));
        }
        if bet.status != BetStatus::Pending {
            return Err(BetError::AlreadySettled(bet.round_id));
        }
        let payout = bet.stake * snapshot.multiplier;
        bet.status = BetStatus::CashedOut {
            multiplier: snapshot.multiplier,
            payout,
        };
        Ok(payout)
    }

    /// Feed the latest snapshot: clears last round's bet, re-arms auto-bet,
    /// fires auto cash-out and marks busted bets as lost.
    pub fn observe(&mut self, snapshot: &Snapshot) -> Option<PanelEvent> {
        match snapshot.phase {
            Phase::Waiting => {
                if self.bet.as_ref().is_some_and(|b| b.round_id != snapshot.round_id) {
                    self.bet = None;
                }
                let stake = self.auto_bet?;
                if self.bet.is_some() {
                    return None;
                }
                self.place(snapshot, stake).ok().map(|b| PanelEvent::Placed {
                    round_id: b.round_id,
                    stake: b.stake,
                })
            }
            Phase::Flying => {
                let target = self.auto_cash_out?;
                if snapshot.multiplier < target || !self.is_pending(snapshot.round_id) {
                    return None;
                }
                self.cash_out(snapshot).ok().map(|payout| PanelEvent::CashedOut {
                    multiplier: snapshot.multiplier,
                    payout,
                })
            }
            Phase::Crashed => {
                let bet = self.bet.as_mut().filter(|b| b.round_id == snapshot.round_id)?;
                if bet.status != BetStatus::Pending {
                    return None;
                }
                bet.status = BetStatus::Lost;
                Some(PanelEvent::Lost { stake: bet.stake })
            }
        }
    }

    fn is_pending(&self, round_id: u64) -> bool {
        self.bet
            .as_ref()
            .is_some_and(|b| b.round_id == round_id && b.status == BetStatus::Pending)
    }
}

fn validate_stake(stake: f64) -> Result<(), BetError> {
    if stake.is_finite() && stake > 0.0 {
        Ok(())
    } else {
        Err(BetError::InvalidStake(stake))
    }
}
