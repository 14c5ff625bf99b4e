//! Domain model shared by the aggregator, resolver and service.

use alloy::primitives::utils::{
    self,
    UnitsError,
};
use lottery_abi::{
    Address,
    U256,
    lottery_manager::RoundRecord,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    str::FromStr,
};
use thiserror::Error;

pub const NUMBERS_PER_TICKET: usize = 6;
pub const TOKEN_DECIMALS: u8 = 18;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketType {
    Full = 0,
    Half = 1,
    Quarter = 2,
}

impl TicketType {
    pub const ALL: [TicketType; 3] =
        [TicketType::Full, TicketType::Half, TicketType::Quarter];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TicketType::Full),
            1 => Some(TicketType::Half),
            2 => Some(TicketType::Quarter),
            _ => None,
        }
    }

    /// Name used by the metadata `Edition` trait.
    pub fn label(self) -> &'static str {
        match self {
            TicketType::Full => "Full",
            TicketType::Half => "Half",
            TicketType::Quarter => "Quarter",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TicketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "full" => Ok(TicketType::Full),
            "1" | "half" => Ok(TicketType::Half),
            "2" | "quarter" => Ok(TicketType::Quarter),
            other => Err(format!("unknown ticket type `{other}`")),
        }
    }
}

/// Token amounts (18 decimals) charged per ticket tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPrices {
    pub full: U256,
    pub half: U256,
    pub quarter: U256,
}

impl Default for TicketPrices {
    fn default() -> Self {
        Self {
            full: U256::from(100),
            half: U256::from(50),
            quarter: U256::from(25),
        }
    }
}

impl TicketPrices {
    pub fn price_of(&self, ticket_type: TicketType) -> U256 {
        match ticket_type {
            TicketType::Full => self.full,
            TicketType::Half => self.half,
            TicketType::Quarter => self.quarter,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundStatus {
    Active,
    ReadyForDraw,
    Closed,
    Completed,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RoundStatus::Active => "Active",
            RoundStatus::ReadyForDraw => "Ready for draw",
            RoundStatus::Closed => "Closed",
            RoundStatus::Completed => "Completed",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RoundFilter {
    #[default]
    All,
    Active,
    Closed,
}

impl FromStr for RoundFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(RoundFilter::All),
            "active" => Ok(RoundFilter::Active),
            "closed" => Ok(RoundFilter::Closed),
            other => Err(format!("unknown round filter `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: u64,
    pub ticket_price: U256,
    pub max_tickets: u64,
    pub total_sold: u64,
    pub is_active: bool,
    pub draw_time: u64,
    pub draw_completed: bool,
    pub total_pool: U256,
    pub winning_numbers: Option<Vec<u8>>,
}

impl Round {
    /// Builds a round from the on-chain tuple, rejecting oversold records.
    pub fn from_record(record: RoundRecord) -> Option<Self> {
        if record.total_sold > record.max_tickets {
            return None;
        }
        Some(Self {
            id: record.id,
            ticket_price: record.ticket_price,
            max_tickets: record.max_tickets,
            total_sold: record.total_sold,
            is_active: record.is_active,
            draw_time: record.draw_time,
            draw_completed: record.draw_completed,
            total_pool: record.total_pool,
            winning_numbers: None,
        })
    }

    pub fn status(&self, now: u64) -> RoundStatus {
        if self.draw_completed {
            RoundStatus::Completed
        } else if !self.is_active {
            RoundStatus::Closed
        } else if self.draw_time <= now {
            RoundStatus::ReadyForDraw
        } else {
            RoundStatus::Active
        }
    }

    pub fn can_close_and_draw(&self, now: u64) -> bool {
        self.status(now) == RoundStatus::ReadyForDraw
    }

    pub fn progress_percent(&self) -> f64 {
        if self.max_tickets == 0 {
            return 0.0;
        }
        self.total_sold as f64 * 100.0 / self.max_tickets as f64
    }

    pub fn matches(&self, filter: RoundFilter) -> bool {
        match filter {
            RoundFilter::All => true,
            RoundFilter::Active => self.is_active,
            RoundFilter::Closed => !self.is_active,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub token_id: u64,
    pub round_id: u64,
    pub numbers: Vec<u8>,
    pub ticket_type: TicketType,
    pub owner: Address,
    pub is_winning: bool,
    pub reward: U256,
}

impl Ticket {
    /// A non-winning ticket never carries a reward.
    pub fn new(
        token_id: u64,
        round_id: u64,
        numbers: Vec<u8>,
        ticket_type: TicketType,
        owner: Address,
        is_winning: bool,
        reward: U256,
    ) -> Self {
        Self {
            token_id,
            round_id,
            numbers,
            ticket_type,
            owner,
            is_winning,
            reward: if is_winning { reward } else { U256::ZERO },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftStats {
    pub balance: u64,
    pub total_minted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAmountError {
    #[error("amount is empty")]
    Empty,
    #[error("`{0}` is not a decimal amount")]
    Invalid(String),
    #[error("amount has more than {0} fractional digits")]
    TooPrecise(u8),
    #[error("amount is out of range: {0}")]
    OutOfRange(String),
}

impl From<UnitsError> for ParseAmountError {
    fn from(err: UnitsError) -> Self {
        ParseAmountError::OutOfRange(err.to_string())
    }
}

/// Renders a fixed-point amount as a decimal string without trailing zeros.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let Ok(rendered) = utils::format_units(amount, decimals) else {
        return amount.to_string();
    };
    match rendered.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => rendered,
    }
}

/// Parses a non-negative decimal amount into its fixed-point value.
pub fn parse_units(input: &str, decimals: u8) -> Result<U256, ParseAmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseAmountError::Empty);
    }
    let (whole, fraction) = input.split_once('.').unwrap_or((input, ""));
    let is_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction)
    {
        return Err(ParseAmountError::Invalid(input.to_string()));
    }
    if fraction.len() > usize::from(decimals) {
        return Err(ParseAmountError::TooPrecise(decimals));
    }
    let whole = if whole.is_empty() { "0" } else { whole };
    let normalized = if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    };
    Ok(utils::parse_units(&normalized, decimals)?.get_absolute())
}

/// Short prize display: `1.2M`, `3.4K`, `12.50`.
pub fn format_compact(amount: U256, decimals: u8) -> String {
    let value: f64 = format_units(amount, decimals).parse().unwrap_or(f64::MAX);
    if value >= 1_000_000.0 {
        format!("{:.1}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("{:.1}K", value / 1_000.0)
    } else {
        format!("{value:.2}")
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;

    fn tokens(whole: u64) -> U256 {
        U256::from(whole) * U256::from(10u64).pow(U256::from(TOKEN_DECIMALS))
    }

    fn arb_round() -> Round {
        Round {
            id: 1,
            ticket_price: tokens(10),
            max_tickets: 200,
            total_sold: 50,
            is_active: true,
            draw_time: 1_000,
            draw_completed: false,
            total_pool: tokens(500),
            winning_numbers: None,
        }
    }

    #[test]
    fn status__follows_completed_closed_ready_active_precedence() {
        // given
        let active = arb_round();
        let closed = Round {
            is_active: false,
            ..arb_round()
        };
        let completed = Round {
            is_active: false,
            draw_completed: true,
            ..arb_round()
        };

        // then
        assert_eq!(active.status(999), RoundStatus::Active);
        assert_eq!(active.status(1_000), RoundStatus::ReadyForDraw);
        assert_eq!(closed.status(5_000), RoundStatus::Closed);
        assert_eq!(completed.status(0), RoundStatus::Completed);
    }

    #[test]
    fn can_close_and_draw__only_when_ready_for_draw() {
        let round = arb_round();
        assert!(!round.can_close_and_draw(10));
        assert!(round.can_close_and_draw(1_001));
        let closed = Round {
            is_active: false,
            ..arb_round()
        };
        assert!(!closed.can_close_and_draw(1_001));
    }

    #[test]
    fn from_record__oversold_round__is_rejected() {
        let record = RoundRecord {
            max_tickets: 10,
            total_sold: 11,
            ..RoundRecord::default()
        };
        assert_eq!(Round::from_record(record), None);
    }

    #[test]
    fn progress_percent__zero_capacity__is_zero() {
        let round = Round {
            max_tickets: 0,
            total_sold: 0,
            ..arb_round()
        };
        assert_eq!(round.progress_percent(), 0.0);
        assert_eq!(arb_round().progress_percent(), 25.0);
    }

    #[test]
    fn ticket_new__losing_ticket__drops_reward() {
        let ticket = Ticket::new(
            4,
            1,
            vec![1, 2, 3, 4, 5, 6],
            TicketType::Half,
            Address::ZERO,
            false,
            U256::from(77),
        );
        assert_eq!(ticket.reward, U256::ZERO);
    }

    #[test]
    fn format_units__trims_trailing_zeros() {
        let one = tokens(1);
        assert_eq!(format_units(one + one / U256::from(2), TOKEN_DECIMALS), "1.5");
        assert_eq!(format_units(tokens(100), TOKEN_DECIMALS), "100");
        assert_eq!(
            format_units(U256::from(1), TOKEN_DECIMALS),
            "0.000000000000000001"
        );
        assert_eq!(format_units(U256::ZERO, TOKEN_DECIMALS), "0");
    }

    #[test]
    fn parse_units__rejects_malformed_amounts() {
        assert_eq!(parse_units("", 18), Err(ParseAmountError::Empty));
        assert_eq!(
            parse_units("1.2.3", 18),
            Err(ParseAmountError::Invalid("1.2.3".to_string()))
        );
        assert_eq!(
            parse_units("0.1234", 2),
            Err(ParseAmountError::TooPrecise(2))
        );
        assert_eq!(
            parse_units("-3", 18),
            Err(ParseAmountError::Invalid("-3".to_string()))
        );
        assert_eq!(parse_units(".5", 1), Ok(U256::from(5)));
        assert_eq!(parse_units("7", 0), Ok(U256::from(7)));
    }

    #[test]
    fn parse_units__accepts_amounts_beyond_128_bits() {
        let huge = "1000000000000000000000000000000";
        let expected = U256::from(10u64).pow(U256::from(30 + 18));
        assert_eq!(parse_units(huge, TOKEN_DECIMALS), Ok(expected));
    }

    #[test]
    fn format_compact__uses_magnitude_suffixes() {
        let half = tokens(1) / U256::from(2);
        assert_eq!(format_compact(tokens(1_234_567), TOKEN_DECIMALS), "1.2M");
        assert_eq!(format_compact(tokens(3_400), TOKEN_DECIMALS), "3.4K");
        assert_eq!(format_compact(tokens(12) + half, TOKEN_DECIMALS), "12.50");
    }

    #[test]
    fn ticket_type__from_str_accepts_names_and_codes() {
        assert_eq!("quarter".parse::<TicketType>(), Ok(TicketType::Quarter));
        assert_eq!("0".parse::<TicketType>(), Ok(TicketType::Full));
        assert!("gold".parse::<TicketType>().is_err());
    }

    proptest! {
        #[test]
        fn parse_units__inverts_format_units(amount in any::<u64>(), scale in 0u64..6) {
            let amount = U256::from(amount) * U256::from(10u64).pow(U256::from(scale));
            let rendered = format_units(amount, TOKEN_DECIMALS);
            prop_assert_eq!(parse_units(&rendered, TOKEN_DECIMALS), Ok(amount));
        }

        #[test]
        fn from_record__accepted_rounds_never_oversold(sold in 0u64..500, max in 0u64..500) {
            let record = RoundRecord { total_sold: sold, max_tickets: max, ..RoundRecord::default() };
            match Round::from_record(record) {
                Some(round) => prop_assert!(round.total_sold <= round.max_tickets),
                None => prop_assert!(sold > max),
            }
        }
    }
}
