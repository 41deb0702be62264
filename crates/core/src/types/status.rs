//! Status enums for orders, snapshots and inactive-customer levels.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Local order status.
///
/// Collapses Shopify's separate financial / fulfillment / cancellation
/// fields into the four states the CRM cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Created,
    Paid,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    /// Derive the local status from the remote order fields.
    ///
    /// Cancellation wins over fulfillment, which wins over payment.
    #[must_use]
    pub fn derive(
        financial_status: Option<&str>,
        fulfillment_status: Option<&str>,
        cancelled: bool,
    ) -> Self {
        if cancelled {
            Self::Cancelled
        } else if fulfillment_status.is_some_and(|s| s.eq_ignore_ascii_case("fulfilled")) {
            Self::Fulfilled
        } else if financial_status.is_some_and(|s| s.eq_ignore_ascii_case("paid")) {
            Self::Paid
        } else {
            Self::Created
        }
    }

    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Fulfilled => "fulfilled",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "paid" => Ok(Self::Paid),
            "fulfilled" => Ok(Self::Fulfilled),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

/// Coarse customer value tier mirrored into contact snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Low,
    Vip,
}

impl RiskTier {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Vip => "vip",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "vip" => Ok(Self::Vip),
            _ => Err(format!("invalid risk tier: {s}")),
        }
    }
}

/// Inactivity level of a customer, from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GhostLevel {
    /// High-value customer who has gone quiet.
    VipAtRisk,
    /// High total spend but long inactive.
    BigSpenderLapsed,
    /// Bought once and never came back.
    OneTimeBuyer,
    Churned,
    Frozen,
    Cold,
    Warm,
    Active,
}

impl GhostLevel {
    /// Every level, in priority order.
    pub const ALL: [Self; 8] = [
        Self::VipAtRisk,
        Self::BigSpenderLapsed,
        Self::OneTimeBuyer,
        Self::Churned,
        Self::Frozen,
        Self::Cold,
        Self::Warm,
        Self::Active,
    ];

    /// Classify a customer by days since their last order, order count and
    /// lifetime spend. Value-based levels take precedence over plain
    /// inactivity bands.
    #[must_use]
    pub fn classify(days_inactive: i64, order_count: i64, lifetime_value: Decimal) -> Self {
        let is_vip = order_count >= 5 || lifetime_value >= Decimal::from(5000);

        if is_vip && days_inactive >= 45 {
            Self::VipAtRisk
        } else if lifetime_value >= Decimal::from(3000) && days_inactive >= 60 {
            Self::BigSpenderLapsed
        } else if order_count == 1 && days_inactive >= 45 {
            Self::OneTimeBuyer
        } else if days_inactive >= 91 {
            Self::Churned
        } else if days_inactive >= 61 {
            Self::Frozen
        } else if days_inactive >= 31 {
            Self::Cold
        } else if days_inactive >= 14 {
            Self::Warm
        } else {
            Self::Active
        }
    }

    /// Snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VipAtRisk => "vip_at_risk",
            Self::BigSpenderLapsed => "big_spender_lapsed",
            Self::OneTimeBuyer => "one_time_buyer",
            Self::Churned => "churned",
            Self::Frozen => "frozen_ghost",
            Self::Cold => "cold_ghost",
            Self::Warm => "warm_ghost",
            Self::Active => "active",
        }
    }
}

impl std::fmt::Display for GhostLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_order_status() {
        assert_eq!(
            OrderStatus::derive(Some("paid"), Some("fulfilled"), true),
            OrderStatus::Cancelled
        );
        assert_eq!(
            OrderStatus::derive(Some("paid"), Some("fulfilled"), false),
            OrderStatus::Fulfilled
        );
        assert_eq!(
            OrderStatus::derive(Some("paid"), None, false),
            OrderStatus::Paid
        );
        assert_eq!(
            OrderStatus::derive(Some("pending"), Some("partial"), false),
            OrderStatus::Created
        );
        assert_eq!(OrderStatus::derive(None, None, false), OrderStatus::Created);
    }

    #[test]
    fn test_order_status_round_trips_through_str() {
        for status in [
            OrderStatus::Created,
            OrderStatus::Paid,
            OrderStatus::Fulfilled,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert!("refunded".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_ghost_bands() {
        let d = Decimal::ZERO;
        assert_eq!(GhostLevel::classify(13, 2, d), GhostLevel::Active);
        assert_eq!(GhostLevel::classify(14, 2, d), GhostLevel::Warm);
        assert_eq!(GhostLevel::classify(31, 2, d), GhostLevel::Cold);
        assert_eq!(GhostLevel::classify(61, 2, d), GhostLevel::Frozen);
        assert_eq!(GhostLevel::classify(91, 2, d), GhostLevel::Churned);
    }

    #[test]
    fn test_ghost_value_levels_take_precedence() {
        assert_eq!(
            GhostLevel::classify(45, 5, Decimal::ZERO),
            GhostLevel::VipAtRisk
        );
        assert_eq!(
            GhostLevel::classify(45, 1, Decimal::from(5000)),
            GhostLevel::VipAtRisk
        );
        assert_eq!(
            GhostLevel::classify(60, 2, Decimal::from(3000)),
            GhostLevel::BigSpenderLapsed
        );
        assert_eq!(
            GhostLevel::classify(59, 2, Decimal::from(3000)),
            GhostLevel::Cold
        );
        assert_eq!(
            GhostLevel::classify(45, 1, Decimal::from(100)),
            GhostLevel::OneTimeBuyer
        );
        assert_eq!(
            GhostLevel::classify(44, 5, Decimal::ZERO),
            GhostLevel::Cold
        );
    }

    #[test]
    fn test_risk_tier_parse() {
        assert_eq!("vip".parse::<RiskTier>(), Ok(RiskTier::Vip));
        assert_eq!(RiskTier::default(), RiskTier::Low);
    }
}
