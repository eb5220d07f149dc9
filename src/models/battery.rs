use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Battery {
    pub id: String,
    pub name: String,
    pub status: BatteryStatus,
    pub owner_id: String,
}

/// A battery joined with its usage history and owner contact details.
/// `last_used` and `use_cycles` are derived from non-canceled bookings.
#[derive(Debug, Clone)]
pub struct BatteryDetail {
    pub id: String,
    pub name: String,
    pub status: BatteryStatus,
    pub last_used: Option<NaiveDateTime>,
    pub use_cycles: i64,
    pub owner_name: String,
    pub owner_email: String,
    pub owner_phone: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BatteryStatus {
    Available,
    Reserve,
    OutOfService,
    InRepair,
}

impl BatteryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatteryStatus::Available => "available",
            BatteryStatus::Reserve => "reserve",
            BatteryStatus::OutOfService => "out_of_service",
            BatteryStatus::InRepair => "in_repair",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "reserve" => BatteryStatus::Reserve,
            "out_of_service" => BatteryStatus::OutOfService,
            "in_repair" => BatteryStatus::InRepair,
            _ => BatteryStatus::Available,
        }
    }

    /// Units in the shop cannot be handed out.
    pub fn is_assignable(&self) -> bool {
        matches!(self, BatteryStatus::Available | BatteryStatus::Reserve)
    }
}
