use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Boat {
    pub id: String,
    pub name: String,
    pub status: BoatStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BoatStatus {
    Available,
    InRepair,
    OutOfService,
}

impl BoatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoatStatus::Available => "available",
            BoatStatus::InRepair => "in_repair",
            BoatStatus::OutOfService => "out_of_service",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_repair" => BoatStatus::InRepair,
            "out_of_service" => BoatStatus::OutOfService,
            _ => BoatStatus::Available,
        }
    }
}
