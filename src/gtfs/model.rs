//! Rows of the static GTFS tables the validators consult.
//!
//! Only the columns used by the rules are mapped; extra columns are ignored.
//! Clock times are stored as seconds after midnight and may exceed 24h.

use serde::{Deserialize, Deserializer};

use crate::util::time::parse_gtfs_time;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Agency {
    pub agency_id: Option<String>,
    pub agency_timezone: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Route {
    pub route_id: String,
    pub agency_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Trip {
    pub route_id: String,
    pub trip_id: String,
    pub direction_id: Option<u32>,
    pub block_id: Option<String>,
    pub shape_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub location_type: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    #[serde(default, deserialize_with = "de_gtfs_time")]
    pub arrival_time: Option<u32>,
    #[serde(default, deserialize_with = "de_gtfs_time")]
    pub departure_time: Option<u32>,
    pub stop_id: String,
    pub stop_sequence: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frequency {
    pub trip_id: String,
    #[serde(deserialize_with = "de_required_gtfs_time")]
    pub start_time: u32,
    #[serde(deserialize_with = "de_required_gtfs_time")]
    pub end_time: u32,
    pub headway_secs: u32,
    pub exact_times: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShapePoint {
    pub shape_id: String,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
    pub shape_pt_sequence: u32,
}

fn de_gtfs_time<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_gtfs_time(s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid GTFS time '{}'", s))),
    }
}

fn de_required_gtfs_time<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    de_gtfs_time(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing GTFS time"))
}
