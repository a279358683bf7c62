//! Randomized geographic payloads.
//!
//! Every generator takes the random source explicitly so a seeded `StdRng`
//! yields reproducible payloads.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Latitude range of the generation region.
pub const MIN_LAT: f64 = 52.522906;
pub const MAX_LAT: f64 = 52.561958;

/// Longitude range of the generation region.
pub const MIN_LON: f64 = 13.347702;
pub const MAX_LON: f64 = 13.437996;

/// Provider assigned to vehicle types that consider live traffic.
pub const TRAFFIC_PROVIDER: &str = "tomtom";

/// Profiles the traffic-aware provider cannot serve.
pub const TRAFFIC_EXCLUDED_PROFILES: [&str; 2] = ["truck", "bike"];

/// Coordinate range of the deliberately malformed "erratic" route points.
const ERRATIC_MIN: f64 = 20.0;
const ERRATIC_MAX: f64 = 80.0;

/// Uniformly sampled `(lat, lon)` inside the generation region.
pub fn random_point<R: Rng + ?Sized>(rng: &mut R) -> (f64, f64) {
    (
        rng.gen_range(MIN_LAT..=MAX_LAT),
        rng.gen_range(MIN_LON..=MAX_LON),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub location_id: String,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: String,
    pub type_id: String,
    pub start_address: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleType {
    pub type_id: String,
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_data_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consider_traffic: Option<bool>,
}

impl VehicleType {
    pub fn is_traffic_aware(&self) -> bool {
        self.network_data_provider.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub address: Location,
}

/// Body of an optimization job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizePayload {
    pub vehicles: Vec<Vehicle>,
    pub vehicle_types: Vec<VehicleType>,
    pub services: Vec<Service>,
}

pub fn random_location<R: Rng + ?Sized>(rng: &mut R, name: impl Into<String>) -> Location {
    let (lat, lon) = random_point(rng);
    Location {
        location_id: name.into(),
        lon,
        lat,
    }
}

/// `count` vehicles, each with its own vehicle type.
///
/// A type's profile is drawn from `profiles`; with `traffic_probability` it is
/// switched to the traffic-aware provider unless the profile is excluded.
/// An empty `profiles` slice falls back to `"car"`.
pub fn random_vehicle_set<R: Rng + ?Sized>(
    rng: &mut R,
    count: usize,
    profiles: &[String],
    traffic_probability: f64,
) -> (Vec<Vehicle>, Vec<VehicleType>) {
    let mut vehicles = Vec::with_capacity(count);
    let mut vehicle_types = Vec::with_capacity(count);

    for i in 0..count {
        let type_id = format!("t{}", i);
        let profile = profiles
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| "car".to_string());

        let mut vehicle_type = VehicleType {
            type_id: type_id.clone(),
            profile,
            network_data_provider: None,
            consider_traffic: None,
        };
        if rng.gen::<f64>() < traffic_probability
            && !TRAFFIC_EXCLUDED_PROFILES.contains(&vehicle_type.profile.as_str())
        {
            vehicle_type.network_data_provider = Some(TRAFFIC_PROVIDER.to_string());
            vehicle_type.consider_traffic = Some(true);
        }
        vehicle_types.push(vehicle_type);

        let vehicle_id = format!("vehicle-{}", i);
        vehicles.push(Vehicle {
            start_address: random_location(rng, vehicle_id.clone()),
            vehicle_id,
            type_id,
        });
    }

    (vehicles, vehicle_types)
}

/// `count` service stops with ids `s0..` and locations `l-0..`.
pub fn random_service_set<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<Service> {
    (0..count)
        .map(|i| Service {
            id: format!("s{}", i),
            address: random_location(rng, format!("l-{}", i)),
        })
        .collect()
}

pub fn random_optimize_payload<R: Rng + ?Sized>(
    rng: &mut R,
    max_profiles: usize,
    max_locations: usize,
    profiles: &[String],
    traffic_probability: f64,
) -> OptimizePayload {
    let (vehicles, vehicle_types) =
        random_vehicle_set(rng, max_profiles, profiles, traffic_probability);
    OptimizePayload {
        vehicles,
        vehicle_types,
        services: random_service_set(rng, max_locations),
    }
}

/// A two-decimal coordinate string in [20.00, 80.00], e.g. `"47.13"`.
pub fn erratic_coordinate<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:.2}", rng.gen_range(ERRATIC_MIN..=ERRATIC_MAX))
}

/// Two malformed `(lat, lon)` pairs for the erratic route persona.
pub fn erratic_route_points<R: Rng + ?Sized>(rng: &mut R) -> [(String, String); 2] {
    [
        (erratic_coordinate(rng), erratic_coordinate(rng)),
        (erratic_coordinate(rng), erratic_coordinate(rng)),
    ]
}

/// Extent reported by the `/info` endpoint, `[lon1, lat1, lon2, lat2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lon1: f64,
    pub lat1: f64,
    pub lon2: f64,
    pub lat2: f64,
}

impl BoundingBox {
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [lon1, lat1, lon2, lat2] => Some(Self {
                lon1: *lon1,
                lat1: *lat1,
                lon2: *lon2,
                lat2: *lat2,
            }),
            _ => None,
        }
    }

    /// Center used to generate query points, as `(lat, lon)`.
    ///
    /// The midpoint is used unless its longitude falls in (-1, 1); then the
    /// halved maxima are used so the point never lands at or near (0, 0).
    pub fn generation_center(&self) -> (f64, f64) {
        let lon = (self.lon1 + self.lon2) / 2.0;
        let lat = (self.lat1 + self.lat2) / 2.0;
        if lon > -1.0 && lon < 1.0 {
            (self.lat1.max(self.lat2) / 2.0, self.lon1.max(self.lon2) / 2.0)
        } else {
            (lat, lon)
        }
    }
}
