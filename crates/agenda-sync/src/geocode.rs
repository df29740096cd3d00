//! Offline geocoding: source coordinates, then city dictionary, then address scan.

use std::sync::OnceLock;

use agenda_core::{GeoPoint, GeoSource};
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::normalize::{normalize_opt, normalize_text};
use crate::rules::CityDictionary;

#[derive(Debug, Clone, Copy)]
pub struct GeocodeQuery<'a> {
    pub raw_coordinates: &'a JsonValue,
    pub city: Option<&'a str>,
    pub address: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeocodeStrategy {
    RawCoordinates,
    CityLookup,
    AddressSubstring,
}

pub const DEFAULT_STRATEGIES: [GeocodeStrategy; 3] = [
    GeocodeStrategy::RawCoordinates,
    GeocodeStrategy::CityLookup,
    GeocodeStrategy::AddressSubstring,
];

#[derive(Debug, Clone)]
struct KnownCity {
    key: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Clone)]
pub struct Geocoder {
    strategies: Vec<GeocodeStrategy>,
    cities: Vec<KnownCity>,
}

impl Geocoder {
    pub fn new(dictionary: &CityDictionary) -> Self {
        Self::with_strategies(dictionary, &DEFAULT_STRATEGIES)
    }

    pub fn with_strategies(dictionary: &CityDictionary, strategies: &[GeocodeStrategy]) -> Self {
        let cities = dictionary
            .cities
            .iter()
            .map(|entry| KnownCity {
                key: normalize_text(entry.name.trim()),
                latitude: entry.latitude,
                longitude: entry.longitude,
            })
            .filter(|city| !city.key.is_empty())
            .collect();
        Self {
            strategies: strategies.to_vec(),
            cities,
        }
    }

    /// First strategy that yields a valid point, tagged with its source.
    pub fn locate(&self, query: &GeocodeQuery<'_>) -> Option<GeoPoint> {
        self.strategies
            .iter()
            .find_map(|strategy| self.apply(*strategy, query))
    }

    fn apply(&self, strategy: GeocodeStrategy, query: &GeocodeQuery<'_>) -> Option<GeoPoint> {
        match strategy {
            GeocodeStrategy::RawCoordinates => {
                let (lat, lon) = parse_raw_coordinates(query.raw_coordinates)?;
                GeoPoint::new(lat, lon, GeoSource::RawCoordinates)
            }
            GeocodeStrategy::CityLookup => {
                let key = normalize_opt(query.city);
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                let city = self.cities.iter().find(|c| c.key == key)?;
                GeoPoint::new(city.latitude, city.longitude, GeoSource::CityLookup)
            }
            GeocodeStrategy::AddressSubstring => {
                let address = normalize_opt(query.address);
                if address.trim().is_empty() {
                    return None;
                }
                let city = self
                    .cities
                    .iter()
                    .find(|c| address.contains(c.key.as_str()))?;
                GeoPoint::new(city.latitude, city.longitude, GeoSource::AddressSubstring)
            }
        }
    }
}

fn coordinate_pair_re() -> &'static Regex {
    static COORDINATE_PAIR_RE: OnceLock<Regex> = OnceLock::new();
    COORDINATE_PAIR_RE.get_or_init(|| {
        Regex::new(r"(-?\d+(?:[.,]\d+)?)\s*[,; ]\s*(-?\d+(?:[.,]\d+)?)")
            .expect("valid coordinate pair regex")
    })
}

fn parse_number(value: &JsonValue) -> Option<f64> {
    let n = match value {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Orders an unlabeled pair as (lat, lon); a value beyond ±90 must be a longitude.
fn disambiguate(a: f64, b: f64) -> Option<(f64, f64)> {
    if a.abs() <= 90.0 && b.abs() <= 180.0 {
        Some((a, b))
    } else if a.abs() <= 180.0 && b.abs() <= 90.0 {
        Some((b, a))
    } else {
        None
    }
}

/// Accepts `[a, b]`, `{lat/latitude/y, lon/lng/longitude/x}`, a GeoJSON-style
/// `{"coordinates": [lon, lat]}`, or free text holding two numbers.
pub fn parse_raw_coordinates(raw: &JsonValue) -> Option<(f64, f64)> {
    match raw {
        JsonValue::Array(items) if items.len() >= 2 => {
            disambiguate(parse_number(&items[0])?, parse_number(&items[1])?)
        }
        JsonValue::Object(map) => {
            let first_number = |keys: &[&str]| {
                keys.iter()
                    .filter_map(|k| map.get(*k))
                    .find(|v| !v.is_null())
                    .and_then(parse_number)
            };
            let lat = first_number(&["lat", "latitude", "y"]);
            let lon = first_number(&["lon", "lng", "longitude", "x"]);
            if let (Some(lat), Some(lon)) = (lat, lon) {
                return Some((lat, lon));
            }
            match map.get("coordinates") {
                Some(JsonValue::Array(items)) if items.len() >= 2 => {
                    Some((parse_number(&items[1])?, parse_number(&items[0])?))
                }
                _ => None,
            }
        }
        JsonValue::String(text) => {
            let caps = coordinate_pair_re().captures(text)?;
            let a = parse_number(&JsonValue::String(caps[1].to_string()))?;
            let b = parse_number(&JsonValue::String(caps[2].to_string()))?;
            disambiguate(a, b)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::EnrichmentRules;
    use serde_json::json;

    fn geocoder() -> Geocoder {
        Geocoder::new(&EnrichmentRules::default().cities)
    }

    fn query<'a>(raw: &'a JsonValue, city: Option<&'a str>, address: Option<&'a str>) -> GeocodeQuery<'a> {
        GeocodeQuery {
            raw_coordinates: raw,
            city,
            address,
        }
    }

    #[test]
    fn raw_pair_wins_over_city_dictionary() {
        let raw = json!([45.75, 4.85]);
        let point = geocoder().locate(&query(&raw, Some("Paris"), None)).expect("point");
        assert_eq!(point.source, GeoSource::RawCoordinates);
        assert_eq!((point.latitude, point.longitude), (45.75, 4.85));
    }

    #[test]
    fn swapped_pair_is_reordered_by_range() {
        assert_eq!(parse_raw_coordinates(&json!([120.5, 45.0])), Some((45.0, 120.5)));
        assert_eq!(parse_raw_coordinates(&json!(["2,35", "48,85"])), Some((2.35, 48.85)));
        assert_eq!(parse_raw_coordinates(&json!([200.0, 100.0])), None);
    }

    #[test]
    fn object_and_text_shapes_are_accepted() {
        assert_eq!(
            parse_raw_coordinates(&json!({"latitude": "44.83", "lng": -0.57})),
            Some((44.83, -0.57))
        );
        assert_eq!(
            parse_raw_coordinates(&json!({"type": "Point", "coordinates": [2.35, 48.85]})),
            Some((48.85, 2.35))
        );
        assert_eq!(parse_raw_coordinates(&json!("48.0061, 0.1996")), Some((48.0061, 0.1996)));
        assert_eq!(parse_raw_coordinates(&json!("pas de coordonnées")), None);
        assert_eq!(parse_raw_coordinates(&JsonValue::Null), None);
    }

    #[test]
    fn invalid_raw_object_falls_through_to_city() {
        let raw = json!({"lat": 123.0, "lon": 4.0});
        let point = geocoder()
            .locate(&query(&raw, Some("  Bègles "), None))
            .expect("point");
        assert_eq!(point.source, GeoSource::CityLookup);
        assert_eq!(point.latitude, 44.8076);
    }

    #[test]
    fn address_substring_is_last_resort() {
        let raw = JsonValue::Null;
        let point = geocoder()
            .locate(&query(&raw, Some("Commune inconnue"), Some("Rue Jean Jaurès, LE MANS")))
            .expect("point");
        assert_eq!(point.source, GeoSource::AddressSubstring);
        assert_eq!((point.latitude, point.longitude), (48.0061, 0.1996));
    }

    #[test]
    fn nothing_matches_yields_none() {
        let raw = json!("n/a");
        assert!(geocoder()
            .locate(&query(&raw, Some("Trifouilly"), Some("Lieu-dit des Granges")))
            .is_none());
    }

    #[test]
    fn strategy_list_controls_precedence() {
        let raw = json!([45.75, 4.85]);
        let city_first = Geocoder::with_strategies(
            &EnrichmentRules::default().cities,
            &[GeocodeStrategy::CityLookup, GeocodeStrategy::RawCoordinates],
        );
        let point = city_first.locate(&query(&raw, Some("Paris"), None)).expect("point");
        assert_eq!(point.source, GeoSource::CityLookup);
    }
}
