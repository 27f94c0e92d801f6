//! OpenWeatherMap current-weather responses → [`WeatherRecord`] rows.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::Zone;
use crate::records::WeatherRecord;

#[derive(Debug, Deserialize)]
struct OwmResponse {
    #[serde(default)]
    dt: Option<i64>,
    main: OwmMain,
    #[serde(default)]
    wind: Option<OwmWind>,
    #[serde(default)]
    rain: Option<OwmRain>,
    #[serde(default)]
    weather: Vec<OwmCondition>,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    #[serde(default)]
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    #[serde(default)]
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmRain {
    #[serde(rename = "1h", default)]
    one_hour: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    main: String,
}

/// Request URL for a zone's current weather, in metric units.
///
/// The API key is not part of the URL; the source's auth wrapper adds it.
pub fn weather_url(base: &str, zone: &Zone) -> String {
    format!("{base}?lat={}&lon={}&units=metric", zone.lat, zone.lon)
}

/// Parses a metric current-weather response for `zone`.
///
/// Wind arrives in m/s and is stored in km/h; missing rain means 0 mm.
///
/// # Errors
///
/// Returns an error if the body is not a current-weather document.
pub fn weather_record(zone: &Zone, body: &[u8], fallback_ts: i64) -> Result<WeatherRecord> {
    let resp: OwmResponse = serde_json::from_slice(body)
        .with_context(|| format!("Invalid weather response for zone '{}'", zone.name))?;

    Ok(WeatherRecord {
        zone: zone.name.clone(),
        lat: zone.lat,
        lon: zone.lon,
        timestamp: resp.dt.filter(|&dt| dt > 0).unwrap_or(fallback_ts),
        temp_c: resp.main.temp,
        rain_mm: resp.rain.and_then(|r| r.one_hour).unwrap_or(0.0),
        wind_kph: resp.wind.and_then(|w| w.speed).unwrap_or(0.0) * 3.6,
        humidity: resp.main.humidity,
        conditions: resp.weather.into_iter().next().map(|c| c.main),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centre() -> Zone {
        Zone::new("centre", 53.34, -6.26)
    }

    #[test]
    fn test_weather_url() {
        assert_eq!(
            weather_url("https://api.openweathermap.org/data/2.5/weather", &centre()),
            "https://api.openweathermap.org/data/2.5/weather?lat=53.34&lon=-6.26&units=metric"
        );
    }

    #[test]
    fn test_parse_rainy_response() {
        let body = br#"{
            "coord": {"lon": -6.26, "lat": 53.34},
            "weather": [{"id": 500, "main": "Rain", "description": "light rain"}],
            "main": {"temp": 14.5, "feels_like": 14.0, "humidity": 88},
            "wind": {"speed": 5.0, "deg": 240},
            "rain": {"1h": 1.2},
            "dt": 1752480000,
            "name": "Dublin"
        }"#;

        let rec = weather_record(&centre(), body, 1).unwrap();
        assert_eq!(rec.zone, "centre");
        assert_eq!(rec.timestamp, 1_752_480_000);
        assert_eq!(rec.temp_c, 14.5);
        assert_eq!(rec.rain_mm, 1.2);
        assert!((rec.wind_kph - 18.0).abs() < 1e-9);
        assert_eq!(rec.humidity, Some(88.0));
        assert_eq!(rec.conditions.as_deref(), Some("Rain"));
    }

    #[test]
    fn test_parse_dry_response_defaults() {
        let body = br#"{"main": {"temp": 21.0}}"#;
        let rec = weather_record(&centre(), body, 42).unwrap();
        assert_eq!(rec.timestamp, 42);
        assert_eq!(rec.rain_mm, 0.0);
        assert_eq!(rec.wind_kph, 0.0);
        assert_eq!(rec.conditions, None);
    }

    #[test]
    fn test_error_payload_is_rejected() {
        let body = br#"{"cod": 401, "message": "Invalid API key"}"#;
        let err = weather_record(&centre(), body, 1).unwrap_err();
        assert!(err.to_string().contains("centre"));
    }
}
