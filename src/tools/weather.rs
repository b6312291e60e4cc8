//! Weather tool backed by the Open-Meteo forecast API

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};

use super::traits::{str_arg, ErrorCode, Tool, ToolFailure, ToolMeta, ToolResult};
use crate::error::Result;

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Coordinate gazetteer for common city names
const CITY_COORDS: &[(&str, f64, f64)] = &[
    ("amsterdam", 52.3676, 4.9041),
    ("rotterdam", 51.9244, 4.4777),
    ("utrecht", 52.0907, 5.1214),
    ("the hague", 52.0705, 4.3007),
    ("london", 51.5074, -0.1278),
    ("paris", 48.8566, 2.3522),
    ("berlin", 52.52, 13.405),
    ("new york", 40.7128, -74.006),
    ("tokyo", 35.6762, 139.6503),
    ("beijing", 39.9042, 116.4074),
    ("shanghai", 31.2304, 121.4737),
];

/// Built-in tool: weather lookup by city name or `lat,lon`
pub struct WeatherTool {
    client: Client,
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WeatherTool {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(12))
            .user_agent("taskweave/0.1")
            .build()
            .unwrap_or_default();
        WeatherTool { client }
    }

    fn parse_location(location: &str) -> Option<(f64, f64)> {
        let trimmed = location.trim();

        if let Some((lat_s, lon_s)) = trimmed.split_once(',') {
            if let (Ok(lat), Ok(lon)) = (lat_s.trim().parse(), lon_s.trim().parse()) {
                return Some((lat, lon));
            }
        }

        let needle = trimmed.to_lowercase();
        CITY_COORDS
            .iter()
            .find(|(name, _, _)| *name == needle)
            .map(|(_, lat, lon)| (*lat, *lon))
    }
}

/// WMO weather code to short description
fn weather_description(code: i64) -> &'static str {
    match code {
        0 => "clear",
        1 | 2 => "partly cloudy",
        3 => "overcast",
        45 | 48 => "fog",
        51 | 53 | 55 | 61 | 63 | 65 | 80 | 81 | 82 => "rain",
        56 | 57 | 66 | 67 => "freezing rain",
        71 | 73 | 75 | 77 | 85 | 86 => "snow",
        95 | 96 | 99 => "thunderstorm",
        _ => "unknown",
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather_get"
    }

    fn description(&self) -> &str {
        "Get weather for a city: current conditions for today, a daily forecast for other dates"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City name (e.g. 'Rotterdam') or 'lat,lon' coordinates"
                },
                "date": {
                    "type": "string",
                    "description": "Forecast date as YYYY-MM-DD; defaults to today"
                }
            },
            "required": ["location"]
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let started = Instant::now();
        let meta = |started: &Instant, args: Value| {
            ToolMeta::new("weather_get", started.elapsed().as_millis() as u64, args)
        };

        let Some(location) = str_arg(&args, "location") else {
            return Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::InvalidInput, "Missing 'location' parameter"),
                meta(&started, args),
            ));
        };

        let Some((lat, lon)) = Self::parse_location(&location) else {
            return Ok(ToolResult::failure(
                ToolFailure::new(
                    ErrorCode::NotFound,
                    format!("Unknown location: {}", location),
                ),
                meta(&started, args),
            ));
        };

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let query_date = str_arg(&args, "date").unwrap_or_else(|| today.clone());
        let is_today = query_date == today;

        let mut params: Vec<(&str, String)> = vec![
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("timezone", "auto".to_string()),
            (
                "daily",
                "temperature_2m_max,temperature_2m_min,weather_code,precipitation_sum,precipitation_probability_max"
                    .to_string(),
            ),
        ];
        if is_today {
            params.push(("current", "temperature_2m,weather_code".to_string()));
            params.push(("forecast_days", "1".to_string()));
        } else {
            params.push(("start_date", query_date.clone()));
            params.push(("end_date", query_date.clone()));
        }

        let response = match self.client.get(FORECAST_URL).query(&params).send().await {
            Ok(r) => r,
            Err(e) => {
                return Ok(ToolResult::failure(
                    ToolFailure::new(ErrorCode::Network, format!("Weather API request failed: {}", e)),
                    meta(&started, args),
                ));
            }
        };

        if !response.status().is_success() {
            let code = if response.status().as_u16() == 429 {
                ErrorCode::RateLimit
            } else {
                ErrorCode::Network
            };
            return Ok(ToolResult::failure(
                ToolFailure::new(code, format!("Weather API returned {}", response.status())),
                meta(&started, args),
            ));
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return Ok(ToolResult::failure(
                    ToolFailure::new(ErrorCode::Network, format!("Weather API response unreadable: {}", e)),
                    meta(&started, args),
                ));
            }
        };

        let mut data = json!({
            "location": location,
            "coordinates": {"lat": lat, "lon": lon},
            "query_date": query_date,
        });

        if is_today {
            let current = &body["current"];
            data["current"] = json!({
                "temperature": current["temperature_2m"],
                "weather_description":
                    weather_description(current["weather_code"].as_i64().unwrap_or(-1)),
            });
        }

        let daily = &body["daily"];
        if daily.is_object() {
            data["forecast"] = json!({
                "date": query_date,
                "max_temp": daily["temperature_2m_max"][0],
                "min_temp": daily["temperature_2m_min"][0],
                "precipitation_sum": daily["precipitation_sum"][0],
                "precipitation_probability": daily["precipitation_probability_max"][0],
                "weather_description":
                    weather_description(daily["weather_code"][0].as_i64().unwrap_or(-1)),
            });
        }

        Ok(ToolResult::success(data, meta(&started, args)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location_city_and_coords() {
        assert!(WeatherTool::parse_location("Rotterdam").is_some());
        assert!(WeatherTool::parse_location("  LONDON ").is_some());
        assert_eq!(
            WeatherTool::parse_location("51.9,4.47"),
            Some((51.9, 4.47))
        );
        assert!(WeatherTool::parse_location("Atlantis").is_none());
    }

    #[test]
    fn test_weather_description_buckets() {
        assert_eq!(weather_description(0), "clear");
        assert_eq!(weather_description(63), "rain");
        assert_eq!(weather_description(75), "snow");
        assert_eq!(weather_description(1234), "unknown");
    }

    #[tokio::test]
    async fn test_unknown_city_is_not_found() {
        let tool = WeatherTool::new();
        let result = tool.invoke(json!({"location": "Atlantis"})).await.unwrap();
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_missing_location_is_invalid_input() {
        let tool = WeatherTool::new();
        let result = tool.invoke(json!({})).await.unwrap();
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, ErrorCode::InvalidInput);
    }
}
