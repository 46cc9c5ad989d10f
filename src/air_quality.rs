//! Air-quality lookup for the riding location.
//!
//! The endpoint follows the OpenWeatherMap air-pollution API: a GET with
//! `lat`, `lon` and `appid` query parameters returning
//! `{"list": [{"main": {"aqi": 1..5}}]}`.

use crate::location::Coordinates;
use serde::{Deserialize, Serialize};

/// Default air-pollution endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.openweathermap.org/data/2.5/air_pollution";

/// Air-quality index on the 1 (good) to 5 (very poor) scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirQuality {
    pub aqi: u8,
}

impl AirQuality {
    pub fn level(&self) -> &'static str {
        match self.aqi {
            1 => "Good",
            2 => "Fair",
            3 => "Moderate",
            4 => "Poor",
            5 => "Very Poor",
            _ => "Unknown",
        }
    }
}

impl std::fmt::Display for AirQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (AQI {})", self.level(), self.aqi)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirQualityResponse {
    pub list: Vec<AirQualityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirQualityEntry {
    pub main: AirQualityMain,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirQualityMain {
    pub aqi: u8,
}

impl AirQualityResponse {
    /// First reported index, if any.
    pub fn current(&self) -> Option<AirQuality> {
        self.list.first().map(|e| AirQuality { aqi: e.main.aqi })
    }
}

/// Parse a response body.
pub fn parse_response(body: &str) -> Result<AirQuality, AirQualityError> {
    let response: AirQualityResponse =
        serde_json::from_str(body).map_err(|e| AirQualityError::Serialization(e.to_string()))?;
    response.current().ok_or(AirQualityError::Empty)
}

/// Endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
}

impl Default for AirQualityConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl AirQualityConfig {
    /// Request URL for `at`.
    pub fn request_url(&self, at: Coordinates) -> Result<String, AirQualityError> {
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AirQualityError::Config("no API key configured".to_string()))?;
        Ok(format!(
            "{}?lat={}&lon={}&appid={}",
            self.endpoint, at.latitude, at.longitude, key
        ))
    }
}

#[derive(Debug)]
pub enum AirQualityError {
    Config(String),
    Network(String),
    Server { status: u16, message: String },
    Serialization(String),
    /// The response carried no readings
    Empty,
}

impl std::fmt::Display for AirQualityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AirQualityError::Config(msg) => write!(f, "Air quality config error: {msg}"),
            AirQualityError::Network(msg) => write!(f, "Air quality network error: {msg}"),
            AirQualityError::Server { status, message } => {
                write!(f, "Air quality server error ({status}): {message}")
            }
            AirQualityError::Serialization(msg) => {
                write!(f, "Air quality response error: {msg}")
            }
            AirQualityError::Empty => write!(f, "Air quality response contained no readings"),
        }
    }
}

impl std::error::Error for AirQualityError {}

/// HTTP client for the air-quality endpoint.
#[cfg(feature = "air-quality")]
pub struct AirQualityClient {
    config: AirQualityConfig,
    client: reqwest::Client,
}

#[cfg(feature = "air-quality")]
impl AirQualityClient {
    pub fn new(config: AirQualityConfig) -> Result<Self, AirQualityError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AirQualityError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Fetch the current air quality at `at`.
    pub async fn fetch(&self, at: Coordinates) -> Result<AirQuality, AirQualityError> {
        let url = self.config.request_url(at)?;
        tracing::debug!(location = %at, "fetching air quality");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AirQualityError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AirQualityError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(AirQualityError::Server {
                status: status.as_u16(),
                message: body,
            });
        }

        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        let names: Vec<_> = (0..=6).map(|aqi| AirQuality { aqi }.level()).collect();
        assert_eq!(
            names,
            vec!["Unknown", "Good", "Fair", "Moderate", "Poor", "Very Poor", "Unknown"]
        );
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"coord":{"lon":4.89,"lat":52.37},"list":[{"main":{"aqi":2},"components":{"co":201.9}}]}"#;
        assert_eq!(parse_response(body).unwrap(), AirQuality { aqi: 2 });
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(matches!(
            parse_response(r#"{"list":[]}"#),
            Err(AirQualityError::Empty)
        ));
        assert!(matches!(
            parse_response("oops"),
            Err(AirQualityError::Serialization(_))
        ));
    }

    #[test]
    fn test_request_url_requires_key() {
        let at = Coordinates::new(52.37, 4.89).unwrap();
        let mut config = AirQualityConfig::default();
        assert!(config.request_url(at).is_err());

        config.api_key = Some("k".into());
        assert_eq!(
            config.request_url(at).unwrap(),
            "https://api.openweathermap.org/data/2.5/air_pollution?lat=52.37&lon=4.89&appid=k"
        );
    }
}
