//! JSON wire protocol carried in WebSocket text frames.
//!
//! Connect: `ws://host/ws/alerts?lat=<f64>&lon=<f64>`
//!
//! ```text
//! client ─► server   {"type":"report","latitude":..,"longitude":..,"description":".."}
//!                    {"type":"nearby","max_km":2.0}
//! server ─► client   {"type":"alert","alert":"..","latitude":..,"longitude":..,"accident_id":..}
//!                    {"type":"reported","id":..,"message":".."}
//!                    {"type":"nearby","alerts":[..]}
//!                    {"type":"error","message":".."}
//! ```

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;
use crate::store::AccidentReport;

/// Alert pushed to a vehicle near an accident. Built per broadcast, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub accident_id: u64,
    pub location: Coordinate,
    pub description: String,
}

impl AlertMessage {
    pub fn new(accident_id: u64, location: Coordinate, description: impl Into<String>) -> Self {
        Self {
            accident_id,
            location,
            description: description.into(),
        }
    }

    /// Human-readable alert line shown to drivers.
    pub fn alert_text(&self) -> String {
        format!("🚨 {} near your location!", self.description)
    }
}

impl From<&AccidentReport> for AlertMessage {
    fn from(report: &AccidentReport) -> Self {
        Self::new(report.id, report.location, report.description.clone())
    }
}

/// Frames sent by vehicles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Report an accident at the given position.
    Report {
        latitude: f64,
        longitude: f64,
        description: String,
    },
    /// Ask for stored accidents around the connection's own position.
    Nearby {
        #[serde(default)]
        max_km: Option<f64>,
    },
}

/// Stored accident as returned by the `nearby` read path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyAccident {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
}

impl From<&AccidentReport> for NearbyAccident {
    fn from(report: &AccidentReport) -> Self {
        Self {
            id: report.id,
            latitude: report.location.latitude,
            longitude: report.location.longitude,
            description: report.description.clone(),
        }
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Alert {
        alert: String,
        latitude: f64,
        longitude: f64,
        accident_id: u64,
    },
    Reported {
        id: u64,
        message: String,
    },
    Nearby {
        alerts: Vec<NearbyAccident>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn reported(id: u64) -> Self {
        Self::Reported {
            id,
            message: "Accident reported successfully".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn nearby<'a>(reports: impl IntoIterator<Item = &'a AccidentReport>) -> Self {
        Self::Nearby {
            alerts: reports.into_iter().map(NearbyAccident::from).collect(),
        }
    }
}

impl From<&AlertMessage> for ServerMessage {
    fn from(alert: &AlertMessage) -> Self {
        Self::Alert {
            alert: alert.alert_text(),
            latitude: alert.location.latitude,
            longitude: alert.location.longitude,
            accident_id: alert.accident_id,
        }
    }
}

/// Serialize a frame to its JSON text.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

/// Parse a frame from JSON text.
pub fn decode<'a, T: Deserialize<'a>>(text: &'a str) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
}

/// Extract `lat` and `lon` from a connect URI query string.
///
/// Other parameters are ignored. Range checks are left to the caller.
pub fn parse_location_query(query: Option<&str>) -> Result<Coordinate, ProtocolError> {
    let query = query.ok_or(ProtocolError::MissingParameter("lat"))?;

    let mut lat = None;
    let mut lon = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let slot = match key.as_ref() {
            "lat" | "latitude" => &mut lat,
            "lon" | "lng" | "longitude" => &mut lon,
            _ => continue,
        };
        let parsed = value
            .trim()
            .parse::<f64>()
            .map_err(|_| ProtocolError::InvalidParameter(key.to_string(), value.to_string()))?;
        *slot = Some(parsed);
    }

    let latitude = lat.ok_or(ProtocolError::MissingParameter("lat"))?;
    let longitude = lon.ok_or(ProtocolError::MissingParameter("lon"))?;
    Ok(Coordinate::new(latitude, longitude))
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    MissingParameter(&'static str),
    InvalidParameter(String, String),
    /// The WebSocket connect or upgrade failed
    ConnectFailed(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::MissingParameter(name) => write!(f, "Missing query parameter '{name}'"),
            Self::InvalidParameter(name, value) => {
                write!(f, "Invalid value '{value}' for query parameter '{name}'")
            }
            Self::ConnectFailed(e) => write!(f, "Connect failed: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_frame_shape() {
        let msg: ClientMessage = decode(
            r#"{"type":"report","latitude":12.5,"longitude":-3.25,"description":"collision"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Report {
                latitude: 12.5,
                longitude: -3.25,
                description: "collision".to_string(),
            }
        );
    }

    #[test]
    fn test_nearby_frame_radius_optional() {
        let msg: ClientMessage = decode(r#"{"type":"nearby"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Nearby { max_km: None });

        let msg: ClientMessage = decode(r#"{"type":"nearby","max_km":5.5}"#).unwrap();
        assert_eq!(msg, ClientMessage::Nearby { max_km: Some(5.5) });
    }

    #[test]
    fn test_unknown_frame_rejected() {
        assert!(decode::<ClientMessage>(r#"{"type":"teleport"}"#).is_err());
        assert!(decode::<ClientMessage>("not json").is_err());
        assert!(decode::<ClientMessage>(r#"{"type":"report","latitude":1.0}"#).is_err());
    }

    #[test]
    fn test_alert_frame_shape() {
        let alert = AlertMessage::new(42, Coordinate::new(0.01, 0.01), "collision");
        let text = encode(&ServerMessage::from(&alert)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "alert",
                "alert": "🚨 collision near your location!",
                "latitude": 0.01,
                "longitude": 0.01,
                "accident_id": 42,
            })
        );
    }

    #[test]
    fn test_reported_and_error_frames() {
        let value: serde_json::Value =
            serde_json::from_str(&encode(&ServerMessage::reported(3)).unwrap()).unwrap();
        assert_eq!(value["type"], "reported");
        assert_eq!(value["id"], 3);

        let value: serde_json::Value =
            serde_json::from_str(&encode(&ServerMessage::error("nope")).unwrap()).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "nope"}));
    }

    #[test]
    fn test_nearby_frame_from_reports() {
        let reports = vec![
            AccidentReport {
                id: 1,
                location: Coordinate::new(1.0, 2.0),
                description: "pileup".into(),
            },
            AccidentReport {
                id: 4,
                location: Coordinate::new(1.001, 2.0),
                description: "stalled truck".into(),
            },
        ];
        match ServerMessage::nearby(&reports) {
            ServerMessage::Nearby { alerts } => {
                assert_eq!(alerts.len(), 2);
                assert_eq!(alerts[1].id, 4);
                assert_eq!(alerts[1].description, "stalled truck");
            }
            other => panic!("expected nearby frame, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_location_query() {
        assert_eq!(
            parse_location_query(Some("lat=12.5&lon=-3.25")).unwrap(),
            Coordinate::new(12.5, -3.25)
        );
        assert_eq!(
            parse_location_query(Some("token=x&lon=1&lat=2")).unwrap(),
            Coordinate::new(2.0, 1.0)
        );
    }

    #[test]
    fn test_parse_location_query_decodes_escapes() {
        assert_eq!(
            parse_location_query(Some("lat=%2D12%2E5&lon=77.25")).unwrap(),
            Coordinate::new(-12.5, 77.25)
        );
        assert_eq!(
            parse_location_query(Some("lat=+12.5&l%6Fn=%2B3")).unwrap(),
            Coordinate::new(12.5, 3.0)
        );
    }

    #[test]
    fn test_parse_location_query_aliases() {
        let expected = Coordinate::new(48.85, 2.35);
        for query in [
            "lat=48.85&lon=2.35",
            "lat=48.85&lng=2.35",
            "lat=48.85&longitude=2.35",
            "latitude=48.85&lon=2.35",
            "latitude=48.85&lng=2.35",
            "latitude=48.85&longitude=2.35",
        ] {
            assert_eq!(parse_location_query(Some(query)).unwrap(), expected, "{query}");
        }
    }

    #[test]
    fn test_parse_location_query_errors() {
        assert_eq!(
            parse_location_query(None),
            Err(ProtocolError::MissingParameter("lat"))
        );
        assert_eq!(
            parse_location_query(Some("lat=1")),
            Err(ProtocolError::MissingParameter("lon"))
        );
        assert_eq!(
            parse_location_query(Some("lat=north&lon=1")),
            Err(ProtocolError::InvalidParameter("lat".into(), "north".into()))
        );
    }
}
