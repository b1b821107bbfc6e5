use chrono::{DateTime, Duration, Utc};
use num_derive::FromPrimitive;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::api::Error;
use crate::points::MeasuringPoint;

pub type OtherDeviceType = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum KnownDeviceType {
    Inverter = 1,
    Ess = 14,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Known(KnownDeviceType),
    Other(OtherDeviceType),
}

impl DeviceType {
    pub fn from_code(code: u64) -> DeviceType {
        match num::FromPrimitive::from_u64(code) {
            Some(known) => DeviceType::Known(known),
            None => DeviceType::Other(code),
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            DeviceType::Known(known) => *known as u64,
            DeviceType::Other(code) => *code,
        }
    }

    pub fn is_ess(&self) -> bool {
        *self == DeviceType::Known(KnownDeviceType::Ess)
    }
}

/// Which signing scheme the vendor gateway expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Plain,
    Secret,
    Encrypted,
    #[serde(rename = "oauth")]
    OAuth,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Plain => "plain",
            AuthMode::Secret => "secret",
            AuthMode::Encrypted => "encrypted",
            AuthMode::OAuth => "oauth",
        }
    }
}

impl std::str::FromStr for AuthMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(AuthMode::Plain),
            "secret" => Ok(AuthMode::Secret),
            "encrypted" => Ok(AuthMode::Encrypted),
            "oauth" => Ok(AuthMode::OAuth),
            other => Err(Error::Configuration(format!("Unknown auth mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub host: String,
    pub appkey: String,
    pub secret_key: Option<String>,
    pub rsa_public_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    /// Whether everything `mode` needs to talk to the gateway is present.
    pub fn is_configured(&self, mode: AuthMode) -> bool {
        let has = |v: &Option<String>| v.as_deref().map_or(false, |s| !s.is_empty());
        let login = has(&self.username) && has(&self.password);

        !self.appkey.is_empty()
            && match mode {
                AuthMode::Plain => login,
                AuthMode::Secret => login && has(&self.secret_key),
                AuthMode::Encrypted => {
                    login && has(&self.secret_key) && has(&self.rsa_public_key)
                }
                AuthMode::OAuth => has(&self.secret_key),
            }
    }
}

/* The gateway hands out user ids as strings or numbers; older records kept either */
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/* Persisted as {token, userId, savedAt} */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSession {
    pub token: String,
    #[serde(rename = "userId", default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
    #[serde(rename = "savedAt", default)]
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auth_ps_list: Option<Value>,
    #[serde(default)]
    pub auth_user: Option<Value>,
}

/// Seconds before `expires_at` at which an access token is treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

impl OAuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|at| now + Duration::seconds(EXPIRY_MARGIN_SECS) >= at)
            .unwrap_or(false)
    }
}

/// The live authentication material of one client. Replaced wholesale on
/// every login or refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Session {
    OAuth(OAuthSession),
    Token(TokenSession),
}

/// A vendor `{value, unit}` pair. `value` arrives as a string, a number or `--`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quantity {
    pub value: Option<f64>,
    pub unit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlantStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plant {
    pub id: String,
    pub name: String,
    pub status: PlantStatus,
    pub current_power: Option<Quantity>,
    pub today_energy: Option<Quantity>,
    pub total_energy: Option<Quantity>,
    pub capacity: Option<Quantity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    pub plant_id: String,
    pub ps_key: String,
    pub name: String,
    pub serial: Option<String>,
    pub device_type: DeviceType,
}

#[derive(Debug, Clone)]
pub struct Reading {
    pub point_id: String,
    pub value: Option<f64>,
    pub point: Option<&'static MeasuringPoint>,
}

#[derive(Debug, Clone)]
pub struct DeviceReadings {
    pub ps_key: String,
    pub device_time: Option<String>,
    pub readings: Vec<Reading>,
}

impl DeviceReadings {
    pub fn value(&self, point_id: &str) -> Option<f64> {
        self.readings
            .iter()
            .find(|r| r.point_id == point_id)
            .and_then(|r| r.value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn device_type_from_code() {
        assert_eq!(
            DeviceType::Known(KnownDeviceType::Ess),
            DeviceType::from_code(14)
        );
        assert_eq!(
            DeviceType::Known(KnownDeviceType::Inverter),
            DeviceType::from_code(1)
        );
        assert_eq!(DeviceType::Other(11), DeviceType::from_code(11));
        assert_eq!(11, DeviceType::Other(11).code());
        assert!(DeviceType::from_code(14).is_ess());
    }

    #[test]
    fn session_record_shapes() {
        let token: Session = serde_json::from_str(
            r#"{"token":"abc","userId":"42","savedAt":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(matches!(token, Session::Token(ref t) if t.token == "abc"));

        let oauth: Session = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":3600,
                "expires_at":"2024-05-01T11:00:00Z","auth_ps_list":["1"],"auth_user":7}"#,
        )
        .unwrap();
        assert!(matches!(oauth, Session::OAuth(ref o) if o.refresh_token == "r"));
    }

    #[test]
    fn oauth_expiry_has_margin() {
        let now = Utc::now();
        let session = OAuthSession {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: Some(30),
            expires_at: Some(now + Duration::seconds(30)),
            auth_ps_list: None,
            auth_user: None,
        };
        assert!(session.is_expired(now));

        let fresh = OAuthSession {
            expires_at: Some(now + Duration::seconds(3600)),
            ..session.clone()
        };
        assert!(!fresh.is_expired(now));

        let unknown = OAuthSession {
            expires_at: None,
            ..session
        };
        assert!(!unknown.is_expired(now));
    }

    #[test]
    fn auth_mode_from_str() {
        assert_eq!(AuthMode::OAuth, "OAuth".parse().unwrap());
        assert_eq!(AuthMode::Encrypted, " encrypted ".parse().unwrap());
        assert!(matches!(
            "token".parse::<AuthMode>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn configured_per_mode() {
        let credentials = Credentials {
            host: "https://gateway.isolarcloud.com".to_string(),
            appkey: "key".to_string(),
            secret_key: None,
            rsa_public_key: None,
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
        };
        assert!(credentials.is_configured(AuthMode::Plain));
        assert!(!credentials.is_configured(AuthMode::Secret));
        assert!(!credentials.is_configured(AuthMode::OAuth));
    }
}
