pub mod device_type;
pub mod get_device_list;
pub mod get_device_real_time;
pub mod get_plant_list;

use crate::api::Error;
use serde::Deserialize;
use serde_json::Value;

pub const SUCCESS: &str = "1";

/* Result code / message the gateway uses for an expired or revoked token */
const TOKEN_INVALID_CODE: &str = "E00003";
const TOKEN_INVALID_MSG: &str = "er_token_login_invalid";
const OAUTH_INVALID_TOKEN: &str = "invalid_token";

/// Render a scalar the gateway sends either as a string or as a number.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field(value: &Value, name: &str) -> Option<String> {
    value.get(name).and_then(scalar_string)
}

/// Whether `value` carries the invalid-token signal.
pub fn is_invalid_token(value: &Value) -> bool {
    field(value, "result_code").as_deref() == Some(TOKEN_INVALID_CODE)
        || field(value, "result_msg").as_deref() == Some(TOKEN_INVALID_MSG)
        || field(value, "error").as_deref() == Some(OAUTH_INVALID_TOKEN)
}

/// Process a parsed gateway response. Return `result_data` for a successful
/// envelope, `Error::InvalidToken` for the token signal, and a vendor error
/// carrying the gateway message for anything else.
pub fn map_response_status(value: Value) -> Result<Value, Error> {
    if is_invalid_token(&value) {
        return Err(Error::InvalidToken);
    }

    /* OAuth style: {"error": "...", "error_description": "..."} */
    if let Some(error) = field(&value, "error") {
        let message = field(&value, "error_description").unwrap_or(error);
        return Err(Error::Vendor(message));
    }

    match field(&value, "result_code") {
        Some(code) if code == SUCCESS => Ok(value
            .get("result_data")
            .cloned()
            .unwrap_or(Value::Null)),
        code => Err(Error::Vendor(
            field(&value, "result_msg")
                .filter(|msg| !msg.is_empty())
                .unwrap_or_else(|| {
                    format!("API error: {}", code.as_deref().unwrap_or("unknown"))
                }),
        )),
    }
}

#[derive(Deserialize)]
pub struct LoginData {
    #[serde(default)]
    pub login_state: Value,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user_id: Value,
    #[serde(default)]
    pub msg: Option<String>,
}

impl LoginData {
    pub fn state(&self) -> Option<String> {
        scalar_string(&self.login_state)
    }

    /// Token of a successful login, if this is one.
    pub fn token(&self) -> Option<&str> {
        match self.state().as_deref() {
            Some(SUCCESS) => self.token.as_deref().filter(|t| !t.is_empty()),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> String {
        let mapped = match self.state().as_deref() {
            Some("-1") => Some("Account does not exist"),
            Some("0") => Some("Incorrect password"),
            Some("2") => Some("Account locked due to incorrect password"),
            Some("5") => Some("Account locked by admin"),
            _ => None,
        };

        mapped
            .map(str::to_string)
            .or_else(|| self.msg.clone().filter(|m| !m.is_empty()))
            .unwrap_or_else(|| "Login failed".to_string())
    }
}

#[derive(Deserialize)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub auth_ps_list: Option<Value>,
    #[serde(default)]
    pub auth_user: Option<Value>,
}
