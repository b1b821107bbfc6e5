pub mod auth;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod response;

use crate::model::{
    self, AuthMode, Credentials, DeviceType, OAuthSession, PlantStatus, Session, TokenSession,
};
use crate::points;
use crate::token_store::TokenStore;
use auth::{AuthStrategy, Renewal};
use chrono::{Duration, Utc};
pub use error::Error;
use response::get_device_list::GetDeviceList;
use response::get_device_real_time::GetDeviceRealTime;
use response::get_plant_list::{GetPlantList, RawQuantity};
use response::{scalar_string, LoginData, TokenData};
use serde_json::{json, Map, Value};
use std::sync::RwLock;
use tokio::sync::Mutex;

pub const DEFAULT_HOST: &str = "https://gateway.isolarcloud.com";
pub const DEFAULT_APPKEY: &str = "B0455FBE7AA0328DB57B59AA729F05D8";
pub const DEFAULT_AUTHORIZE_URL: &str = "https://web3.isolarcloud.com/#/authorized-app";

pub const PAGE_SIZE: u32 = 100;

/* Upper bound for vendor supplied token lifetimes */
const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 3600;

/// Map a failed HTTP exchange to Error
fn map_api_err(error: reqwest::Error) -> Error {
    Error::Transport(error.to_string())
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn quantity(raw: Option<RawQuantity>) -> Option<model::Quantity> {
    raw.map(|raw| model::Quantity {
        value: match &raw.value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        },
        unit: raw.unit.unwrap_or_default(),
    })
}

/// Browser URL that starts the OAuth authorization-code flow.
pub fn authorize_url(base: &str, application_id: &str, redirect_uri: &str) -> String {
    format!(
        "{}?applicationId={}&redirectUrl={}",
        base,
        urlencoding::encode(application_id),
        urlencoding::encode(redirect_uri)
    )
}

/// iSolarCloud open API client.
///
/// Owns the single live [`Session`]. Authenticated calls log in (or refresh)
/// on demand and are retried at most once after the gateway rejects the
/// token. Re-authentication is serialized: concurrent callers that hit an
/// expired token share one login.
pub struct Client {
    credentials: Credentials,
    strategy: Box<dyn AuthStrategy>,
    store: TokenStore,
    http: reqwest::Client,
    session: RwLock<Option<Session>>,
    auth_lock: Mutex<()>,
    /* Last session whose renewal failed, with the failure */
    failed_renewal: RwLock<Option<(Session, Error)>>,
}

impl Client {
    pub fn new(
        mut credentials: Credentials,
        strategy: Box<dyn AuthStrategy>,
        store: TokenStore,
    ) -> Result<Client, Error> {
        let http = reqwest::ClientBuilder::new()
            .build()
            .map_err(|e| Error::Configuration(format!("Unable to build HTTP client: {}", e)))?;

        credentials.host = credentials.host.trim_end_matches('/').to_string();
        let session = store.load();

        Ok(Client {
            credentials,
            strategy,
            store,
            http,
            session: RwLock::new(session),
            auth_lock: Mutex::new(()),
            failed_renewal: RwLock::new(None),
        })
    }

    pub fn from_credentials(
        mode: AuthMode,
        credentials: Credentials,
        store: TokenStore,
    ) -> Result<Client, Error> {
        let strategy = auth::strategy(mode, &credentials)?;
        Client::new(credentials, strategy, store)
    }

    pub fn mode(&self) -> AuthMode {
        self.strategy.mode()
    }

    pub fn host(&self) -> &str {
        &self.credentials.host
    }

    pub fn appkey(&self) -> &str {
        &self.credentials.appkey
    }

    pub fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .map(|session| session.is_some())
            .unwrap_or(false)
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|session| session.clone())
    }

    fn set_session(&self, session: Option<Session>) {
        if let Ok(mut current) = self.session.write() {
            *current = session;
        } else {
            log::error!("Session lock poisoned, session not updated");
        }
    }

    /// Make `session` the live one and write it to the token store. A failed
    /// write only costs a login after the next restart.
    fn persist(&self, session: &Session) {
        self.set_session(Some(session.clone()));
        if let Err(e) = self.store.save(session) {
            log::error!("Failed to save token: {}", e);
        }
    }

    /// Forget the session in memory and on disk.
    pub fn logout(&self) -> Result<(), Error> {
        self.set_session(None);
        self.store.clear()
    }

    /// POST `params` to `endpoint` and parse the JSON reply. Envelope status
    /// is left to the caller.
    async fn send(
        &self,
        endpoint: &endpoint::Endpoint,
        params: Map<String, Value>,
        session: Option<&Session>,
    ) -> Result<Value, Error> {
        let request = self.strategy.seal(params, session)?;
        let url = format!("{}{}", self.credentials.host, endpoint);

        log::info!("API Request: {}", endpoint);
        log::trace!("endpoint: {}, body: {}", endpoint, request.body);

        let response = request
            .headers
            .iter()
            .fold(self.http.post(url), |builder, (name, value)| {
                builder.header(*name, value.as_str())
            })
            .body(request.body.clone())
            .send()
            .await
            .map_err(map_api_err)?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Error reading API response: {}", e)))?;

        if status == http::StatusCode::UNAUTHORIZED {
            log::info!("API Response: {} HTTP {}", endpoint, status);
            return Err(match session {
                Some(_) => Error::InvalidToken,
                None => Error::Authentication(format!("Unauthorized: {}", endpoint)),
            });
        }

        let response_text = self.strategy.open(&request, response_text)?;
        log::trace!("endpoint: {}, response_text: {}", endpoint, response_text);

        let value: Value = serde_json::from_str(&response_text).map_err(|e| {
            Error::InvalidResponse(format!("{} (HTTP {}): {}", e, status, response_text))
        })?;

        log::info!(
            "API Response: {} {} {}",
            endpoint,
            value
                .get("result_code")
                .and_then(scalar_string)
                .unwrap_or_else(|| "-".to_string()),
            value
                .get("result_msg")
                .and_then(scalar_string)
                .or_else(|| value.get("error").and_then(scalar_string))
                .unwrap_or_else(|| "-".to_string())
        );

        Ok(value)
    }

    /// Authenticated call. The invalid-token signal triggers one renewal and
    /// one resend; every other failure is returned as is.
    async fn call(&self, endpoint: &endpoint::Endpoint, body: Value) -> Result<Value, Error> {
        let body = params(body);
        let session = self.ensure_session().await?;

        match self
            .send(endpoint, body.clone(), Some(&session))
            .await
            .and_then(response::map_response_status)
        {
            Err(Error::InvalidToken) => {
                log::info!("Token invalid on {}, attempting re-authentication", endpoint);
                let renewed = self.renew(&session).await?;

                self.send(endpoint, body, Some(&renewed))
                    .await
                    .and_then(response::map_response_status)
                    .map_err(|e| match e {
                        Error::InvalidToken => {
                            Error::Authentication("Authentication failed".to_string())
                        }
                        e => e,
                    })
            }
            result => result,
        }
    }

    async fn ensure_session(&self) -> Result<Session, Error> {
        match self.session() {
            Some(Session::OAuth(oauth)) if oauth.is_expired(Utc::now()) => {
                log::info!("Access token expired, refreshing");
                self.renew(&Session::OAuth(oauth)).await
            }
            Some(session) => Ok(session),
            None => {
                let _guard = self.auth_lock.lock().await;
                if let Some(session) = self.session() {
                    return Ok(session);
                }

                match self.strategy.renewal() {
                    Renewal::PasswordLogin => self.login_locked().await,
                    Renewal::Authorization => Err(Error::Authentication(
                        "Not authorized, complete the iSolarCloud authorization first".to_string(),
                    )),
                }
            }
        }
    }

    /// Replace the rejected `stale` session. Runs under the auth lock; when
    /// another caller already replaced it, that session is reused.
    async fn renew(&self, stale: &Session) -> Result<Session, Error> {
        let _guard = self.auth_lock.lock().await;

        match self.session() {
            Some(current) if &current != stale => {
                log::debug!("Session already renewed by a concurrent request");
                return Ok(current);
            }
            Some(_) => {}
            None => {
                if let Some(error) = self.failed_renewal_of(stale) {
                    log::debug!("Renewal of this session already failed: {}", error);
                    return Err(error);
                }
            }
        }
        self.set_session(None);

        let renewed = match stale {
            Session::OAuth(oauth) => self.refresh_locked(&oauth.refresh_token).await,
            Session::Token(_) => self.login_locked().await,
        };

        let renewed = renewed.map_err(|e| {
            log::warn!("Re-authentication failed: {}", e);
            match e {
                Error::Authentication(_) | Error::Configuration(_) => e,
                e => Error::Authentication(format!("Authentication failed: {}", e)),
            }
        });

        if let Ok(mut failed) = self.failed_renewal.write() {
            *failed = renewed
                .as_ref()
                .err()
                .map(|e| (stale.clone(), e.clone()));
        }
        renewed
    }

    fn failed_renewal_of(&self, stale: &Session) -> Option<Error> {
        self.failed_renewal
            .read()
            .ok()?
            .as_ref()
            .filter(|(session, _)| session == stale)
            .map(|(_, error)| error.clone())
    }

    pub async fn login(&self) -> Result<(), Error> {
        let _guard = self.auth_lock.lock().await;
        self.login_locked().await.map(|_| ())
    }

    async fn login_locked(&self) -> Result<Session, Error> {
        let (username, password) = match (
            self.credentials.username.as_deref(),
            self.credentials.password.as_deref(),
        ) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => (u, p),
            _ => {
                return Err(Error::Configuration(
                    "Username and password required".to_string(),
                ))
            }
        };

        log::info!("Logging in as {}...", username);

        let body = params(json!({
            "user_account": username,
            "user_password": password,
        }));
        let value = self.send(endpoint::LOGIN, body, None).await?;

        /* A login reply is judged by `login_state` even when `result_code` is absent */
        let login = match value
            .get("result_data")
            .filter(|data| data.get("login_state").is_some())
        {
            Some(data) => serde_json::from_value::<LoginData>(data.clone())
                .map_err(|e| Error::InvalidResponse(format!("Unexpected login response: {}", e)))?,
            None => {
                return Err(match response::map_response_status(value) {
                    Err(Error::InvalidToken) | Ok(_) => {
                        Error::Authentication("Login failed".to_string())
                    }
                    Err(e) => Error::Authentication(e.to_string()),
                })
            }
        };

        match login.token() {
            Some(token) => {
                let session = Session::Token(TokenSession {
                    token: token.to_string(),
                    user_id: scalar_string(&login.user_id),
                    saved_at: Some(Utc::now()),
                });
                self.persist(&session);
                log::info!("Login successful");
                Ok(session)
            }
            None => {
                let reason = login.failure_reason();
                log::warn!("Login failed: {}", reason);
                Err(Error::Authentication(reason))
            }
        }
    }

    fn accept_token(&self, value: Value) -> Result<Session, Error> {
        let data = response::map_response_status(value).map_err(|e| match e {
            Error::InvalidToken => Error::Authentication("Token exchange failed".to_string()),
            e => Error::Authentication(e.to_string()),
        })?;
        let token = serde_json::from_value::<TokenData>(data)
            .map_err(|e| Error::InvalidResponse(format!("Unexpected token response: {}", e)))?;

        let expires_at = token
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs.clamp(0, MAX_EXPIRES_IN_SECS)));
        let session = Session::OAuth(OAuthSession {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            expires_at,
            auth_ps_list: token.auth_ps_list,
            auth_user: token.auth_user,
        });

        self.persist(&session);
        Ok(session)
    }

    /// Trade an authorization code for an access/refresh token pair.
    pub async fn exchange_code_for_token(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Session, Error> {
        let _guard = self.auth_lock.lock().await;
        log::info!("Exchanging authorization code");

        let body = params(json!({
            "grant_type": "authorization_code",
            "code": code,
            "redirect_uri": redirect_uri,
        }));
        let value = self.send(endpoint::OAUTH_TOKEN, body, None).await?;
        self.accept_token(value)
    }

    async fn refresh_locked(&self, refresh_token: &str) -> Result<Session, Error> {
        log::info!("Refreshing access token");

        let body = params(json!({ "refresh_token": refresh_token }));
        let value = self.send(endpoint::OAUTH_REFRESH, body, None).await?;
        self.accept_token(value)
    }

    /// Refresh the OAuth pair. Never fails; reports success instead.
    pub async fn refresh_token(&self) -> bool {
        let _guard = self.auth_lock.lock().await;

        let refresh_token = match self.session() {
            Some(Session::OAuth(oauth)) => oauth.refresh_token,
            _ => {
                log::warn!("No refresh token available");
                return false;
            }
        };

        match self.refresh_locked(&refresh_token).await {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Token refresh failed: {}", e);
                false
            }
        }
    }

    pub async fn plant_list(&self, page: u32, size: u32) -> Result<Value, Error> {
        self.call(endpoint::PLANTS, json!({ "curPage": page, "size": size }))
            .await
    }

    pub async fn plant_detail(&self, sn: &str) -> Result<Value, Error> {
        self.call(
            endpoint::PLANT_DETAIL,
            json!({ "sn": sn, "is_get_ps_remarks": "1" }),
        )
        .await
    }

    pub async fn device_list(&self, ps_id: &str, page: u32, size: u32) -> Result<Value, Error> {
        self.call(
            endpoint::DEVICES,
            json!({ "ps_id": ps_id, "curPage": page, "size": size }),
        )
        .await
    }

    /// Real-time readings for `ps_keys`, requesting the measuring points of
    /// `device_type`.
    pub async fn real_time_data(
        &self,
        ps_keys: &[String],
        device_type: DeviceType,
    ) -> Result<Value, Error> {
        let point_ids = points::point_ids_for(&device_type);

        self.call(
            endpoint::DEVICE_REAL_TIME,
            json!({
                "device_type": device_type.code(),
                "point_id_list": point_ids,
                "ps_key_list": ps_keys,
            }),
        )
        .await
    }

    /// First page of plants, typed.
    pub async fn plants(&self) -> Result<Vec<model::Plant>, Error> {
        let data = self.plant_list(1, PAGE_SIZE).await?;
        let response = serde_json::from_value::<GetPlantList>(data)
            .map_err(|e| Error::InvalidResponse(format!("Unexpected plant list: {}", e)))?;

        let plants = response
            .page_list
            .unwrap_or_default()
            .into_iter()
            .filter_map(|resp| {
                let id = scalar_string(&resp.ps_id)?;
                Some(model::Plant {
                    name: resp.ps_name.unwrap_or_else(|| format!("Plant {}", id)),
                    status: match scalar_string(&resp.ps_status).as_deref() {
                        Some("1") => PlantStatus::Online,
                        _ => PlantStatus::Offline,
                    },
                    current_power: quantity(resp.curr_power),
                    today_energy: quantity(resp.today_energy),
                    total_energy: quantity(resp.total_energy),
                    capacity: quantity(resp.total_capcity),
                    id,
                })
            })
            .collect();
        Ok(plants)
    }

    /// First page of devices of plant `ps_id`, typed.
    pub async fn devices(&self, ps_id: &str) -> Result<Vec<model::Device>, Error> {
        let data = self.device_list(ps_id, 1, PAGE_SIZE).await?;
        let response = serde_json::from_value::<GetDeviceList>(data)
            .map_err(|e| Error::InvalidResponse(format!("Unexpected device list: {}", e)))?;

        let devices = response
            .page_list
            .unwrap_or_default()
            .into_iter()
            .map(|resp| model::Device {
                plant_id: scalar_string(&resp.ps_id).unwrap_or_else(|| ps_id.to_string()),
                name: resp
                    .device_name
                    .unwrap_or_else(|| resp.ps_key.to_owned()),
                serial: resp.device_sn,
                device_type: resp.device_type,
                ps_key: resp.ps_key,
            })
            .collect();
        Ok(devices)
    }

    /// Parsed readings for `ps_keys`.
    pub async fn readings(
        &self,
        ps_keys: &[String],
        device_type: DeviceType,
    ) -> Result<Vec<model::DeviceReadings>, Error> {
        let data = self.real_time_data(ps_keys, device_type).await?;
        let response = serde_json::from_value::<GetDeviceRealTime>(data)
            .map_err(|e| Error::InvalidResponse(format!("Unexpected real-time data: {}", e)))?;

        if let Some(failed) = response.fail_ps_key_list.filter(|f| !f.is_empty()) {
            log::warn!("No real-time data for: {}", failed.join(", "));
        }

        let readings = response
            .device_point_list
            .unwrap_or_default()
            .into_iter()
            .filter_map(|resp| {
                let point = resp.device_point.unwrap_or_default();
                let ps_key = resp.ps_key.or_else(|| {
                    point
                        .get("ps_key")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })?;
                Some(model::DeviceReadings {
                    ps_key,
                    device_time: point.get("device_time").and_then(scalar_string),
                    readings: points::parse_device_points(&point),
                })
            })
            .collect();
        Ok(readings)
    }
}
