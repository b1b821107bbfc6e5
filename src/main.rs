#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use chrono::{DateTime, Utc};
use config::Config;
use isolarcloud_rs::api::{self, PAGE_SIZE};
use isolarcloud_rs::model::{AuthMode, Credentials, DeviceType, KnownDeviceType};
use isolarcloud_rs::token_store::DEFAULT_TOKEN_FILE;
use isolarcloud_rs::{Client, TokenStore};
use rocket::fs::FileServer;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Instant;

mod metrics;

const CALLBACK_PATH: &str = "/api/auth/callback";

#[derive(Clone, serde::Deserialize)]
pub struct Settings {
    host: String,
    appkey: String,
    secret_key: Option<String>,
    rsa_public_key: Option<String>,
    username: Option<String>,
    password: Option<String>,
    auth_mode: String,
    external_url: Option<String>,
    authorize_url: String,
    application_id: Option<String>,
    token_file: String,
    poll_interval: u64,
    static_dir: Option<String>,
}

impl Settings {
    fn credentials(&self) -> Credentials {
        Credentials {
            host: self.host.to_owned(),
            appkey: self.appkey.to_owned(),
            secret_key: self.secret_key.to_owned(),
            rsa_public_key: self.rsa_public_key.to_owned(),
            username: self.username.to_owned(),
            password: self.password.to_owned(),
        }
    }

    fn auth_mode(&self) -> Result<AuthMode, api::Error> {
        self.auth_mode.parse()
    }

    /// Where iSolarCloud sends the browser back after authorization.
    fn redirect_uri(&self) -> Option<String> {
        self.external_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(|url| format!("{}{}", url.trim_end_matches('/'), CALLBACK_PATH))
    }

    fn authorization_link(&self) -> Option<String> {
        let application_id = self.application_id.as_deref().filter(|id| !id.is_empty())?;
        let redirect_uri = self.redirect_uri()?;
        Some(api::authorize_url(
            &self.authorize_url,
            application_id,
            &redirect_uri,
        ))
    }
}

/// Last successful plant list and the outcome of the latest attempt.
#[derive(Default)]
struct Cache {
    plants: Option<Value>,
    last_update: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Structure containing state for API handlers.
pub struct StateData {
    settings: Settings,
    client: Result<Client, api::Error>,
    cache: Mutex<Cache>,
    /// Timestamp of last successful metric collection via `metrics::collect()`
    timestamp: Mutex<Option<Instant>>,
}

impl StateData {
    fn client(&self) -> Result<&Client, api::Error> {
        self.client.as_ref().map_err(|e| e.clone())
    }

    fn configured(&self) -> bool {
        match (&self.client, self.settings.auth_mode()) {
            (Ok(_), Ok(mode)) => self.settings.credentials().is_configured(mode),
            _ => false,
        }
    }

    fn authenticated(&self) -> bool {
        self.client
            .as_ref()
            .map(|client| client.is_authenticated())
            .unwrap_or(false)
    }

    fn record_plants(&self, plants: &Value) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.plants = Some(plants.clone());
            cache.last_update = Some(Utc::now());
            cache.error = None;
        }
    }

    fn record_error(&self, error: &api::Error) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.error = Some(error.to_string());
        }
    }

    fn reset_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = Cache::default();
        }
    }

    /// Updates `timestamp` to `now()`.
    fn touch(&self) {
        if let Ok(mut ts) = self.timestamp.lock() {
            *ts = Some(Instant::now());
        } else {
            log::trace!("Unable to lock timestamp mutex, will refresh again")
        }
    }

    /// Checks whether `interval_seconds` elapsed since last `touch()`
    fn interval_elapsed(&self, interval_secs: u64) -> bool {
        let elapsed_opt = self
            .timestamp
            .lock()
            .ok()
            .and_then(|a| a.map(|b| b.elapsed().as_secs()));

        if let Some(elapsed) = elapsed_opt {
            elapsed > interval_secs
        } else {
            /* If there is None timestamp/elapsed, always return true to trigger action */
            true
        }
    }
}

pub fn read_settings() -> Result<Settings, config::ConfigError> {
    let mut settings = Config::default();
    settings
        .set_default("host", api::DEFAULT_HOST)?
        .set_default("appkey", api::DEFAULT_APPKEY)?
        .set_default("auth_mode", AuthMode::Plain.as_str())?
        .set_default("authorize_url", api::DEFAULT_AUTHORIZE_URL)?
        .set_default("token_file", DEFAULT_TOKEN_FILE)?
        .set_default("poll_interval", 300i64)?
        .merge(config::Environment::with_prefix("SUNGROW"))?;

    settings.try_into()
}

#[get("/api/health")]
fn health_route(state: &State<StateData>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "configured": state.configured(),
        "authenticated": state.authenticated(),
        "host": state.settings.host,
        "auth_mode": state.settings.auth_mode,
    }))
}

#[get("/api/status")]
fn status_route(state: &State<StateData>) -> Json<Value> {
    let (cached, last_update, error) = match state.cache.lock() {
        Ok(cache) => (cache.plants.is_some(), cache.last_update, cache.error.clone()),
        Err(_) => (false, None, None),
    };

    Json(json!({
        "configured": state.configured(),
        "authenticated": state.authenticated(),
        "cached": cached,
        "lastUpdate": last_update,
        "error": error,
    }))
}

#[get("/api/plants")]
async fn plants_route(state: &State<StateData>) -> Result<Json<Value>, api::Error> {
    let result = match state.client() {
        Ok(client) => client.plant_list(1, PAGE_SIZE).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(plants) => {
            state.record_plants(&plants);
            Ok(Json(plants))
        }
        Err(e) => {
            state.record_error(&e);
            Err(e)
        }
    }
}

#[get("/api/plants/<sn>")]
async fn plant_detail_route(sn: &str, state: &State<StateData>) -> Result<Json<Value>, api::Error> {
    Ok(Json(state.client()?.plant_detail(sn).await?))
}

#[get("/api/devices/<ps_id>")]
async fn devices_route(ps_id: &str, state: &State<StateData>) -> Result<Json<Value>, api::Error> {
    Ok(Json(state.client()?.device_list(ps_id, 1, PAGE_SIZE).await?))
}

#[derive(FromForm)]
struct RealTimeQuery {
    #[field(name = "type")]
    #[field(default = KnownDeviceType::Ess as u64)]
    device_type: u64,
}

fn default_device_type() -> u64 {
    KnownDeviceType::Ess as u64
}

#[derive(serde::Deserialize)]
struct RealTimeRequest {
    ps_key_list: Vec<String>,
    #[serde(default = "default_device_type")]
    device_type: u64,
}

#[get("/api/realtime/<ps_key>?<query..>")]
async fn realtime_route(
    ps_key: &str,
    query: RealTimeQuery,
    state: &State<StateData>,
) -> Result<Json<Value>, api::Error> {
    let device_type = DeviceType::from_code(query.device_type);
    let data = state
        .client()?
        .real_time_data(&[ps_key.to_string()], device_type)
        .await?;

    Ok(Json(data))
}

#[post("/api/realtime", format = "json", data = "<request>")]
async fn realtime_bulk_route(
    request: Json<RealTimeRequest>,
    state: &State<StateData>,
) -> Result<Json<Value>, api::Error> {
    let device_type = DeviceType::from_code(request.device_type);
    let data = state
        .client()?
        .real_time_data(&request.ps_key_list, device_type)
        .await?;

    Ok(Json(data))
}

#[post("/api/login")]
async fn login_route(state: &State<StateData>) -> Result<Json<Value>, api::Error> {
    state.client()?.login().await?;
    Ok(Json(json!({ "success": true })))
}

/// Forget the session and everything cached on its behalf.
fn logout(state: &StateData) -> Result<Json<Value>, api::Error> {
    state.reset_cache();
    state.client()?.logout()?;
    Ok(Json(json!({ "success": true })))
}

#[post("/api/logout")]
fn logout_route(state: &State<StateData>) -> Result<Json<Value>, api::Error> {
    logout(state)
}

#[get("/api/auth/status")]
fn auth_status_route(state: &State<StateData>) -> Json<Value> {
    Json(json!({
        "authenticated": state.authenticated(),
        "authorize_url": state.settings.authorization_link(),
    }))
}

#[get("/api/auth/callback?<code>")]
async fn auth_callback_route(
    code: Option<&str>,
    state: &State<StateData>,
) -> Result<Redirect, api::Error> {
    let code = code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| api::Error::Authentication("Missing authorization code".to_string()))?;
    let redirect_uri = state
        .settings
        .redirect_uri()
        .ok_or_else(|| api::Error::Configuration("External URL required".to_string()))?;

    state
        .client()?
        .exchange_code_for_token(code, &redirect_uri)
        .await?;
    log::info!("Authorization complete");

    Ok(Redirect::to("/"))
}

#[post("/api/auth/logout")]
fn auth_logout_route(state: &State<StateData>) -> Result<Json<Value>, api::Error> {
    logout(state)
}

#[get("/metrics")]
async fn metrics_route(state: &State<StateData>) -> Result<String, api::Error> {
    if state.interval_elapsed(state.settings.poll_interval) {
        metrics::collect(state.client()?).await?;
        state.touch();
    } else {
        log::info!("interval time not yet elapsed since last run; returning cached result")
    }
    metrics::read().await
}

/// Requests rejected before reaching a handler still answer with `{error}`.
#[catch(default)]
fn default_catcher(status: Status, request: &Request) -> (Status, Json<Value>) {
    log::warn!("{} {} failed: {}", request.method(), request.uri(), status);

    let reason = status.reason().unwrap_or("Request failed");
    (status, Json(json!({ "error": reason })))
}

pub fn build(settings: Settings) -> Rocket<Build> {
    let client = settings.auth_mode().and_then(|mode| {
        Client::from_credentials(
            mode,
            settings.credentials(),
            TokenStore::new(&settings.token_file),
        )
    });

    match &client {
        Ok(client) => log::info!(
            "Host: {}, auth mode: {}, token file: {}",
            client.host(),
            client.mode().as_str(),
            settings.token_file
        ),
        Err(e) => log::error!("iSolarCloud client unavailable: {}", e),
    }

    let static_dir = settings.static_dir.clone();
    let state = StateData {
        settings,
        client,
        cache: Mutex::new(Cache::default()),
        timestamp: Mutex::new(None),
    };

    let rocket = rocket::build()
        .manage(state)
        .register("/", catchers![default_catcher])
        .mount(
        "/",
        routes![
            health_route,
            status_route,
            plants_route,
            plant_detail_route,
            devices_route,
            realtime_route,
            realtime_bulk_route,
            login_route,
            logout_route,
            auth_status_route,
            auth_callback_route,
            auth_logout_route,
            metrics_route
        ],
    );

    match static_dir.filter(|dir| !dir.is_empty()) {
        Some(dir) => rocket.mount("/", FileServer::from(dir)),
        None => rocket,
    }
}

#[launch]
fn rocket() -> Rocket<Build> {
    env_logger::init();

    build(read_settings().expect("Configuration error"))
}
