use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Deserialize)]
pub struct Data {
    #[serde(default)]
    pub ps_key: Option<String>,
    #[serde(default)]
    pub device_point: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
pub struct GetDeviceRealTime {
    #[serde(default)]
    pub device_point_list: Option<Vec<Data>>,
    #[serde(default)]
    pub fail_ps_key_list: Option<Vec<String>>,
}
