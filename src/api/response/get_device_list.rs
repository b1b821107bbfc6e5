use crate::model::DeviceType;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
pub struct Data {
    #[serde(default)]
    pub ps_id: Value,
    pub ps_key: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub device_sn: Option<String>,
    pub device_type: DeviceType,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDeviceList {
    #[serde(default)]
    pub page_list: Option<Vec<Data>>,
    #[serde(default)]
    pub row_count: Option<u64>,
}
