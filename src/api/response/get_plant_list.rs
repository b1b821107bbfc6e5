use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
pub struct RawQuantity {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Deserialize)]
pub struct Data {
    pub ps_id: Value,
    #[serde(default)]
    pub ps_name: Option<String>,
    #[serde(default)]
    pub ps_status: Value,
    #[serde(default)]
    pub curr_power: Option<RawQuantity>,
    #[serde(default)]
    pub today_energy: Option<RawQuantity>,
    #[serde(default)]
    pub total_energy: Option<RawQuantity>,
    /* sic */
    #[serde(default)]
    pub total_capcity: Option<RawQuantity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPlantList {
    #[serde(default)]
    pub page_list: Option<Vec<Data>>,
    #[serde(default)]
    pub row_count: Option<u64>,
}
