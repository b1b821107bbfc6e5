use isolarcloud_rs::model::{Device, DeviceReadings, DeviceType, Plant, Quantity};
use isolarcloud_rs::{points, Client, Error};
use prometheus::{Encoder, GaugeVec, TextEncoder};
use std::collections::HashMap;

lazy_static! {
    static ref PLANT_CURRENT_POWER_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "plant_current_power",
            "current power of plant, in the unit reported by iSolarCloud",
        ),
        &["plant_id", "plant_name", "unit"],
    )
    .unwrap();
    static ref PLANT_TODAY_ENERGY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "plant_today_energy",
            "energy generated by plant in current day, in the unit reported by iSolarCloud",
        ),
        &["plant_id", "plant_name", "unit"],
    )
    .unwrap();
    static ref PLANT_TOTAL_ENERGY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "plant_total_energy",
            "lifetime energy generated by plant, in the unit reported by iSolarCloud",
        ),
        &["plant_id", "plant_name", "unit"],
    )
    .unwrap();
    static ref DEVICE_POINT_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("device_point", "measuring point reported by device"),
        &["plant_id", "ps_key", "device_type", "point_id", "point_name", "unit"],
    )
    .unwrap();
    static ref BATTERY_SOC_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("battery_soc_percent", "battery state of charge (in %)"),
        &["plant_id", "ps_key"],
    )
    .unwrap();
}

fn set_quantity(gauge: &GaugeVec, plant: &Plant, quantity: &Option<Quantity>) {
    if let Some(Quantity {
        value: Some(value),
        unit,
    }) = quantity
    {
        gauge
            .with_label_values(&[&plant.id, &plant.name, unit])
            .set(*value);
    }
}

fn process_plant(plant: &Plant) {
    set_quantity(&PLANT_CURRENT_POWER_GAUGE, plant, &plant.current_power);
    set_quantity(&PLANT_TODAY_ENERGY_GAUGE, plant, &plant.today_energy);
    set_quantity(&PLANT_TOTAL_ENERGY_GAUGE, plant, &plant.total_energy);
}

/// Feed `readings` of `device` to Prometheus. Points missing from the static
/// table and points without a value are skipped.
fn process_device_readings(device: &Device, readings: &DeviceReadings) {
    let device_type = device.device_type.code().to_string();

    for reading in &readings.readings {
        if let (Some(point), Some(value)) = (reading.point, reading.value) {
            DEVICE_POINT_GAUGE
                .with_label_values(&[
                    &device.plant_id,
                    &device.ps_key,
                    &device_type,
                    point.id,
                    point.name,
                    point.unit.symbol(),
                ])
                .set(value);

            if point.id == points::BATTERY_SOC {
                BATTERY_SOC_GAUGE
                    .with_label_values(&[&device.plant_id, &device.ps_key])
                    .set(points::soc_percent(value));
            }
        }
    }
}

/// Fetch readings of every supported device of `plant`, one request per
/// device type.
async fn collect_plant_devices(client: &Client, plant: &Plant) -> Result<(), Error> {
    let devices = client.devices(&plant.id).await?;

    let mut by_type: HashMap<DeviceType, Vec<&Device>> = HashMap::new();
    for device in devices.iter() {
        match device.device_type {
            DeviceType::Known(_) => by_type.entry(device.device_type).or_default().push(device),
            DeviceType::Other(code) => {
                log::debug!("Skipping device {} of type {}", device.ps_key, code)
            }
        }
    }

    for (device_type, devices) in by_type {
        let ps_keys: Vec<String> = devices.iter().map(|d| d.ps_key.to_owned()).collect();

        match client.readings(&ps_keys, device_type).await {
            Ok(readings) => {
                for readings in readings {
                    match devices.iter().find(|d| d.ps_key == readings.ps_key) {
                        Some(device) => process_device_readings(device, &readings),
                        None => log::warn!(
                            "Readings for unknown device {} of plant {}",
                            readings.ps_key,
                            plant.id
                        ),
                    }
                }
            }
            Err(e) => log::error!(
                "No readings for device type {} of plant {}: {}",
                device_type.code(),
                plant.id,
                e
            ),
        }
    }
    Ok(())
}

/// Collect all supported metrics through `client`, updating Prometheus exporter registry.
/// A plant whose devices cannot be read is skipped.
pub async fn collect(client: &Client) -> Result<(), Error> {
    let plants = client.plants().await?;

    for plant in plants {
        process_plant(&plant);
        if let Err(e) = collect_plant_devices(client, &plant).await {
            log::warn!("Skipping devices of plant {}: {}", plant.id, e);
        }
    }

    Ok(())
}

/// Read metrics from Prometheus exporter registry.
pub async fn read() -> Result<String, Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(Error::FormatError))?;
    String::from_utf8(buffer).or(Err(Error::FormatError))
}

#[cfg(test)]
mod test {
    use super::*;
    use isolarcloud_rs::api::endpoint;
    use isolarcloud_rs::model::{AuthMode, Credentials, KnownDeviceType, PlantStatus, Session, TokenSession};
    use isolarcloud_rs::TokenStore;
    use mockito::Matcher;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;

    fn read_resource(filename: &str) -> String {
        let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push(format!("resources/test/{}", filename));
        fs::read_to_string(d.as_path()).unwrap()
    }

    #[tokio::test]
    async fn readings_feed_gauges() {
        let device = Device {
            plant_id: "7654321".to_string(),
            ps_key: "7654321_14_1_1".to_string(),
            name: "SBR096".to_string(),
            serial: None,
            device_type: DeviceType::Known(KnownDeviceType::Ess),
        };
        let point = json!({"p13141": "0.5", "p13119": "612.0", "p99999": "1"});
        let readings = DeviceReadings {
            ps_key: device.ps_key.to_owned(),
            device_time: None,
            readings: points::parse_device_points(point.as_object().unwrap()),
        };
        let plant = Plant {
            id: "7654321".to_string(),
            name: "Garage".to_string(),
            status: PlantStatus::Online,
            current_power: Some(Quantity {
                value: Some(1.5),
                unit: "kW".to_string(),
            }),
            today_energy: Some(Quantity {
                value: None,
                unit: "kWh".to_string(),
            }),
            total_energy: None,
            capacity: None,
        };

        process_plant(&plant);
        process_device_readings(&device, &readings);

        assert_eq!(
            50.0,
            BATTERY_SOC_GAUGE
                .with_label_values(&["7654321", "7654321_14_1_1"])
                .get()
        );
        assert_eq!(
            1.5,
            PLANT_CURRENT_POWER_GAUGE
                .with_label_values(&["7654321", "Garage", "kW"])
                .get()
        );

        let text = read().await.unwrap();
        assert!(text.contains("battery_soc_percent"));
        assert!(text.contains("point_id=\"13119\""));
        assert!(!text.contains("point_id=\"99999\""));
    }

    #[tokio::test]
    async fn failing_plant_does_not_stop_collection() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store
            .save(&Session::Token(TokenSession {
                token: "abc".to_string(),
                user_id: None,
                saved_at: None,
            }))
            .unwrap();

        let _plants = server
            .mock("POST", endpoint::PLANTS)
            .with_body(
                json!({
                    "result_code": "1",
                    "result_data": {"rowCount": 2, "pageList": [
                        {"ps_id": 7777777, "ps_name": "Barn", "ps_status": 1,
                         "curr_power": {"unit": "kW", "value": "0.5"}},
                        {"ps_id": 1234567, "ps_name": "Home", "ps_status": 1,
                         "curr_power": {"unit": "kW", "value": "3.21"}}
                    ]}
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _failing = server
            .mock("POST", endpoint::DEVICES)
            .match_body(Matcher::PartialJson(json!({"ps_id": "7777777"})))
            .with_body(json!({"result_code": "E00001", "result_msg": "parameter error"}).to_string())
            .create_async()
            .await;
        let devices = server
            .mock("POST", endpoint::DEVICES)
            .match_body(Matcher::PartialJson(json!({"ps_id": "1234567"})))
            .with_body(read_resource("getDeviceList.json"))
            .expect(1)
            .create_async()
            .await;
        let _realtime = server
            .mock("POST", endpoint::DEVICE_REAL_TIME)
            .with_body(read_resource("getDeviceRealTimeData.json"))
            .create_async()
            .await;

        let client = Client::from_credentials(
            AuthMode::Plain,
            Credentials {
                host: server.url(),
                appkey: "APPKEY".to_string(),
                secret_key: None,
                rsa_public_key: None,
                username: Some("user".to_string()),
                password: Some("pass".to_string()),
            },
            store,
        )
        .unwrap();

        collect(&client).await.unwrap();

        assert_eq!(
            0.5,
            PLANT_CURRENT_POWER_GAUGE
                .with_label_values(&["7777777", "Barn", "kW"])
                .get()
        );
        assert_eq!(
            3.21,
            PLANT_CURRENT_POWER_GAUGE
                .with_label_values(&["1234567", "Home", "kW"])
                .get()
        );
        assert_eq!(
            612.0,
            DEVICE_POINT_GAUGE
                .with_label_values(&["1234567", "1234567_14_1_1", "14", "13119", "Load Power", "W"])
                .get()
        );
        devices.assert_async().await;
    }
}
