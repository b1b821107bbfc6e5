//! Static table of iSolarCloud measuring points.
//!
//! Point ids are vendor-defined numeric codes. The real-time endpoints return
//! them as `p<id>` keys inside `device_point`.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::model::{DeviceType, KnownDeviceType, Reading};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Watt,
    WattHour,
    Percent,
    Celsius,
    Volt,
    Ampere,
    Hertz,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Watt => "W",
            Unit::WattHour => "Wh",
            Unit::Percent => "%",
            Unit::Celsius => "°C",
            Unit::Volt => "V",
            Unit::Ampere => "A",
            Unit::Hertz => "Hz",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Power,
    Energy,
    Battery,
    Temperature,
    Voltage,
    Current,
    Frequency,
}

#[derive(Debug)]
pub struct MeasuringPoint {
    pub id: &'static str,
    pub name: &'static str,
    pub unit: Unit,
    pub kind: Kind,
    pub device: KnownDeviceType,
}

pub const BATTERY_SOC: &str = "13141";
pub const LOAD_POWER: &str = "13119";
pub const ACTIVE_POWER: &str = "13011";

macro_rules! point {
    ($id:expr, $name:expr, $unit:ident, $kind:ident, $device:ident) => {
        MeasuringPoint {
            id: $id,
            name: $name,
            unit: Unit::$unit,
            kind: Kind::$kind,
            device: KnownDeviceType::$device,
        }
    };
}

static POINTS: &[MeasuringPoint] = &[
    /* Inverter */
    point!("1", "Yield Today", WattHour, Energy, Inverter),
    point!("2", "Total Yield", WattHour, Energy, Inverter),
    point!("24", "Active Power", Watt, Power, Inverter),
    point!("25", "Reactive Power", Watt, Power, Inverter),
    /* Energy storage: power */
    point!("13011", "Active Power", Watt, Power, Ess),
    point!("13003", "DC Power", Watt, Power, Ess),
    point!("13119", "Load Power", Watt, Power, Ess),
    point!("13121", "Grid Export Power", Watt, Power, Ess),
    point!("13149", "Grid Import Power", Watt, Power, Ess),
    point!("13126", "Battery Charging Power", Watt, Power, Ess),
    point!("13150", "Battery Discharging Power", Watt, Power, Ess),
    point!("13012", "Reactive Power", Watt, Power, Ess),
    /* Energy storage: daily energy */
    point!("13112", "Solar Energy Today", WattHour, Energy, Ess),
    point!("13122", "Grid Export Energy Today", WattHour, Energy, Ess),
    point!("13147", "Grid Import Energy Today", WattHour, Energy, Ess),
    point!("13199", "Load Energy Today", WattHour, Energy, Ess),
    point!("13028", "Battery Charge Energy Today", WattHour, Energy, Ess),
    point!("13029", "Battery Discharge Energy Today", WattHour, Energy, Ess),
    /* Energy storage: cumulative energy */
    point!("13134", "Total Solar Energy", WattHour, Energy, Ess),
    point!("13125", "Total Grid Export Energy", WattHour, Energy, Ess),
    point!("13148", "Total Grid Import Energy", WattHour, Energy, Ess),
    point!("13130", "Total Load Energy", WattHour, Energy, Ess),
    point!("13034", "Total Battery Charge Energy", WattHour, Energy, Ess),
    point!("13035", "Total Battery Discharge Energy", WattHour, Energy, Ess),
    /* Battery */
    point!("13141", "Battery Level", Percent, Battery, Ess),
    point!("13142", "Battery Health", Percent, Battery, Ess),
    point!("13143", "Battery Temperature", Celsius, Temperature, Ess),
    point!("13138", "Battery Voltage", Volt, Voltage, Ess),
    point!("13139", "Battery Current", Ampere, Current, Ess),
    point!("13140", "Battery Capacity", WattHour, Energy, Ess),
    /* Grid */
    point!("13157", "Grid Voltage Phase A", Volt, Voltage, Ess),
    point!("13158", "Grid Voltage Phase B", Volt, Voltage, Ess),
    point!("13159", "Grid Voltage Phase C", Volt, Voltage, Ess),
    point!("13007", "Grid Frequency", Hertz, Frequency, Ess),
    /* PV strings */
    point!("13001", "MPPT1 Voltage", Volt, Voltage, Ess),
    point!("13002", "MPPT1 Current", Ampere, Current, Ess),
    point!("13105", "MPPT2 Voltage", Volt, Voltage, Ess),
    point!("13106", "MPPT2 Current", Ampere, Current, Ess),
];

lazy_static! {
    static ref BY_ID: HashMap<&'static str, &'static MeasuringPoint> =
        POINTS.iter().map(|p| (p.id, p)).collect();
}

pub fn all() -> &'static [MeasuringPoint] {
    POINTS
}

pub fn lookup(id: &str) -> Option<&'static MeasuringPoint> {
    BY_ID.get(id).copied()
}

/// Point ids requested from the real-time endpoint for `device_type`.
/// Device types without a table of their own get every known point.
pub fn point_ids_for(device_type: &DeviceType) -> Vec<&'static str> {
    match device_type {
        DeviceType::Known(known) => POINTS
            .iter()
            .filter(|p| p.device == *known)
            .map(|p| p.id)
            .collect(),
        DeviceType::Other(_) => POINTS.iter().map(|p| p.id).collect(),
    }
}

fn parse_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.trim() {
            "" | "--" => None,
            s => s.parse().ok(),
        },
        _ => None,
    }
}

/// Turn a vendor `device_point` map into readings. Only `p<digits>` keys are
/// points; the remaining keys (`ps_key`, `device_time`, ...) are skipped.
pub fn parse_device_points(device_point: &Map<String, Value>) -> Vec<Reading> {
    let mut readings: Vec<Reading> = device_point
        .iter()
        .filter_map(|(key, value)| {
            let id = key.strip_prefix('p')?;
            if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let parsed = parse_value(value);
            if parsed.is_none() && !value.is_null() {
                log::debug!("Could not parse value for point {}: {}", id, value);
            }
            Some(Reading {
                point_id: id.to_string(),
                value: parsed,
                point: lookup(id),
            })
        })
        .collect();

    readings.sort_by(|a, b| a.point_id.cmp(&b.point_id));
    readings
}

/// Normalize a battery state-of-charge reading to percent.
///
/// The gateway reports SOC either as a fraction (`0.87`) or as a percentage
/// (`87`), and the value alone does not say which. Anything `<= 1` is read as
/// a fraction, so a genuine 1 % comes out as 100 %.
pub fn soc_percent(raw: f64) -> f64 {
    if raw <= 1.0 {
        raw * 100.0
    } else {
        raw
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn ess_points_include_state_of_charge() {
        let ess = point_ids_for(&DeviceType::Known(KnownDeviceType::Ess));
        assert!(ess.contains(&BATTERY_SOC));
        assert!(!ess.contains(&"24"));
    }

    #[test]
    fn inverter_points_skip_battery() {
        let inverter = point_ids_for(&DeviceType::Known(KnownDeviceType::Inverter));
        assert_eq!(vec!["1", "2", "24", "25"], inverter);
        assert!(!inverter.contains(&BATTERY_SOC));
    }

    #[test]
    fn other_devices_get_everything() {
        assert_eq!(all().len(), point_ids_for(&DeviceType::Other(11)).len());
    }

    #[test]
    fn table_ids_are_unique() {
        assert_eq!(all().len(), BY_ID.len());
        assert_eq!("Battery Level", lookup(BATTERY_SOC).unwrap().name);
        assert_eq!("W", lookup(LOAD_POWER).unwrap().unit.symbol());
    }

    #[test]
    fn parse_points_skips_metadata_and_blanks() {
        let map = json!({
            "ps_key": "1234_14_1_1",
            "device_time": "20240501120000",
            "p13011": "1520.0",
            "p13141": 0.87,
            "p13119": "--",
            "p13999": "",
            "pending": "x"
        });
        let readings = parse_device_points(map.as_object().unwrap());

        assert_eq!(4, readings.len());
        let active = readings.iter().find(|r| r.point_id == "13011").unwrap();
        assert_eq!(Some(1520.0), active.value);
        assert_eq!("Active Power", active.point.unwrap().name);
        let load = readings.iter().find(|r| r.point_id == "13119").unwrap();
        assert_eq!(None, load.value);
        let unknown = readings.iter().find(|r| r.point_id == "13999").unwrap();
        assert!(unknown.point.is_none());
    }

    #[test]
    fn soc_fraction_is_scaled() {
        assert_eq!(50.0, soc_percent(0.5));
        assert_eq!(87.0, soc_percent(87.0));
        assert_eq!(100.0, soc_percent(1.0));
    }
}
