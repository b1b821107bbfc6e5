use crate::model::DeviceType;
use serde_json::Value;

/* The gateway sends `device_type` as either a number or a numeric string */
impl<'de> serde::Deserialize<'de> for DeviceType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(d)?;

        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid device_type: {}", value)))
            .map(DeviceType::from_code)
    }
}

#[cfg(test)]
mod test {
    use crate::model::{DeviceType, KnownDeviceType};

    #[test]
    fn number_or_string() {
        let number: DeviceType = serde_json::from_str("14").unwrap();
        let string: DeviceType = serde_json::from_str("\"1\"").unwrap();
        let other: DeviceType = serde_json::from_str("22").unwrap();

        assert_eq!(DeviceType::Known(KnownDeviceType::Ess), number);
        assert_eq!(DeviceType::Known(KnownDeviceType::Inverter), string);
        assert_eq!(DeviceType::Other(22), other);
        assert!(serde_json::from_str::<DeviceType>("\"inverter\"").is_err());
    }
}
