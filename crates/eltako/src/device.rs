use serde::{Deserialize, Serialize};

/// An addressable info, function, or setting record of a device
/// descriptor, keyed by its identifier string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Value type, i.e. `number`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Identifier string, i.e. `currentPosition` or `targetPosition`.
    pub identifier: String,
    /// Last known value, when the device transmits one.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// A device descriptor returned by the `GET /devices` route.
///
/// A single shading actor exposes a list of descriptors; the one
/// carrying the `currentPosition` info and the `targetPosition`
/// function is the shading channel itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Unique device identifier used in routes.
    pub device_guid: String,
    /// Human readable device name.
    #[serde(default)]
    pub display_name: String,
    /// Readable data points.
    #[serde(default)]
    pub infos: Vec<DataPoint>,
    /// Writable data points.
    #[serde(default)]
    pub functions: Vec<DataPoint>,
    /// Configuration data points.
    #[serde(default)]
    pub settings: Vec<DataPoint>,
}

impl DeviceDescriptor {
    /// Returns `true` when the descriptor exposes a function with the
    /// given identifier.
    #[must_use]
    pub fn has_function(&self, identifier: &str) -> bool {
        self.functions.iter().any(|f| f.identifier == identifier)
    }

    /// Returns `true` when the descriptor exposes an info with the
    /// given identifier.
    #[must_use]
    pub fn has_info(&self, identifier: &str) -> bool {
        self.infos.iter().any(|i| i.identifier == identifier)
    }
}

/// The body of a `PUT /devices/{guid}/functions/{identifier}` write.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionValue {
    /// Value type, always `number` for position writes.
    #[serde(rename = "type")]
    pub kind: String,
    /// Function identifier, repeated in the body.
    pub identifier: String,
    /// Value to write.
    pub value: i32,
}

impl FunctionValue {
    /// Creates the body of a `targetPosition` write.
    #[must_use]
    pub fn target_position(value: i32) -> Self {
        Self {
            kind: "number".into(),
            identifier: "targetPosition".into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DeviceDescriptor, FunctionValue};

    #[test]
    fn descriptor_from_device_payload() {
        let descriptor: DeviceDescriptor = serde_json::from_value(json!({
            "deviceGuid": "f1f193c7",
            "displayName": "Office East",
            "infos": [
                { "type": "number", "identifier": "currentPosition", "value": 25 }
            ],
            "functions": [
                { "type": "number", "identifier": "targetPosition" }
            ],
            "settings": []
        }))
        .unwrap();

        assert_eq!(descriptor.device_guid, "f1f193c7");
        assert!(descriptor.has_info("currentPosition"));
        assert!(descriptor.has_function("targetPosition"));
        assert!(!descriptor.has_function("currentPosition"));
    }

    #[test]
    fn missing_record_arrays_default_to_empty() {
        let descriptor: DeviceDescriptor =
            serde_json::from_value(json!({ "deviceGuid": "f1f193c7" })).unwrap();

        assert!(descriptor.infos.is_empty());
        assert!(descriptor.functions.is_empty());
        assert!(descriptor.settings.is_empty());
    }

    #[test]
    fn target_position_write_body() {
        assert_eq!(
            serde_json::to_value(FunctionValue::target_position(40)).unwrap(),
            json!({
                "type": "number",
                "identifier": "targetPosition",
                "value": 40
            })
        );
    }
}
