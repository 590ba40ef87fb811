// Message types published by the housekeeping runtime

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::instrument::Identity;

// One poll of one instrument -> housekeeping/<instrument>/reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub instrument: String,
    /// End of the poll
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl Reading {
    pub fn now(instrument: &str, values: BTreeMap<String, f64>) -> Self {
        Self {
            instrument: instrument.to_string(),
            timestamp: Utc::now(),
            values,
        }
    }
}

// Identity sent once at startup -> housekeeping/<instrument>/identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub instrument: String,
    pub serial_number: String,
    pub model_number: String,
    pub firmware_version: String,
}

impl InstrumentInfo {
    pub fn new(instrument: &str, identity: &Identity) -> Self {
        Self {
            instrument: instrument.to_string(),
            serial_number: identity.serial_number.clone(),
            model_number: identity.model_number.clone(),
            firmware_version: identity.firmware_version.clone(),
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    /// Last poll failed (timeout, transport or device error)
    CommFault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_wire_format() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::Ok).unwrap(), "\"ok\"");
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::CommFault).unwrap(),
            "\"comm_fault\""
        );
    }

    #[test]
    fn test_reading_json() {
        let values = BTreeMap::from([("cryotel_coldhead_k".to_string(), 77.0)]);
        let reading = Reading::now("cryotel", values);
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["instrument"], "cryotel");
        assert_eq!(json["values"]["cryotel_coldhead_k"], 77.0);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(reading.timestamp <= Utc::now());

        let back: Reading = serde_json::from_value(json).unwrap();
        assert_eq!(back, reading);
    }
}
