//! Pure validation predicates.
//!
//! Shape and type checks run against the raw JSON before any typed
//! decoding, so a malformed payload is rejected with a field-level
//! error instead of serde noise. Range constants live here, next to
//! the checks that use them. Nothing in this module mutates.

use serde_json::Value;

use crate::app::commands::{ConfigContext, ConfigOperation};
use crate::error::ValidationError;

// ───────────────────────────────────────────────────────────────
// Range constants
// ───────────────────────────────────────────────────────────────

/// `margin` ∈ (0, 1].
pub const MARGIN_MAX: f64 = 1.0;
/// `maxValveTimeOpen` ∈ (1, 300] seconds.
pub const VALVE_TIME_MIN: f64 = 1.0;
pub const VALVE_TIME_MAX: f64 = 300.0;
/// `targetPh` ∈ [1, 14].
pub const TARGET_PH_MIN: f64 = 1.0;
pub const TARGET_PH_MAX: f64 = 14.0;

pub fn margin_in_range(value: f64) -> bool {
    value > 0.0 && value <= MARGIN_MAX
}

pub fn valve_time_in_range(value: f64) -> bool {
    value > VALVE_TIME_MIN && value <= VALVE_TIME_MAX
}

pub fn target_ph_in_range(value: f64) -> bool {
    (TARGET_PH_MIN..=TARGET_PH_MAX).contains(&value)
}

// ───────────────────────────────────────────────────────────────
// Command envelope
// ───────────────────────────────────────────────────────────────

/// Validate a `{context, operation, data}` envelope before dispatch.
pub fn validate_command_envelope(cmd: &Value) -> Result<(), ValidationError> {
    for field in ["context", "operation", "data"] {
        if cmd.get(field).is_none() {
            return Err(ValidationError::MissingField(field));
        }
    }
    let context = cmd["context"]
        .as_str()
        .ok_or(ValidationError::InvalidFieldType("context"))?;
    if !ConfigContext::ALL.contains(&context) {
        return Err(ValidationError::InvalidContext);
    }
    let operation = cmd["operation"]
        .as_str()
        .ok_or(ValidationError::InvalidFieldType("operation"))?;
    if !ConfigOperation::ALL.contains(&operation) {
        return Err(ValidationError::InvalidOperation);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Record validation
// ───────────────────────────────────────────────────────────────

/// Validate a sensor record: required fields, primitive types, ranges.
pub fn validate_sensor(sensor: &Value) -> Result<(), ValidationError> {
    require_string(sensor, "id")?;
    require_string(sensor, "createdAt")?;

    let mode = require_string(sensor, "mode")?;
    if !["acidic", "alkaline", "auto"].contains(&mode) {
        return Err(ValidationError::InvalidMode);
    }

    // The port and cadence fields carry a legacy alias each.
    require_string_either(sensor, "devicePort", "probePort")?;
    require_number_either(sensor, "phMonitorFrequency", "checkInterval")?;

    let margin = require_number(sensor, "margin")?;
    if !margin_in_range(margin) {
        return Err(ValidationError::OutOfRange("margin"));
    }
    let valve_time = require_number(sensor, "maxValveTimeOpen")?;
    if !valve_time_in_range(valve_time) {
        return Err(ValidationError::OutOfRange("maxValveTimeOpen"));
    }
    let target = require_number(sensor, "targetPh")?;
    if !target_ph_in_range(target) {
        return Err(ValidationError::OutOfRange("targetPh"));
    }
    Ok(())
}

/// Validate a location record, including every nested sensor.
pub fn validate_location(location: &Value) -> Result<(), ValidationError> {
    require_string(location, "id")?;
    require_string(location, "name")?;
    require_string(location, "createdAt")?;
    let sensors = location
        .get("sensors")
        .ok_or(ValidationError::MissingField("sensors"))?
        .as_array()
        .ok_or(ValidationError::InvalidFieldType("sensors"))?;
    for sensor in sensors {
        validate_sensor(sensor)?;
    }
    Ok(())
}

/// Validate a device-configuration record, including nested locations.
pub fn validate_device_configuration(configuration: &Value) -> Result<(), ValidationError> {
    require_string(configuration, "id")?;
    require_string(configuration, "name")?;
    require_string(configuration, "createdAt")?;
    let locations = configuration
        .get("locations")
        .ok_or(ValidationError::MissingField("locations"))?
        .as_array()
        .ok_or(ValidationError::InvalidFieldType("locations"))?;
    for location in locations {
        validate_location(location)?;
    }
    Ok(())
}

/// Range-check the fields a partial sensor update actually carries.
pub fn validate_sensor_update(update: &Value) -> Result<(), ValidationError> {
    if let Some(margin) = update.get("margin") {
        let margin = margin
            .as_f64()
            .ok_or(ValidationError::InvalidFieldType("margin"))?;
        if !margin_in_range(margin) {
            return Err(ValidationError::OutOfRange("margin"));
        }
    }
    if let Some(valve_time) = update.get("maxValveTimeOpen") {
        let valve_time = valve_time
            .as_f64()
            .ok_or(ValidationError::InvalidFieldType("maxValveTimeOpen"))?;
        if !valve_time_in_range(valve_time) {
            return Err(ValidationError::OutOfRange("maxValveTimeOpen"));
        }
    }
    if let Some(target) = update.get("targetPh") {
        let target = target
            .as_f64()
            .ok_or(ValidationError::InvalidFieldType("targetPh"))?;
        if !target_ph_in_range(target) {
            return Err(ValidationError::OutOfRange("targetPh"));
        }
    }
    if let Some(mode) = update.get("mode") {
        let mode = mode
            .as_str()
            .ok_or(ValidationError::InvalidFieldType("mode"))?;
        if !["acidic", "alkaline", "auto"].contains(&mode) {
            return Err(ValidationError::InvalidMode);
        }
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Field helpers
// ───────────────────────────────────────────────────────────────

fn require_string<'a>(record: &'a Value, field: &'static str) -> Result<&'a str, ValidationError> {
    record
        .get(field)
        .ok_or(ValidationError::MissingField(field))?
        .as_str()
        .ok_or(ValidationError::InvalidFieldType(field))
}

fn require_number(record: &Value, field: &'static str) -> Result<f64, ValidationError> {
    record
        .get(field)
        .ok_or(ValidationError::MissingField(field))?
        .as_f64()
        .ok_or(ValidationError::InvalidFieldType(field))
}

fn require_string_either<'a>(
    record: &'a Value,
    field: &'static str,
    alias: &'static str,
) -> Result<&'a str, ValidationError> {
    match record.get(field).or_else(|| record.get(alias)) {
        Some(value) => value.as_str().ok_or(ValidationError::InvalidFieldType(field)),
        None => Err(ValidationError::MissingField(field)),
    }
}

fn require_number_either(
    record: &Value,
    field: &'static str,
    alias: &'static str,
) -> Result<f64, ValidationError> {
    match record.get(field).or_else(|| record.get(alias)) {
        Some(value) => value.as_f64().ok_or(ValidationError::InvalidFieldType(field)),
        None => Err(ValidationError::MissingField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sensor_json() -> Value {
        json!({
            "id": "s1",
            "mode": "auto",
            "margin": 0.1,
            "maxValveTimeOpen": 30.0,
            "targetPh": 7.0,
            "devicePort": "i1",
            "phMonitorFrequency": 10,
            "createdAt": "2026-01-01T00:00:00Z"
        })
    }

    #[test]
    fn accepts_well_formed_sensor() {
        assert_eq!(validate_sensor(&sensor_json()), Ok(()));
    }

    #[test]
    fn rejects_missing_field() {
        let mut sensor = sensor_json();
        sensor.as_object_mut().unwrap().remove("targetPh");
        assert_eq!(
            validate_sensor(&sensor),
            Err(ValidationError::MissingField("targetPh"))
        );
    }

    #[test]
    fn rejects_wrong_type() {
        let mut sensor = sensor_json();
        sensor["margin"] = json!("0.1");
        assert_eq!(
            validate_sensor(&sensor),
            Err(ValidationError::InvalidFieldType("margin"))
        );
    }

    #[test]
    fn rejects_out_of_range_margin() {
        for bad in [0.0, -0.5, 1.5] {
            let mut sensor = sensor_json();
            sensor["margin"] = json!(bad);
            assert_eq!(
                validate_sensor(&sensor),
                Err(ValidationError::OutOfRange("margin"))
            );
        }
    }

    #[test]
    fn margin_boundary_is_inclusive_at_one() {
        let mut sensor = sensor_json();
        sensor["margin"] = json!(1.0);
        assert_eq!(validate_sensor(&sensor), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_valve_time() {
        for bad in [1.0, 0.0, 300.5] {
            let mut sensor = sensor_json();
            sensor["maxValveTimeOpen"] = json!(bad);
            assert_eq!(
                validate_sensor(&sensor),
                Err(ValidationError::OutOfRange("maxValveTimeOpen"))
            );
        }
    }

    #[test]
    fn rejects_out_of_range_target_ph() {
        for bad in [0.5, 14.5] {
            let mut sensor = sensor_json();
            sensor["targetPh"] = json!(bad);
            assert_eq!(
                validate_sensor(&sensor),
                Err(ValidationError::OutOfRange("targetPh"))
            );
        }
    }

    #[test]
    fn target_ph_boundaries_are_inclusive() {
        for good in [1.0, 14.0] {
            let mut sensor = sensor_json();
            sensor["targetPh"] = json!(good);
            assert_eq!(validate_sensor(&sensor), Ok(()));
        }
    }

    #[test]
    fn rejects_unknown_mode() {
        let mut sensor = sensor_json();
        sensor["mode"] = json!("basic");
        assert_eq!(validate_sensor(&sensor), Err(ValidationError::InvalidMode));
    }

    #[test]
    fn accepts_legacy_aliases() {
        let mut sensor = sensor_json();
        let obj = sensor.as_object_mut().unwrap();
        obj.remove("devicePort");
        obj.remove("phMonitorFrequency");
        obj.insert("probePort".into(), json!("i3"));
        obj.insert("checkInterval".into(), json!(20));
        assert_eq!(validate_sensor(&sensor), Ok(()));
    }

    #[test]
    fn location_requires_valid_sensors() {
        let location = json!({
            "id": "l1",
            "name": "Tank A",
            "createdAt": "2026-01-01T00:00:00Z",
            "sensors": [sensor_json(), {"id": "s2"}]
        });
        assert!(validate_location(&location).is_err());
    }

    #[test]
    fn configuration_requires_location_list() {
        let configuration = json!({
            "id": "c1",
            "name": "Batch 1",
            "createdAt": "2026-01-01T00:00:00Z",
            "locations": {}
        });
        assert_eq!(
            validate_device_configuration(&configuration),
            Err(ValidationError::InvalidFieldType("locations"))
        );
    }

    #[test]
    fn envelope_requires_known_enums() {
        let valid = json!({"context": "device", "operation": "read", "data": {}});
        assert_eq!(validate_command_envelope(&valid), Ok(()));

        let bad_context = json!({"context": "devices", "operation": "read", "data": {}});
        assert_eq!(
            validate_command_envelope(&bad_context),
            Err(ValidationError::InvalidContext)
        );

        let bad_operation = json!({"context": "device", "operation": "patch", "data": {}});
        assert_eq!(
            validate_command_envelope(&bad_operation),
            Err(ValidationError::InvalidOperation)
        );

        let missing = json!({"context": "device", "data": {}});
        assert_eq!(
            validate_command_envelope(&missing),
            Err(ValidationError::MissingField("operation"))
        );
    }

    #[test]
    fn partial_update_checks_only_present_fields() {
        assert_eq!(validate_sensor_update(&json!({"targetPh": 6.5})), Ok(()));
        assert_eq!(
            validate_sensor_update(&json!({"margin": 2.0})),
            Err(ValidationError::OutOfRange("margin"))
        );
        assert_eq!(validate_sensor_update(&json!({})), Ok(()));
    }
}
