//! Conversion of gateway replies into data point updates.

use crate::constants::{ABSENT_VALUE_SENTINEL, AGGREGATE_POWER_NAME, AGGREGATE_POWER_PREFIX};
use crate::labels::{is_translation_key, LabelTable};
use crate::store::PointValue;

use super::message::{DirectReply, RealReply};

/// One value to write into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PointUpdate {
    pub name: String,
    pub value: Option<PointValue>,
    pub unit: Option<String>,
}

impl PointUpdate {
    fn new(name: impl Into<String>, value: Option<PointValue>, unit: &str) -> Self {
        Self {
            name: name.into(),
            value,
            unit: (!unit.is_empty()).then(|| unit.to_string()),
        }
    }
}

/// Interpret a raw gateway value.
///
/// With a unit the value is numeric: `--` means absent and anything that
/// parses as a float is a number. Non-finite readings count as absent. Translation keys resolve through `labels`.
/// Everything else passes through as text.
pub fn parse_value(raw: &str, unit: &str, labels: &LabelTable) -> Option<PointValue> {
    let raw = raw.trim();
    if !unit.is_empty() {
        if raw == ABSENT_VALUE_SENTINEL {
            return None;
        }
        if let Ok(number) = raw.parse::<f64>() {
            return number.is_finite().then_some(PointValue::Number(number));
        }
    }
    if is_translation_key(raw) {
        return Some(PointValue::Text(labels.resolve(raw).to_string()));
    }
    Some(PointValue::Text(raw.to_string()))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Points of a `real` or `real_battery` reply.
pub fn real_points(reply: &RealReply, labels: &LabelTable) -> Vec<PointUpdate> {
    reply
        .list
        .iter()
        .map(|entry| {
            PointUpdate::new(
                labels.resolve(&entry.data_name),
                parse_value(&entry.data_value, &entry.data_unit, labels),
                &entry.data_unit,
            )
        })
        .collect()
}

/// Points of a `direct` reply: voltage, current and computed power per
/// element, plus the aggregate over `MPPT*` elements.
pub fn direct_points(reply: &DirectReply, labels: &LabelTable) -> Vec<PointUpdate> {
    let mut points = Vec::with_capacity(reply.list.len() * 3 + 1);
    let mut aggregate: Option<f64> = None;

    for entry in &reply.list {
        let name = labels.resolve(&entry.name).trim().to_string();
        let voltage = parse_value(&entry.voltage, &entry.voltage_unit, labels);
        let current = parse_value(&entry.current, &entry.current_unit, labels);
        let power = match (
            voltage.as_ref().and_then(PointValue::as_f64),
            current.as_ref().and_then(PointValue::as_f64),
        ) {
            (Some(v), Some(i)) => Some(round2(v * i)),
            _ => None,
        };

        if let Some(power) = power {
            if name.starts_with(AGGREGATE_POWER_PREFIX) {
                *aggregate.get_or_insert(0.0) += power;
            }
        }

        points.push(PointUpdate::new(
            format!("{} Voltage", name),
            voltage,
            &entry.voltage_unit,
        ));
        points.push(PointUpdate::new(
            format!("{} Current", name),
            current,
            &entry.current_unit,
        ));
        points.push(PointUpdate::new(
            format!("{} Power", name),
            power.map(PointValue::Number),
            "W",
        ));
    }

    if let Some(total) = aggregate {
        points.push(PointUpdate::new(
            AGGREGATE_POWER_NAME,
            Some(PointValue::Number(round2(total))),
            "W",
        ));
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::message::{DirectEntry, RealEntry};

    fn labels() -> LabelTable {
        let mut labels = LabelTable::default();
        labels.insert("I18N_COMMON_DEVICE_STATUS", "Device Status");
        labels.insert("I18N_COMMON_RUNNING", "Running");
        labels.insert("I18N_COMMON_TOTAL_DCPOWER", "Total DC Power");
        labels
    }

    fn direct(name: &str, voltage: &str, current: &str) -> DirectEntry {
        DirectEntry {
            name: name.into(),
            voltage: voltage.into(),
            voltage_unit: "V".into(),
            current: current.into(),
            current_unit: "A".into(),
        }
    }

    #[test]
    fn test_parse_value() {
        let labels = labels();
        assert_eq!(parse_value("12.5", "kW", &labels), Some(PointValue::Number(12.5)));
        assert_eq!(parse_value("--", "kW", &labels), None);
        assert_eq!(
            parse_value("I18N_COMMON_RUNNING", "", &labels),
            Some(PointValue::Text("Running".into()))
        );
        // without a unit nothing is treated as numeric
        assert_eq!(parse_value("--", "", &labels), Some(PointValue::Text("--".into())));
        assert_eq!(parse_value("42", "", &labels), Some(PointValue::Text("42".into())));
        assert_eq!(parse_value("n/a", "V", &labels), Some(PointValue::Text("n/a".into())));
    }

    #[test]
    fn test_non_finite_readings_are_absent() {
        let labels = labels();
        assert_eq!(parse_value("NaN", "W", &labels), None);
        assert_eq!(parse_value("inf", "kWh", &labels), None);
        assert_eq!(parse_value("-infinity", "A", &labels), None);
    }

    #[test]
    fn test_real_points() {
        let reply = RealReply {
            list: vec![
                RealEntry {
                    data_name: "I18N_COMMON_TOTAL_DCPOWER".into(),
                    data_value: "5.21".into(),
                    data_unit: "kW".into(),
                },
                RealEntry {
                    data_name: "I18N_COMMON_DEVICE_STATUS".into(),
                    data_value: "I18N_COMMON_RUNNING".into(),
                    data_unit: String::new(),
                },
            ],
        };
        let points = real_points(&reply, &labels());
        assert_eq!(points[0].name, "Total DC Power");
        assert_eq!(points[0].value, Some(PointValue::Number(5.21)));
        assert_eq!(points[0].unit.as_deref(), Some("kW"));
        assert_eq!(points[1].value, Some(PointValue::Text("Running".into())));
        assert_eq!(points[1].unit, None);
    }

    #[test]
    fn test_direct_points_and_aggregate() {
        let reply = DirectReply {
            list: vec![
                direct("MPPT1", "600.0", "3.5"),
                direct("MPPT2", "598.0", "--"),
                direct("MPPT3", "610.1", "2.5"),
                direct("String1", "300", "1"),
            ],
        };
        let points = direct_points(&reply, &labels());
        assert_eq!(points.len(), 4 * 3 + 1);

        let find = |name: &str| points.iter().find(|p| p.name == name).unwrap();
        assert_eq!(find("MPPT1 Power").value, Some(PointValue::Number(2100.0)));
        assert_eq!(find("MPPT2 Current").value, None);
        assert_eq!(find("MPPT2 Power").value, None);
        assert_eq!(find("String1 Power").value, Some(PointValue::Number(300.0)));

        let total = find("MPPT Total Power");
        assert_eq!(total.value, Some(PointValue::Number(3625.25)));
        assert_eq!(total.unit.as_deref(), Some("W"));
    }

    #[test]
    fn test_no_aggregate_without_mppt_elements() {
        let reply = DirectReply {
            list: vec![direct("String1", "300", "1")],
        };
        let points = direct_points(&reply, &labels());
        assert!(points.iter().all(|p| p.name != "MPPT Total Power"));
    }
}
