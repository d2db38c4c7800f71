//! Typed access to request parameters.
//!
//! Numeric parameters accept JSON integers as well as strings holding a
//! decimal or `0x` hexadecimal literal, so `"index": "0x1017"` and
//! `"index": 4119` are equivalent.

use std::time::Duration;

use cangate_types::Parameters;
use serde_json::Value;

use super::errors::DispatchError;
use crate::dictionary::parse_integer;

/// Borrowed view over a request's parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Params<'a> {
    values: &'a Parameters,
}

impl<'a> Params<'a> {
    pub(crate) fn new(values: &'a Parameters) -> Self {
        Self { values }
    }

    /// Raw value of a required parameter.
    pub(crate) fn value(&self, name: &str) -> Result<&'a Value, DispatchError> {
        self.optional_value(name)
            .ok_or_else(|| DispatchError::parameter(format!("missing parameter '{name}'")))
    }

    /// Raw value of an optional parameter; `null` counts as absent.
    pub(crate) fn optional_value(&self, name: &str) -> Option<&'a Value> {
        self.values.get(name).filter(|value| !value.is_null())
    }

    /// Value stored under the first of `names` that is present.
    pub(crate) fn value_of_any(&self, names: &[&str]) -> Result<(&'a str, &'a Value), DispatchError> {
        names
            .iter()
            .find_map(|name| {
                self.values
                    .get_key_value(*name)
                    .filter(|(_, value)| !value.is_null())
                    .map(|(key, value)| (key.as_str(), value))
            })
            .ok_or_else(|| {
                let primary = names.first().copied().unwrap_or_default();
                DispatchError::parameter(format!("missing parameter '{primary}'"))
            })
    }

    pub(crate) fn integer(&self, name: &str) -> Result<i128, DispatchError> {
        integer_value(name, self.value(name)?)
    }

    pub(crate) fn optional_integer(&self, name: &str) -> Result<Option<i128>, DispatchError> {
        self.optional_value(name)
            .map(|value| integer_value(name, value))
            .transpose()
    }

    /// Integer narrowed to `T`, rejecting values outside its range.
    pub(crate) fn bounded<T: TryFrom<i128>>(&self, name: &str) -> Result<T, DispatchError> {
        narrow(name, self.integer(name)?)
    }

    pub(crate) fn optional_bounded<T: TryFrom<i128>>(
        &self,
        name: &str,
    ) -> Result<Option<T>, DispatchError> {
        self.optional_integer(name)?
            .map(|raw| narrow(name, raw))
            .transpose()
    }

    /// Integer that must fit an `i64`; domain checks happen downstream.
    pub(crate) fn wide(&self, name: &str) -> Result<i64, DispatchError> {
        narrow(name, self.integer(name)?)
    }

    pub(crate) fn text(&self, name: &str) -> Result<&'a str, DispatchError> {
        text_value(name, self.value(name)?)
    }

    pub(crate) fn optional_text(&self, name: &str) -> Result<Option<&'a str>, DispatchError> {
        self.optional_value(name)
            .map(|value| text_value(name, value))
            .transpose()
    }

    /// Boolean given as `true`/`false`, `0`/`1` or the equivalent strings.
    pub(crate) fn boolean(&self, name: &str) -> Result<bool, DispatchError> {
        let value = self.value(name)?;
        match value {
            Value::Bool(flag) => Ok(*flag),
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(wrong_type(name, "a boolean", value)),
            },
            Value::Number(_) => match integer_value(name, value)? {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(wrong_type(name, "a boolean", value)),
            },
            _ => Err(wrong_type(name, "a boolean", value)),
        }
    }

    /// Positive duration in seconds; fractions are allowed.
    pub(crate) fn optional_seconds(&self, name: &str) -> Result<Option<Duration>, DispatchError> {
        let Some(value) = self.optional_value(name) else {
            return Ok(None);
        };
        seconds_value(name, value).map(Some)
    }

    pub(crate) fn seconds(&self, name: &str) -> Result<Duration, DispatchError> {
        seconds_value(name, self.value(name)?)
    }

    /// Byte list given as an array of integers in `0..=255`.
    pub(crate) fn bytes(&self, name: &str) -> Result<Vec<u8>, DispatchError> {
        let value = self.value(name)?;
        let Value::Array(items) = value else {
            return Err(wrong_type(name, "an array of bytes", value));
        };
        items
            .iter()
            .map(|item| narrow::<u8>(name, integer_value(name, item)?))
            .collect()
    }
}

fn integer_value(name: &str, value: &Value) -> Result<i128, DispatchError> {
    let parsed = match value {
        Value::Number(number) => number
            .as_i64()
            .map(i128::from)
            .or_else(|| number.as_u64().map(i128::from)),
        Value::String(text) => parse_integer(text),
        _ => None,
    };
    parsed.ok_or_else(|| wrong_type(name, "an integer", value))
}

fn text_value<'a>(name: &str, value: &'a Value) -> Result<&'a str, DispatchError> {
    value
        .as_str()
        .ok_or_else(|| wrong_type(name, "a string", value))
}

fn seconds_value(name: &str, value: &Value) -> Result<Duration, DispatchError> {
    let seconds = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| wrong_type(name, "a number of seconds", value))?;
    if seconds <= 0.0 {
        return Err(DispatchError::parameter(format!(
            "parameter '{name}' must be greater than zero"
        )));
    }
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        Ok(_) => Err(DispatchError::parameter(format!(
            "parameter '{name}' must be greater than zero"
        ))),
        Err(_) => Err(DispatchError::parameter(format!(
            "parameter '{name}' is out of range"
        ))),
    }
}

fn narrow<T: TryFrom<i128>>(name: &str, raw: i128) -> Result<T, DispatchError> {
    T::try_from(raw)
        .map_err(|_| DispatchError::parameter(format!("parameter '{name}' value {raw} is out of range")))
}

fn wrong_type(name: &str, expected: &str, value: &Value) -> DispatchError {
    DispatchError::parameter(format!("parameter '{name}' must be {expected}, got {value}"))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn parameters(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[rstest]
    #[case::number(json!(4119), 4119)]
    #[case::hex(json!("0x1017"), 0x1017)]
    #[case::decimal(json!("42"), 42)]
    fn reads_integers(#[case] raw: Value, #[case] expected: i128) {
        let values = parameters(json!({ "index": raw }));
        assert_eq!(Params::new(&values).integer("index").expect("integer"), expected);
    }

    #[rstest]
    #[case::zero(json!(0))]
    #[case::negative(json!(-1.5))]
    #[case::below_resolution(json!(1e-12))]
    fn rejects_durations_that_round_to_zero(#[case] raw: Value) {
        let values = parameters(json!({ "sync_period": raw }));
        let error = Params::new(&values)
            .seconds("sync_period")
            .expect_err("zero duration");
        assert!(error.to_string().contains("greater than zero"), "{error}");
    }

    #[rstest]
    fn reports_missing_parameters() {
        let values = Parameters::new();
        let error = Params::new(&values).integer("node_id").expect_err("missing");
        assert_eq!(error.to_string(), "missing parameter 'node_id'");
    }

    #[rstest]
    #[case::float(json!(1.5))]
    #[case::word(json!("five"))]
    #[case::array(json!([5]))]
    fn rejects_non_integers(#[case] raw: Value) {
        let values = parameters(json!({ "node_id": raw }));
        assert!(matches!(
            Params::new(&values).integer("node_id"),
            Err(DispatchError::Parameter { .. })
        ));
    }

    #[rstest]
    fn narrows_to_target_width() {
        let values = parameters(json!({ "subindex": 256 }));
        let error = Params::new(&values)
            .bounded::<u8>("subindex")
            .expect_err("out of range");
        assert!(error.to_string().contains("out of range"));
    }

    #[rstest]
    #[case::integer(json!(2), Duration::from_secs(2))]
    #[case::fraction(json!(0.5), Duration::from_millis(500))]
    #[case::text(json!("5"), Duration::from_secs(5))]
    fn reads_seconds(#[case] raw: Value, #[case] expected: Duration) {
        let values = parameters(json!({ "timeout": raw }));
        assert_eq!(
            Params::new(&values).optional_seconds("timeout").expect("seconds"),
            Some(expected)
        );
    }

    #[rstest]
    #[case::zero(json!(0))]
    #[case::negative(json!(-1))]
    fn rejects_non_positive_seconds(#[case] raw: Value) {
        let values = parameters(json!({ "sync_period": raw }));
        assert!(Params::new(&values).seconds("sync_period").is_err());
    }

    #[rstest]
    fn reads_byte_arrays() {
        let values = parameters(json!({ "can_bytes": [1, "0xFF", 0] }));
        assert_eq!(
            Params::new(&values).bytes("can_bytes").expect("bytes"),
            vec![0x01, 0xFF, 0x00]
        );
    }

    #[rstest]
    fn resolves_aliases_in_order() {
        let values = parameters(json!({ "EDS": "SimNode.eds" }));
        let (key, value) = Params::new(&values)
            .value_of_any(&["schema_ref", "EDS"])
            .expect("alias");
        assert_eq!(key, "EDS");
        assert_eq!(value, &json!("SimNode.eds"));
    }

    #[rstest]
    #[case::flag(json!(true), true)]
    #[case::number(json!(0), false)]
    #[case::text(json!("1"), true)]
    fn reads_booleans(#[case] raw: Value, #[case] expected: bool) {
        let values = parameters(json!({ "enabled": raw }));
        assert_eq!(Params::new(&values).boolean("enabled").expect("bool"), expected);
    }
}
