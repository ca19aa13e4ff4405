use std::fmt;

use serde::{
    de::{self, MapAccess, Visitor},
    Deserialize, Deserializer, Serialize,
};
use serde_json::{Map, Number, Value};

use crate::RussoError;

/// A normalized tool invocation: a case-sensitive name plus an unordered
/// argument map.
///
/// Equality is structural except for numbers, which compare by value:
/// `f(v=1) == f(v=1.0)`, the same rule the matcher applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawToolCall")]
pub struct ToolCall {
    name: String,
    arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    /// Builds a call from an arbitrary JSON value, rejecting anything that is
    /// not an object.
    pub fn try_new(name: impl Into<String>, arguments: Value) -> Result<Self, RussoError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RussoError::InvalidToolCall("tool name must not be empty".to_string()));
        }
        match arguments {
            Value::Object(arguments) => Ok(Self { name, arguments }),
            Value::Null => Ok(Self::new(name)),
            other => Err(RussoError::InvalidToolCall(format!(
                "arguments for {name} must be an object, got {other}"
            ))),
        }
    }

    /// Adds one argument.
    ///
    /// # Panics
    ///
    /// Panics if `value` is a NaN or infinite float. Use
    /// [`ToolCall::try_with_arg`] when the value is not known up front.
    #[track_caller]
    pub fn with_arg(self, key: impl Into<String>, value: impl IntoArgument) -> Self {
        match self.try_with_arg(key, value) {
            Ok(call) => call,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_with_arg(
        mut self,
        key: impl Into<String>,
        value: impl IntoArgument,
    ) -> Result<Self, RussoError> {
        let key = key.into();
        match value.into_argument() {
            Ok(value) => {
                self.arguments.insert(key, value);
                Ok(self)
            }
            Err(number) => Err(RussoError::InvalidToolCall(format!(
                "argument {key} of {} is not a finite number: {number}",
                self.name
            ))),
        }
    }

    /// Replaces the whole argument map.
    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }
}

impl PartialEq for ToolCall {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && maps_equal(&self.arguments, &other.arguments)
    }
}

/// Values accepted as tool call arguments.
///
/// `serde_json` turns NaN and infinities into `null`, so floats go through
/// this conversion instead of `Into<Value>` and come back as `Err` when they
/// are not finite.
pub trait IntoArgument {
    fn into_argument(self) -> Result<Value, f64>;
}

macro_rules! impl_into_argument {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoArgument for $ty {
                fn into_argument(self) -> Result<Value, f64> {
                    Ok(Value::from(self))
                }
            }
        )*
    };
}

impl_into_argument!(
    bool,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    String,
    &str,
    Value,
    Map<String, Value>,
    Vec<Value>,
);

impl IntoArgument for f64 {
    fn into_argument(self) -> Result<Value, f64> {
        Number::from_f64(self).map(Value::Number).ok_or(self)
    }
}

impl IntoArgument for f32 {
    fn into_argument(self) -> Result<Value, f64> {
        f64::from(self).into_argument()
    }
}

/// Structural JSON equality in which `1` and `1.0` are the same number.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x.is_f64() || y.is_f64() {
                x.as_f64() == y.as_f64()
            } else {
                x == y
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => maps_equal(xs, ys),
        _ => a == b,
    }
}

fn maps_equal(xs: &Map<String, Value>, ys: &Map<String, Value>) -> bool {
    xs.len() == ys.len()
        && xs
            .iter()
            .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
}

impl fmt::Display for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, (key, value)) in self.arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str(")")
    }
}

#[derive(Deserialize)]
struct RawToolCall {
    name: String,
    #[serde(default)]
    arguments: StrictArguments,
}

impl TryFrom<RawToolCall> for ToolCall {
    type Error = RussoError;

    fn try_from(raw: RawToolCall) -> Result<Self, Self::Error> {
        Self::try_new(raw.name, Value::Object(raw.arguments.0))
    }
}

#[derive(Default)]
struct StrictArguments(Map<String, Value>);

impl<'de> Deserialize<'de> for StrictArguments {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ArgumentsVisitor;

        impl<'de> Visitor<'de> for ArgumentsVisitor {
            type Value = StrictArguments;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of tool call arguments")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StrictArguments::default())
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut map = Map::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    if map.contains_key(&key) {
                        return Err(de::Error::custom(format!("duplicate argument key `{key}`")));
                    }
                    map.insert(key, value);
                }
                Ok(StrictArguments(map))
            }
        }

        deserializer.deserialize_any(ArgumentsVisitor)
    }
}

/// What an agent produced for one input, normalized across providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// The unparsed provider payload, kept for debugging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl AgentResponse {
    pub fn new(tool_calls: Vec<ToolCall>) -> Self {
        Self { tool_calls, raw: None }
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Mp3,
    Pcm,
    Ogg,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Pcm => "pcm",
            AudioFormat::Ogg => "ogg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mp3",
            AudioFormat::Pcm => "audio/l16",
            AudioFormat::Ogg => "audio/ogg",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synthesized speech plus what is needed to interpret the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audio {
    pub data: Vec<u8>,
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per sample.
    pub sample_width: u16,
}

impl Audio {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            format: AudioFormat::Wav,
            sample_rate: 24_000,
            channels: 1,
            sample_width: 2,
        }
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_sample_width(mut self, sample_width: u16) -> Self {
        self.sample_width = sample_width;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ToolCall, Value};
    use crate::RussoError;

    #[test]
    fn deserializes_tool_call_with_default_arguments() {
        let call: ToolCall = serde_json::from_str(r#"{"name":"book_flight"}"#).unwrap();
        assert_eq!(call, ToolCall::new("book_flight"));
    }

    #[test]
    fn rejects_duplicate_argument_keys() {
        let err = serde_json::from_str::<ToolCall>(
            r#"{"name":"book_flight","arguments":{"from":"NYC","from":"LA"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate argument key"));
    }

    #[test]
    fn rejects_empty_name_and_non_object_arguments() {
        assert!(serde_json::from_str::<ToolCall>(r#"{"name":""}"#).is_err());
        assert!(ToolCall::try_new("f", json!([1, 2])).is_err());
        assert!(ToolCall::try_new("f", Value::Null).is_ok());
    }

    #[test]
    fn rejects_non_finite_numbers() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = ToolCall::new("set_temp").try_with_arg("value", value).unwrap_err();
            assert!(matches!(err, RussoError::InvalidToolCall(_)), "{err}");
        }
        assert!(ToolCall::new("f").try_with_arg("x", f32::NAN).is_err());

        let call = ToolCall::new("f").try_with_arg("x", 1.5).unwrap();
        assert_eq!(call.arguments()["x"], json!(1.5));
    }

    #[test]
    #[should_panic(expected = "not a finite number")]
    fn builder_panics_on_nan() {
        let _ = ToolCall::new("set_temp").with_arg("value", f64::NAN);
    }

    #[test]
    #[should_panic(expected = "not a finite number")]
    fn builder_panics_on_infinity() {
        let _ = ToolCall::new("set_temp").with_arg("value", f64::NEG_INFINITY);
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(
            ToolCall::new("t").with_arg("v", 1),
            ToolCall::new("t").with_arg("v", 1.0)
        );
        assert_eq!(
            ToolCall::new("t").with_arg("v", json!({"range": [1, 2.0]})),
            ToolCall::new("t").with_arg("v", json!({"range": [1.0, 2]}))
        );
        assert_ne!(
            ToolCall::new("t").with_arg("v", 1),
            ToolCall::new("t").with_arg("v", 1.5)
        );
        assert_ne!(
            ToolCall::new("t").with_arg("v", 1),
            ToolCall::new("t").with_arg("v", "1")
        );
        assert_ne!(
            ToolCall::new("t").with_arg("v", 1),
            ToolCall::new("t").with_arg("v", 1).with_arg("w", 2)
        );
    }

    #[test]
    fn argument_order_does_not_affect_equality() {
        let a = ToolCall::new("f").with_arg("a", 1).with_arg("b", 2);
        let b = ToolCall::new("f").with_arg("b", 2).with_arg("a", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn displays_name_and_arguments() {
        let call = ToolCall::new("book_flight").with_arg("from", "NYC");
        assert_eq!(call.to_string(), r#"book_flight(from="NYC")"#);
    }
}
