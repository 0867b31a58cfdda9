//! Declarative, typed configuration entries.

use std::collections::HashMap;
use std::fmt;

use crate::error::{OverrideError, Result};
use crate::overrides::ExplainMode;

/// Value types an entry can declare.
pub trait ConfType: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Type name used in parse errors and documentation.
    const TYPE_NAME: &'static str;

    /// Parses a raw setting; `None` means the text is not a valid value.
    fn parse(raw: &str) -> Option<Self>;

    /// Renders the value so that [`ConfType::parse`] returns it unchanged.
    fn render(&self) -> String;
}

impl ConfType for bool {
    const TYPE_NAME: &'static str = "boolean";

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

impl ConfType for i32 {
    const TYPE_NAME: &'static str = "integer";

    fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

impl ConfType for i64 {
    const TYPE_NAME: &'static str = "long";

    fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

impl ConfType for f64 {
    const TYPE_NAME: &'static str = "double";

    fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }

    fn render(&self) -> String {
        // Debug keeps a trailing `.0` so integral doubles stay recognizable.
        format!("{self:?}")
    }
}

impl ConfType for String {
    const TYPE_NAME: &'static str = "string";

    fn parse(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }

    fn render(&self) -> String {
        self.clone()
    }
}

impl ConfType for Vec<String> {
    const TYPE_NAME: &'static str = "comma-separated list";

    fn parse(raw: &str) -> Option<Self> {
        Some(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    fn render(&self) -> String {
        self.join(",")
    }
}

impl ConfType for ExplainMode {
    const TYPE_NAME: &'static str = "one of ALL, NONE, NOT_ON_GPU";

    fn parse(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }

    fn render(&self) -> String {
        self.as_str().to_string()
    }
}

/// Byte count accepting `k`, `m`, `g` and `t` suffixes (powers of 1024).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ConfType for ByteSize {
    const TYPE_NAME: &'static str = "byte size";

    fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim().to_ascii_lowercase();
        let text = text.strip_suffix('b').unwrap_or(&text);
        let (digits, shift) = match text.chars().last()? {
            'k' => (&text[..text.len() - 1], 10),
            'm' => (&text[..text.len() - 1], 20),
            'g' => (&text[..text.len() - 1], 30),
            't' => (&text[..text.len() - 1], 40),
            _ => (text, 0),
        };
        let value: u64 = digits.trim().parse().ok()?;
        value.checked_mul(1u64 << shift).map(ByteSize)
    }

    fn render(&self) -> String {
        self.0.to_string()
    }
}

/// Validator predicate with the message reported when it fails.
#[derive(Clone, Copy)]
pub struct Validator<T> {
    check: fn(&T) -> bool,
    message: &'static str,
}

impl<T> fmt::Debug for Validator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("message", &self.message)
            .finish()
    }
}

/// Typed setting with documentation and default.
#[derive(Debug, Clone)]
pub struct ConfEntry<T: ConfType> {
    key: &'static str,
    doc: &'static str,
    internal: bool,
    default: T,
    validator: Option<Validator<T>>,
}

impl<T: ConfType> ConfEntry<T> {
    /// Setting key.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Declared default.
    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Resolves the entry against raw settings.
    pub fn get(&self, raw: &HashMap<String, String>) -> Result<T> {
        let Some(text) = raw.get(self.key) else {
            return Ok(self.default.clone());
        };
        let value = T::parse(text).ok_or_else(|| OverrideError::ConfigParse {
            key: self.key.to_string(),
            value: text.clone(),
            expected: T::TYPE_NAME,
        })?;
        self.validate(&value)?;
        Ok(value)
    }

    fn validate(&self, value: &T) -> Result<()> {
        match &self.validator {
            Some(validator) if !(validator.check)(value) => Err(OverrideError::ConfigValidation {
                key: self.key.to_string(),
                message: validator.message.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Type-erased view used for documentation and bulk validation.
pub trait AnyConfEntry: Send + Sync {
    /// Setting key.
    fn key(&self) -> &'static str;
    /// Documentation text.
    fn doc(&self) -> &'static str;
    /// Internal entries are hidden from generated documentation.
    fn is_internal(&self) -> bool;
    /// Default rendered as a raw setting.
    fn default_string(&self) -> String;
    /// Resolved value rendered back as a raw setting.
    fn resolve_string(&self, raw: &HashMap<String, String>) -> Result<String>;
    /// Parses and validates the entry's raw value, if present.
    fn check(&self, raw: &HashMap<String, String>) -> Result<()> {
        self.resolve_string(raw).map(|_| ())
    }
}

impl<T: ConfType> AnyConfEntry for ConfEntry<T> {
    fn key(&self) -> &'static str {
        self.key
    }

    fn doc(&self) -> &'static str {
        self.doc
    }

    fn is_internal(&self) -> bool {
        self.internal
    }

    fn default_string(&self) -> String {
        self.default.render()
    }

    fn resolve_string(&self, raw: &HashMap<String, String>) -> Result<String> {
        self.get(raw).map(|value| value.render())
    }
}

/// Starts declaring an entry.
pub fn conf(key: &'static str) -> ConfBuilder {
    ConfBuilder {
        key,
        doc: "",
        internal: false,
    }
}

/// Untyped stage of the entry builder.
#[derive(Debug)]
pub struct ConfBuilder {
    key: &'static str,
    doc: &'static str,
    internal: bool,
}

impl ConfBuilder {
    /// Sets the documentation text.
    pub fn doc(mut self, doc: &'static str) -> Self {
        self.doc = doc;
        self
    }

    /// Hides the entry from generated documentation.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    fn typed<T: ConfType>(self) -> TypedConfBuilder<T> {
        TypedConfBuilder {
            key: self.key,
            doc: self.doc,
            internal: self.internal,
            validator: None,
        }
    }

    /// Boolean entry.
    pub fn boolean(self) -> TypedConfBuilder<bool> {
        self.typed()
    }

    /// 32-bit integer entry.
    pub fn integer(self) -> TypedConfBuilder<i32> {
        self.typed()
    }

    /// 64-bit integer entry.
    pub fn long(self) -> TypedConfBuilder<i64> {
        self.typed()
    }

    /// Floating point entry.
    pub fn double(self) -> TypedConfBuilder<f64> {
        self.typed()
    }

    /// Byte size entry.
    pub fn bytes(self) -> TypedConfBuilder<ByteSize> {
        self.typed()
    }

    /// Free-form string entry.
    pub fn string(self) -> TypedConfBuilder<String> {
        self.typed()
    }

    /// Comma-separated list entry.
    pub fn string_list(self) -> TypedConfBuilder<Vec<String>> {
        self.typed()
    }

    /// Explain verbosity entry.
    pub fn explain_mode(self) -> TypedConfBuilder<ExplainMode> {
        self.typed()
    }
}

/// Typed stage of the entry builder.
#[derive(Debug)]
pub struct TypedConfBuilder<T: ConfType> {
    key: &'static str,
    doc: &'static str,
    internal: bool,
    validator: Option<Validator<T>>,
}

impl<T: ConfType> TypedConfBuilder<T> {
    /// Rejects parsed values for which `check` returns false.
    pub fn check_value(mut self, check: fn(&T) -> bool, message: &'static str) -> Self {
        self.validator = Some(Validator { check, message });
        self
    }

    /// Finishes the entry.
    pub fn create_with_default(self, default: T) -> ConfEntry<T> {
        ConfEntry {
            key: self.key,
            doc: self.doc,
            internal: self.internal,
            default,
            validator: self.validator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn byte_sizes_accept_suffixes() {
        assert_eq!(ByteSize::parse("1024"), Some(ByteSize(1024)));
        assert_eq!(ByteSize::parse("2k"), Some(ByteSize(2048)));
        assert_eq!(ByteSize::parse("512MB"), Some(ByteSize(512 << 20)));
        assert_eq!(ByteSize::parse(" 1g "), Some(ByteSize(1 << 30)));
        assert_eq!(ByteSize::parse("lots"), None);
        assert_eq!(ByteSize::parse(""), None);
        assert_eq!(ByteSize::parse("99999999999t"), None);
    }

    #[test]
    fn lists_trim_and_skip_blanks() {
        assert_eq!(
            <Vec<String>>::parse(" a, b,,c "),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(<Vec<String>>::parse(""), Some(Vec::new()));
    }

    #[test]
    fn absent_key_uses_default() {
        let entry = conf("t.flag").boolean().create_with_default(true);
        assert!(entry.get(&HashMap::new()).expect("default"));
    }

    #[test]
    fn bad_value_names_key_and_type() {
        let entry = conf("t.count").integer().create_with_default(1);
        let err = entry.get(&raw(&[("t.count", "ten")])).unwrap_err();
        match err {
            OverrideError::ConfigParse {
                key,
                value,
                expected,
            } => {
                assert_eq!(key, "t.count");
                assert_eq!(value, "ten");
                assert_eq!(expected, "integer");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validator_runs_after_parse() {
        let entry = conf("t.fraction")
            .double()
            .check_value(|v| (0.0..=1.0).contains(v), "must be within [0, 1]")
            .create_with_default(0.5);
        assert_eq!(entry.get(&raw(&[("t.fraction", "0.25")])).expect("valid"), 0.25);
        let err = entry.get(&raw(&[("t.fraction", "1.5")])).unwrap_err();
        assert_eq!(err.to_string(), "invalid value for t.fraction: must be within [0, 1]");
    }

    #[test]
    fn doubles_render_round_trip() {
        for value in [0.9_f64, 1.0, 1e-7, 12345.5] {
            assert_eq!(f64::parse(&value.render()), Some(value));
        }
    }
}
