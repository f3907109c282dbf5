//! Typed endpoint configuration
//!
//! Components declare their parameters as `ParameterSpec`s. Building an
//! `EndpointConfiguration` validates and coerces every parameter up front, so
//! a configuration that exists is always complete.

use std::collections::HashMap;
use std::time::Duration;

use sb_common::ConfigurationError;
use tracing::debug;

use crate::duration::parse_duration;
use crate::uri::EndpointUri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Integer,
    Boolean,
    Duration,
}

impl ParameterKind {
    fn expected(&self) -> &'static str {
        match self {
            ParameterKind::String => "string",
            ParameterKind::Integer => "integer",
            ParameterKind::Boolean => "boolean (true/false)",
            ParameterKind::Duration => "duration (e.g. 500, 500ms, 5s, 1m30s)",
        }
    }
}

/// Declaration of a single URI parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub kind: ParameterKind,
    pub required: bool,
    pub default: Option<&'static str>,
    pub description: &'static str,
}

impl ParameterSpec {
    pub const fn new(name: &'static str, kind: ParameterKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            description: "",
        }
    }

    /// Optional parameter of the given kind, no default
    pub const fn string(name: &'static str) -> Self {
        Self::new(name, ParameterKind::String)
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ParameterKind::Integer)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, ParameterKind::Boolean)
    }

    pub const fn duration(name: &'static str) -> Self {
        Self::new(name, ParameterKind::Duration)
    }

    /// Reject URIs that omit this parameter
    pub const fn required(self) -> Self {
        Self { required: true, ..self }
    }

    /// Raw value coerced when the URI omits the parameter
    pub const fn with_default(self, default: &'static str) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    pub const fn describe(self, description: &'static str) -> Self {
        Self { description, ..self }
    }
}

/// A coerced parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Duration(Duration),
}

impl ParameterValue {
    fn coerce(spec: &ParameterSpec, value: &str) -> Result<Self, ConfigurationError> {
        let invalid = || ConfigurationError::InvalidValue {
            name: spec.name.to_string(),
            value: value.to_string(),
            expected: spec.kind.expected(),
        };

        match spec.kind {
            ParameterKind::String => Ok(ParameterValue::String(value.to_string())),
            ParameterKind::Integer => value
                .trim()
                .parse::<i64>()
                .map(ParameterValue::Integer)
                .map_err(|_| invalid()),
            ParameterKind::Boolean => {
                if value.eq_ignore_ascii_case("true") {
                    Ok(ParameterValue::Boolean(true))
                } else if value.eq_ignore_ascii_case("false") {
                    Ok(ParameterValue::Boolean(false))
                } else {
                    Err(invalid())
                }
            }
            ParameterKind::Duration => parse_duration(value)
                .map(ParameterValue::Duration)
                .ok_or_else(invalid),
        }
    }
}

/// Typed view over the parameters of one endpoint URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfiguration {
    uri: String,
    normalized_uri: String,
    scheme: String,
    remaining_path: String,
    raw: bool,
    values: HashMap<String, ParameterValue>,
}

impl EndpointConfiguration {
    /// Validate and coerce the parameters of `uri` against `specs`.
    ///
    /// Fails on a missing required parameter first, then on parameters that
    /// no `ParameterSpec` declares, then on the first value that cannot be coerced.
    pub fn new(
        uri: &EndpointUri,
        specs: &[ParameterSpec],
        raw: bool,
    ) -> Result<Self, ConfigurationError> {
        for spec in specs.iter().filter(|s| s.required && s.default.is_none()) {
            if !uri.has_param(spec.name) {
                return Err(ConfigurationError::MissingParameter {
                    uri: uri.original().to_string(),
                    name: spec.name.to_string(),
                });
            }
        }

        let mut unknown: Vec<String> = uri
            .param_names()
            .filter(|name| !specs.iter().any(|s| s.name == *name))
            .map(str::to_string)
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(ConfigurationError::UnknownParameters {
                uri: uri.original().to_string(),
                names: unknown,
            });
        }

        let mut values = HashMap::with_capacity(specs.len());
        for spec in specs {
            let value = match uri.param(spec.name, raw)? {
                Some(value) => ParameterValue::coerce(spec, &value)?,
                None => match spec.default {
                    Some(default) => ParameterValue::coerce(spec, default)?,
                    None => continue,
                },
            };
            values.insert(spec.name.to_string(), value);
        }

        debug!(
            uri = %uri.original(),
            raw = raw,
            parameters = values.len(),
            "Built endpoint configuration"
        );

        Ok(Self {
            uri: uri.original().to_string(),
            normalized_uri: uri.normalized(),
            scheme: uri.scheme().to_string(),
            remaining_path: uri.remaining_path().to_string(),
            raw,
            values,
        })
    }

    /// The URI as given, query included
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Canonical form used as the endpoint cache key
    pub fn normalized_uri(&self) -> &str {
        &self.normalized_uri
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything after `scheme:` and any `//`, without the query
    pub fn remaining_path(&self) -> &str {
        &self.remaining_path
    }

    /// Whether parameter values were delivered without percent-decoding
    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Set explicitly or through a default
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    /// Typed lookups; `None` if unset or declared with another kind
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParameterValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParameterValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ParameterValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn duration(&self, name: &str) -> Option<Duration> {
        match self.values.get(name) {
            Some(ParameterValue::Duration(d)) => Some(*d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[ParameterSpec] = &[
        ParameterSpec::string("host").required(),
        ParameterSpec::integer("port").with_default("22"),
        ParameterSpec::boolean("binary").with_default("false"),
        ParameterSpec::duration("connectTimeout").with_default("30s"),
        ParameterSpec::string("password"),
    ];

    fn build(uri: &str, raw: bool) -> Result<EndpointConfiguration, ConfigurationError> {
        EndpointConfiguration::new(&EndpointUri::parse(uri).unwrap(), SPECS, raw)
    }

    #[test]
    fn test_defaults_and_coercion() {
        let config = build("remote:files?host=example.org&binary=TRUE", false).unwrap();
        assert_eq!(config.string("host"), Some("example.org"));
        assert_eq!(config.integer("port"), Some(22));
        assert_eq!(config.boolean("binary"), Some(true));
        assert_eq!(config.duration("connectTimeout"), Some(Duration::from_secs(30)));
        assert!(!config.contains("password"));
        assert_eq!(config.remaining_path(), "files");
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = build("remote:files?missingRequiredParam=1", false).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingParameter { ref name, .. } if name == "host"
        ));
    }

    #[test]
    fn test_unknown_parameters() {
        let err = build("remote:files?host=h&zeta=1&alpha=2", false).unwrap_err();
        match err {
            ConfigurationError::UnknownParameters { names, .. } => {
                assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_uncoercible_value() {
        let err = build("remote:files?host=h&port=twenty-two", false).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidValue { ref name, expected: "integer", .. } if name == "port"
        ));

        assert!(build("remote:files?host=h&binary=yes", false).is_err());
        assert!(build("remote:files?host=h&connectTimeout=soon", false).is_err());
    }

    #[test]
    fn test_raw_and_decoded_delivery() {
        let decoded = build("remote:files?host=h&password=ab%25cd", false).unwrap();
        assert_eq!(decoded.string("password"), Some("ab%cd"));
        assert!(!decoded.is_raw());

        let raw = build("remote:files?host=h&password=ab%25cd", true).unwrap();
        assert_eq!(raw.string("password"), Some("ab%25cd"));
        assert!(raw.is_raw());
    }

    #[test]
    fn test_typed_accessor_mismatch_returns_none() {
        let config = build("remote:files?host=h", false).unwrap();
        assert_eq!(config.integer("host"), None);
        assert_eq!(config.string("port"), None);
    }
}
