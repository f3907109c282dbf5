//! Endpoint URI parser
//!
//! Grammar: `scheme:remaining-path[?key=value&key2=value2...]`. A `//` after
//! the scheme is optional. Parameter values are kept exactly as written;
//! percent-decoding happens on access unless the caller asks for the raw form.

use std::borrow::Cow;

use sb_common::{ConfigurationError, ResolutionError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUri {
    original: String,
    scheme: String,
    path: String,
    query: Option<String>,
    /// Decoded key, raw value. Last occurrence of a key wins.
    params: Vec<(String, String)>,
}

impl EndpointUri {
    pub fn parse(uri: &str) -> Result<Self, ResolutionError> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(ResolutionError::malformed(uri, "empty URI"));
        }

        let (scheme, rest) = trimmed
            .split_once(':')
            .ok_or_else(|| ResolutionError::malformed(uri, "missing scheme"))?;

        if !is_valid_scheme(scheme) {
            return Err(ResolutionError::malformed(uri, format!("invalid scheme '{}'", scheme)));
        }

        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        if path.is_empty() {
            return Err(ResolutionError::malformed(uri, "missing remaining path"));
        }

        let params = match query {
            Some(q) => parse_query(uri, q)?,
            None => Vec::new(),
        };

        Ok(Self {
            original: trimmed.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            path: path.to_string(),
            query: query.map(str::to_string),
            params,
        })
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn remaining_path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the leading `?`
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The URI as written, up to (not including) the query string
    pub fn without_query(&self) -> &str {
        match self.original.find('?') {
            Some(idx) => &self.original[..idx],
            None => &self.original,
        }
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(k, _)| k.as_str())
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|(k, _)| k == name)
    }

    /// Parameter value exactly as it appears in the URI
    pub fn raw_param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Parameter value with percent-escapes decoded
    pub fn decoded_param(&self, name: &str) -> Result<Option<Cow<'_, str>>, ConfigurationError> {
        match self.raw_param(name) {
            Some(raw) => decode(name, raw).map(Some),
            None => Ok(None),
        }
    }

    /// Parameter value in the form a component asked for
    pub fn param(&self, name: &str, raw: bool) -> Result<Option<Cow<'_, str>>, ConfigurationError> {
        if raw {
            Ok(self.raw_param(name).map(Cow::Borrowed))
        } else {
            self.decoded_param(name)
        }
    }

    /// Cache key: `scheme://path` plus parameters sorted by name
    pub fn normalized(&self) -> String {
        let mut normalized = format!("{}://{}", self.scheme, self.path);
        if !self.params.is_empty() {
            let mut pairs: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            normalized.push('?');
            normalized.push_str(&pairs.join("&"));
        }
        normalized
    }
}

/// Normalize a URI string into its cache key
pub fn normalize_uri(uri: &str) -> Result<String, ResolutionError> {
    EndpointUri::parse(uri).map(|parsed| parsed.normalized())
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn parse_query(uri: &str, query: &str) -> Result<Vec<(String, String)>, ResolutionError> {
    let mut params: Vec<(String, String)> = Vec::new();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key)
            .map_err(|_| ResolutionError::malformed(uri, format!("invalid parameter name '{}'", key)))?
            .into_owned();
        if key.is_empty() {
            return Err(ResolutionError::malformed(uri, "empty parameter name"));
        }

        match params.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value.to_string(),
            None => params.push((key, value.to_string())),
        }
    }

    Ok(params)
}

fn decode<'a>(name: &str, raw: &'a str) -> Result<Cow<'a, str>, ConfigurationError> {
    urlencoding::decode(raw).map_err(|_| ConfigurationError::InvalidEncoding {
        name: name.to_string(),
    })
}
