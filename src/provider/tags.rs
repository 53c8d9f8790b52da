//! Tag lookup over registry tag lists.
//!
//! # Responsibilities
//! - Find `key=value` tags and bare marker tags
//! - Scope attribute keys under the configured prefix
//! - Parse typed attribute values with documented fallbacks
//!
//! # Design Decisions
//! - Key matching is case-sensitive
//! - First matching tag wins; later duplicates are ignored
//! - Tags without `=` or with an empty key never yield a value
//! - Parse failures are treated as "attribute absent", never as errors

/// Returns true if any tag equals `name` or starts with `name=`.
pub fn has_tag(name: &str, tags: &[String]) -> bool {
    if name.is_empty() {
        return false;
    }
    tags.iter().any(|tag| match tag.strip_prefix(name) {
        Some(rest) => rest.is_empty() || rest.starts_with('='),
        None => false,
    })
}

/// Returns the value of the first `key=value` tag whose key equals `key`.
pub fn get_tag<'a>(key: &str, tags: &'a [String], default: &'a str) -> &'a str {
    find_tag(key, tags).unwrap_or(default)
}

fn find_tag<'a>(key: &str, tags: &'a [String]) -> Option<&'a str> {
    tags.iter().find_map(|tag| match tag.split_once('=') {
        Some((k, v)) if !k.is_empty() && k == key => Some(v),
        _ => None,
    })
}

/// Attribute accessor scoped under an optional key prefix.
///
/// With prefix `traefik`, the attribute `backend.weight` is read from the tag
/// `traefik.backend.weight=...`. An empty prefix reads `backend.weight=...`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagAccessor {
    prefix: String,
}

impl TagAccessor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<prefix>.<name>`, or `name` unchanged when no prefix is configured.
    pub fn prefixed_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    /// Look up `suffix` under the prefix, falling back to `default`.
    pub fn attribute<'a>(&self, suffix: &str, tags: &'a [String], default: &'a str) -> &'a str {
        self.find(suffix, tags).unwrap_or(default)
    }

    /// Look up `suffix` under the prefix, `None` if absent.
    pub fn find<'a>(&self, suffix: &str, tags: &'a [String]) -> Option<&'a str> {
        find_tag(&self.prefixed_name(suffix), tags)
    }

    /// Look up `suffix` in each tag list in turn; the first list holding it wins.
    pub fn find_layered<'a>(&self, suffix: &str, layers: &[&'a [String]]) -> Option<&'a str> {
        let key = self.prefixed_name(suffix);
        layers.iter().find_map(|tags| find_tag(&key, tags))
    }

    /// Boolean attribute. Unparsable values are reported as absent.
    pub fn bool_attribute(&self, suffix: &str, layers: &[&[String]]) -> Option<bool> {
        let raw = self.find_layered(suffix, layers)?;
        match parse_bool(raw) {
            Some(value) => Some(value),
            None => {
                tracing::debug!(attribute = %self.prefixed_name(suffix), value = %raw, "Ignoring non-boolean attribute");
                None
            }
        }
    }

    /// Integer attribute. Unparsable values are reported as absent.
    pub fn int_attribute(&self, suffix: &str, layers: &[&[String]]) -> Option<i64> {
        let raw = self.find_layered(suffix, layers)?;
        match raw.trim().parse::<i64>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(attribute = %self.prefixed_name(suffix), value = %raw, error = %e, "Ignoring non-integer attribute");
                None
            }
        }
    }

    /// Comma-separated attribute. Blank items are dropped; absent yields an empty list.
    pub fn list_attribute(&self, suffix: &str, layers: &[&[String]]) -> Vec<String> {
        self.find_layered(suffix, layers)
            .map(|raw| {
                raw.split(',')
                    .filter(|item| !item.trim().is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Boolean parsing with the spellings operators commonly put in tags.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
