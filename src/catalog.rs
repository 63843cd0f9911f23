//! Inbound catalog normalization
//!
//! Panels return inbound lists in several shapes. Each shape is handled by a
//! [`Rule`], a pure function from raw JSON to descriptors; a
//! [`CatalogReader`] tries its rules in order and keeps the first non-empty
//! result.

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{PanelError, Result};
use crate::model::InboundDescriptor;

pub mod classic;
pub mod xui;

type Extract = dyn Fn(&Value) -> Option<Vec<InboundDescriptor>> + Send + Sync;

// ============================================================================
// Rules
// ============================================================================

/// One normalization rule.
///
/// Returns `None` when the shape is not recognized and `Some(vec![])` when
/// it is recognized but holds no inbounds.
pub struct Rule {
    pub name: &'static str,
    extract: Box<Extract>,
}

impl Rule {
    pub fn new<F>(name: &'static str, extract: F) -> Self
    where
        F: Fn(&Value) -> Option<Vec<InboundDescriptor>> + Send + Sync + 'static,
    {
        Self {
            name,
            extract: Box::new(extract),
        }
    }

    /// Rule for an array found at `path`, each element parsed by `parse`
    pub fn array_at(
        name: &'static str,
        path: &'static [&'static str],
        parse: fn(&Value) -> Option<InboundDescriptor>,
    ) -> Self {
        Self::new(name, move |value| {
            let array = lookup(value, path)?.as_array()?;
            Some(array.iter().filter_map(parse).collect())
        })
    }

    pub fn apply(&self, value: &Value) -> Option<Vec<InboundDescriptor>> {
        (self.extract)(value)
    }
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

// ============================================================================
// Catalog Reader
// ============================================================================

/// Ordered set of rules for one vendor family
pub struct CatalogReader {
    rules: Vec<Rule>,
}

impl CatalogReader {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Rules for X-UI lineage panels
    pub fn xui() -> Self {
        Self::new(vec![
            Rule::array_at("direct-array", &[], xui::parse_inbound),
            Rule::array_at("obj", &["obj"], xui::parse_inbound),
            Rule::array_at("inbounds", &["inbounds"], xui::parse_inbound),
            Rule::array_at("nested-config", &["config", "inbounds"], xui::parse_inbound),
        ])
    }

    /// Rules for Marzban's protocol-keyed inbound map
    pub fn marzban() -> Self {
        Self::new(vec![
            Rule::new("protocol-map", classic::parse_protocol_map),
            Rule::array_at("inbounds", &["inbounds"], xui::parse_inbound),
        ])
    }

    /// Rules for Marzneshin's paginated inbound list
    pub fn marzneshin() -> Self {
        Self::new(vec![
            Rule::array_at("items", &["items"], classic::parse_marzneshin_inbound),
            Rule::array_at("direct-array", &[], classic::parse_marzneshin_inbound),
        ])
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Normalizes an inbound list response
    pub fn read_list(&self, endpoint: &str, value: &Value) -> Result<Vec<InboundDescriptor>> {
        let mut recognized = false;

        for rule in &self.rules {
            match rule.apply(value) {
                Some(list) if !list.is_empty() => {
                    debug!(
                        "Rule '{}' normalized {} inbound(s) from {}",
                        rule.name,
                        list.len(),
                        endpoint
                    );
                    return Ok(list);
                }
                Some(_) => {
                    trace!("Rule '{}' matched an empty list", rule.name);
                    recognized = true;
                }
                None => {}
            }
        }

        if recognized {
            Ok(Vec::new())
        } else {
            Err(PanelError::malformed(
                endpoint,
                format!("no inbound list shape matched (tried {})", self.rule_names().join(", ")),
            ))
        }
    }

    /// Normalizes a single-inbound detail response
    pub fn read_one(&self, endpoint: &str, value: &Value) -> Result<InboundDescriptor> {
        let candidate = match value.get("obj") {
            Some(obj) if obj.is_object() => obj,
            _ => value,
        };
        if candidate.is_object()
            && let Some(inbound) = xui::parse_inbound(candidate)
        {
            return Ok(inbound);
        }

        self.read_list(endpoint, value)?
            .into_iter()
            .next()
            .ok_or_else(|| PanelError::malformed(endpoint, "no inbound in detail response"))
    }
}

// ============================================================================
// Lenient JSON accessors
// ============================================================================

/// Object stored either inline or as a JSON-encoded string
pub(crate) fn embedded(value: &Value, key: &str) -> Value {
    match value.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => {
            serde_json::from_str(s).unwrap_or(Value::Null)
        }
        Some(v @ Value::Object(_)) => v.clone(),
        _ => Value::Null,
    }
}

/// String or number rendered as a string
pub(crate) fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-negative integer; negative values clamp to 0
pub(crate) fn uint(value: Option<&Value>) -> u64 {
    int(value).map(|i| i.max(0) as u64).unwrap_or(0)
}

/// Array of strings, or a comma separated string
pub(crate) fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}
