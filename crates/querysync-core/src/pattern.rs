//! Key patterns used by invalidation rules.
//!
//! A pattern names an operation and constrains a prefix of its parameters.
//! Each position is a literal, a positional wildcard, or a pointer into the
//! payload of the mutation that fires the rule. Parameters beyond the last
//! segment are unconstrained unless the pattern is exact.

use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::key::FingerprintKey;

/// Textual wildcard accepted by [`KeyPattern::parse`]
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Position must equal this value
    Literal(Value),
    /// Position must be present, any value
    Any,
    /// JSON pointer into the mutation payload; acts as `Any` until resolved
    Payload(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    operation: String,
    segments: Vec<Segment>,
    exact: bool,
}

impl KeyPattern {
    /// Pattern matching every key of `operation`
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            segments: Vec::new(),
            exact: false,
        }
    }

    /// Build from textual parts where `"*"` is a wildcard.
    ///
    /// A trailing `"*"` stands for "any remaining parameters", which is
    /// already what a prefix pattern means, so it adds no segment.
    pub fn parse<I>(operation: impl Into<String>, parts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let mut segments: Vec<Segment> = parts
            .into_iter()
            .map(|part| match part.into() {
                Value::String(s) if s == WILDCARD => Segment::Any,
                other => Segment::Literal(other),
            })
            .collect();
        if segments.last() == Some(&Segment::Any) {
            segments.pop();
        }
        Self {
            operation: operation.into(),
            segments,
            exact: false,
        }
    }

    pub fn literal(mut self, value: impl Into<Value>) -> Self {
        self.segments.push(Segment::Literal(value.into()));
        self
    }

    pub fn any(mut self) -> Self {
        self.segments.push(Segment::Any);
        self
    }

    /// Bind the next position to the payload value at `pointer` (e.g. `/id`)
    pub fn from_payload(mut self, pointer: impl Into<String>) -> Self {
        self.segments.push(Segment::Payload(pointer.into()));
        self
    }

    /// Only match keys with exactly as many parameters as there are segments
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn has_payload_segments(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Payload(_)))
    }

    pub fn matches(&self, key: &FingerprintKey) -> bool {
        if key.operation() != self.operation {
            return false;
        }
        let params = key.params();
        if params.len() < self.segments.len() {
            return false;
        }
        if self.exact && params.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(params)
            .all(|(segment, param)| match segment {
                Segment::Literal(expected) => expected == param,
                Segment::Any | Segment::Payload(_) => true,
            })
    }

    /// Every payload segment's pointer is present in `payload`
    pub fn resolves(&self, payload: Option<&Value>) -> bool {
        self.segments.iter().all(|segment| match segment {
            Segment::Payload(pointer) => payload.and_then(|p| p.pointer(pointer)).is_some(),
            _ => true,
        })
    }

    /// Replace payload segments with the literals they point at.
    ///
    /// A pointer that cannot be resolved widens to a wildcard: over-invalidating
    /// is acceptable, leaving a stale entry marked Fresh is not.
    pub fn bind(&self, payload: Option<&Value>) -> KeyPattern {
        let segments = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Payload(pointer) => {
                    match payload.and_then(|p| p.pointer(pointer)) {
                        Some(value) => Segment::Literal(value.clone()),
                        None => {
                            warn!(
                                operation = %self.operation,
                                pointer = %pointer,
                                "Payload pointer not found, widening to wildcard"
                            );
                            Segment::Any
                        }
                    }
                }
                other => other.clone(),
            })
            .collect();
        KeyPattern {
            operation: self.operation.clone(),
            segments,
            exact: self.exact,
        }
    }
}

impl From<&FingerprintKey> for KeyPattern {
    /// Pattern matching exactly this key
    fn from(key: &FingerprintKey) -> Self {
        KeyPattern {
            operation: key.operation().to_string(),
            segments: key
                .params()
                .iter()
                .cloned()
                .map(Segment::Literal)
                .collect(),
            exact: true,
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.operation)?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match segment {
                Segment::Literal(value) => write!(f, "{}", value)?,
                Segment::Any => write!(f, "{}", WILDCARD)?,
                Segment::Payload(pointer) => write!(f, "${}", pointer)?,
            }
        }
        if !self.exact {
            if !self.segments.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "..")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn detail(id: &str) -> FingerprintKey {
        FingerprintKey::new("merchant-detail").param(id)
    }

    #[test]
    fn test_trailing_wildcard_matches_remaining_params() {
        let pattern = KeyPattern::parse("merchant-detail", ["*"]);
        assert!(pattern.segments().is_empty());
        assert!(pattern.matches(&detail("m1")));
        assert!(pattern.matches(&detail("m2")));
        assert!(pattern.matches(&FingerprintKey::new("merchant-detail")));
        assert!(!pattern.matches(&FingerprintKey::new("merchant-list").param("m1")));
    }

    #[test]
    fn test_literal_prefix_ignores_further_filters() {
        let pattern = KeyPattern::parse("customer-orders", ["c1", "*"]);
        let open = FingerprintKey::new("customer-orders").param("c1").param("open");
        let bare = FingerprintKey::new("customer-orders").param("c1");
        let other = FingerprintKey::new("customer-orders").param("c2").param("open");
        assert!(pattern.matches(&open));
        assert!(pattern.matches(&bare));
        assert!(!pattern.matches(&other));
    }

    #[test]
    fn test_interior_wildcard_requires_position() {
        let pattern = KeyPattern::parse("customer-orders", ["*", "open"]);
        assert!(pattern.matches(&FingerprintKey::new("customer-orders").param("c9").param("open")));
        assert!(!pattern.matches(&FingerprintKey::new("customer-orders").param("c9")));
        assert!(!pattern.matches(&FingerprintKey::new("customer-orders").param("c9").param("closed")));
    }

    #[test]
    fn test_exact_pattern_checks_arity() {
        let pattern = KeyPattern::new("customer-orders").literal("c1").exact();
        assert!(pattern.matches(&FingerprintKey::new("customer-orders").param("c1")));
        assert!(!pattern.matches(&FingerprintKey::new("customer-orders").param("c1").param("open")));
    }

    #[test]
    fn test_from_key_is_exact() {
        let key = FingerprintKey::new("merchant-detail").param("m1");
        let pattern = KeyPattern::from(&key);
        assert!(pattern.is_exact());
        assert!(pattern.matches(&key));
        assert!(!pattern.matches(&detail("m2")));
    }

    #[test]
    fn test_bind_payload_pointer() {
        let pattern = KeyPattern::new("merchant-detail").from_payload("/id");
        assert!(pattern.has_payload_segments());
        // Unbound payload segments behave as wildcards
        assert!(pattern.matches(&detail("m2")));

        let bound = pattern.bind(Some(&json!({"id": "m1", "name": "Acme2"})));
        assert!(!bound.has_payload_segments());
        assert!(bound.matches(&detail("m1")));
        assert!(!bound.matches(&detail("m2")));
    }

    #[test]
    fn test_bind_missing_pointer_widens() {
        let pattern = KeyPattern::new("merchant-detail").from_payload("/id");
        let bound = pattern.bind(Some(&json!({"name": "Acme2"})));
        assert_eq!(bound.segments(), &[Segment::Any]);
        assert!(bound.matches(&detail("m1")));

        let unbound = pattern.bind(None);
        assert!(unbound.matches(&detail("m2")));

        assert!(!pattern.resolves(Some(&json!({"name": "Acme2"}))));
        assert!(!pattern.resolves(None));
        assert!(pattern.resolves(Some(&json!({"id": "m1"}))));
        assert!(KeyPattern::new("merchant-list").resolves(None));
    }

    #[test]
    fn test_deep_literal_match() {
        let pattern = KeyPattern::new("merchant-list").literal(json!({"status": "active"}));
        let key = FingerprintKey::new("merchant-list").param(json!({"status": "active"}));
        assert!(pattern.matches(&key));
    }

    #[test]
    fn test_display() {
        let pattern = KeyPattern::new("customer-orders").from_payload("/customer_id").any();
        assert_eq!(pattern.to_string(), "customer-orders[$/customer_id, *, ..]");
        let exact = KeyPattern::new("merchant-detail").literal("m1").exact();
        assert_eq!(exact.to_string(), "merchant-detail[\"m1\"]");
    }
}
