//! Invalidation router.
//!
//! Maps each mutation name to the cache keys it makes stale (or removes),
//! so writers never need to know which readers display the affected data.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::key::FingerprintKey;
use crate::pattern::KeyPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// Fresh -> Stale, value kept
    Invalidate,
    /// Remove the entry (terminal deletions)
    Evict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTarget {
    pub pattern: KeyPattern,
    pub action: RuleAction,
}

/// Ordered patterns a mutation affects. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRule {
    mutation: String,
    targets: Vec<RuleTarget>,
}

impl InvalidationRule {
    pub fn new(mutation: impl Into<String>) -> Self {
        Self {
            mutation: mutation.into(),
            targets: Vec::new(),
        }
    }

    pub fn invalidates(mut self, pattern: KeyPattern) -> Self {
        self.targets.push(RuleTarget {
            pattern,
            action: RuleAction::Invalidate,
        });
        self
    }

    pub fn evicts(mut self, pattern: KeyPattern) -> Self {
        self.targets.push(RuleTarget {
            pattern,
            action: RuleAction::Evict,
        });
        self
    }

    pub fn mutation(&self) -> &str {
        &self.mutation
    }

    pub fn targets(&self) -> &[RuleTarget] {
        &self.targets
    }

    pub fn needs_payload(&self) -> bool {
        self.targets
            .iter()
            .any(|t| t.pattern.has_payload_segments())
    }
}

/// Keys selected by a rule for one mutation.
///
/// Each key appears at most once; a key matched for both actions is evicted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub invalidate: HashSet<FingerprintKey>,
    pub evict: HashSet<FingerprintKey>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.invalidate.is_empty() && self.evict.is_empty()
    }

    pub fn len(&self) -> usize {
        self.invalidate.len() + self.evict.len()
    }
}

#[derive(Debug, Default)]
pub struct InvalidationRouter {
    rules: HashMap<String, InvalidationRule>,
}

impl InvalidationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: InvalidationRule) -> Result<(), ValidationError> {
        if rule.mutation.is_empty() {
            return Err(ValidationError::EmptyOperation);
        }
        if self.rules.contains_key(&rule.mutation) {
            return Err(ValidationError::DuplicateRule(rule.mutation));
        }
        if rule
            .targets
            .iter()
            .any(|t| t.pattern.operation().is_empty())
        {
            return Err(ValidationError::EmptyOperation);
        }
        debug!(
            mutation = %rule.mutation,
            targets = rule.targets.len(),
            "Registered invalidation rule"
        );
        self.rules.insert(rule.mutation.clone(), rule);
        Ok(())
    }

    pub fn rule(&self, mutation: &str) -> Option<&InvalidationRule> {
        self.rules.get(mutation)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve the rule for `mutation` against the currently stored keys.
    ///
    /// Returns `None` when no rule is registered for the mutation.
    pub fn resolve<'a, I>(
        &self,
        mutation: &str,
        payload: Option<&Value>,
        keys: I,
    ) -> Option<Resolution>
    where
        I: IntoIterator<Item = &'a FingerprintKey>,
    {
        let rule = self.rules.get(mutation)?;
        let targets: Vec<RuleTarget> = rule
            .targets
            .iter()
            .map(|t| {
                // A widened evict would remove unrelated entries; they only go stale
                let action = match t.action {
                    RuleAction::Evict if !t.pattern.resolves(payload) => {
                        warn!(
                            mutation,
                            pattern = %t.pattern,
                            "Evict target unresolved in payload, invalidating instead"
                        );
                        RuleAction::Invalidate
                    }
                    action => action,
                };
                RuleTarget {
                    pattern: t.pattern.bind(payload),
                    action,
                }
            })
            .collect();

        let mut resolution = Resolution::default();
        for key in keys {
            let mut action = None;
            for target in targets.iter().filter(|t| t.pattern.matches(key)) {
                if target.action == RuleAction::Evict {
                    action = Some(RuleAction::Evict);
                    break;
                }
                action = Some(RuleAction::Invalidate);
            }
            match action {
                Some(RuleAction::Evict) => {
                    resolution.evict.insert(key.clone());
                }
                Some(RuleAction::Invalidate) => {
                    resolution.invalidate.insert(key.clone());
                }
                None => {}
            }
        }
        Some(resolution)
    }
}
