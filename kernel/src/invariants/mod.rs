// Invariant Framework
//
// Invariants are pure rules that must hold for every entity timeline
// after each batch. They are evaluated on the staged timeline before a
// change set is committed, so a violation never reaches the store.

use crate::batch::EntityId;
use crate::config::AbsencePolicy;
use crate::dimension::{ChangeSet, Version};

/// Result of invariant evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// Trait implemented by all invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
///
/// `before` and `after` are the entity's timeline ordered by `valid_from`.
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(
        &self,
        entity_id: &EntityId,
        before: &[Version],
        changes: &ChangeSet,
        after: &[Version],
    ) -> InvariantResult;
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    /// Create an engine with no invariants registered.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// The built-in dimension invariants.
    ///
    /// Gaps between versions are tolerated only when absent entities are
    /// expired, since a retired entity may come back later.
    pub fn standard(policy: AbsencePolicy) -> Self {
        let mut engine = Self::new();
        engine.register(SingleActiveVersion);
        engine.register(ActiveFlagConsistency);
        engine.register(ContiguousCoverage {
            allow_gaps: policy == AbsencePolicy::ExpireAbsent,
        });
        engine.register(ImmutableHistory);
        engine
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    /// Evaluate all invariants.
    ///
    /// Stops at the first failure.
    pub fn evaluate(
        &self,
        entity_id: &EntityId,
        before: &[Version],
        changes: &ChangeSet,
        after: &[Version],
    ) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            match invariant.validate(entity_id, before, changes, after) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail(reason) => {
                    return Err(InvariantViolation {
                        invariant: invariant.name(),
                        entity_id: entity_id.clone(),
                        reason,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Returned when an invariant is violated.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invariant `{invariant}` violated for entity {entity_id}: {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub entity_id: EntityId,
    pub reason: String,
}

/// At most one active version per entity.
pub struct SingleActiveVersion;

impl Invariant for SingleActiveVersion {
    fn name(&self) -> &'static str {
        "single-active-version"
    }

    fn validate(
        &self,
        _entity_id: &EntityId,
        _before: &[Version],
        _changes: &ChangeSet,
        after: &[Version],
    ) -> InvariantResult {
        let active = after.iter().filter(|v| v.is_active).count();
        if active > 1 {
            InvariantResult::Fail(format!("{active} active versions"))
        } else {
            InvariantResult::Pass
        }
    }
}

/// `is_active` is true exactly when `valid_to` is the sentinel.
pub struct ActiveFlagConsistency;

impl Invariant for ActiveFlagConsistency {
    fn name(&self) -> &'static str {
        "active-flag-consistency"
    }

    fn validate(
        &self,
        _entity_id: &EntityId,
        _before: &[Version],
        _changes: &ChangeSet,
        after: &[Version],
    ) -> InvariantResult {
        match after.iter().find(|v| !v.is_consistent()) {
            Some(v) => InvariantResult::Fail(format!(
                "version {} has is_active={} with valid_to={}",
                v.version_id, v.is_active, v.valid_to
            )),
            None => InvariantResult::Pass,
        }
    }
}

/// Consecutive versions meet exactly: each `valid_to` is the next `valid_from`.
pub struct ContiguousCoverage {
    pub allow_gaps: bool,
}

impl Invariant for ContiguousCoverage {
    fn name(&self) -> &'static str {
        "contiguous-coverage"
    }

    fn validate(
        &self,
        _entity_id: &EntityId,
        _before: &[Version],
        _changes: &ChangeSet,
        after: &[Version],
    ) -> InvariantResult {
        for pair in after.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);

            if prev.valid_to > next.valid_from {
                return InvariantResult::Fail(format!(
                    "version ending {} overlaps version starting {}",
                    prev.valid_to, next.valid_from
                ));
            }
            if prev.valid_to < next.valid_from && !self.allow_gaps {
                return InvariantResult::Fail(format!(
                    "gap between {} and {}",
                    prev.valid_to, next.valid_from
                ));
            }
        }
        InvariantResult::Pass
    }
}

/// Existing versions keep their attributes and start date; only a
/// current version may be closed.
pub struct ImmutableHistory;

impl Invariant for ImmutableHistory {
    fn name(&self) -> &'static str {
        "immutable-history"
    }

    fn validate(
        &self,
        _entity_id: &EntityId,
        before: &[Version],
        _changes: &ChangeSet,
        after: &[Version],
    ) -> InvariantResult {
        for old in before {
            let Some(new) = after.iter().find(|v| v.version_id == old.version_id) else {
                return InvariantResult::Fail(format!("version {} disappeared", old.version_id));
            };

            if new.attributes != old.attributes || new.valid_from != old.valid_from {
                return InvariantResult::Fail(format!("version {} was rewritten", old.version_id));
            }
            if !old.is_active && new.valid_to != old.valid_to {
                return InvariantResult::Fail(format!(
                    "expired version {} was expired again",
                    old.version_id
                ));
            }
        }
        InvariantResult::Pass
    }
}
