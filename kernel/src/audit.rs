// Dimension Audit
//
// Inspects a whole dimension store and classifies anything that breaks
// the version-history rules. Used on tables restored from disk, where
// rows were not produced by the replay engine in this process.

use serde::Serialize;

use crate::batch::EntityId;
use crate::dimension::{DimensionStore, Version};

/// Severity of an audit finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    /// Legitimate under some configurations.
    Info,

    /// Suspicious, but history is still readable.
    Warning,

    /// Point-in-time reads are ambiguous or wrong.
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FindingKind {
    MultipleActive,
    FlagMismatch,
    Overlap,
    Gap,
    NoActiveVersion,
    UnchangedSuccessor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditFinding {
    pub entity_id: EntityId,
    pub kind: FindingKind,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFrequency {
    pub entity_id: EntityId,
    pub versions: usize,
}

/// Full audit report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub findings: Vec<AuditFinding>,
    pub change_frequency: Vec<EntityFrequency>,
}

impl AuditReport {
    /// No findings above `Info`.
    pub fn is_clean(&self) -> bool {
        self.findings.iter().all(|f| f.severity == Severity::Info)
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// Audit every entity timeline in the store.
pub fn audit_store<S: DimensionStore + ?Sized>(store: &S) -> AuditReport {
    let mut findings = Vec::new();

    for entity_id in store.entity_ids() {
        let timeline = store.timeline(entity_id);
        audit_timeline(entity_id, &timeline, &mut findings);
    }

    let change_frequency = store
        .change_frequency()
        .into_iter()
        .map(|(entity_id, versions)| EntityFrequency {
            entity_id,
            versions,
        })
        .collect();

    AuditReport {
        findings,
        change_frequency,
    }
}

fn audit_timeline(entity_id: &EntityId, timeline: &[&Version], findings: &mut Vec<AuditFinding>) {
    let mut push = |kind, severity, message: String| {
        findings.push(AuditFinding {
            entity_id: entity_id.clone(),
            kind,
            severity,
            message,
        })
    };

    match timeline.iter().filter(|v| v.is_active).count() {
        0 => push(
            FindingKind::NoActiveVersion,
            Severity::Info,
            "entity has no current version".into(),
        ),
        1 => {}
        n => push(
            FindingKind::MultipleActive,
            Severity::Critical,
            format!("{n} versions are active"),
        ),
    }

    for version in timeline.iter().filter(|v| !v.is_consistent()) {
        push(
            FindingKind::FlagMismatch,
            Severity::Critical,
            format!(
                "version {} has is_active={} with valid_to={}",
                version.version_id, version.is_active, version.valid_to
            ),
        );
    }

    for pair in timeline.windows(2) {
        let (prev, next) = (pair[0], pair[1]);

        if prev.valid_to > next.valid_from {
            push(
                FindingKind::Overlap,
                Severity::Critical,
                format!(
                    "versions {} and {} overlap from {} to {}",
                    prev.version_id, next.version_id, next.valid_from, prev.valid_to
                ),
            );
        } else if prev.valid_to < next.valid_from {
            push(
                FindingKind::Gap,
                Severity::Info,
                format!("no version covers {} to {}", prev.valid_to, next.valid_from),
            );
        } else if prev.attributes == next.attributes {
            push(
                FindingKind::UnchangedSuccessor,
                Severity::Warning,
                format!(
                    "version {} repeats the attributes of version {}",
                    next.version_id, prev.version_id
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Attributes;
    use crate::dimension::InMemoryDimensionStore;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn version(id: u64, entity: i64, qty: i64, from: &str, to: Option<&str>) -> Version {
        let mut v = Version::new_active(
            id,
            EntityId::Int(entity),
            Attributes::new().with("quantity", qty),
            date(from),
        );
        if let Some(to) = to {
            v.expire(date(to));
        }
        v
    }

    #[test]
    fn clean_history_has_no_findings() {
        let store = InMemoryDimensionStore::from_versions(vec![
            version(1, 3, 16, "2025-12-20", Some("2025-12-25")),
            version(2, 3, 18, "2025-12-25", None),
        ])
        .unwrap();

        let report = audit_store(&store);

        assert!(report.findings.is_empty());
        assert!(report.is_clean());
        assert_eq!(
            report.change_frequency,
            vec![EntityFrequency {
                entity_id: EntityId::Int(3),
                versions: 2
            }]
        );
    }

    #[test]
    fn overlapping_actives_are_critical() {
        let store = InMemoryDimensionStore::from_versions(vec![
            version(1, 3, 16, "2025-12-20", None),
            version(2, 3, 18, "2025-12-25", None),
        ])
        .unwrap();

        let report = audit_store(&store);

        assert!(!report.is_clean());
        assert_eq!(report.highest_severity(), Some(Severity::Critical));
        assert!(report
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::MultipleActive));
        assert!(report.findings.iter().any(|f| f.kind == FindingKind::Overlap));
    }

    #[test]
    fn gaps_are_informational() {
        let store = InMemoryDimensionStore::from_versions(vec![
            version(1, 4, 40, "2025-12-20", Some("2025-12-25")),
            version(2, 4, 41, "2025-12-28", None),
        ])
        .unwrap();

        let report = audit_store(&store);

        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, FindingKind::Gap);
        assert!(report.is_clean());
    }
}
