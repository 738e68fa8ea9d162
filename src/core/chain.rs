/// Restore-chain resolution and retention planning
///
/// Both operate purely on typed artifacts from a scan; no filesystem or
/// clock access happens here. The restore chain is built fresh per
/// restore attempt and never persisted.

use anyhow::Result;
use std::time::{Duration, SystemTime};

use crate::core::artifact::{Artifact, ArtifactStore, FullId};
use crate::error::StackError;

/// Latest full plus its complete incremental sequence, in apply order.
///
/// An empty store resolves to an empty chain (the caller treats that as an
/// informational no-op). A gap in the incremental sequence is fatal and
/// never silently truncated.
pub fn resolve_restore_chain(store: &ArtifactStore) -> Result<Vec<Artifact>> {
    let Some(full) = store.latest_full() else {
        return Ok(Vec::new());
    };
    let base = full.full_id().expect("latest_full returns a full artifact");

    let incrementals = store.incrementals_for(base);

    let mut chain = Vec::with_capacity(1 + incrementals.len());
    chain.push(full.clone());

    for (position, artifact) in incrementals.iter().enumerate() {
        let expected = (position + 1) as u32;
        let id = artifact.incremental_id().expect("incremental artifact");
        if id.seq != expected {
            return Err(StackError::ChainInconsistent(format!(
                "expected incremental {}_{:02} but found {}_{:02}",
                base, expected, base, id.seq
            ))
            .into());
        }
        chain.push((*artifact).clone());
    }

    Ok(chain)
}

/// What a prune run would delete.
#[derive(Debug, Default)]
pub struct PrunePlan {
    /// Artifacts outside the retention window.
    pub expired: Vec<Artifact>,
    /// Incrementals whose base full no longer exists after the prune.
    pub orphans: Vec<Artifact>,
    /// True when no full backup remains inside the window: nothing is
    /// deleted, the caller warns instead.
    pub safety_hold: bool,
}

impl PrunePlan {
    pub fn is_noop(&self) -> bool {
        self.expired.is_empty() && self.orphans.is_empty()
    }
}

/// Select artifacts to delete under a retention window.
///
/// Pruning only proceeds when at least one full backup remains inside the
/// window; with zero in-window fulls the plan is a safety hold and deletes
/// nothing, so the only restorable baseline is never removed.
pub fn plan_prune(store: &ArtifactStore, retention: Duration, now: SystemTime) -> PrunePlan {
    let cutoff = now.checked_sub(retention);
    let expired_at = |modified: SystemTime| match cutoff {
        Some(cutoff) => modified < cutoff,
        None => false,
    };

    let has_recent_full = store
        .fulls
        .iter()
        .any(|a| !expired_at(a.modified));

    if !has_recent_full {
        return PrunePlan {
            safety_hold: true,
            ..Default::default()
        };
    }

    let mut plan = PrunePlan::default();

    for artifact in &store.fulls {
        if expired_at(artifact.modified) {
            plan.expired.push(artifact.clone());
        }
    }

    let surviving_fulls: Vec<FullId> = store
        .fulls
        .iter()
        .filter(|a| !expired_at(a.modified))
        .filter_map(|a| a.full_id())
        .collect();

    for artifact in &store.incrementals {
        let id = artifact.incremental_id().expect("incremental artifact");
        if expired_at(artifact.modified) {
            plan.expired.push(artifact.clone());
        } else if !surviving_fulls.contains(&id.base) {
            plan.orphans.push(artifact.clone());
        }
    }

    for artifact in &store.dumps {
        if expired_at(artifact.modified) {
            plan.expired.push(artifact.clone());
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::{ArtifactId, IncrementalId};
    use std::path::PathBuf;

    const DAY: Duration = Duration::from_secs(86_400);

    fn full(name: &str, age_days: u64, now: SystemTime) -> Artifact {
        let id = FullId::parse(name).unwrap();
        Artifact {
            id: ArtifactId::Full(id),
            path: PathBuf::from(format!("full/{}", name)),
            modified: now - DAY * age_days as u32,
            compressed: false,
        }
    }

    fn incremental(base: &str, seq: u32, age_days: u64, now: SystemTime) -> Artifact {
        let id = IncrementalId {
            base: FullId::parse(base).unwrap(),
            seq,
        };
        Artifact {
            id: ArtifactId::Incremental(id),
            path: PathBuf::from(format!("incremental/{}_{:02}", base, seq)),
            modified: now - DAY * age_days as u32,
            compressed: false,
        }
    }

    fn store(fulls: Vec<Artifact>, incrementals: Vec<Artifact>) -> ArtifactStore {
        ArtifactStore {
            fulls,
            incrementals,
            dumps: Vec::new(),
        }
    }

    #[test]
    fn test_chain_resolution_order() {
        let now = SystemTime::now();
        let store = store(
            vec![full("20250101_01", 3, now)],
            vec![
                incremental("20250101_01", 1, 2, now),
                incremental("20250101_01", 2, 1, now),
            ],
        );

        let chain = resolve_restore_chain(&store).unwrap();
        let names: Vec<String> = chain.iter().map(|a| a.id.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "full/20250101_01",
                "incremental/20250101_01_01",
                "incremental/20250101_01_02"
            ]
        );
    }

    #[test]
    fn test_chain_gap_is_fatal() {
        let now = SystemTime::now();
        let store = store(
            vec![full("20250101_01", 3, now)],
            vec![incremental("20250101_01", 2, 1, now)],
        );

        let err = resolve_restore_chain(&store).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::ChainInconsistent(_))
        ));
    }

    #[test]
    fn test_chain_only_follows_latest_full() {
        let now = SystemTime::now();
        let store = store(
            vec![full("20250101_01", 5, now), full("20250103_01", 1, now)],
            vec![incremental("20250101_01", 1, 4, now)],
        );

        let chain = resolve_restore_chain(&store).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].id.to_string(), "full/20250103_01");
    }

    #[test]
    fn test_empty_store_resolves_empty_chain() {
        let chain = resolve_restore_chain(&ArtifactStore::default()).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_prune_refuses_without_recent_full() {
        let now = SystemTime::now();
        let store = store(vec![full("20250101_01", 10, now)], Vec::new());

        let plan = plan_prune(&store, DAY * 7, now);
        assert!(plan.safety_hold);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_prune_expires_old_artifacts() {
        let now = SystemTime::now();
        let store = store(
            vec![full("20250101_01", 10, now), full("20250108_01", 2, now)],
            vec![incremental("20250101_01", 1, 9, now)],
        );

        let plan = plan_prune(&store, DAY * 7, now);
        assert!(!plan.safety_hold);

        let expired: Vec<String> = plan.expired.iter().map(|a| a.id.to_string()).collect();
        assert_eq!(
            expired,
            vec!["full/20250101_01", "incremental/20250101_01_01"]
        );
        assert!(plan.orphans.is_empty());
    }

    #[test]
    fn test_prune_removes_orphaned_incrementals() {
        let now = SystemTime::now();
        // The incremental is young, but its base full ages out
        let store = store(
            vec![full("20250101_01", 10, now), full("20250108_01", 2, now)],
            vec![incremental("20250101_01", 1, 3, now)],
        );

        let plan = plan_prune(&store, DAY * 7, now);
        let orphans: Vec<String> = plan.orphans.iter().map(|a| a.id.to_string()).collect();
        assert_eq!(orphans, vec!["incremental/20250101_01_01"]);
    }
}
