use std::collections::HashMap;

use chrono::{DateTime, Utc};
use strsim::jaro_winkler;

use crate::error::IdentityCollisionError;
use crate::extras::Platform;
use crate::identity::{ItemKey, KeySource};
use crate::normalize::NormalizedFields;

/// Thresholds for the near-duplicate pass. Kept configurable: the right
/// equality-vs-similarity cutoff differs per dataset.
#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub similarity_threshold: f64,
    pub date_window_days: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
            date_window_days: 7,
        }
    }
}

/// One record's contribution to the merge pass.
#[derive(Debug, Clone)]
pub struct MergeCandidate {
    pub record_id: String,
    pub platform: Platform,
    pub key: ItemKey,
    pub fields: NormalizedFields,
    pub crawled_at: DateTime<Utc>,
}

/// A canonical cluster for this run: the surviving `item_id` and the
/// member records that map to it.
#[derive(Debug)]
pub struct MergeGroup {
    pub item_id: String,
    /// Indices into the candidate slice, in first-seen order.
    pub members: Vec<usize>,
    /// Member whose fields win (most recently crawled).
    pub representative: usize,
    quarantined: bool,
    absorbable: bool,
    earliest_crawl: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub groups: Vec<MergeGroup>,
    pub merged_clusters: usize,
    pub collisions: Vec<IdentityCollisionError>,
}

impl MergeOutcome {
    /// `(record index, item_id)` for every candidate — exactly one each.
    pub fn assignments(&self) -> Vec<(usize, &str)> {
        let mut out: Vec<(usize, &str)> = self
            .groups
            .iter()
            .flat_map(|g| g.members.iter().map(|&i| (i, g.item_id.as_str())))
            .collect();
        out.sort_by_key(|(i, _)| *i);
        out
    }
}

/// Partition a run's candidates into canonical merge groups.
///
/// Exact grouping by item key first; then hash-keyed groups may be
/// absorbed into a near-duplicate bucket. Records already assigned in a
/// prior run keep that assignment unconditionally (append-only: a later
/// run adds members, it never rewrites history).
pub fn merge(
    candidates: &[MergeCandidate],
    prior: &HashMap<(String, String), String>,
    existing_cluster_sizes: &HashMap<String, usize>,
    cfg: &DedupConfig,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    // ── Exact grouping ──
    for (idx, cand) in candidates.iter().enumerate() {
        let prior_key = (cand.platform.as_str().to_string(), cand.record_id.clone());
        let (item_id, pinned) = match prior.get(&prior_key) {
            Some(assigned) => (assigned.clone(), true),
            None => (cand.key.id.clone(), false),
        };

        match by_id.get(&item_id) {
            Some(&gi) => {
                let group = &mut outcome.groups[gi];
                group.members.push(idx);
                group.absorbable &= !pinned && cand.key.source == KeySource::Hash;
                group.earliest_crawl = group.earliest_crawl.min(cand.crawled_at);
            }
            None => {
                by_id.insert(item_id.clone(), outcome.groups.len());
                outcome.groups.push(MergeGroup {
                    item_id,
                    members: vec![idx],
                    representative: idx,
                    quarantined: false,
                    absorbable: !pinned && cand.key.source == KeySource::Hash,
                    earliest_crawl: cand.crawled_at,
                });
            }
        }
    }

    quarantine_collisions(candidates, &mut outcome, cfg);
    near_duplicate_pass(candidates, &mut outcome, existing_cluster_sizes, cfg);

    outcome.groups.retain(|g| !g.members.is_empty());
    for group in &mut outcome.groups {
        group.representative = group
            .members
            .iter()
            .copied()
            .max_by_key(|&i| candidates[i].crawled_at)
            .unwrap_or(group.members[0]);
    }
    outcome
}

/// Truncated hashes can collide across unrelated listings. A same-hash
/// member whose locality disagrees with the group and whose title is
/// dissimilar is ejected under a collision-suffixed id so provenance
/// stays complete, and excluded from auto-merge.
fn quarantine_collisions(candidates: &[MergeCandidate], outcome: &mut MergeOutcome, cfg: &DedupConfig) {
    let mut ejected: Vec<MergeGroup> = Vec::new();

    for group in &mut outcome.groups {
        if group.members.len() < 2 || !group.absorbable {
            continue;
        }
        let anchor = group.members[0];
        let mut keep = vec![anchor];
        for &m in &group.members[1..] {
            let a = &candidates[anchor];
            let b = &candidates[m];
            let incompatible = a.fields.addr_key != b.fields.addr_key
                && jaro_winkler(&a.fields.title_norm, &b.fields.title_norm)
                    < cfg.similarity_threshold;
            if incompatible {
                outcome.collisions.push(IdentityCollisionError {
                    item_id: group.item_id.clone(),
                    existing: a.record_id.clone(),
                    incoming: b.record_id.clone(),
                });
                ejected.push(MergeGroup {
                    item_id: format!("{}:c:{}", group.item_id, b.record_id),
                    members: vec![m],
                    representative: m,
                    quarantined: true,
                    absorbable: false,
                    earliest_crawl: b.crawled_at,
                });
            } else {
                keep.push(m);
            }
        }
        group.members = keep;
    }
    outcome.groups.extend(ejected);
}

fn near_duplicate_pass(
    candidates: &[MergeCandidate],
    outcome: &mut MergeOutcome,
    existing_cluster_sizes: &HashMap<String, usize>,
    cfg: &DedupConfig,
) {
    for gi in 0..outcome.groups.len() {
        let group = &outcome.groups[gi];
        if !group.absorbable || group.quarantined || group.members.is_empty() {
            continue;
        }
        let probe = group.members[0];

        // Every other live, non-quarantined group is a potential absorber.
        let mut targets: Vec<usize> = (0..outcome.groups.len())
            .filter(|&ti| ti != gi)
            .filter(|&ti| {
                let t = &outcome.groups[ti];
                !t.quarantined
                    && !t.members.is_empty()
                    && is_near_duplicate(&candidates[probe], &candidates[t.members[0]], cfg)
            })
            .collect();
        if targets.is_empty() {
            continue;
        }

        // Largest known cluster wins, then the earliest-seen one.
        targets.sort_by(|&a, &b| {
            let size = |ti: usize| {
                let t = &outcome.groups[ti];
                existing_cluster_sizes.get(&t.item_id).copied().unwrap_or(0) + t.members.len()
            };
            size(b)
                .cmp(&size(a))
                .then(outcome.groups[a].earliest_crawl.cmp(&outcome.groups[b].earliest_crawl))
                .then(a.cmp(&b))
        });
        let ti = targets[0];

        let members = std::mem::take(&mut outcome.groups[gi].members);
        let earliest = outcome.groups[gi].earliest_crawl;
        let target = &mut outcome.groups[ti];
        target.members.extend(members);
        target.earliest_crawl = target.earliest_crawl.min(earliest);
        outcome.merged_clusters += 1;
    }
}

/// Pure scoring: title similarity, locality equality, date proximity.
fn is_near_duplicate(a: &MergeCandidate, b: &MergeCandidate, cfg: &DedupConfig) -> bool {
    if a.fields.addr_key.is_empty() || a.fields.addr_key != b.fields.addr_key {
        return false;
    }
    if jaro_winkler(&a.fields.title_norm, &b.fields.title_norm) < cfg.similarity_threshold {
        return false;
    }
    let delta = match (a.fields.apply_start, b.fields.apply_start) {
        (Some(x), Some(y)) => (x - y).num_days().abs(),
        // No posted dates on either side: fall back to crawl time.
        _ => (a.crawled_at.date_naive() - b.crawled_at.date_naive())
            .num_days()
            .abs(),
    };
    delta <= cfg.date_window_days
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extras::PlatformExtras;
    use crate::identity::resolve_item_id;
    use chrono::TimeZone;

    fn candidate(
        record_id: &str,
        platform: Platform,
        extras_json: &str,
        title: &str,
        addr: &str,
        apply_start: Option<&str>,
        crawled_day: u32,
    ) -> MergeCandidate {
        let extras = PlatformExtras::parse(&platform, extras_json);
        let fields = NormalizedFields {
            title: title.into(),
            title_norm: crate::normalize::address::normalize_title(title),
            address_raw: addr.into(),
            addr_norm: crate::normalize::address::normalize_address(addr),
            addr_key: crate::normalize::address::address_key(addr),
            deposit_krw: None,
            deposit_raw: None,
            rent_krw: None,
            rent_raw: None,
            area_m2: None,
            area_unit: None,
            area_raw: None,
            apply_start: apply_start.map(|s| s.parse().unwrap()),
            apply_end: None,
            apply_raw: None,
            category: None,
        };
        let key = resolve_item_id(&platform, &extras, &fields);
        MergeCandidate {
            record_id: record_id.into(),
            platform,
            key,
            fields,
            crawled_at: Utc.with_ymd_and_hms(2025, 11, crawled_day, 3, 0, 0).unwrap(),
        }
    }

    #[test]
    fn cross_platform_near_duplicate_merges_into_native_bucket() {
        let cands = vec![
            candidate(
                "lh-1",
                Platform::Lh,
                r#"{"panId": 20000569}"#,
                "행복주택 모집공고",
                "서울특별시 강동구 고덕동 123-4",
                Some("2024-03-01"),
                1,
            ),
            candidate(
                "sh-9",
                Platform::Sh,
                "{}",
                "행복주택 모집공고",
                "서울특별시 강동구 고덕동 주공9단지",
                Some("2024-03-03"),
                2,
            ),
        ];
        let outcome = merge(&cands, &HashMap::new(), &HashMap::new(), &DedupConfig::default());

        let live: Vec<_> = outcome.groups.iter().filter(|g| !g.members.is_empty()).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].item_id, "lh:20000569");
        assert_eq!(live[0].members.len(), 2);
        assert_eq!(outcome.merged_clusters, 1);

        let assignments = outcome.assignments();
        assert_eq!(assignments.len(), 2);
        assert!(assignments.iter().all(|(_, id)| *id == "lh:20000569"));
    }

    #[test]
    fn dissimilar_titles_stay_apart() {
        let cands = vec![
            candidate("a", Platform::Sh, "{}", "행복주택 모집공고", "서울특별시 강동구 고덕동 1", Some("2024-03-01"), 1),
            candidate("b", Platform::Sh, "{}", "청년 매입임대 예비입주자", "서울특별시 강동구 고덕동 2", Some("2024-03-02"), 1),
        ];
        let outcome = merge(&cands, &HashMap::new(), &HashMap::new(), &DedupConfig::default());
        assert_eq!(outcome.groups.len(), 2);
        assert_eq!(outcome.merged_clusters, 0);
    }

    #[test]
    fn distant_dates_stay_apart() {
        let cands = vec![
            candidate("a", Platform::Lh, r#"{"panId": 1}"#, "행복주택 모집공고", "서울특별시 강동구 고덕동 1", Some("2024-03-01"), 1),
            candidate("b", Platform::Sh, "{}", "행복주택 모집공고", "서울특별시 강동구 고덕동 2", Some("2024-05-01"), 1),
        ];
        let outcome = merge(&cands, &HashMap::new(), &HashMap::new(), &DedupConfig::default());
        assert_eq!(outcome.groups.len(), 2);
    }

    #[test]
    fn prior_assignment_is_never_rewritten() {
        let cand = candidate("sh-9", Platform::Sh, "{}", "행복주택 모집공고", "서울특별시 강동구 고덕동 1", Some("2024-03-01"), 1);
        let mut prior = HashMap::new();
        prior.insert(("sh".to_string(), "sh-9".to_string()), "lh:20000569".to_string());

        let outcome = merge(&[cand], &prior, &HashMap::new(), &DedupConfig::default());
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].item_id, "lh:20000569");
    }

    #[test]
    fn largest_existing_cluster_absorbs() {
        let cands = vec![
            candidate("a", Platform::Lh, r#"{"panId": 1}"#, "행복주택 모집공고", "서울특별시 강동구 고덕동 1", Some("2024-03-01"), 2),
            candidate("b", Platform::Lh, r#"{"panId": 2}"#, "행복주택 모집공고", "서울특별시 강동구 고덕동 2", Some("2024-03-02"), 1),
            candidate("c", Platform::Sh, "{}", "행복주택 모집공고", "서울특별시 강동구 고덕동 3", Some("2024-03-03"), 3),
        ];
        // lh:2 already has three provenance rows from earlier runs.
        let mut sizes = HashMap::new();
        sizes.insert("lh:2".to_string(), 3);

        let outcome = merge(&cands, &HashMap::new(), &sizes, &DedupConfig::default());
        let target = outcome.groups.iter().find(|g| g.item_id == "lh:2").unwrap();
        assert_eq!(target.members.len(), 2);
    }

    #[test]
    fn earliest_crawl_breaks_size_ties() {
        let cands = vec![
            candidate("a", Platform::Lh, r#"{"panId": 1}"#, "행복주택 모집공고", "서울특별시 강동구 고덕동 1", Some("2024-03-01"), 5),
            candidate("b", Platform::Lh, r#"{"panId": 2}"#, "행복주택 모집공고", "서울특별시 강동구 고덕동 2", Some("2024-03-02"), 2),
            candidate("c", Platform::Sh, "{}", "행복주택 모집공고", "서울특별시 강동구 고덕동 3", Some("2024-03-03"), 3),
        ];
        let outcome = merge(&cands, &HashMap::new(), &HashMap::new(), &DedupConfig::default());
        // Equal sizes: the bucket crawled earliest (panId=2, day 2) wins.
        let target = outcome.groups.iter().find(|g| g.item_id == "lh:2").unwrap();
        assert_eq!(target.members.len(), 2);
    }

    #[test]
    fn representative_is_freshest_member() {
        let cands = vec![
            candidate("a", Platform::Lh, r#"{"panId": 1}"#, "행복주택 모집공고", "서울특별시 강동구 고덕동 1", Some("2024-03-01"), 1),
            candidate("b", Platform::Lh, r#"{"panId": 1}"#, "행복주택 모집공고 (수정)", "서울특별시 강동구 고덕동 1", Some("2024-03-01"), 4),
        ];
        let outcome = merge(&cands, &HashMap::new(), &HashMap::new(), &DedupConfig::default());
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].representative, 1);
    }

    #[test]
    fn hash_collision_is_quarantined_with_provenance_intact() {
        let mut a = candidate("a", Platform::Sh, "{}", "행복주택 모집공고", "서울특별시 강동구 고덕동 1", Some("2024-03-01"), 1);
        let mut b = candidate("b", Platform::Sh, "{}", "전혀 다른 오피스텔 공고", "부산광역시 해운대구 우동 99", Some("2024-03-01"), 1);
        // Force the truncation collision.
        a.key.id = "deadbeefdeadbeef".into();
        b.key.id = "deadbeefdeadbeef".into();

        let outcome = merge(&[a, b], &HashMap::new(), &HashMap::new(), &DedupConfig::default());
        assert_eq!(outcome.collisions.len(), 1);
        assert_eq!(outcome.groups.len(), 2);
        assert!(outcome
            .groups
            .iter()
            .any(|g| g.item_id == "deadbeefdeadbeef:c:b"));
        // Both records still map somewhere: provenance completeness.
        assert_eq!(outcome.assignments().len(), 2);
    }
}
