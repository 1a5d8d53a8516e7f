//! Knowledge matching over a persisted store.

use healthcrew_common::KnowledgeSource;
use healthcrew_engine::{KnowledgeBase, RawItem};
use proptest::prelude::*;
use tempfile::TempDir;

const VOCABULARY: &[&str] = &[
    "etcd", "leader", "lost", "pod", "crashloopbackoff", "node", "notready", "pvc", "pending",
    "virt", "launcher", "oomkilled", "operator", "degraded", "csi", "timeout", "ingress",
];

fn seeded(kb: &KnowledgeBase) {
    let items = vec![
        RawItem::new("etcd leader lost on master-1, members unavailable").reference("BZ-2001"),
        RawItem::new("virt-launcher pod OOMKilled during live migration").reference("BZ-2002"),
        RawItem::new("PVC stuck Pending, csi provisioner timeout").reference("BZ-2003"),
        RawItem::new("cluster operator ingress Degraded after upgrade"),
    ];
    kb.ingest(KnowledgeSource::Bug, &items).unwrap();
    kb.ingest(
        KnowledgeSource::Email,
        &[RawItem::new("node NotReady, kubelet stopped posting status").component("node")],
    )
    .unwrap();
}

#[test]
fn test_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("knowledge.jsonl");
    let kb = KnowledgeBase::open(&path).unwrap();
    seeded(&kb);
    let before = kb.match_text("etcd leader lost, members unavailable");

    let reopened = KnowledgeBase::open(&path).unwrap();
    assert_eq!(reopened.len(), kb.len());
    let after = reopened.match_text("etcd leader lost, members unavailable");
    let signatures = |ms: &[healthcrew_engine::KnowledgeMatch]| {
        ms.iter().map(|m| m.signature.clone()).collect::<Vec<_>>()
    };
    assert_eq!(signatures(&after), signatures(&before));
    assert_eq!(before[0].reference.as_deref(), Some("BZ-2001"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_matching_is_deterministic_and_ordered(
        picks in proptest::collection::vec(0..VOCABULARY.len(), 1..8)
    ) {
        let kb = KnowledgeBase::new();
        seeded(&kb);
        let query = picks.iter().map(|i| VOCABULARY[*i]).collect::<Vec<_>>().join(" ");

        let first = kb.match_text(&query);
        let second = kb.match_text(&query);
        prop_assert_eq!(&first, &second);

        for pair in first.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
        for m in &first {
            prop_assert!((0.0..=1.0).contains(&m.score));
            prop_assert!((0.0..=1.0).contains(&m.confidence));
        }
    }
}
