//! Signature extraction: component plus error keywords from free text.

use std::collections::BTreeSet;

/// (token fragment, component). Earlier rows win.
const COMPONENTS: &[(&str, &str)] = &[
    ("etcd", "etcd"),
    ("kubevirt", "kubevirt"),
    ("virt", "kubevirt"),
    ("vmi", "kubevirt"),
    ("vmim", "kubevirt"),
    ("cnv", "kubevirt"),
    ("ceph", "storage"),
    ("odf", "storage"),
    ("noobaa", "storage"),
    ("rook", "storage"),
    ("csi", "storage"),
    ("pvc", "pvc"),
    ("persistentvolume", "pvc"),
    ("mcp", "machine-config"),
    ("machineconfig", "machine-config"),
    ("machine", "machine-config"),
    ("operator", "operator"),
    ("certificate", "certificate"),
    ("csr", "certificate"),
    ("prometheus", "monitoring"),
    ("alertmanager", "monitoring"),
    ("alert", "monitoring"),
    ("node", "node"),
    ("pod", "pod"),
];

const ERROR_KEYWORDS: &[&str] = &[
    "oomkilled",
    "oom",
    "crashloopbackoff",
    "crashloop",
    "imagepullbackoff",
    "errimagepull",
    "evicted",
    "unschedulable",
    "notready",
    "degraded",
    "unavailable",
    "pending",
    "failed",
    "timeout",
    "forbidden",
    "unauthorized",
    "refused",
    "expired",
    "terminated",
    "migration",
    "lost",
    "error",
];

const MAX_SIGNATURE_KEYWORDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub component: String,
    pub keywords: Vec<String>,
}

impl Signature {
    pub fn key(&self) -> String {
        format!("{}:{}", self.component, self.keywords.join("+"))
    }

    /// Scorer terms: component followed by keywords.
    pub fn terms(&self) -> Vec<String> {
        let mut terms = Vec::with_capacity(self.keywords.len() + 1);
        terms.push(self.component.clone());
        terms.extend(self.keywords.iter().cloned());
        terms
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_ascii_lowercase)
}

fn components_in(tokens: &[String]) -> Vec<&'static str> {
    let mut found = Vec::new();
    for (fragment, component) in COMPONENTS {
        if !found.contains(component) && tokens.iter().any(|t| t.contains(fragment)) {
            found.push(*component);
        }
    }
    found
}

fn keywords_in(tokens: &[String]) -> Vec<&'static str> {
    ERROR_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| tokens.iter().any(|t| t.contains(kw)))
        .collect()
}

/// Extract a signature, or `None` when the text names no error keyword.
///
/// `component_hint` wins over detection when present.
pub fn extract_signature(text: &str, component_hint: Option<&str>) -> Option<Signature> {
    let tokens: Vec<String> = tokens(text).collect();
    let keywords = keywords_in(&tokens);
    if keywords.is_empty() {
        return None;
    }
    let component = component_hint
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .or_else(|| components_in(&tokens).first().map(|c| (*c).to_string()))
        .unwrap_or_else(|| "cluster".to_string());

    Some(Signature {
        component,
        keywords: keywords
            .into_iter()
            .take(MAX_SIGNATURE_KEYWORDS)
            .map(str::to_string)
            .collect(),
    })
}

/// Every component and keyword present in `text`.
pub fn query_terms(text: &str) -> BTreeSet<String> {
    let tokens: Vec<String> = tokens(text).collect();
    components_in(&tokens)
        .into_iter()
        .chain(keywords_in(&tokens))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_component_and_keywords() {
        let sig = extract_signature(
            "virt-launcher-rhel9-x pod OOMKilled in namespace vms",
            None,
        )
        .unwrap();
        assert_eq!(sig.component, "kubevirt");
        assert_eq!(sig.keywords, vec!["oomkilled", "oom"]);
        assert_eq!(sig.key(), "kubevirt:oomkilled+oom");
    }

    #[test]
    fn test_hint_overrides_detection() {
        let sig = extract_signature("etcd member timeout", Some("Network")).unwrap();
        assert_eq!(sig.component, "network");
        assert_eq!(sig.terms(), vec!["network", "timeout"]);
    }

    #[test]
    fn test_no_keyword_no_signature() {
        assert_eq!(extract_signature("all nodes Ready", None), None);
    }

    #[test]
    fn test_unknown_component_falls_back() {
        let sig = extract_signature("something unavailable", None).unwrap();
        assert_eq!(sig.component, "cluster");
    }

    #[test]
    fn test_keywords_capped() {
        let sig = extract_signature(
            "pod oomkilled crashloopbackoff evicted pending failed",
            None,
        )
        .unwrap();
        assert_eq!(sig.keywords.len(), MAX_SIGNATURE_KEYWORDS);
    }

    #[test]
    fn test_query_terms_collects_everything() {
        let terms = query_terms("etcd_health critical etcd-master-0 NotReady, 1 failed");
        assert!(terms.contains("etcd"));
        assert!(terms.contains("notready"));
        assert!(terms.contains("failed"));
    }
}
