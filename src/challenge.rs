use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "instancer";
pub const CHALLENGE_LABEL: &str = "instancer.io/challenge";
pub const CANDIDATE_LABEL: &str = "instancer.io/candidate";
pub const CREATED_AT_ANNOTATION: &str = "instancer.io/created-at";
pub const EXPIRES_AT_ANNOTATION: &str = "instancer.io/expires-at";
pub const POD_SECURITY_LABEL: &str = "pod-security.kubernetes.io/enforce";
pub const POD_SECURITY_LEVEL: &str = "baseline";

/// One challenge's deployable shape, owned and edited by the application
/// layer; read-only here.
///
/// At most one of `image`, `legacy_template_id` and `legacy_instance_id` is
/// authoritative when present. When none are present the challenge requires
/// no instance at all.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDefinition {
    /// Opaque challenge identifier (typically a UUID)
    pub id: String,

    /// Display name; status and stop requests may omit it
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub category: String,

    /// Explicit container image reference
    #[serde(default)]
    pub image: Option<String>,

    /// Template identifier from the pre-orchestrator provisioning system
    #[serde(default)]
    pub legacy_template_id: Option<String>,

    /// Instance identifier from the pre-orchestrator provisioning system
    #[serde(default)]
    pub legacy_instance_id: Option<String>,

    /// Ports the challenge declares; empty means the resolver's default
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// The identity of a running or potential instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub challenge_id: String,
    pub candidate_id: String,
}

impl InstanceKey {
    pub fn new(challenge_id: impl Into<String>, candidate_id: impl Into<String>) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            candidate_id: candidate_id.into(),
        }
    }

    /// Derive the namespace name for this key.
    ///
    /// Pure and deterministic: the same key always yields the same name, so
    /// the namespace itself is the instance lookup, no side database needed.
    /// The separator byte keeps ("ab","c") and ("a","bc") from colliding.
    pub fn namespace_name(&self, prefix: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.challenge_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.candidate_id.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}-{}", prefix, &digest[..16])
    }
}

/// Ownership labels stamped on every instance namespace. The janitor and the
/// per-candidate policy discover instances through these.
pub fn ownership_labels(key: &InstanceKey) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.insert(
        CHALLENGE_LABEL.to_string(),
        sanitize_label_value(&key.challenge_id),
    );
    labels.insert(
        CANDIDATE_LABEL.to_string(),
        sanitize_label_value(&key.candidate_id),
    );
    labels
}

/// Label selector matching every namespace this manager owns.
pub fn managed_selector() -> BTreeMap<String, String> {
    let mut selector = BTreeMap::new();
    selector.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    selector
}

/// Label selector matching every namespace owned by one candidate.
pub fn candidate_selector(candidate_id: &str) -> BTreeMap<String, String> {
    let mut selector = managed_selector();
    selector.insert(
        CANDIDATE_LABEL.to_string(),
        sanitize_label_value(candidate_id),
    );
    selector
}

/// Challenge and candidate identifiers are opaque application strings; label
/// values are restricted, so anything outside the allowed alphabet becomes
/// `-` and the result is length-bounded.
pub fn sanitize_label_value(value: &str) -> String {
    let mut out: String = value
        .chars()
        .take(63)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    while out.ends_with(['-', '_', '.']) {
        out.pop();
    }
    out
}
