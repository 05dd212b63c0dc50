use crate::challenge::ChallengeDefinition;
use tracing::warn;

/// Default port assumed when a challenge declares none.
pub const DEFAULT_PORT: u16 = 80;

/// Placeholder served when a legacy reference has no mapping. Candidates see
/// a page instead of nothing while the mapping gap gets fixed.
const FALLBACK_IMAGE: &str = "nginxdemos/hello:plain-text";

/// Historical template-id to image mappings from the pre-orchestrator
/// provisioning system. Frozen: new challenges set an explicit image.
const LEGACY_TEMPLATE_IMAGES: &[(&str, &str, u16)] = &[
    ("tpl-web-basic", "vulhub/nginx:latest", 80),
    ("tpl-web-dvwa", "vulnerables/web-dvwa:latest", 80),
    ("tpl-web-juiceshop", "bkimminich/juice-shop:v15.0.0", 3000),
    ("tpl-ssh-entry", "linuxserver/openssh-server:latest", 2222),
    ("tpl-ftp-anon", "delfer/alpine-ftp-server:latest", 21),
];

/// Historical per-instance image mappings, same era as the template table.
const LEGACY_INSTANCE_IMAGES: &[(&str, &str, u16)] = &[
    ("inst-struts-cve", "vulhub/struts2:s2-045", 8080),
    ("inst-log4shell", "vulhub/log4j:2.14.1", 8983),
    ("inst-redis-unauth", "vulhub/redis:4.0.14", 6379),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedImage {
    pub image: String,
    pub ports: Vec<u16>,
    pub env: Vec<(String, String)>,
}

/// Outcome of image resolution. `NoInfrastructure` is a valid result, not an
/// error: the challenge simply has nothing to deploy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedImage),
    NoInfrastructure,
}

/// Map a challenge to a concrete image and port set.
///
/// Pure and total; never touches the network. Precedence: explicit image,
/// then template-table match, then instance-table match, then the generic
/// fallback when a legacy reference exists but matches nothing, and finally
/// `NoInfrastructure` when the challenge carries no reference at all.
pub fn resolve(challenge: &ChallengeDefinition) -> Resolution {
    let declared_ports = if challenge.ports.is_empty() {
        None
    } else {
        Some(challenge.ports.clone())
    };

    if let Some(ref image) = challenge.image {
        return Resolution::Resolved(ResolvedImage {
            image: image.clone(),
            ports: declared_ports.unwrap_or_else(|| vec![DEFAULT_PORT]),
            env: vec![],
        });
    }

    if let Some(ref template_id) = challenge.legacy_template_id {
        if let Some((_, image, port)) = lookup(LEGACY_TEMPLATE_IMAGES, template_id) {
            return Resolution::Resolved(ResolvedImage {
                image: image.to_string(),
                ports: declared_ports.unwrap_or_else(|| vec![port]),
                env: vec![],
            });
        }
    }

    if let Some(ref instance_id) = challenge.legacy_instance_id {
        if let Some((_, image, port)) = lookup(LEGACY_INSTANCE_IMAGES, instance_id) {
            return Resolution::Resolved(ResolvedImage {
                image: image.to_string(),
                ports: declared_ports.unwrap_or_else(|| vec![port]),
                env: vec![],
            });
        }
    }

    if challenge.legacy_template_id.is_some() || challenge.legacy_instance_id.is_some() {
        // Unmapped legacy reference. Serving the placeholder keeps the
        // challenge page alive, but every hit is a missing migration.
        warn!(
            challenge = %challenge.id,
            template = ?challenge.legacy_template_id,
            instance = ?challenge.legacy_instance_id,
            "no image mapping for legacy reference, using generic fallback"
        );
        return Resolution::Resolved(ResolvedImage {
            image: FALLBACK_IMAGE.to_string(),
            ports: declared_ports.unwrap_or_else(|| vec![DEFAULT_PORT]),
            env: vec![],
        });
    }

    Resolution::NoInfrastructure
}

fn lookup(table: &[(&'static str, &'static str, u16)], id: &str) -> Option<(&'static str, &'static str, u16)> {
    table.iter().find(|(key, _, _)| *key == id).copied()
}
