//! Domain authorization, mapping, and sharding.
//!
//! Decides, for each (document URL, candidate resource URL) pair,
//! whether rewriting is permitted, which mapped domain the output
//! should be served from, and which shard of that domain a given
//! content hash lands on. This component enforces the configured
//! policy exactly; it does not second-guess careless wildcards.

use crate::error::RewriteError;
use tracing::debug;
use url::Url;

/// A host pattern: literal, or containing `*` (any run) / `?` (one
/// character) wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostPattern(String);

impl HostPattern {
    fn new(pattern: &str) -> Self {
        Self(pattern.to_ascii_lowercase())
    }

    fn matches(&self, host: &str) -> bool {
        wildcard_match(self.0.as_bytes(), host.to_ascii_lowercase().as_bytes())
    }
}

fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            wildcard_match(&pattern[1..], text)
                || (!text.is_empty() && wildcard_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => wildcard_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => wildcard_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

#[derive(Debug, Clone)]
struct Mapping {
    to: String,
    from: Vec<HostPattern>,
}

#[derive(Debug, Clone)]
struct Shards {
    /// Pattern containing exactly one `%d`.
    pattern: String,
    count: u32,
}

/// The rewrite-permission policy for one deployment.
#[derive(Debug, Default, Clone)]
pub struct DomainPolicy {
    authorized: Vec<HostPattern>,
    mappings: Vec<Mapping>,
    shards: Vec<(String, Shards)>,
}

impl DomainPolicy {
    /// Creates an empty policy. Only same-origin resources are
    /// eligible until domains are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorizes a domain for rewriting. Wildcards are permitted.
    pub fn add_domain(&mut self, domain: &str) {
        self.authorized.push(HostPattern::new(domain));
    }

    /// Maps resources on any of `from` onto the serving domain `to`.
    /// Wildcards are permitted in `from` but not in `to`.
    pub fn add_domain_mapping(&mut self, to: &str, from: &[&str]) -> Result<(), RewriteError> {
        if to.contains('*') || to.contains('?') {
            return Err(RewriteError::InvalidRule(format!(
                "wildcard in mapping target {to:?}"
            )));
        }
        let to = to.to_ascii_lowercase();
        let from: Vec<HostPattern> = from.iter().map(|f| HostPattern::new(f)).collect();
        // Mapped sources are implicitly authorized.
        self.authorized.extend(from.iter().cloned());
        self.mappings.push(Mapping { to, from });
        Ok(())
    }

    /// Shards `to` across `count` domains generated from `pattern`,
    /// which must contain exactly one `%d` placeholder.
    pub fn shard_domain(
        &mut self,
        to: &str,
        pattern: &str,
        count: u32,
    ) -> Result<(), RewriteError> {
        if pattern.matches("%d").count() != 1 {
            return Err(RewriteError::InvalidRule(format!(
                "shard pattern {pattern:?} must contain exactly one %d"
            )));
        }
        if count == 0 {
            return Err(RewriteError::InvalidRule(
                "shard count must be nonzero".to_string(),
            ));
        }
        self.shards.push((
            to.to_ascii_lowercase(),
            Shards {
                pattern: pattern.to_string(),
                count,
            },
        ));
        Ok(())
    }

    /// Decides whether `resource` referenced from `doc` may be
    /// rewritten, and if so under which mapped serving domain.
    ///
    /// Returns `None` when the resource host is unauthorized, or when
    /// two wildcard mappings disagree about the target (ambiguity is
    /// refused, never resolved arbitrarily).
    pub fn map_request_to_domain(&self, doc: &Url, resource: &Url) -> Option<String> {
        let doc_host = doc.host_str()?.to_ascii_lowercase();
        let res_host = resource.host_str()?.to_ascii_lowercase();

        let mut target: Option<&str> = None;
        for mapping in &self.mappings {
            if mapping.from.iter().any(|p| p.matches(&res_host)) {
                match target {
                    None => target = Some(&mapping.to),
                    Some(existing) if existing == mapping.to => {}
                    Some(existing) => {
                        debug!(
                            resource = %resource,
                            first = existing,
                            second = %mapping.to,
                            "ambiguous domain mapping, refusing rewrite"
                        );
                        return None;
                    }
                }
            }
        }
        if let Some(to) = target {
            return Some(to.to_string());
        }

        // Same-origin resources are always eligible; everything else
        // must match the authorized set.
        if res_host == doc_host || self.authorized.iter().any(|p| p.matches(&res_host)) {
            Some(res_host)
        } else {
            None
        }
    }

    /// Picks the shard of `mapped_domain` for `hash`. Deterministic in
    /// the hash, so the same fingerprint always serves from the same
    /// shard.
    pub fn shard_for(&self, mapped_domain: &str, hash: &str) -> String {
        for (to, shards) in &self.shards {
            if to == mapped_domain {
                let index = hash
                    .bytes()
                    .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32))
                    % shards.count;
                return shards.pattern.replace("%d", &index.to_string());
            }
        }
        mapped_domain.to_string()
    }

    /// Combines scheme, mapped (possibly sharded) domain, and path.
    /// No validation beyond composition.
    pub fn resolve_path(&self, scheme: &str, mapped_domain: &str, hash: &str, path: &str) -> String {
        let domain = self.shard_for(mapped_domain, hash);
        format!("{}://{}{}", scheme, domain, path)
    }
}
