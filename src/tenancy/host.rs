//! Hostname classification.
//!
//! Decides what tenant signal, if any, a `Host` header carries:
//!
//! ```text
//! acme.openpolicyhq.com  -> Subdomain { subdomain: "acme", root: "openpolicyhq.com" }
//! acme.localhost:3000    -> Subdomain { subdomain: "acme", root: "localhost" }
//! openpolicyhq.com       -> RootDomain { root: "openpolicyhq.com" }
//! docs.customer.com      -> CustomDomain { hostname: "docs.customer.com" }
//! localhost, 10.0.0.5    -> NoTenantSignal
//! ```
//!
//! The two-label suffix is checked before the one-label suffix so that
//! two-label roots (`openpolicyhq.com`) win over single-label roots
//! (`localhost`) when both could apply.

use std::collections::HashSet;

use crate::validation::{is_ip_literal, normalize_host};

/// Fixed set of domain suffixes that enable subdomain-style addressing.
#[derive(Debug, Clone, Default)]
pub struct RootDomains {
    domains: HashSet<String>,
    reserved_subdomains: HashSet<String>,
}

impl RootDomains {
    /// Build a root domain set. Entries are lowercased.
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.as_ref().trim_end_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            reserved_subdomains: HashSet::new(),
        }
    }

    /// Subdomains that are treated as the bare root domain (e.g. `www`).
    pub fn with_reserved_subdomains<I, S>(mut self, reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.reserved_subdomains = reserved
            .into_iter()
            .map(|s| s.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Classify a raw `Host` header value.
    pub fn classify(&self, raw_host: &str) -> HostClassification {
        let Some(hostname) = normalize_host(raw_host) else {
            return HostClassification::NoTenantSignal;
        };

        if is_ip_literal(&hostname) {
            return HostClassification::NoTenantSignal;
        }

        let labels: Vec<&str> = hostname.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
            return HostClassification::NoTenantSignal;
        }

        let split_at = |suffix_labels: usize| {
            let (sub, root) = labels.split_at(labels.len() - suffix_labels);
            (sub.join("."), root.join("."))
        };

        let (subdomain, root) = split_at(2);
        if self.contains(&root) {
            return self.subdomain_of(subdomain, root);
        }

        let (subdomain, root) = split_at(1);
        if self.contains(&root) {
            return self.subdomain_of(subdomain, root);
        }

        // Multi-label roots (e.g. "docs.example.co.uk") are only recognised whole.
        if self.contains(&hostname) {
            return HostClassification::RootDomain { root: hostname };
        }

        HostClassification::CustomDomain { hostname }
    }

    fn subdomain_of(&self, subdomain: String, root: String) -> HostClassification {
        if subdomain.is_empty() || self.reserved_subdomains.contains(&subdomain) {
            HostClassification::RootDomain { root }
        } else {
            HostClassification::Subdomain { subdomain, root }
        }
    }
}

/// Tenant signal carried by a hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostClassification {
    /// Fewer than two labels, malformed, or an IP literal.
    NoTenantSignal,
    /// A root domain itself (or a reserved subdomain of one).
    RootDomain { root: String },
    /// A workspace addressed as `{subdomain}.{root}`.
    Subdomain { subdomain: String, root: String },
    /// An unrecognized host; candidate customer-owned domain.
    CustomDomain { hostname: String },
}

impl HostClassification {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            HostClassification::NoTenantSignal => "no_tenant_signal",
            HostClassification::RootDomain { .. } => "root_domain",
            HostClassification::Subdomain { .. } => "subdomain",
            HostClassification::CustomDomain { .. } => "custom_domain",
        }
    }
}
