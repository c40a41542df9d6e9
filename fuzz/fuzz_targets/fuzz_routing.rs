//! Fuzz testing for the pure routing functions.
//!
//! Host headers, paths and `Set-Cookie` values all come from the network,
//! so none of these may panic on any input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_routing
//! cargo +nightly fuzz run fuzz_routing -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `RootDomains::classify`: host normalisation and classification
//! - `plan_rewrite`: prefix guard, API guard and target construction
//! - `SessionCookie::parse` and `to_header_value`

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use openpolicy_router::tenancy::rewrite::{RewritePlan, plan_rewrite};
use openpolicy_router::tenancy::{HostClassification, RootDomains, SessionCookie};
use openpolicy_router::validation::validate_slug;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    host: &'a str,
    path: &'a str,
    query: Option<&'a str>,
    set_cookie: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let roots = RootDomains::new(["openpolicyhq.com", "localhost", "lvh.me"])
        .with_reserved_subdomains(["www"]);

    let slug = match roots.classify(input.host) {
        HostClassification::Subdomain { subdomain, .. } => Some(subdomain),
        HostClassification::CustomDomain { hostname } => {
            // Classified hosts are always normalised
            assert_eq!(hostname, hostname.to_ascii_lowercase());
            None
        }
        HostClassification::RootDomain { .. } | HostClassification::NoTenantSignal => None,
    };

    let path = if input.path.starts_with('/') {
        input.path.to_string()
    } else {
        format!("/{}", input.path)
    };

    if let Some(slug) = slug.as_deref().filter(|s| validate_slug(s).is_ok()) {
        match plan_rewrite(Some(slug), &path, input.query, "/api") {
            RewritePlan::Rewrite(target) => {
                assert!(target.starts_with(&format!("/{slug}/")) || target == format!("/{slug}"));
                // Rewriting the target again must be a no-op
                let (target_path, _) = target.split_once('?').unwrap_or((&target, ""));
                assert!(matches!(
                    plan_rewrite(Some(slug), target_path, None, "/api"),
                    RewritePlan::Keep(_)
                ));
            }
            RewritePlan::Keep(_) => {}
        }
    }

    if let Ok(cookie) = SessionCookie::parse(input.set_cookie) {
        let _ = cookie.to_header_value();
    }
});
