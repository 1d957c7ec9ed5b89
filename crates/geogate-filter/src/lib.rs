//! geogate Filter Layer
//!
//! Decides which observed domains are worth an active probe:
//! - Static rule tables (internal suffixes, direct TLDs, first-party
//!   system domains)
//! - Rule-file and ignore-file loaders
//! - The stateful classifier with its recurrence window

mod classifier;
mod domain;
mod loader;
mod rules;

pub use classifier::{ClassifierConfig, DomainClassifier, RecentDomain};
pub use domain::base_domain;
pub use loader::{
    load_ignored_domains, load_rule_domains, parse_ignored_domains, parse_rule_domains,
    RuleFileError,
};
pub use rules::{
    has_direct_tld, has_ignored_suffix, is_system_domain, DIRECT_TLDS, IGNORED_SUFFIXES,
    SYSTEM_DOMAINS,
};
