//! Static rule tables.
//!
//! These are configuration, not derived state: they describe traffic that
//! never needs a reachability probe no matter what the classifier has seen.

/// Local/internal suffixes that never leave the host or LAN.
pub const IGNORED_SUFFIXES: &[&str] = &[
    ".local",
    ".internal",
    ".localhost",
    ".arpa",
    ".lan",
    ".home",
    ".test",
    ".invalid",
];

/// TLD suffixes whose traffic always goes direct, so a proxy rule for them
/// is pointless.
pub const DIRECT_TLDS: &[&str] = &[
    ".ru",
    ".su",
    ".xn--p1ai",
    ".com.ru",
    ".net.ru",
    ".org.ru",
    ".pp.ru",
    ".ru.net",
];

/// First-party system domains the OS talks to constantly. Probing them
/// would only produce noise.
pub const SYSTEM_DOMAINS: &[&str] = &[
    "apple.com",
    "icloud.com",
    "mzstatic.com",
    "aaplimg.com",
    "cdn-apple.com",
    "apple-dns.net",
    "push.apple.com",
    "appleiphonecell.com",
    "apple.news",
    "apple-cloudkit.com",
    "gc.apple.com",
    "ls.apple.com",
    "swscan.apple.com",
];

/// Check whether a domain ends with a local/internal suffix.
pub fn has_ignored_suffix(domain: &str) -> bool {
    IGNORED_SUFFIXES.iter().any(|s| domain.ends_with(s))
}

/// Check whether a domain sits under a direct-routed TLD.
pub fn has_direct_tld(domain: &str) -> bool {
    DIRECT_TLDS.iter().any(|s| domain.ends_with(s))
}

/// Check whether a domain is, or is a subdomain of, a first-party system
/// domain.
pub fn is_system_domain(domain: &str) -> bool {
    SYSTEM_DOMAINS
        .iter()
        .any(|s| domain == *s || domain.ends_with(&format!(".{}", s)))
}
