//! Registrable base-domain extraction.

/// Two-label public suffixes where the registrable name is three labels
/// deep. Not a full public-suffix list, just the ones that show up in
/// practice for this tool.
const MULTI_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "co.jp", "co.nz", "com.au", "com.br", "com.ru",
    "net.ru", "org.ru", "pp.ru", "ru.net",
];

/// Reduce a fully-qualified domain to its registrable base.
///
/// `cdn.static.example.com` becomes `example.com`, and
/// `media.example.co.uk` becomes `example.co.uk`. Names with fewer labels
/// than a registrable base are returned unchanged.
pub fn base_domain(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }

    let last_two = labels[labels.len() - 2..].join(".");
    if MULTI_PART_SUFFIXES.contains(&last_two.as_str()) && labels.len() >= 3 {
        return labels[labels.len() - 3..].join(".");
    }

    last_two
}
