//! Rule-file and ignore-file loaders.
//!
//! Two external inputs feed the classifier at startup:
//! - the proxy rule file, where `DOMAIN-SUFFIX,<domain>,<policy>` and
//!   `DOMAIN-KEYWORD,<domain>,<policy>` lines name already-governed domains
//! - a flat newline-delimited list of domains a human has rejected

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Errors while reading rule files.
#[derive(Debug, Error)]
pub enum RuleFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse configured domains out of a proxy rule file.
///
/// Only `DOMAIN-SUFFIX` and `DOMAIN-KEYWORD` lines contribute; the policy
/// column does not matter here, a domain with any rule is already governed.
/// Domains are lower-cased and a leading dot is stripped.
pub fn parse_rule_domains<R: Read>(reader: R) -> Result<HashSet<String>, RuleFileError> {
    let mut domains = HashSet::new();

    for line in BufReader::new(reader).lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.starts_with("DOMAIN-SUFFIX,") && !trimmed.starts_with("DOMAIN-KEYWORD,") {
            continue;
        }

        let mut parts = trimmed.split(',');
        let _kind = parts.next();
        if let Some(domain) = parts.next() {
            let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
            if !domain.is_empty() {
                domains.insert(domain);
            }
        }
    }

    Ok(domains)
}

/// Load configured domains from the rule file at `path`.
///
/// A missing file is not an error: it simply means no rules exist yet.
pub fn load_rule_domains(path: &Path) -> Result<HashSet<String>, RuleFileError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("rule file {} not found, starting empty", path.display());
            return Ok(HashSet::new());
        }
        Err(e) => return Err(e.into()),
    };

    let domains = parse_rule_domains(file)?;
    info!("loaded {} configured domains from {}", domains.len(), path.display());
    Ok(domains)
}

/// Parse the flat ignore list.
pub fn parse_ignored_domains<R: Read>(reader: R) -> Result<HashSet<String>, RuleFileError> {
    let mut domains = HashSet::new();

    for line in BufReader::new(reader).lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            domains.insert(trimmed.to_ascii_lowercase());
        }
    }

    Ok(domains)
}

/// Load previously-rejected domains from the ignore file at `path`.
pub fn load_ignored_domains(path: &Path) -> Result<HashSet<String>, RuleFileError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(HashSet::new());
        }
        Err(e) => return Err(e.into()),
    };

    let domains = parse_ignored_domains(file)?;
    info!("loaded {} ignored domains from {}", domains.len(), path.display());
    Ok(domains)
}
