//! DNS question extraction from tcpdump text output.
//!
//! tcpdump prints queries in the form:
//!
//! ```text
//! 12345+ A? example.com. (30)
//! 6789 AAAA? cdn.example.net. (35)
//! ```
//!
//! Only the question-type token, the name, and its trailing dot matter.
//! Everything else on the line is noise.

/// Extract the queried domain from one line of tcpdump output.
///
/// Returns the lower-cased name with its trailing dot stripped, or `None`
/// if the line does not contain an `A?`/`AAAA?` question followed by a
/// dot-terminated name. A `None` is not an error; most capture lines are
/// responses, flags, or truncated packets we do not care about.
///
/// The trailing dot must end its whitespace-delimited token: a name fused
/// to the next field (`example.com.(30)`) does not match. A dot at end of
/// line does, since capture lines arrive with their newline attached and
/// tcpdump appends the length field after the name anyway.
pub fn parse_query_line(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();

    while let Some(token) = tokens.next() {
        if token != "A?" && token != "AAAA?" {
            continue;
        }

        let name = tokens.next()?;
        let name = name.strip_suffix('.')?;
        if name.is_empty() {
            return None;
        }

        return Some(name.to_ascii_lowercase());
    }

    None
}
