//! Parser for `name-addr` / `addr-spec` address values.

use crate::error::{Error, Result};
use crate::parser::uri;
use crate::types::address::Address;

/// Parse an address from the front of `input`.
///
/// Returns the address and the unconsumed remainder, which for header
/// values is the `;param=value` attribute tail. In the bare `addr-spec`
/// form (no angle brackets) RFC 3261 assigns trailing parameters to the
/// header, not the URI, so the split happens at the first `;`.
pub fn parse_address(input: &str) -> Result<(Address, &str)> {
    let input = input.trim_start();

    if input == "*" {
        return Ok((Address::wildcard(), ""));
    }

    // name-addr with optional quoted or token display name.
    if let Some((display_name, needs_quotes, rest)) = leading_display_name(input)? {
        let rest = rest.trim_start();
        let inner = rest
            .strip_prefix('<')
            .ok_or_else(|| Error::ParseError(format!("expected <uri> in address: {input}")))?;
        let (after_uri, parsed) = uri::uri(inner)
            .map_err(|_| Error::InvalidUri(inner.to_string()))?;
        let after = after_uri
            .strip_prefix('>')
            .ok_or_else(|| Error::ParseError(format!("unterminated <uri> in address: {input}")))?;
        let mut addr = Address::new(parsed);
        addr.display_name = display_name;
        addr.needs_quotes = needs_quotes;
        return Ok((addr, after));
    }

    // Bare addr-spec: URI parameters belong to the header.
    let (spec, rest) = match input.find(';') {
        Some(i) => (&input[..i], &input[i..]),
        None => (input, ""),
    };
    let parsed = uri::parse_uri(spec.trim_end())?;
    Ok((Address::new(parsed), rest))
}

/// Recognize an optional display name before a `<`.
///
/// Returns `Ok(None)` when the value starts directly with a URI (bare
/// addr-spec form), `Ok(Some((name, quoted, rest)))` when a display name or
/// a leading `<` was found.
fn leading_display_name(input: &str) -> Result<Option<(Option<String>, bool, &str)>> {
    if let Some(rest) = input.strip_prefix('"') {
        // Quoted string with escape handling.
        let mut name = String::new();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        name.push(escaped);
                    }
                }
                '"' => {
                    return Ok(Some((Some(name), true, &rest[i + 1..])));
                }
                _ => name.push(c),
            }
        }
        return Err(Error::ParseError(format!("unterminated quoted string: {input}")));
    }

    match input.find('<') {
        Some(0) => Ok(Some((None, false, input))),
        Some(i) => {
            let name = input[..i].trim();
            let name = if name.is_empty() { None } else { Some(name.to_string()) };
            Ok(Some((name, false, &input[i..])))
        }
        None => Ok(None),
    }
}
