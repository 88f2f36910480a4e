//! nom parser for SIP and TEL URIs.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::char,
    combinator::{all_consuming, map, opt},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated},
    IResult,
};

use crate::error::{Error, Result};
use crate::types::uri::{Param, Scheme, Uri};

/// Parse a complete URI, consuming the whole input.
pub fn parse_uri(input: &str) -> Result<Uri> {
    match all_consuming(uri)(input) {
        Ok((_, uri)) => Ok(uri),
        Err(_) => Err(Error::InvalidUri(input.to_string())),
    }
}

/// Parse a URI from the front of `input`, returning the remainder.
/// Used by the address parser, where the URI is followed by `>` or params.
pub fn uri(input: &str) -> IResult<&str, Uri> {
    let (input, scheme) = scheme(input)?;
    match scheme {
        Scheme::Tel => tel_body(input),
        _ => sip_body(input, scheme),
    }
}

fn scheme(input: &str) -> IResult<&str, Scheme> {
    // "sips" must be tried before "sip".
    terminated(
        alt((
            map(tag_no_case("sips"), |_| Scheme::Sips),
            map(tag_no_case("sip"), |_| Scheme::Sip),
            map(tag_no_case("tel"), |_| Scheme::Tel),
        )),
        char(':'),
    )(input)
}

fn is_user_char(c: char) -> bool {
    !matches!(c, '@' | ';' | '?' | '>' | ',' | ' ' | '\t' | '\r' | '\n')
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')
}

fn is_param_char(c: char) -> bool {
    !matches!(c, ';' | '?' | '=' | '>' | ',' | ' ' | '\t' | '\r' | '\n' | '&')
}

fn is_header_char(c: char) -> bool {
    !matches!(c, '&' | '=' | '>' | ',' | ' ' | '\t' | '\r' | '\n')
}

fn sip_body(input: &str, scheme: Scheme) -> IResult<&str, Uri> {
    let (input, userinfo) = opt(userinfo)(input)?;
    let (input, host) = host(input)?;
    let (input, port) = opt(preceded(char(':'), nom::character::complete::u16))(input)?;
    let (input, params) = params(input)?;
    let (input, headers) = headers(input)?;
    let (user, password) = match userinfo {
        Some((u, p)) => (Some(u), p),
        None => (None, None),
    };
    Ok((
        input,
        Uri {
            scheme,
            user,
            password,
            host: Some(host),
            port,
            params,
            headers,
        },
    ))
}

fn tel_body(input: &str) -> IResult<&str, Uri> {
    let (input, subscriber) = take_while1(|c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '(' | ')' | '*' | '#')
    })(input)?;
    let (input, params) = params(input)?;
    Ok((
        input,
        Uri {
            scheme: Scheme::Tel,
            user: Some(subscriber.to_string()),
            password: None,
            host: None,
            port: None,
            params,
            headers: Vec::new(),
        },
    ))
}

// user [ ":" password ] "@", only committed when the "@" is present.
fn userinfo(input: &str) -> IResult<&str, (String, Option<String>)> {
    let (rest, raw) = terminated(take_while1(is_user_char), char('@'))(input)?;
    let (user, password) = match raw.split_once(':') {
        Some((u, p)) => (u.to_string(), Some(p.to_string())),
        None => (raw.to_string(), None),
    };
    Ok((rest, (user, password)))
}

fn host(input: &str) -> IResult<&str, String> {
    alt((
        // Bracketed IPv6 reference, kept verbatim including brackets.
        map(
            delimited(char('['), take_while1(|c: char| c != ']'), char(']')),
            |h: &str| format!("[{h}]"),
        ),
        map(take_while1(is_host_char), |h: &str| h.to_string()),
    ))(input)
}

fn params(input: &str) -> IResult<&str, Vec<Param>> {
    // `key`, `key=` and `key=value` are three distinct forms; the empty
    // value must survive a reserialization.
    many0(preceded(
        char(';'),
        map(
            pair(
                take_while1(is_param_char),
                opt(preceded(char('='), opt(take_while1(is_param_char)))),
            ),
            |(k, v): (&str, Option<Option<&str>>)| match v {
                None => Param::parse(k, None),
                Some(v) => Param::parse(k, Some(v.unwrap_or(""))),
            },
        ),
    ))(input)
}

fn headers(input: &str) -> IResult<&str, Vec<(String, String)>> {
    map(
        opt(preceded(
            char('?'),
            separated_list1(
                char('&'),
                separated_pair(take_while1(is_header_char), tag("="), take_while1(is_header_char)),
            ),
        )),
        |hs| {
            hs.unwrap_or_default()
                .into_iter()
                .map(|(k, v): (&str, &str)| (k.to_string(), v.to_string()))
                .collect()
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_angle_close() {
        let (rest, uri) = uri("sip:alice@atlanta.com>;tag=9f").unwrap();
        assert_eq!(rest, ">;tag=9f");
        assert_eq!(uri.user.as_deref(), Some("alice"));
    }

    #[test]
    fn ipv6_host() {
        let u = parse_uri("sip:[2001:db8::1]:5060").unwrap();
        assert_eq!(u.host.as_deref(), Some("[2001:db8::1]"));
        assert_eq!(u.port, Some(5060));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_uri("sip:alice@atlanta.com junk").is_err());
    }
}
