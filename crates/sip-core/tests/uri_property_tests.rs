//! URI idempotence: Parse(Serialize(U)).Serialize() == U.Serialize().

use std::str::FromStr;

use proptest::prelude::*;
use sipline_sip_core::prelude::*;

fn user_strategy() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-z][a-z0-9._+-]{0,12}")
}

fn host_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,10}(\\.[a-z]{2,6}){1,2}"
}

fn param_strategy() -> impl Strategy<Value = Param> {
    prop_oneof![
        Just(Param::Lr),
        "[a-z]{2,8}".prop_map(|t| Param::Transport(t)),
        "[a-zA-Z0-9]{1,12}".prop_map(|t| Param::Tag(t)),
        ("[a-z][a-z0-9-]{1,10}", proptest::option::of("[a-zA-Z0-9.]{1,10}"))
            .prop_map(|(k, v)| Param::parse(&k, v.as_deref())),
    ]
}

fn uri_strategy() -> impl Strategy<Value = Uri> {
    (
        user_strategy(),
        host_strategy(),
        proptest::option::of(1024u16..65535),
        proptest::collection::vec(param_strategy(), 0..4),
    )
        .prop_map(|(user, host, port, params)| {
            let mut uri = Uri::sip(host);
            uri.user = user;
            uri.port = port;
            for p in params {
                uri.set_param(p);
            }
            uri
        })
}

proptest! {
    #[test]
    fn serialize_parse_serialize_is_identity(uri in uri_strategy()) {
        let first = uri.to_string();
        let reparsed = Uri::from_str(&first).unwrap();
        prop_assert_eq!(reparsed.to_string(), first);
    }

    #[test]
    fn parse_preserves_components(uri in uri_strategy()) {
        let reparsed = Uri::from_str(&uri.to_string()).unwrap();
        prop_assert_eq!(reparsed.user, uri.user);
        prop_assert_eq!(reparsed.host, uri.host);
        prop_assert_eq!(reparsed.port, uri.port);
        prop_assert_eq!(reparsed.params.len(), uri.params.len());
    }
}

#[test]
fn tel_uri_idempotence() {
    for s in ["tel:+1-201-555-0123", "tel:7042;phone-context=example.com"] {
        let uri = Uri::from_str(s).unwrap();
        let once = uri.to_string();
        let twice = Uri::from_str(&once).unwrap().to_string();
        assert_eq!(once, twice);
    }
}
