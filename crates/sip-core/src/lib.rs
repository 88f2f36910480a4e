//! SIP protocol data model for the sipline stack.
//!
//! This crate owns the message substrate the rest of the stack operates
//! on: `sip:`/`sips:`/`tel:` URIs, display-name addresses, typed headers
//! with table-driven classification, and full request/response messages
//! with canonical serialization.
//!
//! # Example
//!
//! ```rust
//! use sipline_sip_core::prelude::*;
//!
//! let raw = b"OPTIONS sip:bob@biloxi.com SIP/2.0\r\n\
//!     Via: SIP/2.0/UDP atlanta.com;branch=z9hG4bK77\r\n\
//!     To: <sip:bob@biloxi.com>\r\n\
//!     From: <sip:alice@atlanta.com>;tag=88\r\n\
//!     Call-ID: test@atlanta.com\r\n\
//!     CSeq: 1 OPTIONS\r\n\r\n";
//! let msg = parse_message(raw).unwrap();
//! assert_eq!(msg.method(), Some(Method::Options));
//! ```

pub mod error;
pub mod parser;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    parse_message, Address, Header, HeaderKind, HeaderName, HeaderValue, Method, Param, Scheme,
    SipMessage, StartLine, StatusCode, Uri, Version, Via,
};

/// Re-export of the commonly used types.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        generate_branch, parse_message, Address, Header, HeaderKind, HeaderName, HeaderValue,
        Method, Param, Scheme, SipMessage, StartLine, StatusCode, Uri, Version, Via,
        BRANCH_MAGIC_COOKIE,
    };
}
