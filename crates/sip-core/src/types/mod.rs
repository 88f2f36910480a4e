//! The SIP data model: URIs, addresses, headers and full messages.

pub mod address;
pub mod header;
pub mod header_name;
pub mod message;
pub mod method;
pub mod status;
pub mod uri;
pub mod version;
pub mod via;

pub use address::Address;
pub use header::{Header, HeaderKind, HeaderValue};
pub use header_name::HeaderName;
pub use message::{parse_message, SipMessage, StartLine};
pub use method::Method;
pub use status::StatusCode;
pub use uri::{Param, Scheme, Uri};
pub use version::Version;
pub use via::{generate_branch, Via, BRANCH_MAGIC_COOKIE};
