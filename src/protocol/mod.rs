//! Postgres wire protocol (v3) subset
//!
//! Covers startup, authentication, the simple query protocol and the COPY
//! sub-protocol. Extended query (Parse/Bind/Execute) is not used by this crate.

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use message::{
    AuthenticationMessage, BackendMessage, CopyResponse, ErrorFields, FieldDescription,
    FrontendMessage,
};
