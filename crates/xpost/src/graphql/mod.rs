//! The `CreateTweet` GraphQL mutation: request assembly and response classification.

pub mod features;
mod request;
mod response;

pub use request::{
    AssembledRequest, MAX_CONTENT_LEN, RequestAssembler, RequestCredentials, extract_status_id,
    validate_content,
};
pub use response::{CREATED_ID_PATHS, FailureKind, PostResult, created_id, interpret, parse_body};
