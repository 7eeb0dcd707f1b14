//! HTTP/1.1 message model: headers, bodies, multipart forms, the streaming
//! parser and the message builders.

pub mod body;
pub mod builder;
pub mod headers;
pub mod message;
pub mod multipart;
pub mod parser;

pub use body::{Body, FileBody, FormBody, StringBody};
pub use builder::{RequestBuilder, ResponseBuilder};
pub use headers::Headers;
pub use message::{Request, Response};
pub use multipart::FormPart;
pub use parser::{BodySink, ParseStatus, Parser};
