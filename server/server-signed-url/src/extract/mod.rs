pub mod error;
pub mod json_body;
pub mod response;
