pub mod env;
pub mod external_api;
