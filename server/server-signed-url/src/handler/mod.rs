pub mod signed_url;
