pub mod issuer;
pub mod signer;
