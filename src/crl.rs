//! Certificate Revocation List model and comparison
//!
//! # Features
//! - Parsing DER CRLs into an owned [`RevocationList`]
//! - Extracting the IssuingDistributionPoint URL
//! - Diffing two CRLs of the same issuer
//! - Validating a CRL against its issuer certificate

mod diff;
mod errors;
pub mod idp;
mod types;
pub mod validation;

pub use diff::{SerialDiff, diff};
pub use errors::{CrlError, CrlResult};
pub use idp::IdpError;
pub use types::{RevocationList, RevokedEntry};
pub use validation::{ValidationError, Validator};
