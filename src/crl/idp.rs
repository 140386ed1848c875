//! IssuingDistributionPoint extension (RFC 5280 §5.2.5)
//!
//! Only the `distributionPoint` field is read. It must be a `fullName`
//! holding exactly one uniformResourceIdentifier.

use thiserror::Error;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::X509Extension;

/// id-ce-issuingDistributionPoint
pub const IDP_OID: &str = "2.5.29.28";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdpError {
    #[error("no IssuingDistributionPoint extension found")]
    Missing,

    #[error("multiple IssuingDistributionPoint extensions in CRL")]
    Duplicate,

    #[error("IssuingDistributionPoint extension is not marked critical")]
    NotCritical,

    #[error("incorrect number of IssuingDistributionPoint URLs: {0}")]
    UrlCount(usize),

    #[error("parsing IssuingDistributionPoint extension: {0}")]
    Malformed(String),
}

/// Returns the single URL contained within the IssuingDistributionPoint
/// extension of a CRL.
pub fn get(extensions: &[X509Extension]) -> Result<String, IdpError> {
    let mut found: Option<String> = None;
    for ext in extensions
        .iter()
        .filter(|ext| ext.oid.to_id_string() == IDP_OID)
    {
        if found.is_some() {
            return Err(IdpError::Duplicate);
        }
        if !ext.critical {
            return Err(IdpError::NotCritical);
        }
        found = Some(url(ext.parsed_extension())?);
    }
    found.ok_or(IdpError::Missing)
}

fn url(parsed: &ParsedExtension<'_>) -> Result<String, IdpError> {
    let idp = match parsed {
        ParsedExtension::IssuingDistributionPoint(idp) => idp,
        ParsedExtension::ParseError { error } => {
            return Err(IdpError::Malformed(format!("{error:?}")));
        }
        _ => return Err(IdpError::Malformed("unrecognized extension value".into())),
    };

    let names = match &idp.distribution_point {
        Some(DistributionPointName::FullName(names)) => names,
        Some(DistributionPointName::NameRelativeToCRLIssuer(_)) => {
            return Err(IdpError::Malformed(
                "nameRelativeToCRLIssuer is not supported".into(),
            ));
        }
        None => return Err(IdpError::UrlCount(0)),
    };

    match names.as_slice() {
        [GeneralName::URI(uri)] => Ok(uri.to_string()),
        [other] => Err(IdpError::Malformed(format!(
            "GeneralName {other:?} is not a URI"
        ))),
        _ => Err(IdpError::UrlCount(names.len())),
    }
}
