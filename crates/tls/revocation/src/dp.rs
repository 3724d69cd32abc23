//! Distribution point URLs from certificate extensions.
//!
//! Both the CRL Distribution Points extension and the Freshest CRL extension
//! carry a `CRLDistributionPoints` structure. Only `uniformResourceIdentifier`
//! names inside a `fullName` with an `http` scheme are used.

use x509_parser::{
    extensions::{CRLDistributionPoints, DistributionPointName, GeneralName},
    prelude::FromDer,
};

use crate::error::RevocationError;

/// Returns the `http://` URLs of a DER-encoded `CRLDistributionPoints`, in
/// order of appearance.
pub fn http_urls(der: &[u8]) -> Result<Vec<String>, RevocationError> {
    let (_, points) = CRLDistributionPoints::from_der(der)
        .map_err(|err| RevocationError::Parse(format!("malformed distribution points: {err}")))?;
    Ok(http_urls_of(&points))
}

pub(crate) fn http_urls_of(points: &CRLDistributionPoints<'_>) -> Vec<String> {
    points
        .iter()
        .filter_map(|point| match &point.distribution_point {
            Some(DistributionPointName::FullName(names)) => Some(names),
            _ => None,
        })
        .flatten()
        .filter_map(|name| match name {
            GeneralName::URI(url) if is_http(url) => Some(url.to_string()),
            _ => None,
        })
        .collect()
}

fn is_http(url: &str) -> bool {
    url.len() > 7 && url.as_bytes()[..7].eq_ignore_ascii_case(b"http://")
}
