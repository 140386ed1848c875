//! Detection of certificates dropped from a CRL before they expired.
//!
//! Once a revoked certificate expires, a CA may stop listing it. Removing it
//! any earlier hides the revocation from relying parties. Every serial that
//! disappears between two consecutive CRLs must therefore have expired no
//! later than the older CRL's thisUpdate.

use std::fmt;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use x509_parser::num_bigint::BigUint;

use crate::crl::{self, CrlError, RevocationList};
use crate::expiry::{ExpirationOracle, OracleError};

/// A serial removed from a CRL while its certificate was still valid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarlyRemoval {
    pub serial: BigUint,
    pub not_after: OffsetDateTime,
}

impl fmt::Display for EarlyRemoval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "serial {} (notAfter {})", self.serial, self.not_after)
    }
}

#[derive(Debug, Error)]
pub enum EarlyRemovalError {
    #[error(transparent)]
    Crl(#[from] CrlError),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Look up the expiration of every serial removed between `prev` and `crl`
/// and return the ones that were still valid at `prev.this_update`.
///
/// With `max_fetch > 0` at most that many serials are looked up; see
/// [`sample`]. An early removal outside the sample goes unreported, so
/// `0`, which checks every removed serial, is the only complete setting.
pub async fn check(
    oracle: &dyn ExpirationOracle,
    prev: &RevocationList,
    crl: &RevocationList,
    max_fetch: usize,
) -> Result<Vec<EarlyRemoval>, EarlyRemovalError> {
    let diff = crl::diff(prev, crl)?;

    let to_check = if max_fetch > 0 && diff.removed.len() > max_fetch {
        warn!(
            removed = diff.removed.len(),
            max_fetch, "too many removed serials, only checking a sample"
        );
        sample(&diff.removed, max_fetch)
    } else {
        diff.removed
    };

    info!(
        count = to_check.len(),
        number = %crl.number,
        "checking for early CRL removal"
    );

    let mut early = Vec::new();
    for serial in to_check {
        let not_after = oracle.fetch_not_after(&serial).await?;
        if prev.this_update < not_after {
            early.push(EarlyRemoval { serial, not_after });
        }
    }
    Ok(early)
}

/// Pick `max` items from `data`, keeping its order.
///
/// The first and last 10% of `max` are always taken from the two ends of
/// `data`, where out-of-order removals are most likely, and the rest is a
/// uniform random pick from the middle. Returns all of `data` when `max` is
/// zero or at least `data.len()`.
pub(crate) fn sample<T: Clone>(data: &[T], max: usize) -> Vec<T> {
    if max == 0 || data.len() <= max {
        return data.to_vec();
    }

    let edge = max / 10;
    let middle = &data[edge..data.len() - edge];
    let mut picked = rand::seq::index::sample(&mut rand::rng(), middle.len(), max - 2 * edge)
        .into_vec();
    picked.sort_unstable();

    let mut sampled = Vec::with_capacity(max);
    sampled.extend_from_slice(&data[..edge]);
    sampled.extend(picked.into_iter().map(|i| middle[i].clone()));
    sampled.extend_from_slice(&data[data.len() - edge..]);
    sampled
}
