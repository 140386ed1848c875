use std::cmp::Ordering;

use x509_parser::num_bigint::BigUint;

use super::errors::{CrlError, CrlResult};
use super::types::RevocationList;

/// Serials that were added and removed between two CRLs, in serial order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialDiff {
    pub added: Vec<BigUint>,
    pub removed: Vec<BigUint>,
}

/// Compare the revoked serials of two CRLs from one issuer.
///
/// `old` must have an earlier thisUpdate than `new` and a CRL number no
/// greater than `new`'s.
pub fn diff(old: &RevocationList, new: &RevocationList) -> CrlResult<SerialDiff> {
    if old.issuer_key_id != new.issuer_key_id {
        return Err(CrlError::MismatchedIssuer);
    }

    if old.this_update >= new.this_update {
        return Err(CrlError::OutOfOrder(format!(
            "thisUpdate {} is not before {}",
            old.this_update, new.this_update
        )));
    }

    if old.number > new.number {
        return Err(CrlError::OutOfOrder(format!(
            "number {} is greater than {}",
            old.number, new.number
        )));
    }

    let mut old_serials: Vec<&BigUint> = old.serials().collect();
    old_serials.sort_unstable();
    let mut new_serials: Vec<&BigUint> = new.serials().collect();
    new_serials.sort_unstable();

    // Merge walk over both sorted lists
    let mut result = SerialDiff::default();
    let (mut i, mut j) = (0, 0);
    loop {
        match (old_serials.get(i), new_serials.get(j)) {
            (None, _) => {
                result
                    .added
                    .extend(new_serials[j..].iter().map(|s| (*s).clone()));
                break;
            }
            (_, None) => {
                result
                    .removed
                    .extend(old_serials[i..].iter().map(|s| (*s).clone()));
                break;
            }
            (Some(o), Some(n)) => match o.cmp(n) {
                Ordering::Less => {
                    result.removed.push((*o).clone());
                    i += 1;
                }
                Ordering::Greater => {
                    result.added.push((*n).clone());
                    j += 1;
                }
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
            },
        }
    }

    Ok(result)
}
