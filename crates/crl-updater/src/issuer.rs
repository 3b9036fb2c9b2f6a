//! Issuer identity. The issuer map is populated once at construction and
//! never mutated afterward; shard workers only ever read it.

use std::collections::BTreeMap;

/// A stable 64-bit identifier derived from an issuer certificate's Subject.
/// Opaque to the updater beyond its role as a map key and wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IssuerNameId(pub i64);

impl std::fmt::Display for IssuerNameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Issuer {
    pub name_id: IssuerNameId,
    /// Human-readable Subject common name, used in logs and as the
    /// `issuer` metric label.
    pub common_name: String,
}

pub type IssuerMap = BTreeMap<IssuerNameId, Issuer>;

/// Derives a stable `IssuerNameID` from a configured common name.
///
/// The storage authority, CA, and publisher all key issuers by this ID
/// rather than by name; deriving it from the name's bytes keeps the
/// mapping deterministic across restarts and across rebuilds, without
/// requiring an external lookup at startup. Uses SHA-256 rather than
/// `std`'s `DefaultHasher`, whose algorithm is explicitly not guaranteed
/// stable across Rust versions — a changed hash would silently reassign
/// every issuer's ID on the next rebuild.
pub fn derive_name_id(common_name: &str) -> IssuerNameId {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(common_name.as_bytes());
    let bytes: [u8; 8] = digest[..8].try_into().expect("digest is at least 8 bytes");
    IssuerNameId(i64::from_be_bytes(bytes))
}

pub fn build_issuer_map(common_names: &[String]) -> IssuerMap {
    common_names
        .iter()
        .map(|cn| {
            let name_id = derive_name_id(cn);
            (
                name_id,
                Issuer {
                    name_id,
                    common_name: cn.clone(),
                },
            )
        })
        .collect()
}
