//! SRK (Super-Root Key) table and fuse layout.
//!
//! Parses up to four PEM-armored X.509 certificates, hashes each
//! SubjectPublicKeyInfo, and lays out the fuse blob as the concatenation of
//! those digests in input order. Signing and verification are out of
//! scope; only table/fuse *layout* is produced.

use sha2::{Digest, Sha256};

pub const MAX_KEYS: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum SrkError {
    #[error("PEM decode failed: {0}")]
    Pem(String),
    #[error("DER decode failed: {0}")]
    Der(String),
    #[error("expected at most {max} keys, got {got}")]
    TooManyKeys { max: usize, got: usize },
    #[error("no keys provided")]
    Empty,
}

/// One certificate's SubjectPublicKeyInfo digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrkEntry {
    pub spki_digest: [u8; 32],
}

/// An SRK table: up to [`MAX_KEYS`] entries, in input order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrkTable {
    pub entries: Vec<SrkEntry>,
}

impl SrkTable {
    /// Parse `pem_certs` (one PEM-armored X.509 certificate per element)
    /// and hash each SubjectPublicKeyInfo with SHA-256.
    pub fn from_pem_certs(pem_certs: &[&str]) -> Result<Self, SrkError> {
        if pem_certs.is_empty() {
            return Err(SrkError::Empty);
        }
        if pem_certs.len() > MAX_KEYS {
            return Err(SrkError::TooManyKeys {
                max: MAX_KEYS,
                got: pem_certs.len(),
            });
        }
        let entries = pem_certs
            .iter()
            .map(|text| spki_digest_of(text))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// The fuse blob: digests concatenated in input order. Truncating to
    /// a particular HAB version's fuse width is left to the caller, since
    /// the HAB version is not modeled here; this returns the full digests.
    pub fn fuses(&self) -> Vec<u8> {
        self.entries.iter().flat_map(|e| e.spki_digest).collect()
    }
}

fn spki_digest_of(pem_text: &str) -> Result<SrkEntry, SrkError> {
    let doc = pem::parse(pem_text).map_err(|e| SrkError::Pem(e.to_string()))?;
    let spki = extract_spki(doc.contents())?;
    let mut hasher = Sha256::new();
    hasher.update(spki);
    let digest: [u8; 32] = hasher.finalize().into();
    Ok(SrkEntry {
        spki_digest: digest,
    })
}

/// Read the immediate children of a DER SEQUENCE/constructed value as raw
/// TLVs, without decoding their contents.
fn read_tlv_children(data: &[u8]) -> Result<Vec<asn1::Tlv<'_>>, asn1::ParseError> {
    asn1::parse(data, |p| {
        let mut items = Vec::new();
        while !p.is_empty() {
            items.push(p.read_element::<asn1::Tlv>()?);
        }
        Ok(items)
    })
}

/// Extract the raw DER bytes of the Certificate's SubjectPublicKeyInfo
/// field: `Certificate ::= SEQUENCE { tbsCertificate, ... }`,
/// `TBSCertificate ::= SEQUENCE { version?, serial, signature, issuer,
/// validity, subject, subjectPublicKeyInfo, ... }`. Only the byte range of
/// that nested SEQUENCE is needed, not its parsed semantics, so this walks
/// the DER tag/length structure as raw TLVs rather than fully decoding it.
fn extract_spki(der: &[u8]) -> Result<Vec<u8>, SrkError> {
    let map_err = |e: asn1::ParseError| SrkError::Der(format!("{e:?}"));

    let cert = asn1::parse_single::<asn1::Tlv>(der).map_err(map_err)?;
    let cert_items = read_tlv_children(cert.data()).map_err(map_err)?;
    let tbs = cert_items
        .first()
        .ok_or_else(|| SrkError::Der("empty Certificate sequence".into()))?;
    let tbs_items = read_tlv_children(tbs.data()).map_err(map_err)?;

    // TBSCertificate has 6 mandatory fields before subjectPublicKeyInfo
    // when the optional explicit `[0] version` is present (X.509v3, the
    // universal case for certificates encountered here), so the field sits
    // at index 6; fall back to index 5 (no explicit version) if that slot
    // is missing.
    let spki = tbs_items
        .get(6)
        .or_else(|| tbs_items.get(5))
        .ok_or_else(|| SrkError::Der("TBSCertificate missing subjectPublicKeyInfo".into()))?;
    Ok(spki.data().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    // A minimal self-signed certificate is awkward to hand-construct as a
    // byte-exact DER fixture; instead this exercises the layout/ordering
    // contract directly against a fixed set of SPKI bytes, which is what
    // `SrkTable` actually operates on once PEM/DER decoding has happened.
    fn entry(seed: u8) -> SrkEntry {
        let mut hasher = Sha256::new();
        hasher.update([seed; 32]);
        SrkEntry {
            spki_digest: hasher.finalize().into(),
        }
    }

    #[test]
    fn fuses_concatenate_digests_in_input_order() {
        let table = SrkTable {
            entries: vec![entry(1), entry(2), entry(3), entry(4)],
        };
        let fuses = table.fuses();
        assert_eq!(fuses.len(), 4 * 32);
        assert_eq!(&fuses[0..32], &table.entries[0].spki_digest[..]);
        assert_eq!(&fuses[96..128], &table.entries[3].spki_digest[..]);
    }

    #[test]
    fn rejects_more_than_four_keys() {
        let err = SrkTable::from_pem_certs(&["", "", "", "", ""]).unwrap_err();
        assert!(matches!(err, SrkError::TooManyKeys { max: 4, got: 5 }));
    }

    #[test]
    fn rejects_empty_input() {
        let err = SrkTable::from_pem_certs(&[]).unwrap_err();
        assert!(matches!(err, SrkError::Empty));
    }
}
