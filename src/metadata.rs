//! The seal: provenance fields and the metadata signature of a document.
//!
//! Sealing happens in two revisions. The provenance claims are written into
//! the document information dictionary before the document is serialized and
//! signed, so the signature covers them. The signature itself is then added
//! to a copy of that dictionary in an incremental update appended to the
//! signed bytes. The signed bytes are therefore an exact prefix of the sealed
//! file, whose length is recorded in the seal.
//!
//! This is not a PAdES/CMS signature field. Viewers show the fields as plain
//! document properties; checking them is left to [`crate::verify_signed_pdf`].

use lopdf::{decode_text_string, text_string, Dictionary, Document, IncrementalDocument, Object};

use crate::{Error, Result};

/// Info dictionary keys of the seal.
pub mod keys {
    pub const PRODUCER: &[u8] = b"Producer";
    pub const TITLE: &[u8] = b"Title";
    pub const SIGNER_IDENTITY: &[u8] = b"Signer-Identity";
    pub const IMAGE_HASH: &[u8] = b"Image-Integrity-SHA256";
    pub const SIGNATURE: &[u8] = b"Digital-Signature-SHA256";
    pub const SIGNED_LENGTH: &[u8] = b"Signed-Byte-Length";
    pub const SIGNED_AT: &[u8] = b"Signed-At";
    pub const VERIFICATION: &[u8] = b"Verification";
}

const VERIFICATION_NOTE: &str = "Validated against the trust store and private key. \
     RSA-PSS/SHA-256 over the first Signed-Byte-Length bytes of this file.";

/// Provenance of a sealed document. Written into the signed revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealClaims {
    pub producer: String,
    pub title: String,
    pub signer_identity: String,
    /// Hex SHA-256 of the stamped signature image.
    pub image_hash: String,
    pub signed_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMetadata {
    pub claims: SealClaims,
    /// Raw RSA-PSS signature, stored hex encoded.
    pub signature: Vec<u8>,
    /// Number of leading bytes of the file covered by `signature`.
    pub signed_length: usize,
}

impl SealClaims {
    fn write_into(&self, info: &mut Dictionary) {
        info.set(keys::PRODUCER, text_string(&self.producer));
        info.set(keys::TITLE, text_string(&self.title));
        info.set(keys::SIGNER_IDENTITY, text_string(&self.signer_identity));
        info.set(keys::IMAGE_HASH, text_string(&self.image_hash));
        info.set(keys::SIGNED_AT, text_string(&self.signed_at));
        info.set(keys::VERIFICATION, text_string(VERIFICATION_NOTE));
    }

    fn read_from(doc: &Document, info: &Dictionary) -> Result<Self> {
        let text = |key: &[u8]| -> Result<String> {
            let obj = info.get(key).map_err(|_| Error::Unsigned)?;
            Ok(decode_text_string(doc.dereference(obj)?.1)?)
        };

        Ok(SealClaims {
            producer: text(keys::PRODUCER)?,
            title: text(keys::TITLE)?,
            signer_identity: text(keys::SIGNER_IDENTITY)?,
            image_hash: text(keys::IMAGE_HASH)?,
            signed_at: text(keys::SIGNED_AT)?,
        })
    }
}

fn info_dictionary<'a>(doc: &'a Document) -> Result<Option<&'a Dictionary>> {
    match doc.trailer.get(b"Info") {
        Ok(obj) => Ok(Some(doc.dereference(obj)?.1.as_dict()?)),
        Err(_) => Ok(None),
    }
}

/// Writes `claims` into the information dictionary of `doc`, creating it when
/// the document has none. Other entries are kept.
pub fn write_claims(doc: &mut Document, claims: &SealClaims) -> Result<()> {
    let (info_id, mut info) = match doc.trailer.get(b"Info") {
        Ok(obj) => {
            let (id, info) = doc.dereference(obj)?;
            (id, info.as_dict()?.clone())
        }
        Err(_) => (None, Dictionary::new()),
    };
    claims.write_into(&mut info);

    match info_id {
        Some(id) => {
            doc.objects.insert(id, Object::Dictionary(info));
        }
        None => {
            let id = doc.add_object(info);
            doc.trailer.set("Info", id);
        }
    }
    Ok(())
}

/// Appends `signature`, computed over all of `signed`, as an incremental
/// update holding a new information dictionary. Returns the sealed file.
///
/// The `Signed-Byte-Length` of the seal is the length of `signed`, so the
/// signed bytes stay an exact prefix of the result.
pub fn append_seal(signed: Vec<u8>, signature: &[u8]) -> Result<Vec<u8>> {
    let signed_length = signed.len();
    let prev = Document::load_mem(&signed)?;

    let mut info = info_dictionary(&prev)?.cloned().unwrap_or_default();
    info.set(keys::SIGNATURE, text_string(&hex::encode(signature)));
    info.set(keys::SIGNED_LENGTH, signed_length as i64);

    let version = prev.version.clone();
    let mut update = IncrementalDocument::create_from(signed, prev);
    update.new_document.version = version;
    let info_id = update.new_document.add_object(info);
    update.new_document.trailer.set("Info", info_id);

    let mut sealed = Vec::with_capacity(signed_length + 1024);
    update.save_to(&mut sealed)?;
    Ok(sealed)
}

/// Reads the seal from the information dictionary of a parsed document.
pub fn read_signature_metadata(doc: &Document) -> Result<SignatureMetadata> {
    let info = info_dictionary(doc)?.ok_or(Error::Unsigned)?;

    let signature = info.get(keys::SIGNATURE).map_err(|_| Error::Unsigned)?;
    let signature =
        hex::decode(doc.dereference(signature)?.1.as_str()?).map_err(|_| Error::BadSignature)?;
    let signed_length = info
        .get(keys::SIGNED_LENGTH)
        .map_err(|_| Error::Unsigned)?
        .as_i64()?;

    Ok(SignatureMetadata {
        claims: read_claims(doc)?,
        signature,
        signed_length: usize::try_from(signed_length).map_err(|_| Error::InvalidRange)?,
    })
}

/// Reads only the provenance claims of a document.
pub fn read_claims(doc: &Document) -> Result<SealClaims> {
    let info = info_dictionary(doc)?.ok_or(Error::Unsigned)?;
    SealClaims::read_from(doc, info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::sample_pdf;
    use lopdf::dictionary;

    fn claims() -> SealClaims {
        SealClaims {
            producer: "pdf-seal test".into(),
            title: "Officially Signed Document".into(),
            signer_identity: "usuario_ejemplo_123".into(),
            image_hash: "ab".repeat(32),
            signed_at: "2026-10-19T10:00:00+02:00".into(),
        }
    }

    /// The serialized document with claims, as it would be signed.
    fn claimed(pdf: &[u8]) -> Vec<u8> {
        let mut doc = Document::load_mem(pdf).unwrap();
        write_claims(&mut doc, &claims()).unwrap();
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn seal_is_an_incremental_update() {
        let signed = claimed(&sample_pdf(2));
        let out = append_seal(signed.clone(), &[0xde, 0xad, 0xbe, 0xef]).unwrap();

        assert!(out.starts_with(&signed));
        assert!(crate::pdf_ends_with_eof(&out));

        let doc = Document::load_mem(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
        assert_eq!(
            read_signature_metadata(&doc).unwrap(),
            SignatureMetadata {
                claims: claims(),
                signature: vec![0xde, 0xad, 0xbe, 0xef],
                signed_length: signed.len(),
            }
        );

        // The claims were already part of the signed revision.
        let prefix = Document::load_mem(&signed).unwrap();
        assert_eq!(read_claims(&prefix).unwrap(), claims());
        assert!(matches!(
            read_signature_metadata(&prefix),
            Err(Error::Unsigned)
        ));
    }

    #[test]
    fn existing_info_entries_are_kept() {
        let mut doc = Document::load_mem(&sample_pdf(1)).unwrap();
        let info_id = doc.add_object(lopdf::dictionary! {
            "Author" => Object::string_literal("Ana"),
            "Producer" => Object::string_literal("Some Editor"),
        });
        doc.trailer.set("Info", info_id);
        let mut pdf = Vec::new();
        doc.save_to(&mut pdf).unwrap();

        let out = append_seal(claimed(&pdf), b"sig").unwrap();
        let doc = Document::load_mem(&out).unwrap();
        let info = info_dictionary(&doc).unwrap().unwrap();
        assert_eq!(info.get(b"Author").unwrap().as_str().unwrap(), b"Ana");
        assert_eq!(
            read_signature_metadata(&doc).unwrap().claims.producer,
            "pdf-seal test"
        );
    }

    #[test]
    fn unsealed_document() {
        let doc = Document::load_mem(&sample_pdf(1)).unwrap();
        assert!(matches!(
            read_signature_metadata(&doc),
            Err(Error::Unsigned)
        ));
        assert!(matches!(read_claims(&doc), Err(Error::Unsigned)));
    }

    #[test]
    fn non_ascii_claims() {
        let mut doc = Document::load_mem(&sample_pdf(1)).unwrap();
        let claims = SealClaims {
            signer_identity: "José Núñez".into(),
            ..claims()
        };
        write_claims(&mut doc, &claims).unwrap();
        assert_eq!(read_claims(&doc).unwrap(), claims);
    }
}
