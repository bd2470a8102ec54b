//! Security audit events.
//!
//! Every security relevant outcome of the signing workflow is emitted as a
//! structured `tracing` event with target [`AUDIT_TARGET`] and an
//! `event_type` field. The binary routes this target to a durable JSON log
//! when one is configured.

use crate::trust_store::TrustRecord;

/// Target of all audit events.
pub const AUDIT_TARGET: &str = "audit";

/// Event types.
pub mod events {
    /// The private key could not be unlocked with the given passphrase.
    pub const AUTHENTICATION_FAILURE: &str = "identity.authentication_failure";
    /// A signing request named a user without a trust record.
    pub const UNKNOWN_USER: &str = "integrity.unknown_user";
    /// A registered signature image is missing from disk.
    pub const MISSING_ASSET: &str = "integrity.missing_asset";
    /// A signature image no longer matches its registered hash.
    pub const INTEGRITY_VIOLATION: &str = "integrity.violation";
    /// A signature image was registered.
    pub const USER_REGISTERED: &str = "trust_store.registered";
    /// A document was stamped and sealed.
    pub const DOCUMENT_SIGNED: &str = "document.signed";
}

pub fn log_authentication_failure(user_id: &str) {
    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = events::AUTHENTICATION_FAILURE,
        user_id = %user_id,
        "Private key could not be unlocked"
    );
}

pub fn log_unknown_user(user_id: &str) {
    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = events::UNKNOWN_USER,
        user_id = %user_id,
        "No registered signature image for user"
    );
}

pub fn log_missing_asset(user_id: &str, image_filename: &str) {
    tracing::error!(
        target: AUDIT_TARGET,
        event_type = events::MISSING_ASSET,
        user_id = %user_id,
        image_filename = %image_filename,
        "Registered signature image is missing"
    );
}

/// Fraud alert: the image on disk was replaced or modified after it was
/// registered.
pub fn log_integrity_violation(user_id: &str, image_filename: &str, expected: &str, actual: &str) {
    tracing::error!(
        target: AUDIT_TARGET,
        event_type = events::INTEGRITY_VIOLATION,
        user_id = %user_id,
        image_filename = %image_filename,
        expected_hash = %expected,
        actual_hash = %actual,
        "Signature image does not match its registered hash"
    );
}

pub fn log_user_registered(user_id: &str, record: &TrustRecord, previous: Option<&TrustRecord>) {
    match previous {
        None => tracing::info!(
            target: AUDIT_TARGET,
            event_type = events::USER_REGISTERED,
            user_id = %user_id,
            image_filename = %record.image_filename,
            image_hash = %record.image_hash,
            "Signature image registered"
        ),
        Some(previous) => tracing::warn!(
            target: AUDIT_TARGET,
            event_type = events::USER_REGISTERED,
            user_id = %user_id,
            image_filename = %record.image_filename,
            image_hash = %record.image_hash,
            previous_image_filename = %previous.image_filename,
            previous_image_hash = %previous.image_hash,
            previous_registered_at = %previous.registered_at,
            "Signature image registration replaced"
        ),
    }
}

pub fn log_document_signed(user_id: &str, image_hash: &str, signed_length: usize, pages: &[u32]) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = events::DOCUMENT_SIGNED,
        user_id = %user_id,
        image_hash = %image_hash,
        signed_length,
        stamped_pages = ?pages,
        "Document stamped and sealed"
    );
}
