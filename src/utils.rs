//! Utility functions for identifiers and proof file naming

use bech32::Bech32m;
use uuid7::uuid7;

pub const CLIENT_HRP: &str = "client";
pub const INSTALLMENT_HRP: &str = "inst";
pub const PAYMENT_HRP: &str = "pay";
pub const NOTIFICATION_HRP: &str = "notif";
pub const USER_HRP: &str = "user";

// construct a unique, time ordered id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// File extension of an uploaded file name, lowercased. Only short
/// alphanumeric extensions are kept so a name cannot smuggle path segments.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
