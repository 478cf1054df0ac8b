//! Credential record wire format.
//!
//! Records are stored as `|`-joined strings: `user|password|secret` while
//! unassigned, `user|password|secret|device` once a device has consumed
//! them. Any other field count is malformed; callers skip malformed entries
//! on read and leave them byte-for-byte untouched on write.

use std::fmt;

/// Field separator within a stored record string.
pub const FIELD_SEPARATOR: char = '|';

/// One consumable set of login secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub user: String,
    pub password: String,
    pub secret: String,
    /// Identifier of the device the record was consumed by, if any.
    pub device: Option<String>,
}

impl CredentialRecord {
    /// Parses a stored record string. Returns `None` when the field count
    /// is neither 3 (unassigned) nor 4 (assigned).
    pub fn parse(raw: &str) -> Option<Self> {
        let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
        match fields.as_slice() {
            [user, password, secret] => Some(Self {
                user: (*user).to_string(),
                password: (*password).to_string(),
                secret: (*secret).to_string(),
                device: None,
            }),
            [user, password, secret, device] => Some(Self {
                user: (*user).to_string(),
                password: (*password).to_string(),
                secret: (*secret).to_string(),
                device: Some((*device).to_string()),
            }),
            _ => None,
        }
    }

    /// Whether the record has already been consumed by a device.
    pub fn is_assigned(&self) -> bool {
        self.device.is_some()
    }

    /// Marks the record as consumed by `device`.
    pub fn assign(&mut self, device: impl Into<String>) {
        self.device = Some(device.into());
    }
}

impl fmt::Display for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.user, self.password, self.secret)?;
        if let Some(device) = &self.device {
            write!(f, "|{device}")?;
        }
        Ok(())
    }
}
