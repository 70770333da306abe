//! Fixed numeric status codes posted to a provider's notify URL.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The outcome classes a provider can be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// 900: the suite installed successfully.
    Success,
    /// 901: the device lacks storage for the suite.
    InsufficientStorage,
    /// 902: the user declined the installation.
    UserCancelled,
    /// 903: the archive could not be fetched.
    LossOfService,
    /// 904: downloaded archive size differs from the declared size.
    SizeMismatch,
    /// 905: descriptor and manifest disagree on a checked attribute.
    AttributeMismatch,
    /// 906: the descriptor is malformed.
    InvalidDescriptor,
    /// 907: the archive is malformed.
    InvalidArchive,
    /// 908: a URL in the descriptor is unusable.
    InvalidUrl,
    /// 909: the signature chain could not be authenticated.
    AuthenticationFailure,
    /// 910: a required permission was denied by the security domain.
    AuthorizationFailure,
    /// 911: a push connection could not be registered.
    PushRegistrationFailure,
    /// 912: the suite was deleted.
    DeletionNotification,
}

impl StatusCode {
    /// The numeric code.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Success => 900,
            Self::InsufficientStorage => 901,
            Self::UserCancelled => 902,
            Self::LossOfService => 903,
            Self::SizeMismatch => 904,
            Self::AttributeMismatch => 905,
            Self::InvalidDescriptor => 906,
            Self::InvalidArchive => 907,
            Self::InvalidUrl => 908,
            Self::AuthenticationFailure => 909,
            Self::AuthorizationFailure => 910,
            Self::PushRegistrationFailure => 911,
            Self::DeletionNotification => 912,
        }
    }

    /// The fixed status text.
    #[must_use]
    pub fn text(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::InsufficientStorage => "Insufficient Storage",
            Self::UserCancelled => "User Cancelled",
            Self::LossOfService => "Loss of Service",
            Self::SizeMismatch => "Size Mismatch",
            Self::AttributeMismatch => "Attribute Mismatch",
            Self::InvalidDescriptor => "Invalid Descriptor",
            Self::InvalidArchive => "Invalid Archive",
            Self::InvalidUrl => "Invalid URL",
            Self::AuthenticationFailure => "Authentication Failure",
            Self::AuthorizationFailure => "Authorization Failure",
            Self::PushRegistrationFailure => "Push Registration Failure",
            Self::DeletionNotification => "Deletion Notification",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_body_format() {
        assert_eq!(StatusCode::Success.to_string(), "900 Success");
        assert_eq!(
            StatusCode::InvalidDescriptor.to_string(),
            "906 Invalid Descriptor"
        );
    }
}
