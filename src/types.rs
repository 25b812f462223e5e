use crate::error::{Error, Result};
use std::borrow::Borrow;
use std::fmt;

const MAX_NAME_LEN: usize = 128;

fn validate_simple_name(value: &str, kind: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidId(format!("{kind} must not be empty")));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(Error::InvalidId(format!(
            "{kind} length must be <= {MAX_NAME_LEN}"
        )));
    }
    if !trimmed.chars().all(is_allowed_name_char) {
        return Err(Error::InvalidId(format!(
            "{kind} contains invalid characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn is_allowed_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ':' | '_' | '-')
}

macro_rules! define_id_type {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(String);

        impl $name {
            /// Creates a validated identifier.
            pub fn new(value: impl AsRef<str>) -> Result<Self> {
                validate_simple_name(value.as_ref(), $kind).map(Self)
            }

            /// Mints a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            /// Creates an identifier from a trusted string without validation.
            pub fn from_string(value: String) -> Self {
                Self(value)
            }

            /// Returns the underlying string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from_string(value)
            }
        }
    };
}

define_id_type!(
    /// Authenticated account identifier.
    AccountId,
    "account id"
);
define_id_type!(
    /// Album identifier.
    AlbumId,
    "album id"
);
define_id_type!(
    /// Media item identifier.
    MediaId,
    "media id"
);
define_id_type!(
    /// Share token record identifier (not the secret token string).
    ShareTokenId,
    "share token id"
);
define_id_type!(
    /// Archive job identifier.
    ArchiveJobId,
    "archive job id"
);

#[cfg(test)]
mod tests {
    use super::{AccountId, AlbumId, MediaId};

    #[test]
    fn id_trims_surrounding_whitespace() {
        let account = AccountId::try_from("  user_1 ").expect("account id");
        assert_eq!(account.as_str(), "user_1");
    }

    #[test]
    fn id_rejects_empty_value() {
        let err = AlbumId::try_from("   ").expect_err("must reject");
        assert!(err.to_string().contains("album id"));
    }

    #[test]
    fn id_rejects_invalid_chars() {
        let err = MediaId::try_from("media 1").expect_err("must reject");
        assert!(err.to_string().contains("media id"));
    }

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let first = AlbumId::generate();
        let second = AlbumId::generate();
        assert_ne!(first, second);
        assert!(AlbumId::new(first.as_str()).is_ok());
    }
}
