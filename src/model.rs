//! Records persisted behind the store traits.

use crate::types::{AccountId, AlbumId, ArchiveJobId, MediaId, ShareTokenId};
use chrono::{DateTime, Utc};

/// Album row. The owner's edit grant is created together with it.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Album {
    pub id: AlbumId,
    pub title: String,
    pub description: String,
    pub owner: AccountId,
    pub created_at: DateTime<Utc>,
}

/// Who uploaded a media item or initiated a job.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Origin {
    Account(AccountId),
    ShareToken(ShareTokenId),
}

impl Origin {
    /// Returns the account id when the origin is an account.
    pub fn account(&self) -> Option<&AccountId> {
        match self {
            Origin::Account(account) => Some(account),
            Origin::ShareToken(_) => None,
        }
    }
}

/// Media formats accepted for upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MediaFormat {
    Jpeg,
    Png,
    Heic,
    Mp4,
}

const HEIC_BRANDS: [&[u8; 4]; 6] = [b"heic", b"heix", b"hevc", b"hevx", b"mif1", b"msf1"];
const MP4_BRANDS: [&[u8; 4]; 11] = [
    b"isom", b"iso2", b"iso4", b"iso5", b"iso6", b"mp41", b"mp42", b"avc1", b"mmp4", b"dash",
    b"M4V ",
];

/// ISO media brands that are recognised but not accepted.
fn rejected_brand(brand: &[u8]) -> Option<&'static str> {
    match brand {
        b"qt  " => Some("video/quicktime"),
        b"M4A " | b"M4B " | b"M4P " => Some("audio/mp4"),
        b"avif" | b"avis" => Some("image/avif"),
        b"3gp4" | b"3gp5" | b"3gp6" | b"3g2a" => Some("video/3gpp"),
        _ => None,
    }
}

/// Outcome of sniffing a file header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sniffed {
    Supported(MediaFormat),
    /// Recognised but not accepted (e.g. gif).
    Unsupported(&'static str),
    Unknown,
}

impl MediaFormat {
    /// Detects the format from the leading bytes of a file.
    pub fn sniff(header: &[u8]) -> Sniffed {
        if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Sniffed::Supported(MediaFormat::Jpeg);
        }
        if header.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Sniffed::Supported(MediaFormat::Png);
        }
        if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
            return Sniffed::Unsupported("image/gif");
        }
        if header.len() >= 12 && &header[4..8] == b"ftyp" {
            let brand = &header[8..12];
            if HEIC_BRANDS.iter().any(|candidate| brand == candidate.as_slice()) {
                return Sniffed::Supported(MediaFormat::Heic);
            }
            if MP4_BRANDS.iter().any(|candidate| brand == candidate.as_slice()) {
                return Sniffed::Supported(MediaFormat::Mp4);
            }
            if let Some(mime) = rejected_brand(brand) {
                return Sniffed::Unsupported(mime);
            }
        }
        Sniffed::Unknown
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaFormat::Jpeg => "jpg",
            MediaFormat::Png => "png",
            MediaFormat::Heic => "heic",
            MediaFormat::Mp4 => "mp4",
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, MediaFormat::Mp4)
    }
}

/// Media item metadata. The bytes live in the artifact store.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaItem {
    pub id: MediaId,
    pub original_file_name: String,
    pub storage_name: String,
    /// Empty until a compression cycle produced the derived artifact.
    pub compressed_name: Option<String>,
    pub format: MediaFormat,
    pub uploaded_by: Origin,
    pub uploaded_at: DateTime<Utc>,
}

/// Membership of a media item in an album.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaLink {
    pub album: AlbumId,
    pub media: MediaId,
    pub added_by: Origin,
    pub added_at: DateTime<Utc>,
}

/// Resource a grant applies to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum GrantTarget {
    Album(AlbumId),
    Media(MediaId),
}

/// Persisted (account, resource) capability record. Unique per key.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccessGrant {
    pub account: AccountId,
    pub target: GrantTarget,
    pub can_edit: bool,
    pub granted_at: DateTime<Utc>,
}

impl AccessGrant {
    pub fn new(account: AccountId, target: GrantTarget, can_edit: bool) -> Self {
        Self {
            account,
            target,
            can_edit,
            granted_at: Utc::now(),
        }
    }
}

/// Anonymous, album-scoped, time-bounded credential.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShareToken {
    pub id: ShareTokenId,
    pub album: AlbumId,
    pub issuer: AccountId,
    pub token: String,
    pub can_edit: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ShareToken {
    /// Check if the token has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JobState {
    Pending,
    Ready,
    /// Build errored or was abandoned by a shutdown.
    Failed,
}

/// Asynchronous zip build of an album snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArchiveJob {
    pub id: ArchiveJobId,
    pub album: AlbumId,
    pub title: String,
    pub initiator: Origin,
    pub state: JobState,
    pub artifact_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
}

/// The caller of an operation: an account, a share token holder, both, or neither.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Actor {
    pub account: Option<AccountId>,
    pub token: Option<ShareToken>,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn account(account: AccountId) -> Self {
        Self {
            account: Some(account),
            token: None,
        }
    }

    pub fn token(token: ShareToken) -> Self {
        Self {
            account: None,
            token: Some(token),
        }
    }

    pub fn with_token(mut self, token: ShareToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.account.is_none() && self.token.is_none()
    }

    /// Origin recorded on rows this actor creates; accounts win over tokens.
    pub fn origin(&self) -> Option<Origin> {
        if let Some(account) = &self.account {
            return Some(Origin::Account(account.clone()));
        }
        self.token
            .as_ref()
            .map(|token| Origin::ShareToken(token.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_recognises_supported_formats() {
        assert_eq!(
            MediaFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]),
            Sniffed::Supported(MediaFormat::Jpeg)
        );
        assert_eq!(
            MediaFormat::sniff(b"\x89PNG\r\n\x1a\n rest"),
            Sniffed::Supported(MediaFormat::Png)
        );
        assert_eq!(
            MediaFormat::sniff(b"\0\0\0\x18ftypisom\0\0\0\0"),
            Sniffed::Supported(MediaFormat::Mp4)
        );
        assert_eq!(
            MediaFormat::sniff(b"\0\0\0\x18ftypheic\0\0\0\0"),
            Sniffed::Supported(MediaFormat::Heic)
        );
    }

    #[test]
    fn sniff_decides_on_the_major_brand() {
        assert_eq!(
            MediaFormat::sniff(b"\0\0\0\x1cftypmp42\0\0\0\0isom"),
            Sniffed::Supported(MediaFormat::Mp4)
        );
        assert_eq!(
            MediaFormat::sniff(b"\0\0\0\x20ftypM4A \0\0\0\0M4A mp42"),
            Sniffed::Unsupported("audio/mp4")
        );
        assert_eq!(
            MediaFormat::sniff(b"\0\0\0\x14ftypqt  \0\0\0\0qt  "),
            Sniffed::Unsupported("video/quicktime")
        );
        assert_eq!(
            MediaFormat::sniff(b"\0\0\0\x1cftypavif\0\0\0\0avifmif1"),
            Sniffed::Unsupported("image/avif")
        );
        assert_eq!(MediaFormat::sniff(b"\0\0\0\x18ftypzzzz\0\0\0\0"), Sniffed::Unknown);
    }

    #[test]
    fn sniff_flags_gif_and_garbage() {
        assert_eq!(MediaFormat::sniff(b"GIF89a...."), Sniffed::Unsupported("image/gif"));
        assert_eq!(MediaFormat::sniff(b"hello world"), Sniffed::Unknown);
    }

    #[test]
    fn actor_origin_prefers_account() {
        let actor = Actor::account(AccountId::from_string("owner".into()));
        assert_eq!(
            actor.origin(),
            Some(Origin::Account(AccountId::from_string("owner".into())))
        );
        assert!(Actor::anonymous().origin().is_none());
    }
}
