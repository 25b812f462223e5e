use crate::error::{Error, Result};
use crate::types::{AlbumId, ArchiveJobId, MediaId, ShareTokenId};
use std::fmt;
use std::str::FromStr;

/// Verb half of an [`Operation`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Action {
    View,
    Edit,
    Delete,
    Create,
    ManageGrants,
    Share,
    Consume,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::View,
        Action::Edit,
        Action::Delete,
        Action::Create,
        Action::ManageGrants,
        Action::Share,
        Action::Consume,
    ];

    /// Returns the canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Create => "create",
            Action::ManageGrants => "manage_grants",
            Action::Share => "share",
            Action::Consume => "consume",
        }
    }
}

/// Kind of resource an operation applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ResourceKind {
    Album,
    Media,
    Archive,
    ShareToken,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Album,
        ResourceKind::Media,
        ResourceKind::Archive,
        ResourceKind::ShareToken,
    ];

    /// Returns the canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Album => "album",
            ResourceKind::Media => "media",
            ResourceKind::Archive => "archive",
            ResourceKind::ShareToken => "share_token",
        }
    }
}

/// Operation (`resource:action`) checked by the resolver.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Operation {
    pub action: Action,
    pub resource: ResourceKind,
}

impl Operation {
    pub const VIEW_ALBUM: Operation = Operation::new(Action::View, ResourceKind::Album);
    pub const EDIT_ALBUM: Operation = Operation::new(Action::Edit, ResourceKind::Album);
    pub const CREATE_ALBUM: Operation = Operation::new(Action::Create, ResourceKind::Album);
    pub const DELETE_ALBUM: Operation = Operation::new(Action::Delete, ResourceKind::Album);
    pub const MANAGE_ALBUM_GRANTS: Operation =
        Operation::new(Action::ManageGrants, ResourceKind::Album);
    pub const SHARE_ALBUM: Operation = Operation::new(Action::Share, ResourceKind::Album);
    pub const VIEW_MEDIA: Operation = Operation::new(Action::View, ResourceKind::Media);
    pub const EDIT_MEDIA: Operation = Operation::new(Action::Edit, ResourceKind::Media);
    pub const CREATE_MEDIA: Operation = Operation::new(Action::Create, ResourceKind::Media);
    pub const DELETE_MEDIA: Operation = Operation::new(Action::Delete, ResourceKind::Media);
    pub const MANAGE_MEDIA_GRANTS: Operation =
        Operation::new(Action::ManageGrants, ResourceKind::Media);
    pub const VIEW_ARCHIVE: Operation = Operation::new(Action::View, ResourceKind::Archive);
    pub const CONSUME_ARCHIVE: Operation = Operation::new(Action::Consume, ResourceKind::Archive);
    pub const VIEW_SHARE_TOKEN: Operation = Operation::new(Action::View, ResourceKind::ShareToken);
    pub const EDIT_SHARE_TOKEN: Operation = Operation::new(Action::Edit, ResourceKind::ShareToken);
    pub const DELETE_SHARE_TOKEN: Operation =
        Operation::new(Action::Delete, ResourceKind::ShareToken);

    pub const fn new(action: Action, resource: ResourceKind) -> Self {
        Self { action, resource }
    }

    /// Parses `resource:action`, trimming whitespace and ignoring case.
    pub fn parse(value: impl AsRef<str>) -> Result<Self> {
        let normalized = value.as_ref().trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(Error::InvalidOperation(
                "operation must not be empty".to_string(),
            ));
        }
        let (resource, action) = normalized.split_once(':').ok_or_else(|| {
            Error::InvalidOperation("operation must be in resource:action format".to_string())
        })?;
        if resource.is_empty() || action.is_empty() {
            return Err(Error::InvalidOperation(
                "operation must not have empty segments".to_string(),
            ));
        }
        let resource = ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == resource)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown resource `{resource}`")))?;
        let action = Action::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == action)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown action `{action}`")))?;
        Ok(Self::new(action, resource))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource.as_str(), self.action.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for Operation {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

/// Concrete resource an operation is evaluated against.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Target {
    Album(AlbumId),
    Media(MediaId),
    ArchiveJob(ArchiveJobId),
    ShareToken(ShareTokenId),
    /// Creation targets that have no instance yet.
    Collection(ResourceKind),
}

impl Target {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Target::Album(_) => ResourceKind::Album,
            Target::Media(_) => ResourceKind::Media,
            Target::ArchiveJob(_) => ResourceKind::Archive,
            Target::ShareToken(_) => ResourceKind::ShareToken,
            Target::Collection(kind) => *kind,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Album(id) => write!(f, "album/{id}"),
            Target::Media(id) => write!(f, "media/{id}"),
            Target::ArchiveJob(id) => write!(f, "archive/{id}"),
            Target::ShareToken(id) => write!(f, "share_token/{id}"),
            Target::Collection(kind) => write!(f, "{}/*", kind.as_str()),
        }
    }
}

impl From<AlbumId> for Target {
    fn from(value: AlbumId) -> Self {
        Target::Album(value)
    }
}

impl From<MediaId> for Target {
    fn from(value: MediaId) -> Self {
        Target::Media(value)
    }
}

impl From<ArchiveJobId> for Target {
    fn from(value: ArchiveJobId) -> Self {
        Target::ArchiveJob(value)
    }
}

impl From<ShareTokenId> for Target {
    fn from(value: ShareTokenId) -> Self {
        Target::ShareToken(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_should_trim_and_lowercase() {
        let operation = Operation::try_from(" Album:View ").unwrap();
        assert_eq!(operation, Operation::VIEW_ALBUM);
        assert_eq!(operation.to_string(), "album:view");
    }

    #[test]
    fn parse_should_accept_multi_word_segments() {
        let operation: Operation = "share_token:delete".parse().unwrap();
        assert_eq!(operation, Operation::DELETE_SHARE_TOKEN);
        let operation: Operation = "album:manage_grants".parse().unwrap();
        assert_eq!(operation, Operation::MANAGE_ALBUM_GRANTS);
    }

    #[test]
    fn parse_should_reject_empty_segments() {
        let result = Operation::try_from(":view");
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn parse_should_reject_unknown_action() {
        let err = Operation::try_from("album:*").unwrap_err();
        assert!(err.to_string().contains("unknown action"));
    }

    #[test]
    fn collection_target_reports_its_kind() {
        let target = Target::Collection(ResourceKind::Media);
        assert_eq!(target.kind(), ResourceKind::Media);
        assert_eq!(target.to_string(), "media/*");
    }
}
