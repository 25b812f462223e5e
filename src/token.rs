//! Share token minting and management.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Actor, ShareToken};
use crate::operation::{Operation, Target};
use crate::resolver::CapabilityResolver;
use crate::store::Store;
use crate::types::{AccountId, AlbumId, ShareTokenId};

/// Generates a URL-safe token string of `length` characters from the OS CSPRNG.
pub fn generate_token(length: usize) -> String {
    let mut bytes = vec![0u8; length.div_ceil(4) * 3];
    OsRng.fill_bytes(&mut bytes);
    let mut token = URL_SAFE_NO_PAD.encode(&bytes);
    token.truncate(length);
    token
}

/// Creates, looks up and revokes album share tokens.
pub struct ShareTokenService<S> {
    resolver: CapabilityResolver<S>,
    token_length: usize,
    attempts: usize,
}

impl<S> Clone for ShareTokenService<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            token_length: self.token_length,
            attempts: self.attempts,
        }
    }
}

impl<S: Store + 'static> ShareTokenService<S> {
    /// Creates a service minting tokens as sized by `config`.
    pub fn new(resolver: CapabilityResolver<S>, config: &Config) -> Self {
        Self {
            resolver,
            token_length: config.token_length,
            attempts: config.token_attempts.max(1),
        }
    }

    fn store(&self) -> &S {
        self.resolver.store()
    }

    /// Whether `issuer` currently holds an edit grant on `album`.
    async fn issuer_can_edit(&self, issuer: &AccountId, album: &AlbumId) -> bool {
        self.resolver
            .can(
                &Actor::account(issuer.clone()),
                Operation::EDIT_ALBUM,
                &Target::Album(album.clone()),
            )
            .await
    }

    /// Mints a token for `album`.
    ///
    /// Only the album owner may share, and only while holding an edit grant.
    /// A token never authorizes minting another token.
    pub async fn create(
        &self,
        actor: &Actor,
        album: &AlbumId,
        expires_at: DateTime<Utc>,
        can_edit: bool,
    ) -> Result<ShareToken> {
        let target = Target::Album(album.clone());
        let denied = || Error::Denied {
            operation: Operation::SHARE_ALBUM,
            target: target.clone(),
        };
        let issuer = actor.account.clone().ok_or_else(denied)?;
        if self.store().get_album(album).await?.is_none() {
            return Err(Error::not_found("album", album));
        }
        self.resolver
            .require(actor, Operation::SHARE_ALBUM, &target)
            .await?;
        if !self.issuer_can_edit(&issuer, album).await {
            return Err(denied());
        }
        let now = Utc::now();
        if expires_at <= now {
            return Err(Error::Validation(
                "share token expiry must be in the future".into(),
            ));
        }

        for attempt in 1..=self.attempts {
            let token = ShareToken {
                id: ShareTokenId::generate(),
                album: album.clone(),
                issuer: issuer.clone(),
                token: generate_token(self.token_length),
                can_edit,
                created_at: now,
                expires_at,
            };
            if self.store().insert_token(token.clone()).await? {
                tracing::info!(token = %token.id, %album, %issuer, can_edit, "share token created");
                return Ok(token);
            }
            tracing::warn!(attempt, %album, "share token collision, regenerating");
        }
        Err(Error::Store(
            format!("no unique share token after {} attempts", self.attempts).into(),
        ))
    }

    /// Point lookup by the secret string. Expired tokens are still returned.
    pub async fn get_by_token(&self, token: &str) -> Result<ShareToken> {
        self.store()
            .find_by_token(token)
            .await?
            .ok_or_else(|| Error::not_found("share token", "<redacted>"))
    }

    async fn existing(&self, id: &ShareTokenId) -> Result<ShareToken> {
        self.store()
            .get_token(id)
            .await?
            .ok_or_else(|| Error::not_found("share token", id))
    }

    /// Token metadata, visible to its issuer.
    pub async fn get(&self, actor: &Actor, id: &ShareTokenId) -> Result<ShareToken> {
        let token = self.existing(id).await?;
        self.resolver
            .require(actor, Operation::VIEW_SHARE_TOKEN, &Target::ShareToken(id.clone()))
            .await?;
        Ok(token)
    }

    /// Tokens of an album, visible to its owner.
    pub async fn list(&self, actor: &Actor, album: &AlbumId) -> Result<Vec<ShareToken>> {
        if self.store().get_album(album).await?.is_none() {
            return Err(Error::not_found("album", album));
        }
        self.resolver
            .require(actor, Operation::SHARE_ALBUM, &Target::Album(album.clone()))
            .await?;
        Ok(self.store().tokens_for_album(album).await?)
    }

    /// Changes whether the token allows editing.
    ///
    /// Turning edit on requires the issuer to still hold an edit grant.
    pub async fn set_can_edit(
        &self,
        actor: &Actor,
        id: &ShareTokenId,
        can_edit: bool,
    ) -> Result<ShareToken> {
        let mut token = self.existing(id).await?;
        self.resolver
            .require(actor, Operation::EDIT_SHARE_TOKEN, &Target::ShareToken(id.clone()))
            .await?;
        if can_edit {
            let issuer = Actor::account(token.issuer.clone());
            let album = Target::Album(token.album.clone());
            self.resolver
                .require(&issuer, Operation::SHARE_ALBUM, &album)
                .await?;
            if !self.issuer_can_edit(&token.issuer, &token.album).await {
                return Err(Error::Denied {
                    operation: Operation::SHARE_ALBUM,
                    target: album,
                });
            }
        }
        if !self.store().set_token_can_edit(id, can_edit).await? {
            return Err(Error::not_found("share token", id));
        }
        token.can_edit = can_edit;
        Ok(token)
    }

    /// Revokes a token. Only its issuer may do so.
    pub async fn delete(&self, actor: &Actor, id: &ShareTokenId) -> Result<bool> {
        self.existing(id).await?;
        self.resolver
            .require(actor, Operation::DELETE_SHARE_TOKEN, &Target::ShareToken(id.clone()))
            .await?;
        Ok(self.store().delete_token(id).await?)
    }

    /// Builds the request actor from an authenticated account and a raw token.
    ///
    /// Unknown tokens are ignored; expiry is left to the resolver.
    pub async fn resolve_actor(
        &self,
        account: Option<AccountId>,
        token: Option<&str>,
    ) -> Result<Actor> {
        let mut actor = Actor {
            account,
            token: None,
        };
        if let Some(raw) = token.map(str::trim).filter(|raw| !raw.is_empty()) {
            match self.store().find_by_token(raw).await? {
                Some(found) => actor.token = Some(found),
                None => tracing::debug!("unknown share token ignored"),
            }
        }
        Ok(actor)
    }
}
