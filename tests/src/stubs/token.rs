use dmirror_sync::{
    oauth2::{AccessToken, GetToken, Scope},
    PersistCache,
};

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const TOKEN: &str = "ya29.stub-token";

/// Hands out the same access token for every request
#[derive(Clone)]
pub struct Token(AccessToken);

impl Default for Token {
    fn default() -> Self {
        Token(AccessToken::new(TOKEN.to_string()))
    }
}

impl GetToken for Token {
    async fn get_token(&self, scopes: Vec<Scope>) -> anyhow::Result<AccessToken> {
        assert_eq!(scopes, &[Scope::new(DRIVE_SCOPE.to_string())]);
        Ok(self.0.clone())
    }
}

impl PersistCache for Token {}

/// Fails every request, as an expired refresh token would
#[derive(Clone, Default)]
pub struct Revoked;

impl GetToken for Revoked {
    async fn get_token(&self, _scopes: Vec<Scope>) -> anyhow::Result<AccessToken> {
        anyhow::bail!("refresh token was revoked")
    }
}

impl PersistCache for Revoked {}
