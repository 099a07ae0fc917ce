use std::net::SocketAddr;

use anyhow::Context;
use chrono::Utc;
use oauth2::{
    basic::BasicTokenResponse, AuthorizationCode, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope,
};
use tokio::{io, net};

use super::{server, Client};
use crate::uri;

impl Client {
    pub(super) async fn fetch_token_pkce(
        &self,
        scopes: Vec<Scope>,
    ) -> anyhow::Result<BasicTokenResponse> {
        log::info!("Starting PKCE flow for scopes {scopes:?}");

        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let listener = net::TcpListener::bind(&addr).await?;
        let redirect_addr = listener.local_addr()?;

        let redirect_url = RedirectUrl::new(format!("http://{redirect_addr}"))?;
        let redirect_url = std::borrow::Cow::Borrowed(&redirect_url);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_state) = self
            .inner
            .oauth2
            .authorize_url(CsrfToken::new_random)
            .set_redirect_uri(redirect_url.clone())
            .add_scopes(scopes)
            .set_pkce_challenge(pkce_challenge)
            .url();

        log::info!("Opening browser to {auth_url}.");
        println!("Authorize dmirror to access your Drive at:\n{auth_url}");
        tokio::task::spawn_blocking(move || webbrowser::open(auth_url.as_str()));

        log::trace!("starting local server on {redirect_addr}");
        let (socket, addr) = listener.accept().await?;

        log::trace!("incoming request from {addr:#?}");
        let (reader, writer) = io::split(socket);
        let reader = io::BufReader::new(reader);
        let writer = io::BufWriter::new(writer);
        let req = server::parse_request(reader).await?;
        let query = uri::QueryMap::parse(req.uri().query());

        if let Some(error) = query.get("error") {
            let resp = response(401, "Access was denied :-(")?;
            server::write_response(resp, writer).await?;
            anyhow::bail!("Authorization denied: {error}");
        }

        let code = query
            .get("code")
            .map(str::to_string)
            .map(AuthorizationCode::new)
            .with_context(|| {
                format!(
                    "'code' was not returned by {}",
                    self.inner.oauth2.auth_url().as_str()
                )
            })?;
        let state = query
            .get("state")
            .map(str::to_string)
            .map(CsrfToken::new)
            .with_context(|| {
                format!(
                    "'state' was not returned by {}",
                    self.inner.oauth2.auth_url().as_str()
                )
            })?;

        if state.secret() != csrf_state.secret() {
            log::error!("Failed PKCE challenge");
            let resp = response(401, "Could not verify the CSRF token :-(")?;
            server::write_response(resp, writer).await?;
            anyhow::bail!("Could not verify the CSRF token");
        }

        log::trace!("exchanging code for token");

        let token_response = self
            .inner
            .oauth2
            .exchange_code(code)
            .set_pkce_verifier(pkce_verifier)
            .set_redirect_uri(redirect_url)
            .request_async(|req| async { self.http(req).await })
            .await?;

        let resp = response(200, "All good, you can close this window ;-)")?;
        server::write_response(resp, writer).await?;

        Ok(token_response)
    }
}

fn response(status: u16, body: &'static str) -> anyhow::Result<http::Response<&'static str>> {
    Ok(http::Response::builder()
        .status(status)
        .header("Date", Utc::now().to_rfc2822())
        .header("Server", "dmirror")
        .header("Connection", "close")
        .body(body)?)
}
