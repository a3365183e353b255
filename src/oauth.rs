use crate::config::Config;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use url::Url;

#[derive(Debug)]
pub enum OAuthError {
    BadUrl(url::ParseError),
    Request(String),
    Endpoint(u16),
    Payload(String),
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OAuthError::BadUrl(err) => write!(f, "Invalid provider URL: {}", err),
            OAuthError::Request(err) => write!(f, "Provider unreachable: {}", err),
            OAuthError::Endpoint(status) => write!(f, "Provider returned status {}", status),
            OAuthError::Payload(err) => write!(f, "Malformed provider response: {}", err),
        }
    }
}

impl std::error::Error for OAuthError {}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct Profile {
    id: u64,
    login: Option<String>,
}

pub struct AuthenticatedUser {
    pub id: String,
    pub login: Option<String>,
}

pub fn authorize_url(config: &Config) -> Result<String, OAuthError> {
    let mut url = Url::parse(&config.authorize_url).map_err(OAuthError::BadUrl)?;
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.callback_url)
        .append_pair("response_type", "code");
    Ok(url.to_string())
}

// Blocking; handlers run this through web::block.
pub fn exchange_code(config: &Config, code: &str) -> Result<AuthenticatedUser, OAuthError> {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(10))
        .build();
    let response = agent
        .post(&config.token_url)
        .send_form(&[
            ("grant_type", "authorization_code"),
            ("client_id", &config.client_id),
            ("client_secret", &config.client_secret),
            ("code", code),
            ("redirect_uri", &config.callback_url),
        ])
        .map_err(status_or_transport)?;
    let token: TokenResponse = response
        .into_json()
        .map_err(|err| OAuthError::Payload(err.to_string()))?;

    let response = agent
        .get(&config.profile_url)
        .set("Authorization", &format!("Bearer {}", token.access_token))
        .call()
        .map_err(status_or_transport)?;
    let profile: Profile = response
        .into_json()
        .map_err(|err| OAuthError::Payload(err.to_string()))?;

    Ok(AuthenticatedUser {
        id: profile.id.to_string(),
        login: profile.login,
    })
}

fn status_or_transport(err: ureq::Error) -> OAuthError {
    match err {
        ureq::Error::Status(status, _) => OAuthError::Endpoint(status),
        ureq::Error::Transport(transport) => OAuthError::Request(transport.to_string()),
    }
}
