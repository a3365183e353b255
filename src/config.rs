use log::warn;
use std::env;

const DEFAULT_AUTHORIZE_URL: &'static str = "https://api.intra.42.fr/oauth/authorize";
const DEFAULT_TOKEN_URL: &'static str = "https://api.intra.42.fr/oauth/token";
const DEFAULT_PROFILE_URL: &'static str = "https://api.intra.42.fr/v2/me";

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub session_key: [u8; 32],
}

impl Config {
    pub fn from_env() -> Config {
        let port = optional("PORT", "3000");
        let port = port
            .parse()
            .unwrap_or_else(|err| panic!("Invalid PORT value {:?}: {}", port, err));
        Config {
            port,
            database_path: optional("DATABASE_PATH", "movienight-db"),
            client_id: required("CLIENT_ID"),
            client_secret: required("CLIENT_SECRET"),
            callback_url: optional("CALLBACK_URL", "http://localhost:3000/auth/42/callback"),
            authorize_url: optional("AUTHORIZE_URL", DEFAULT_AUTHORIZE_URL),
            token_url: optional("TOKEN_URL", DEFAULT_TOKEN_URL),
            profile_url: optional("PROFILE_URL", DEFAULT_PROFILE_URL),
            session_key: session_key(),
        }
    }
}

fn required(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("Environment variable {} must be set", key))
}

fn optional(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn session_key() -> [u8; 32] {
    match env::var("SESSION_SECRET") {
        Ok(secret) => {
            if secret.len() < 32 {
                warn!("SESSION_SECRET is shorter than 32 bytes and will be zero-padded");
            }
            key_from_secret(&secret)
        }
        Err(_) => {
            warn!("SESSION_SECRET not set, using an all-zero development key");
            [0u8; 32]
        }
    }
}

// Cookie keys are exactly 32 bytes, longer secrets truncate.
fn key_from_secret(secret: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    let bytes = secret.as_bytes();
    let n = bytes.len().min(32);
    key[..n].copy_from_slice(&bytes[..n]);
    key
}
