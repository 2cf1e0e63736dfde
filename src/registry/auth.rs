//! Registry authentication
//!
//! Implements the token dance of the distribution protocol: a 401 carries a
//! `WWW-Authenticate` challenge, `Bearer` challenges are answered by
//! fetching a token from the named realm (with basic auth when credentials
//! are configured), `Basic` challenges are answered directly.

use crate::config::RegistryCredentials;
use serde::Deserialize;
use std::collections::HashMap;

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

/// Parses a `WWW-Authenticate` header value.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    if header.to_ascii_lowercase().starts_with("basic") {
        return Some(Challenge::Basic);
    }

    let params = header.strip_prefix("Bearer ")?;
    let mut fields: HashMap<String, String> = HashMap::new();
    for part in split_challenge_params(params) {
        if let Some((key, value)) = part.split_once('=') {
            fields.insert(
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }

    Some(Challenge::Bearer {
        realm: fields.remove("realm")?,
        service: fields.remove("service"),
        scope: fields.remove("scope"),
    })
}

// Challenge parameters are comma separated, but quoted values may contain
// commas (scope lists do).
fn split_challenge_params(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Fetches a bearer token for the challenge.
pub async fn fetch_token(
    http: &reqwest::Client,
    challenge: &Challenge,
    credentials: Option<&RegistryCredentials>,
) -> Result<Option<String>, reqwest::Error> {
    let (realm, service, scope) = match challenge {
        Challenge::Bearer {
            realm,
            service,
            scope,
        } => (realm, service, scope),
        Challenge::Basic => return Ok(None),
    };

    let mut request = http.get(realm);
    let mut query: Vec<(&str, &str)> = Vec::new();
    if let Some(service) = service {
        query.push(("service", service));
    }
    if let Some(scope) = scope {
        query.push(("scope", scope));
    }
    request = request.query(&query);

    if let Some(credentials) = credentials {
        request = request.basic_auth(&credentials.username, Some(&credentials.password));
    }

    let response = request.send().await?.error_for_status()?;
    let body: TokenResponse = response.json().await?;
    Ok(body.token.or(body.access_token))
}
