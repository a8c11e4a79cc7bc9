use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use harvest_core::{AppError, TeamTier};

use crate::error::ApiError;

pub const TEAM_ID_HEADER: &str = "x-team-id";
pub const TEAM_TIER_HEADER: &str = "x-team-tier";
pub const PREVIEW_TOKEN_HEADER: &str = "x-preview-token";

/// Caller identity, read from request headers.
///
/// Authentication happens upstream; this only scopes requests to a team.
#[derive(Debug, Clone)]
pub struct TeamContext {
    pub team_id: String,
    pub tier: TeamTier,
    pub preview_token: Option<String>,
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for TeamContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let team_id = header(parts, TEAM_ID_HEADER).ok_or_else(|| {
            AppError::Validation(format!("Missing {TEAM_ID_HEADER} header"))
        })?;
        let tier = match header(parts, TEAM_TIER_HEADER) {
            Some(raw) => raw.parse::<TeamTier>().map_err(AppError::Validation)?,
            None => TeamTier::default(),
        };

        Ok(Self {
            team_id: team_id.to_string(),
            tier,
            preview_token: header(parts, PREVIEW_TOKEN_HEADER).map(str::to_string),
        })
    }
}
