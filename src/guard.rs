use crate::models::Session;
use serde::{Deserialize, Serialize};

pub const LOGIN_ROUTE: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthPhase {
    Unauthenticated,
    Authenticated,
}

impl AuthPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteOutcome {
    Render,
    RedirectToLogin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardDecision {
    pub outcome: RouteOutcome,
    pub redirect_to: Option<String>,
}

pub fn phase(session: Option<&Session>) -> AuthPhase {
    if session.is_some() {
        AuthPhase::Authenticated
    } else {
        AuthPhase::Unauthenticated
    }
}

/// Gate for protected views. The decision depends only on whether a session
/// is present; expiry is the session store's concern.
pub fn evaluate(session: Option<&Session>) -> GuardDecision {
    match session {
        Some(_) => GuardDecision {
            outcome: RouteOutcome::Render,
            redirect_to: None,
        },
        None => GuardDecision {
            outcome: RouteOutcome::RedirectToLogin,
            redirect_to: Some(LOGIN_ROUTE.to_string()),
        },
    }
}
