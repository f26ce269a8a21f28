//! axum integration
//!
//! Wrap protected routes with [`require_roles`]:
//!
//! ```rust,ignore
//! let guard = RouteGuard::new(gate, ["manage:events"]);
//! let router = Router::new()
//!     .route("/events", post(create_event))
//!     .layer(axum::middleware::from_fn_with_state(guard, require_roles));
//! ```
//!
//! Handlers read the outcome with `Extension<AuthContext>`. A request with an
//! `x-api-key` header is authorized by that key and its `Authorization`
//! header is ignored, unless the guard was built `without_api_keys`.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderName, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

use crate::apikey::INVALID_API_KEY_MESSAGE;
use crate::error::AuthzError;
use crate::gate::AuthorizationGate;

/// Header carrying an API key
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Gate plus the roles one group of routes requires
#[derive(Clone)]
pub struct RouteGuard {
    gate: Arc<AuthorizationGate>,
    required_roles: Arc<[String]>,
    api_keys_enabled: bool,
}

impl RouteGuard {
    pub fn new<I, S>(gate: Arc<AuthorizationGate>, required_roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            gate,
            required_roles: required_roles.into_iter().map(Into::into).collect(),
            api_keys_enabled: true,
        }
    }

    /// Only accept bearer tokens on these routes
    pub fn without_api_keys(mut self) -> Self {
        self.api_keys_enabled = false;
        self
    }

    /// Admit any verified caller
    pub fn authenticated(gate: Arc<AuthorizationGate>) -> Self {
        Self::new(gate, std::iter::empty::<String>())
    }

    pub fn required_roles(&self) -> &[String] {
        &self.required_roles
    }
}

/// Authorize the request and expose `AuthContext` to downstream handlers
pub async fn require_roles(
    State(guard): State<RouteGuard>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthzError> {
    let api_key = req.headers().get(API_KEY_HEADER).filter(|_| guard.api_keys_enabled);

    let context = match api_key {
        Some(value) => {
            let api_key = value
                .to_str()
                .map_err(|_| AuthzError::Unauthenticated(INVALID_API_KEY_MESSAGE.to_string()))?;
            guard.gate.authorize_api_key(api_key, guard.required_roles()).await?
        }
        None => {
            // A header that is not valid UTF-8 is handled as a missing one
            let header = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok());
            guard.gate.authorize(header, guard.required_roles()).await?
        }
    };
    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_body())).into_response()
    }
}
