use std::net::SocketAddr;
use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequest, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Form, Json, Router,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::config::{Config, PlanLimits};
use crate::context::ContextBuilder;
use crate::engine::{self, Disposition, LinkRule, RuleAction};
use crate::error::{LinkGateError, Result};
use crate::store::LinkStore;
use crate::validate::validate_rule_batch;
use crate::webhook::WebhookNotifier;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn LinkStore>,
    context_builder: Arc<ContextBuilder>,
    notifier: Arc<WebhookNotifier>,
    config: Arc<Config>,
}

/// The redirect gateway HTTP server.
pub struct RedirectServer {
    state: AppState,
}

impl RedirectServer {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn LinkStore>,
        context_builder: Arc<ContextBuilder>,
        notifier: Arc<WebhookNotifier>,
    ) -> Self {
        Self {
            state: AppState {
                store,
                context_builder,
                notifier,
                config,
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(health))
            .route("/blocked", get(blocked_page))
            .route("/password/:code", get(password_page))
            .route("/password/:code", post(verify_password))
            .route("/api/links/:code/rules", get(get_rules))
            .route("/api/links/:code/rules", put(replace_rules))
            .layer(CorsLayer::permissive())
            .route("/:code", get(resolve_visit))
            .with_state(self.state.clone())
    }

    pub async fn start(&self) -> Result<()> {
        let addr = format!(
            "{}:{}",
            self.state.config.server.host, self.state.config.server.port
        );
        let listener = TcpListener::bind(&addr).await?;
        info!("Redirect gateway listening on {}", addr);
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// The single per-visit entry point: build the context, run the rule
/// engine, and translate the disposition into an HTTP redirect.
async fn resolve_visit(
    State(state): State<AppState>,
    Path(code): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response> {
    let link = state
        .store
        .get_link(&code)
        .await?
        .ok_or_else(|| LinkGateError::NotFound(format!("unknown short link '{}'", code)))?;

    let access_count = state.store.record_access(&code).await?;
    let ctx = state.context_builder.build(&headers, peer, access_count);

    debug!(
        short_code = %code,
        country = %ctx.country,
        device = ?ctx.device,
        ip = %ctx.ip,
        is_bot = ctx.is_bot,
        is_vpn = ctx.is_vpn,
        access_count,
        "resolving visit"
    );

    // Storage trouble degrades to the raw redirect rather than failing
    // the visit; the visitor never sees a rule-layer error.
    let rules = match state.store.get_rules_for_link(&code).await {
        Ok(rules) => rules,
        Err(e) => {
            warn!(short_code = %code, error = %e, "rule fetch failed, using default redirect");
            Vec::new()
        }
    };

    let disposition = engine::resolve(&rules, &ctx, &link);
    counter!("linkgate_visits_total").increment(1);

    Ok(match disposition {
        Disposition::Redirect { url } => {
            counter!("linkgate_dispositions", "kind" => "redirect").increment(1);
            found(&url)
        }
        Disposition::Blocked { reason, message } => {
            counter!("linkgate_dispositions", "kind" => "blocked").increment(1);
            let mut params = vec![("message", message)];
            if let Some(reason) = reason {
                params.push(("reason", reason));
            }
            let query = serde_urlencoded::to_string(&params)
                .map_err(|e| LinkGateError::Internal(e.to_string()))?;
            found(&format!("/blocked?{}", query))
        }
        Disposition::PasswordRequired { hint } => {
            counter!("linkgate_dispositions", "kind" => "password_required").increment(1);
            let target = match hint {
                Some(hint) => {
                    let query = serde_urlencoded::to_string(&[("hint", hint)])
                        .map_err(|e| LinkGateError::Internal(e.to_string()))?;
                    format!("/password/{}?{}", code, query)
                }
                None => format!("/password/{}", code),
            };
            found(&target)
        }
        Disposition::Notified {
            webhook_url,
            message,
            url,
        } => {
            counter!("linkgate_dispositions", "kind" => "notified").increment(1);
            state.notifier.dispatch(webhook_url, message, &code);
            found(&url)
        }
    })
}

/// Plain 302 redirect.
fn found(url: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
}

#[derive(Debug, Deserialize)]
struct BlockedParams {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

async fn blocked_page(Query(params): Query<BlockedParams>) -> Html<String> {
    let message = params
        .message
        .unwrap_or_else(|| "Access to this link is not allowed".to_string());
    let reason = params
        .reason
        .map(|r| format!("<p class=\"reason\">{}</p>", escape_html(&r)))
        .unwrap_or_default();
    Html(format!(
        "<!doctype html><html><body><h1>Link unavailable</h1><p>{}</p>{}</body></html>",
        escape_html(&message),
        reason
    ))
}

#[derive(Debug, Deserialize)]
struct PasswordPageParams {
    #[serde(default)]
    hint: Option<String>,
}

async fn password_page(
    Path(code): Path<String>,
    Query(params): Query<PasswordPageParams>,
) -> Html<String> {
    let hint = params
        .hint
        .map(|h| format!("<p class=\"hint\">Hint: {}</p>", escape_html(&h)))
        .unwrap_or_default();
    Html(format!(
        "<!doctype html><html><body><h1>Password required</h1>{}<form method=\"post\" action=\"/password/{}\"><input type=\"password\" name=\"password\"><button>Unlock</button></form></body></html>",
        hint,
        escape_html(&code)
    ))
}

#[derive(Debug, Deserialize)]
struct PasswordAttempt {
    password: String,
}

/// Accepts either a JSON body or an HTML form body, so API clients and
/// the password page's own form both reach verification.
struct JsonOrForm<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if content_type.starts_with("application/json") {
            let Json(payload) = Json::<T>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            return Ok(Self(payload));
        }

        let Form(payload) = Form::<T>::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;
        Ok(Self(payload))
    }
}

#[derive(Debug, Serialize)]
struct PasswordVerdict {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    long_url: Option<String>,
}

/// Checks a submitted password against the hash that gates the link and
/// hands back the long URL on success. The rule engine itself never
/// verifies passwords.
async fn verify_password(
    State(state): State<AppState>,
    Path(code): Path<String>,
    JsonOrForm(attempt): JsonOrForm<PasswordAttempt>,
) -> Result<Json<PasswordVerdict>> {
    counter!("linkgate_password_attempts").increment(1);

    let link = state
        .store
        .get_link(&code)
        .await?
        .ok_or_else(|| LinkGateError::NotFound(format!("unknown short link '{}'", code)))?;

    let hash = match gate_hash(&state, &code, link.password_hash.clone()).await {
        Some(hash) => hash,
        None => {
            return Err(LinkGateError::BadRequest(format!(
                "link '{}' is not password protected",
                code
            )))
        }
    };

    let parsed = PasswordHash::new(&hash)
        .map_err(|e| LinkGateError::Internal(format!("stored password hash invalid: {}", e)))?;
    let success = Argon2::default()
        .verify_password(attempt.password.as_bytes(), &parsed)
        .is_ok();

    Ok(Json(PasswordVerdict {
        success,
        long_url: success.then(|| link.long_url),
    }))
}

/// The hash protecting a link: the link-level hash if set, otherwise
/// the first password_gate rule's hash.
async fn gate_hash(state: &AppState, code: &str, link_hash: Option<String>) -> Option<String> {
    if link_hash.is_some() {
        return link_hash;
    }
    let rules = state.store.get_rules_for_link(code).await.ok()?;
    rules.iter().find_map(|rule| match &rule.action {
        RuleAction::PasswordGate { password_hash, .. } => Some(password_hash.clone()),
        _ => None,
    })
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

async fn get_rules(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse> {
    let rules = state.store.get_rules_for_link(&code).await?;
    Ok(Json(ApiResponse::success(rules)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Plan {
    Guest,
    Registered,
}

#[derive(Debug, Deserialize)]
struct ReplaceRulesRequest {
    #[serde(default = "default_plan")]
    plan: Plan,
    rules: Vec<LinkRule>,
}

fn default_plan() -> Plan {
    Plan::Registered
}

async fn replace_rules(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<ReplaceRulesRequest>,
) -> Result<impl IntoResponse> {
    let limits: PlanLimits = match request.plan {
        Plan::Guest => state.config.plans.guest,
        Plan::Registered => state.config.plans.registered,
    };

    validate_rule_batch(&request.rules, &limits)?;
    state.store.replace_rules(&code, request.rules).await?;

    info!(short_code = %code, "rule set replaced");
    Ok(Json(ApiResponse::success(serde_json::json!({
        "short_code": code
    }))))
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkSeed;
    use crate::store::MemoryLinkStore;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    // Well-formed PHC string; the gate only needs it to parse, a wrong
    // password fails verification either way.
    const GATE_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$MHh5emFiY2RlZmdoaWprbA$S0fj8D+3jmRaUYS8M5CxnQ";

    fn test_config() -> Config {
        serde_yaml::from_str(
            r#"
server: {host: "127.0.0.1", port: 8080}
logging: {level: "info", format: "json"}
metrics: {enabled: false, port: 9090, path: "/metrics"}
context: {}
webhook: {connect_timeout: "1s", request_timeout: "2s"}
plans:
  guest: {max_rules: 1, max_conditions_per_rule: 1}
  registered: {max_rules: 5, max_conditions_per_rule: 3}
links: []
"#,
        )
        .unwrap()
    }

    fn router_with_gated_link() -> Router {
        let config = Arc::new(test_config());
        let store = MemoryLinkStore::new();
        store.insert_link(
            &LinkSeed {
                short_code: "gated".to_string(),
                long_url: "https://example.com/secret".to_string(),
                password_hash: Some(GATE_HASH.to_string()),
                rules: vec![],
            },
            "https://lg.example",
        );

        let context_builder = Arc::new(ContextBuilder::new(&config.context).unwrap());
        let notifier = Arc::new(WebhookNotifier::new(&config.webhook).unwrap());
        RedirectServer::new(config, Arc::new(store), context_builder, notifier).router()
    }

    async fn verdict_of(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn password_form_submission_reaches_verification() {
        let app = router_with_gated_link();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/password/gated")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("password=hunter2"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        // The form body must produce a verdict, not an unsupported
        // media type rejection.
        assert_eq!(response.status(), StatusCode::OK);
        let verdict = verdict_of(response).await;
        assert_eq!(verdict["success"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn password_json_submission_still_works() {
        let app = router_with_gated_link();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/password/gated")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"password":"hunter2"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let verdict = verdict_of(response).await;
        assert_eq!(verdict["success"], serde_json::json!(false));
    }
}
