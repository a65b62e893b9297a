use std::{path::Path, str::FromStr, sync::Arc};

use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::{net::TcpListener, signal};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::{Config, ConfigError, FormPolicy};
use crate::ledger::{CashbackPreview, Ledger, LedgerError, LedgerSnapshot, User, UserId};

pub mod views;

pub struct AppState {
    pub ledger: Ledger,
    pub form_policy: FormPolicy,
}

impl AppState {
    pub fn new(ledger: Ledger, form_policy: FormPolicy) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            form_policy,
        })
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("User not found")]
    UserNotFound(#[from] LedgerError),

    #[error("Malformed payload: {field}")]
    MalformedPayload { field: &'static str },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::UserNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Deserialize)]
pub struct AddUserForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
pub struct AddTransactionForm {
    #[serde(default, rename = "userID")]
    user_id: String,
    #[serde(default)]
    amount: String,
}

#[derive(Deserialize)]
pub struct CashbackForm {
    #[serde(default, rename = "userID")]
    user_id: String,
}

fn parse_field<T>(policy: FormPolicy, field: &'static str, raw: &str) -> Result<T, AppError>
where
    T: FromStr + Default,
{
    // lenient mode keeps padded input unparseable, like a bare integer parse
    let candidate = match policy {
        FormPolicy::Strict => raw.trim(),
        FormPolicy::Lenient => raw,
    };
    match candidate.parse::<T>() {
        Ok(value) => Ok(value),
        Err(_) => match policy {
            FormPolicy::Strict => Err(AppError::MalformedPayload { field }),
            FormPolicy::Lenient => {
                warn!(field, raw, "unparseable form field, using zero");
                Ok(T::default())
            }
        },
    }
}

fn parse_amount(policy: FormPolicy, raw: &str) -> Result<f64, AppError> {
    let amount: f64 = parse_field(policy, "amount", raw)?;
    if policy == FormPolicy::Strict && !amount.is_finite() {
        return Err(AppError::MalformedPayload { field: "amount" });
    }
    Ok(amount)
}

pub fn router(state: Arc<AppState>, static_dir: impl AsRef<Path>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/addUser", post(add_user_handler))
        .route("/addTransaction", post(add_transaction_handler))
        .route("/cashback", get(cashback_handler).post(cashback_handler))
        .route("/api/ledger", get(ledger_handler))
        .route("/api/users/:id", get(user_handler))
        .route("/api/users/:id/cashback", get(preview_handler))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    let snapshot = state.ledger.snapshot();
    Html(views::index(&snapshot.users, snapshot.transaction_count))
}

async fn add_user_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<AddUserForm>,
) -> Redirect {
    let user = state.ledger.add_user(form.username, form.email);
    info!(user_id = user.id, "added user");
    Redirect::to("/")
}

async fn add_transaction_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<AddTransactionForm>,
) -> Result<Redirect, AppError> {
    let user_id: UserId = parse_field(state.form_policy, "userID", &form.user_id)?;
    let amount = parse_amount(state.form_policy, &form.amount)?;
    state.ledger.add_transaction(user_id, amount);
    info!(user_id, amount, "added transaction");
    Ok(Redirect::to("/"))
}

async fn cashback_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<CashbackForm>,
) -> Result<Html<String>, AppError> {
    let user_id: UserId = parse_field(state.form_policy, "userID", &form.user_id)?;
    let outcome = state.ledger.compute_cashback(user_id)?;
    info!(user_id, cashback = outcome.cashback, "computed cashback");
    Ok(Html(views::cashback(&outcome)))
}

async fn ledger_handler(State(state): State<Arc<AppState>>) -> Json<LedgerSnapshot> {
    Json(state.ledger.snapshot())
}

async fn user_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(user_id): UrlPath<UserId>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.ledger.user(user_id)?))
}

async fn preview_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(user_id): UrlPath<UserId>,
) -> Result<Json<CashbackPreview>, AppError> {
    Ok(Json(state.ledger.preview_cashback(user_id)?))
}

pub async fn run(config: Config) -> Result<(), ServerError> {
    let rule = config.cashback_rule()?;
    info!(
        threshold = rule.threshold,
        rate = rule.rate,
        mode = ?config.cashback_mode,
        policy = ?config.form_policy,
        "Initializing ledger..."
    );
    let state = AppState::new(Ledger::new(rule, config.cashback_mode), config.form_policy);
    let app = router(state, &config.static_dir);

    let address = config.address();
    info!("Binding to {address}");
    let listener = TcpListener::bind(address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(err) => {
                warn!(%err, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                warn!(%err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request},
    };
    use tower::ServiceExt;

    use crate::cashback::{CashbackMode, CashbackRule};

    fn app(mode: CashbackMode, policy: FormPolicy) -> (Arc<AppState>, Router) {
        let state = AppState::new(Ledger::new(CashbackRule::default(), mode), policy);
        let app = router(state.clone(), "static");
        (state, app)
    }

    fn form(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn add_user_redirects_home() {
        let (state, app) = app(CashbackMode::Once, FormPolicy::Strict);
        let response = app
            .oneshot(form("/addUser", "username=alice&email=a%40x.com"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
        let user = state.ledger.user(1).unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "a@x.com");
    }

    #[tokio::test]
    async fn missing_user_fields_become_empty() {
        let (state, app) = app(CashbackMode::Once, FormPolicy::Strict);
        let response = app.oneshot(form("/addUser", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(state.ledger.user(1).unwrap().username, "");
    }

    #[tokio::test]
    async fn full_cashback_flow_over_forms() {
        let (state, app) = app(CashbackMode::Once, FormPolicy::Strict);
        app.clone()
            .oneshot(form("/addUser", "username=alice&email=a%40x.com"))
            .await
            .unwrap();
        let response = app
            .clone()
            .oneshot(form("/addTransaction", "userID=1&amount=150"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = app.oneshot(form("/cashback", "userID=1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("<dd>7.50</dd>"));
        assert!(html.contains("<dd>157.50</dd>"));
        assert_eq!(state.ledger.user(1).unwrap().balance, 157.5);
    }

    #[tokio::test]
    async fn cashback_accepts_query_string() {
        let (state, app) = app(CashbackMode::Compound, FormPolicy::Strict);
        state.ledger.add_user("bob", "b@x.com");
        state.ledger.add_transaction(1, 200.0);

        let response = app.clone().oneshot(get_request("/cashback?userID=1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(get_request("/cashback?userID=1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.ledger.user(1).unwrap().balance, 220.0);
    }

    #[tokio::test]
    async fn unknown_user_cashback_is_404() {
        let (state, app) = app(CashbackMode::Once, FormPolicy::Strict);
        let before = state.ledger.snapshot();
        let response = app.oneshot(form("/cashback", "userID=999")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "User not found");
        assert_eq!(state.ledger.snapshot(), before);
    }

    #[tokio::test]
    async fn strict_policy_rejects_malformed_numbers() {
        let (state, app) = app(CashbackMode::Once, FormPolicy::Strict);
        let response = app
            .clone()
            .oneshot(form("/addTransaction", "userID=abc&amount=10"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Malformed payload: userID");

        let response = app
            .oneshot(form("/addTransaction", "userID=1&amount=inf"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.ledger.snapshot().transactions.is_empty());
    }

    #[tokio::test]
    async fn lenient_policy_coerces_to_zero() {
        let (state, app) = app(CashbackMode::Once, FormPolicy::Lenient);
        let response = app
            .clone()
            .oneshot(form("/addTransaction", "userID=abc&amount=xyz"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let log = state.ledger.snapshot().transactions;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].user_id, 0);
        assert_eq!(log[0].amount, 0.0);

        // user 0 never exists
        let response = app.oneshot(form("/cashback", "userID=")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn index_lists_users() {
        let (state, app) = app(CashbackMode::Once, FormPolicy::Strict);
        state.ledger.add_user("alice", "a@x.com");
        state.ledger.add_transaction(1, 42.0);

        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("<td>alice</td>"));
        assert!(html.contains("<td>42.00</td>"));
        assert!(html.contains("1 transaction(s) recorded."));
    }

    #[tokio::test]
    async fn json_api_exposes_snapshot_and_preview() {
        let (state, app) = app(CashbackMode::Once, FormPolicy::Strict);
        state.ledger.add_user("alice", "a@x.com");
        state.ledger.add_transaction(1, 300.0);

        let response = app.clone().oneshot(get_request("/api/users/1/cashback")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let preview: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(preview["cashback"], 15.0);
        assert_eq!(preview["qualifying"], 1);

        let response = app.clone().oneshot(get_request("/api/users/7/cashback")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(get_request("/api/ledger")).await.unwrap();
        let snapshot: LedgerSnapshot = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(snapshot.user_count, 1);
        assert_eq!(snapshot.transaction_count, 1);
        assert_eq!(snapshot, state.ledger.snapshot());
    }

    #[tokio::test]
    async fn user_lookup_returns_json_or_404() {
        let (state, app) = app(CashbackMode::Once, FormPolicy::Strict);
        state.ledger.add_user("alice", "a@x.com");
        state.ledger.add_transaction(1, 80.0);

        let response = app.clone().oneshot(get_request("/api/users/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let user: User = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(user, state.ledger.user(1).unwrap());
        assert_eq!(user.balance, 80.0);

        let response = app.oneshot(get_request("/api/users/2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "User not found");
    }

    #[tokio::test]
    async fn static_files_are_served_or_404() {
        let state = AppState::new(Ledger::default(), FormPolicy::Strict);
        let app = router(state, concat!(env!("CARGO_MANIFEST_DIR"), "/static"));

        let response = app.clone().oneshot(get_request("/static/style.css")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("font-family"));

        let response = app.oneshot(get_request("/static/missing.css")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lenient_policy_does_not_trim_padded_ids() {
        let (state, app) = app(CashbackMode::Once, FormPolicy::Lenient);
        state.ledger.add_user("alice", "a@x.com");

        let response = app
            .oneshot(form("/addTransaction", "userID=+1+&amount=150"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(state.ledger.user(1).unwrap().balance, 0.0);
        let log = state.ledger.snapshot().transactions;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].user_id, 0);
    }

    #[test]
    fn parse_field_trims_whitespace() {
        let id: UserId = parse_field(FormPolicy::Strict, "userID", " 12 ").unwrap();
        assert_eq!(id, 12);
        assert!(matches!(
            parse_field::<UserId>(FormPolicy::Strict, "userID", "1.5"),
            Err(AppError::MalformedPayload { field: "userID" })
        ));
        assert_eq!(parse_amount(FormPolicy::Lenient, "").unwrap(), 0.0);
        assert_eq!(parse_field::<UserId>(FormPolicy::Lenient, "userID", " 12 ").unwrap(), 0);
    }
}
