//! HTTP route table.
//!
//! Public routes: health, signup, the two logins, password resets and the
//! Dwolla webhook.
//! Everything else passes the session middleware first and receives an
//! [`AuthContext`](crate::middleware::auth::AuthContext).

use axum::{
    Json, Router,
    http::StatusCode,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, middleware::auth::auth_middleware, state::AppState};

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/v1/account/signup", post(handlers::account::signup))
        .route("/v1/account/login", post(handlers::account::login))
        .route("/v1/account/admin-login", post(handlers::account::admin_login))
        .route(
            "/v1/account/forgot-password",
            post(handlers::account::forgot_password),
        )
        .route(
            "/v1/account/reset-password",
            post(handlers::account::reset_password),
        )
        .route(
            "/v1/transaction/webhook",
            post(handlers::transaction::dwolla_webhook),
        );

    let authenticated_routes = Router::new()
        // Account
        .route("/v1/account/logout", post(handlers::account::logout))
        .route("/v1/account/me", get(handlers::account::me))
        .route(
            "/v1/account/change-password",
            post(handlers::account::change_password),
        )
        // Admins
        .route("/v1/admin/create", post(handlers::admin::create_admin))
        .route("/v1/admin/list", get(handlers::admin::list_admins))
        .route("/v1/admin/{id}", delete(handlers::admin::delete_admin))
        // Users
        .route("/v1/user/list", get(handlers::user::list_users))
        .route(
            "/v1/user/{id}",
            get(handlers::user::get_user)
                .patch(handlers::user::update_user)
                .delete(handlers::user::delete_user),
        )
        // Organizations
        .route(
            "/v1/organization/create",
            post(handlers::organization::create_organization),
        )
        .route(
            "/v1/organization/list",
            get(handlers::organization::list_organizations),
        )
        .route(
            "/v1/organization/{id}",
            get(handlers::organization::get_organization)
                .patch(handlers::organization::update_organization)
                .delete(handlers::organization::delete_organization),
        )
        // Employers
        .route("/v1/employer/create", post(handlers::employer::create_employer))
        .route("/v1/employer/list", get(handlers::employer::list_employers))
        .route(
            "/v1/employer/connect-finch",
            post(handlers::employer::connect_finch),
        )
        .route(
            "/v1/employer/{id}",
            get(handlers::employer::get_employer)
                .patch(handlers::employer::update_employer)
                .delete(handlers::employer::delete_employer),
        )
        // Credit wallets
        .route(
            "/v1/credit-wallet/list",
            get(handlers::credit_wallet::list_wallets),
        )
        .route(
            "/v1/credit-wallet/summary",
            get(handlers::credit_wallet::wallet_summary),
        )
        .route(
            "/v1/credit-wallet/adjust",
            post(handlers::credit_wallet::adjust_wallet),
        )
        .route(
            "/v1/credit-wallet/{id}/logs",
            get(handlers::credit_wallet::wallet_logs),
        )
        // Plaid accounts
        .route(
            "/v1/plaid-account/link-token",
            post(handlers::plaid_account::create_link_token),
        )
        .route(
            "/v1/plaid-account/exchange",
            post(handlers::plaid_account::exchange_public_token),
        )
        .route(
            "/v1/plaid-account/list",
            get(handlers::plaid_account::list_accounts),
        )
        .route(
            "/v1/plaid-account/{id}/refresh",
            post(handlers::plaid_account::refresh_balance),
        )
        .route(
            "/v1/plaid-account/{id}/attach",
            post(handlers::plaid_account::attach_account),
        )
        .route(
            "/v1/plaid-account/{id}",
            delete(handlers::plaid_account::delete_account),
        )
        // Transactions
        .route(
            "/v1/transaction/create",
            post(handlers::transaction::create_transaction),
        )
        .route(
            "/v1/transaction/list",
            get(handlers::transaction::list_transactions),
        )
        .route(
            "/v1/transaction/sync",
            post(handlers::transaction::sync_transactions),
        )
        .route(
            "/v1/transaction/{id}",
            get(handlers::transaction::get_transaction),
        )
        // Programs
        .route("/v1/program/create", post(handlers::program::create_program))
        .route("/v1/program/list", get(handlers::program::list_programs))
        .route("/v1/program/distribute", post(handlers::program::distribute))
        .route(
            "/v1/program/{id}",
            get(handlers::program::get_program).patch(handlers::program::update_program),
        )
        // Employee sync
        .route(
            "/v1/employee-sync/run",
            post(handlers::employee_sync::run_sync),
        )
        .route(
            "/v1/employee-sync/list",
            get(handlers::employee_sync::list_syncs),
        )
        .route(
            "/v1/employee-sync/{id}",
            get(handlers::employee_sync::get_sync),
        )
        // Partners
        .route("/v1/partner/create", post(handlers::partner::create_partner))
        .route("/v1/partner/list", get(handlers::partner::list_partners))
        .route(
            "/v1/partner/{id}",
            get(handlers::partner::get_partner)
                .patch(handlers::partner::update_partner)
                .delete(handlers::partner::delete_partner),
        )
        // Resources
        .route(
            "/v1/resource/create",
            post(handlers::resource::create_resource),
        )
        .route("/v1/resource/list", get(handlers::resource::list_resources))
        .route(
            "/v1/resource/{id}",
            patch(handlers::resource::update_resource).delete(handlers::resource::delete_resource),
        )
        // Addresses and questionnaires
        .route(
            "/v1/address",
            get(handlers::address::get_address).put(handlers::address::upsert_address),
        )
        .route(
            "/v1/questionnaire",
            get(handlers::questionnaire::get_questionnaire)
                .put(handlers::questionnaire::submit_questionnaire),
        )
        // Jobs
        .route("/v1/job/enqueue", post(handlers::job::enqueue_job))
        .route_layer(axum_middleware::from_fn_with_state(
            state.pool.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .fallback(route_not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn route_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": { "code": "route_not_found", "message": "Route not found" }
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue, header::AUTHORIZATION};
    use axum_test::TestServer;
    use hmac::{Hmac, Mac};
    use serde_json::Value;
    use sha2::Sha256;

    use crate::{handlers::transaction::SIGNATURE_HEADER, state::testing};

    fn server() -> TestServer {
        let harness = testing::harness();
        TestServer::new(build_router(harness.state)).unwrap()
    }

    fn signature_header() -> HeaderName {
        HeaderName::from_static(SIGNATURE_HEADER)
    }

    fn signature_value(body: &str) -> HeaderValue {
        let mut mac = Hmac::<Sha256>::new_from_slice(b"whsec_test").unwrap();
        mac.update(body.as_bytes());
        HeaderValue::from_str(&hex::encode(mac.finalize().into_bytes())).unwrap()
    }

    #[tokio::test]
    async fn protected_routes_require_a_role_header() {
        let server = server();

        for path in ["/v1/user/list", "/v1/credit-wallet/list", "/v1/account/me"] {
            let response = server.get(path).await;
            response.assert_status(StatusCode::UNAUTHORIZED);
            let body: Value = response.json();
            assert_eq!(body["error"]["code"], "unauthorized");
        }
    }

    #[tokio::test]
    async fn plain_authorization_header_is_not_a_session() {
        let server = server();
        let response = server
            .post("/v1/transaction/create")
            .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer abc"))
            .json(&json!({ "plaid_account_id": uuid::Uuid::nil(), "amount_cents": 500 }))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signup_is_validated_before_touching_the_database() {
        let server = server();
        let response = server
            .post("/v1/account/signup")
            .json(&json!({
                "email": "not-an-email",
                "password": "correct horse",
                "first_name": "Jane",
                "last_name": "Doe"
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(body["error"]["message"].as_str().unwrap().starts_with("email"));
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let server = server();
        let response = server
            .post("/v1/account/signup")
            .json(&json!({
                "email": "jane@acme.com",
                "password": "short",
                "first_name": "Jane",
                "last_name": "Doe"
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reset_password_route_is_public_and_validated() {
        let server = server();
        let response = server
            .post("/v1/account/reset-password")
            .json(&json!({ "token": "abc", "new_password": "short" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn forgot_password_rejects_a_malformed_email() {
        let server = server();
        let response = server
            .post("/v1/account/forgot-password")
            .json(&json!({ "email": "nobody" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_login_body_is_an_invalid_request() {
        let server = server();
        let response = server
            .post("/v1/account/login")
            .text("{not json")
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "invalid_request");
    }

    #[tokio::test]
    async fn unsigned_webhook_is_rejected() {
        let server = server();
        let response = server
            .post("/v1/transaction/webhook")
            .json(&json!({ "topic": "transfer_completed" }))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "invalid_signature");
    }

    #[tokio::test]
    async fn wrongly_signed_webhook_is_rejected() {
        let server = server();
        let body = r#"{"topic":"transfer_completed"}"#;
        let response = server
            .post("/v1/transaction/webhook")
            .add_header(signature_header(), signature_value("something else"))
            .text(body)
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_non_transfer_webhook_is_acknowledged() {
        let server = server();
        let body = r#"{"topic":"customer_created","_links":{"resource":{"href":"https://api-sandbox.dwolla.com/customers/c-1"}}}"#;
        let response = server
            .post("/v1/transaction/webhook")
            .add_header(signature_header(), signature_value(body))
            .text(body)
            .await;

        response.assert_status_ok();
        let json: Value = response.json();
        assert_eq!(json["received"], true);
        assert_eq!(json["updated"], false);
    }

    #[tokio::test]
    async fn unknown_routes_return_json_404() {
        let server = server();
        let response = server.get("/v1/nope").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "route_not_found");
    }
}
