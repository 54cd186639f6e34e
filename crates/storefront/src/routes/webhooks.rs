//! Payment provider webhooks.
//!
//! Both endpoints take the raw body so the signature is checked over exactly
//! the bytes the provider signed. Authentication failures never touch the
//! order store.

use std::net::{IpAddr, SocketAddr};

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{Extensions, HeaderMap},
};
use serde::Serialize;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::payments::payfast::{self, ItnError};
use crate::payments::stripe::WebhookError;
use crate::payments::{PayloadError, PaymentNotification, SignatureError};
use crate::services::{ReconcileOutcome, WebhookReconciler};
use crate::state::AppState;

/// Header carrying Stripe's `t=..,v1=..` signature.
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Body of every acknowledgement.
#[derive(Debug, Serialize)]
pub struct Ack {
    pub received: bool,
}

/// Client address: the first `X-Forwarded-For` entry, else the peer.
fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    forwarded.or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

fn rejected_signature(provider: &str, err: SignatureError) -> AppError {
    tracing::warn!(provider, error = %err, "webhook signature rejected");
    AppError::Unauthorized(err)
}

fn rejected_payload(provider: &str, err: &PayloadError) -> AppError {
    tracing::warn!(provider, error = %err, "webhook payload rejected");
    AppError::BadRequest(err.to_string())
}

async fn reconcile(state: &AppState, notification: Option<PaymentNotification>) -> Result<Json<Ack>> {
    let Some(notification) = notification else {
        tracing::debug!("non-terminal notification acknowledged");
        return Ok(Json(Ack { received: true }));
    };

    let outcome = WebhookReconciler::new(&state.orders(), state.notifier())
        .reconcile(&notification)
        .await?;

    match outcome {
        ReconcileOutcome::OrderNotFound => Err(AppError::OrderNotFound(format!(
            "Order {} not found",
            notification.order_id
        ))),
        ReconcileOutcome::Applied(_) | ReconcileOutcome::Duplicate | ReconcileOutcome::Unchanged => {
            Ok(Json(Ack { received: true }))
        }
    }
}

/// `POST /api/payments/payfast/webhook`
#[instrument(skip_all, fields(provider = "payfast"))]
pub async fn payfast_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    body: String,
) -> Result<Json<Ack>> {
    let gateway = state
        .gateways()
        .payfast()
        .ok_or_else(|| AppError::NotFound("PayFast is not enabled".to_owned()))?;

    if gateway.config().verify_source {
        let ip = client_ip(&headers, &extensions);
        let valid = match ip {
            Some(ip) => payfast::is_valid_source(ip).await,
            None => false,
        };
        if !valid {
            tracing::warn!(ip = ?ip, "ITN from unrecognised source");
            return Err(AppError::Forbidden(
                ip.map_or_else(|| "unknown".to_owned(), |ip| ip.to_string()),
            ));
        }
    }

    let notification = gateway.parse_itn(&body).map_err(|err| match err {
        ItnError::Signature(e) => rejected_signature("payfast", e),
        ItnError::Payload(e) => rejected_payload("payfast", &e),
    })?;

    reconcile(&state, notification).await
}

/// `POST /api/payments/stripe/webhook`
#[instrument(skip_all, fields(provider = "stripe"))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Ack>> {
    let gateway = state
        .gateways()
        .stripe()
        .ok_or_else(|| AppError::NotFound("Stripe is not enabled".to_owned()))?;

    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let notification = gateway
        .parse_webhook(signature, &body)
        .map_err(|err| match err {
            WebhookError::Signature(e) => rejected_signature("stripe", e),
            WebhookError::Payload(e) => rejected_payload("stripe", &e),
        })?;

    reconcile(&state, notification).await
}
