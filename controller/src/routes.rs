use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use tokio::sync::{mpsc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use irbridge_common::{
    pages::{
        connect_error_json, connect_success_json, ProvisioningForm, CONNECT_REJECTED_MESSAGE,
        CONNECT_STORAGE_MESSAGE, NOT_FOUND_BODY, ROOT_PAGE,
    },
    protocol, NonVolatileStore, OperationalSession, ProvisionError, ReplayOutcome,
    RestartRequest, Submission,
};

pub type SharedSession<S> = Arc<Mutex<OperationalSession<S>>>;

struct ProvisioningState<S> {
    session: SharedSession<S>,
    page: Arc<String>,
    restart: mpsc::Sender<RestartRequest>,
}

// Derived Clone would demand `S: Clone`.
impl<S> Clone for ProvisioningState<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            page: Arc::clone(&self.page),
            restart: self.restart.clone(),
        }
    }
}

/// Endpoints served once the station is associated.
pub fn operational_router<S>(session: SharedSession<S>) -> Router
where
    S: NonVolatileStore + Send + 'static,
{
    Router::new()
        .route("/root", get(handle_root).fallback(handle_not_found))
        .route("/toggle", post(handle_toggle::<S>).fallback(handle_not_found))
        .fallback(handle_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(session)
}

/// Endpoints served on the fallback access point. `page` is the rendered
/// network listing; accepted credentials are forwarded on `restart`.
pub fn provisioning_router<S>(
    session: SharedSession<S>,
    page: String,
    restart: mpsc::Sender<RestartRequest>,
) -> Router
where
    S: NonVolatileStore + Send + 'static,
{
    let state = ProvisioningState {
        session,
        page: Arc::new(page),
        restart,
    };

    Router::new()
        .route(
            "/networks",
            get(handle_networks::<S>).fallback(handle_not_found),
        )
        .route(
            "/connect",
            post(handle_connect::<S>).fallback(handle_not_found),
        )
        .fallback(handle_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_root() -> Html<&'static str> {
    Html(ROOT_PAGE)
}

async fn handle_toggle<S>(State(session): State<SharedSession<S>>) -> Redirect
where
    S: NonVolatileStore + Send + 'static,
{
    let outcome = session.lock().await.replay();
    match outcome {
        ReplayOutcome::Sent(command) => info!(
            "replayed {} frame 0x{:x}",
            protocol::name(command.protocol),
            command.value
        ),
        ReplayOutcome::Unbound(command) => info!(
            "no transmitter bound for protocol {}; nothing sent",
            command.protocol
        ),
        ReplayOutcome::TransmitFailed(command, err) => warn!(
            "transmit of {} frame 0x{:x} failed: {err}",
            protocol::name(command.protocol),
            command.value
        ),
        ReplayOutcome::StoreUnreadable(err) => warn!("learned command unreadable: {err}"),
    }
    Redirect::to("/root")
}

async fn handle_networks<S>(State(state): State<ProvisioningState<S>>) -> Html<String>
where
    S: NonVolatileStore + Send + 'static,
{
    Html(state.page.as_ref().clone())
}

async fn handle_connect<S>(
    State(state): State<ProvisioningState<S>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response
where
    S: NonVolatileStore + Send + 'static,
{
    let form = ProvisioningForm::parse(query.as_deref(), &body);
    let submission = state
        .session
        .lock()
        .await
        .submit_credentials(&form.ssid, &form.password);

    match submission {
        Ok(Submission::Persisted(request)) => {
            info!("credentials for `{}` saved; restart requested", request.ssid);
            if let Err(err) = state.restart.try_send(request) {
                warn!("restart already pending: {err}");
            }
            connect_response(StatusCode::OK, connect_success_json())
        }
        Ok(Submission::Rejected(reason)) => {
            warn!("rejected credential submission: {reason}");
            connect_response(
                StatusCode::NOT_FOUND,
                connect_error_json(CONNECT_REJECTED_MESSAGE),
            )
        }
        Err(ProvisionError::InvalidTransition { state: current, .. }) => {
            warn!("credential submission ignored while {current}");
            connect_response(
                StatusCode::NOT_FOUND,
                connect_error_json(CONNECT_REJECTED_MESSAGE),
            )
        }
        Err(err) => {
            error!("failed to persist credentials: {err}");
            connect_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                connect_error_json(CONNECT_STORAGE_MESSAGE),
            )
        }
    }
}

fn connect_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::CONTENT_TYPE, "application/json"),
        ],
        body,
    )
        .into_response()
}

async fn handle_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain")],
        NOT_FOUND_BODY,
    )
        .into_response()
}
