//! The HTTP front end for the command router.
//!
//! Connections are served concurrently, but commands run one at a time: the `Router` (and the
//! `Session` it owns) sits behind an async mutex.

use crate::router::{CommandResponse, Intent, Router, RULES};
use crate::Result;
use anyhow::Context;
use chrono::Utc;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS};
use hyper::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const NO_COMMAND: &str =
    "No command provided. Please send a command in the 'command' field.";

/// What `GET /api/agent/capabilities` advertises, one entry per intent.
const CAPABILITIES: &[(Intent, &str, &str)] = &[
    (Intent::SyncOrders, "Sync orders from Shopify to Google Sheets", "sync orders from shopify"),
    (Intent::Revenue, "Total revenue and sales", "show me total revenue"),
    (Intent::OrdersSummary, "Summary of Shopify orders by status", "give me orders summary"),
    (Intent::ProductSales, "Units and revenue per product", "what products have sold"),
    (Intent::ProfitBreakdown, "Profit analysis from the summary block", "show me profit breakdown"),
    (Intent::TopProducts, "Best selling products by quantity", "top products"),
    (Intent::TopCustomers, "Customers by total spend", "top customers"),
    (Intent::RevenueTrends, "Revenue per day for the last week", "revenue trends"),
    (Intent::LowStock, "Variants with fewer than 10 in stock", "low stock alert"),
    (Intent::OrdersByDateRange, "Orders in a date range", "orders from last week"),
    (Intent::FormatSheet, "Style the Orders tab and brand the other tabs", "format orders sheet"),
    (Intent::BackupPsl, "Back up the PSL column", "backup PSL values"),
    (Intent::RestorePsl, "Restore the PSL column from the latest backup", "restore PSL values"),
    (Intent::MigratePsl, "Copy PSL values into the manual overrides", "migrate PSL"),
    (Intent::SetPsl, "Set the PSL override for an order", "set PSL for order 1042 to 3.10"),
    (
        Intent::SetLabelCost,
        "Set the shipping label cost for an order",
        "set label cost for order 1042 to 4.85",
    ),
    (
        Intent::ShowMissingLabelCost,
        "Orders without a label cost",
        "show missing label cost",
    ),
    (Intent::AddNote, "Attach a note to an order", "add note \"reprinted\" to order 1042"),
    (Intent::GetPsl, "Show the PSL override for an order", "show PSL for order 1042"),
    (Intent::GetNotes, "Show the notes for an order", "show notes for order 1042"),
    (
        Intent::SetLabelCostBulk,
        "Set one label cost on the most recent unfulfilled orders",
        "set label cost to 4.12 for the last 6 unfulfilled orders",
    ),
    (Intent::ShowUnfulfilled, "Orders that have not shipped", "show unfulfilled orders"),
    (Intent::ShowNegativeProfit, "Rows with negative profit", "show negative profit"),
    (Intent::FixNetProfit, "Rewrite the NET PROFIT formula", "fix net profit"),
    (Intent::FixProfitPerShirt, "Rewrite the Profit Per Shirt formula", "fix profit per shirt"),
    (Intent::RevertChange, "Undo the newest formula fix", "revert last change"),
    (Intent::SetSetupCosts, "Set the TOTAL COSTS figure", "update total costs to 1000"),
    (Intent::RecomputeMetrics, "Recompute the METRICS tab", "recompute metrics"),
];

/// The body of `POST /api/agent/command`. Callers disagree on the field name, so any of the four
/// is accepted.
#[derive(Debug, Default, Clone, Deserialize)]
struct CommandRequest {
    command: Option<String>,
    text: Option<String>,
    message: Option<String>,
    prompt: Option<String>,
    #[allow(dead_code)]
    context: Option<Value>,
}

impl CommandRequest {
    /// The first non-empty field, trimmed.
    fn command(&self) -> String {
        [&self.command, &self.text, &self.message, &self.prompt]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

type Shared = Arc<Mutex<Router>>;

/// Serves the router on `addr` until Ctrl-C.
pub async fn serve(router: Router, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Unable to listen on {addr}"))?;
    info!("Listening on http://{addr}");
    let state: Shared = Arc::new(Mutex::new(router));

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Connection from {peer}");
                    stream
                }
                Err(e) => {
                    warn!("Failed to accept a connection: {e}");
                    continue;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle(state, req).await) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Connection ended with an error: {e}");
            }
        });
    }
}

async fn handle(state: Shared, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read the request body: {e}");
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!(CommandResponse::failure("", "Unable to read the request body")),
            );
        }
    };
    let (status, value) = respond(&state, &method, &path, &body).await;
    info!("{method} {path} -> {}", status.as_u16());
    json_response(status, &value)
}

/// Routes one request. `OPTIONS` answers the CORS preflight for any path.
async fn respond(
    state: &Mutex<Router>,
    method: &Method,
    path: &str,
    body: &[u8],
) -> (StatusCode, Value) {
    match (method, path.trim_end_matches('/')) {
        (&Method::OPTIONS, _) => (StatusCode::NO_CONTENT, Value::Null),
        (&Method::POST, "/api/agent/command") => {
            let request: CommandRequest = match serde_json::from_slice(body) {
                Ok(request) => request,
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        json!(CommandResponse::failure("", format!("Invalid JSON body: {e}"))),
                    )
                }
            };
            let command = request.command();
            if command.is_empty() {
                return (StatusCode::OK, json!(CommandResponse::failure("", NO_COMMAND)));
            }
            let response = state.lock().await.handle(&command).await;
            (StatusCode::OK, json!(response))
        }
        (&Method::GET, "/api/agent/capabilities") => (StatusCode::OK, capabilities()),
        (&Method::GET, "/api/agent/health") => (
            StatusCode::OK,
            json!({"status": "healthy", "capabilities": RULES.len()}),
        ),
        (&Method::GET, "/api/health") => (
            StatusCode::OK,
            json!({"status": "healthy", "timestamp": Utc::now().to_rfc3339()}),
        ),
        _ => (StatusCode::NOT_FOUND, json!({"detail": "Not Found"})),
    }
}

fn capabilities() -> Value {
    let commands: Vec<Value> = CAPABILITIES
        .iter()
        .map(|(intent, description, example)| {
            json!({"command": intent.to_string(), "description": description, "example": example})
        })
        .collect();
    json!({ "available_commands": commands })
}

fn json_response(status: StatusCode, value: &Value) -> Response<Full<Bytes>> {
    let body = if status == StatusCode::NO_CONTENT {
        Bytes::new()
    } else {
        Bytes::from(value.to_string())
    };
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    response
}
