//! Newline-delimited JSON over TCP. One request object per line, tagged by
//! `op`; one response line per request, in order.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Quote(PricingRequest),
    Reserve {
        customer_id: CustomerId,
        #[serde(flatten)]
        request: PricingRequest,
    },
    CheckAvailability {
        item_id: ItemId,
        range: Span,
    },
    GetBooking {
        booking_id: Ulid,
    },
    BookingsForItem {
        item_id: ItemId,
    },
    Cancel {
        booking_id: Ulid,
    },
    Expire {
        booking_id: Ulid,
    },
    Confirm {
        booking_id: Ulid,
    },
    Complete {
        booking_id: Ulid,
    },
    AddBlackout {
        item_id: ItemId,
        range: Span,
    },
    RemoveBlackout {
        blackout_id: Ulid,
    },
}

impl Request {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Quote(_) => "quote",
            Request::Reserve { .. } => "reserve",
            Request::CheckAvailability { .. } => "check_availability",
            Request::GetBooking { .. } => "get_booking",
            Request::BookingsForItem { .. } => "bookings_for_item",
            Request::Cancel { .. } => "cancel",
            Request::Expire { .. } => "expire",
            Request::Confirm { .. } => "confirm",
            Request::Complete { .. } => "complete",
            Request::AddBlackout { .. } => "add_blackout",
            Request::RemoveBlackout { .. } => "remove_blackout",
        }
    }
}

/// Error as shown to clients. Internal failures keep their detail in the logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Span>,
    #[serde(default)]
    pub retryable: bool,
}

impl ErrorBody {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "bad_request".into(),
            message: message.into(),
            field: None,
            conflicts: Vec::new(),
            retryable: false,
        }
    }
}

impl From<&EngineError> for ErrorBody {
    fn from(e: &EngineError) -> Self {
        let message = match e {
            EngineError::Journal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        Self {
            code: e.code().to_string(),
            message,
            field: match e {
                EngineError::Validation { field, .. } => Some(field.to_string()),
                _ => None,
            },
            conflicts: match e {
                EngineError::Conflict { conflicts, .. } => conflicts.clone(),
                _ => Vec::new(),
            },
            retryable: e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn ok(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn err(error: ErrorBody) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, EngineError> {
    serde_json::to_value(v).map_err(|e| EngineError::Journal(format!("encode response: {e}")))
}

async fn execute(engine: &Engine, request: Request) -> Result<Value, EngineError> {
    match request {
        Request::Ping => Ok(json!("pong")),
        Request::Quote(req) => to_value(&engine.quote(&req).await?),
        Request::Reserve { customer_id, request } => {
            to_value(&engine.reserve(request, &customer_id).await?)
        }
        Request::CheckAvailability { item_id, range } => {
            to_value(&engine.check_availability(&item_id, range).await?)
        }
        Request::GetBooking { booking_id } => to_value(&engine.get_booking(booking_id)?),
        Request::BookingsForItem { item_id } => to_value(&engine.bookings_for_item(&item_id)),
        Request::Cancel { booking_id } => to_value(&engine.cancel(booking_id).await?),
        Request::Expire { booking_id } => to_value(&engine.expire(booking_id).await?),
        Request::Confirm { booking_id } => to_value(&engine.confirm(booking_id).await?),
        Request::Complete { booking_id } => to_value(&engine.complete(booking_id).await?),
        Request::AddBlackout { item_id, range } => {
            let id = engine.add_blackout(&item_id, range).await?;
            Ok(json!({ "blackout_id": id }))
        }
        Request::RemoveBlackout { blackout_id } => {
            let span = engine.remove_blackout(blackout_id).await?;
            Ok(json!({ "blackout_id": blackout_id, "range": span }))
        }
    }
}

/// Run one request against the engine, recording RED metrics.
pub async fn handle_request(engine: &Engine, request: Request) -> Response {
    let op = request.label();
    let started = Instant::now();
    let result = execute(engine, request).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(value) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
            Response::ok(value)
        }
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => e.code())
                .increment(1);
            if let EngineError::Journal(detail) = &e {
                tracing::error!("{op} failed: {detail}");
            }
            Response::err(ErrorBody::from(&e))
        }
    }
}

/// Parse and run one line.
pub async fn handle_line(engine: &Engine, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle_request(engine, request).await,
        Err(e) => Response::err(ErrorBody::bad_request(format!("malformed request: {e}"))),
    }
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => io::Error::new(io::ErrorKind::InvalidData, "line too long"),
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Response::err(ErrorBody::bad_request(format!("line exceeds {MAX_LINE_LEN} bytes")))
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        let encoded = serde_json::to_string(&response).map_err(io::Error::other)?;
        framed.send(encoded).await.map_err(codec_err)?;
    }
    Ok(())
}
