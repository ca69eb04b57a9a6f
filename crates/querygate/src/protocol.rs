//! JSON-lines front end.
//!
//! One request object per input line, one response object per output line:
//!
//! ```json
//! {"op":"submit","sql":"SELECT * FROM purchases","principal":10}
//! {"ok":true,"result":{"outcome":"executed","id":"…","effective_sql":"…","output":{…}}}
//! {"op":"approve","id":"…"}
//! {"ok":false,"error":{"code":"invalid_transition","message":"…","id":"…"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::error::GatewayError;
use crate::gateway::{Gateway, ListScope};
use crate::ids::{PrincipalId, QueryId};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Submit {
        sql: String,
        principal: PrincipalId,
        #[serde(default)]
        trusted: bool,
    },
    Approve {
        id: QueryId,
    },
    Reject {
        id: QueryId,
        #[serde(default)]
        reason: Option<String>,
    },
    /// All records, or one principal's.
    List {
        #[serde(default)]
        principal: Option<PrincipalId>,
    },
    Pending,
    Undo {
        id: QueryId,
    },
    Observe {
        principal: PrincipalId,
        #[serde(default)]
        trusted: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<QueryId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(code: &'static str, message: impl Into<String>, id: Option<QueryId>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
                id,
            }),
        }
    }
}

impl From<GatewayError> for Response {
    fn from(err: GatewayError) -> Self {
        Response::failure(err.code(), err.to_string(), err.query_id().cloned())
    }
}

fn to_value<T: Serialize>(value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(v) => Response::success(v),
        Err(e) => Response::failure("internal_error", e.to_string(), None),
    }
}

/// Dispatch one request.
pub async fn handle(gateway: &Gateway, request: Request) -> Response {
    match request {
        Request::Submit {
            sql,
            principal,
            trusted,
        } => match gateway.submit(&sql, principal, trusted).await {
            Ok(submission) => to_value(&submission),
            Err(e) => e.into(),
        },
        Request::Approve { id } => match gateway.approve(&id).await {
            Ok(output) => to_value(&json!({ "id": id, "output": output })),
            Err(e) => e.into(),
        },
        Request::Reject { id, reason } => match gateway.reject(&id, reason).await {
            Ok(()) => Response::success(json!({ "id": id })),
            Err(e) => e.into(),
        },
        Request::List { principal } => {
            let scope = principal.map_or(ListScope::All, ListScope::Principal);
            to_value(&gateway.list_queries(scope).await)
        }
        Request::Pending => to_value(&gateway.pending_queries().await),
        Request::Undo { id } => match gateway.undo(&id).await {
            Ok(undo_sql) => Response::success(json!({ "id": id, "undo_sql": undo_sql })),
            Err(e) => e.into(),
        },
        Request::Observe { principal, trusted } => {
            let now = Instant::now();
            let lag = if trusted {
                gateway.observe_trusted_call(principal, now)
            } else {
                gateway.observe_call(principal, now)
            };
            Response::success(json!({ "lag_ms": lag.as_millis() as u64 }))
        }
    }
}

/// Parse and dispatch one input line.
pub async fn handle_line(gateway: &Gateway, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle(gateway, request).await,
        Err(e) => {
            warn!("Failed to parse request: {}", e);
            Response::failure("bad_request", e.to_string(), None)
        }
    }
}

/// Serve requests until `reader` is exhausted. Returns the number handled.
pub async fn serve<R, W>(gateway: &Gateway, mut reader: R, mut writer: W) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut handled = 0;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            debug!("Input closed after {} requests", handled);
            return Ok(handled);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        trace!("Received: {}", trimmed);

        let response = handle_line(gateway, trimmed).await;
        let json = serde_json::to_string(&response)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        handled += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shapes() {
        let req: Request =
            serde_json::from_str(r#"{"op":"submit","sql":"SELECT 1","principal":4}"#).unwrap();
        assert_eq!(
            req,
            Request::Submit {
                sql: "SELECT 1".into(),
                principal: PrincipalId(4),
                trusted: false,
            }
        );

        let req: Request = serde_json::from_str(r#"{"op":"pending"}"#).unwrap();
        assert_eq!(req, Request::Pending);

        let req: Request = serde_json::from_str(r#"{"op":"list"}"#).unwrap();
        assert_eq!(req, Request::List { principal: None });

        assert!(serde_json::from_str::<Request>(r#"{"op":"drop_everything"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"op":"approve"}"#).is_err());
    }

    #[test]
    fn test_error_response_shape() {
        let id = QueryId::new();
        let response: Response = GatewayError::NotFound(id.clone()).into();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "not_found");
        assert_eq!(json["error"]["id"], id.as_str());
        assert!(json.get("result").is_none());
    }
}
