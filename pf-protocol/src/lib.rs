//! Status endpoint contract
//!
//! Two read-only resources are served over HTTP/1.x on a local socket:
//!
//! - `GET /` - service version
//! - `GET /state` - latest control and measurement values
//!
//! Everything else is `404 Not found`; any other method, or a request that
//! carries a body, is rejected with `405`. Routing is a pure function so the
//! transport stays thin.

use serde::{Deserialize, Serialize};

/// Version reported by `GET /`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// JSON content type
pub const CONTENT_JSON: &str = "application/json";

/// Plain text content type
pub const CONTENT_TEXT: &str = "text/plain";

/// Envelope shared by every JSON reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    pub ok: bool,
    pub result: T,
}

impl<T> Reply<T> {
    pub fn ok(result: T) -> Self {
        Self { ok: true, result }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            version: VERSION.to_string(),
        }
    }
}

/// Body of `GET /state`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateReport {
    pub service: ServiceState,
    pub temp: TempState,
    pub fan: FanState,
    pub hall: HallState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Monotonic clock seconds at the time of the request
    pub now_ts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempState {
    pub real: f64,
    pub fixed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanState {
    pub speed: f64,
    pub pwm: u16,
    pub ok: bool,
    /// `null` when the fan has never failed
    pub last_fail_ts: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallState {
    pub available: bool,
    /// `-1` after a sensor failure, `-2` before the first measurement
    pub rpm: i32,
}

/// Round to two decimals for presentation
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl StateReport {
    /// Assemble a report; floating point values are rounded to two decimals
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        now_ts: f64,
        temp_real: f32,
        temp_fixed: f32,
        speed: f32,
        pwm: u16,
        ok: bool,
        last_fail_ts: Option<f64>,
        hall_available: bool,
        rpm: i32,
    ) -> Self {
        Self {
            service: ServiceState { now_ts: round2(now_ts) },
            temp: TempState {
                real: round2(temp_real as f64),
                fixed: round2(temp_fixed as f64),
            },
            fan: FanState {
                speed: round2(speed as f64),
                pwm,
                ok,
                last_fail_ts: last_fail_ts.map(round2),
            },
            hall: HallState {
                available: hall_available,
                rpm,
            },
        }
    }
}

/// Transport-independent HTTP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub reason: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpReply {
    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(mut body) => {
                body.push('\n');
                Self {
                    status: 200,
                    reason: "OK",
                    content_type: CONTENT_JSON,
                    body,
                }
            }
            Err(e) => Self::text(500, "Internal Server Error", format!("{}\n", e)),
        }
    }

    fn text(status: u16, reason: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            content_type: CONTENT_TEXT,
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::text(404, "Not Found", "Not found\n")
    }

    pub fn method_not_allowed() -> Self {
        Self::text(405, "Method Not Allowed", "Method not allowed\n")
    }

    pub fn bad_request() -> Self {
        Self::text(400, "Bad Request", "Bad request\n")
    }
}

/// Route one request.
///
/// `state` is only called for `GET /state`. A query string is ignored.
pub fn route<F>(method: &str, target: &str, has_body: bool, state: F) -> HttpReply
where
    F: FnOnce() -> StateReport,
{
    if method != "GET" || has_body {
        return HttpReply::method_not_allowed();
    }
    let path = target.split_once('?').map_or(target, |(path, _)| path);
    match path {
        "/" => HttpReply::json(&Reply::ok(VersionInfo::default())),
        "/state" => HttpReply::json(&Reply::ok(state())),
        _ => HttpReply::not_found(),
    }
}
