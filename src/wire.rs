//! JSON-lines request surface over TCP.
//!
//! Each line is one request object tagged by `op`; each response is one line
//! `{"ok":true,"result":...}` or `{"ok":false,"error":{"code":..,"message":..}}`.
//! The first request on a connection must be `auth`.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Auth {
        password: String,
    },
    CreateResource {
        owner_id: Ulid,
        name: String,
        capacity: u32,
    },
    GetResource {
        id: Ulid,
    },
    CheckAvailability {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    },
    BookTimeSlot {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        booking_id: Ulid,
    },
    ReleaseTimeSlot {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        booking_id: Ulid,
    },
    CreateBooking {
        resource_id: Ulid,
        user_id: Ulid,
        start: Ms,
        end: Ms,
        guest_count: u32,
        #[serde(default)]
        total_price: f64,
        status: Option<BookingStatus>,
    },
    GetBooking {
        id: Ulid,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    CancelBooking {
        id: Ulid,
    },
    AddBlockedTime {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        status: Option<BlockStatus>,
        reason: Option<String>,
        recurrence: Option<Recurrence>,
    },
    RemoveBlockedTime {
        id: Ulid,
    },
    BlockedTimes {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    },
    GetDays {
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    CreateDay {
        resource_id: Ulid,
        date: NaiveDate,
        #[serde(default)]
        patch: DayPatch,
    },
    UpdateDay {
        id: Ulid,
        patch: DayPatch,
        expected_version: Option<u64>,
    },
    FreeSlots {
        resource_id: Ulid,
        date: NaiveDate,
        slot_minutes: Option<u32>,
    },
    DetectConflicts {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    },
    ResolveConflict {
        id: Ulid,
        status: ConflictStatus,
    },
    ReconcileDay {
        resource_id: Ulid,
        date: NaiveDate,
    },
}

/// Spans arrive unchecked; the engine validates ordering and range.
fn span(start: Ms, end: Ms) -> Span {
    Span { start, end }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Invalid(format!("unserializable result: {e}")))
}

async fn execute(engine: &Engine, req: Request) -> Result<Value, EngineError> {
    match req {
        Request::Auth { .. } => Err(EngineError::Invalid("already authenticated".into())),
        Request::CreateResource { owner_id, name, capacity } => {
            to_json(engine.create_resource(owner_id, name, capacity).await?)
        }
        Request::GetResource { id } => to_json(engine.get_resource(id).await?),
        Request::CheckAvailability { resource_id, start, end } => {
            to_json(engine.check_availability(resource_id, span(start, end)).await?)
        }
        Request::BookTimeSlot {
            resource_id,
            start,
            end,
            booking_id,
        } => to_json(engine.book_time_slot(resource_id, span(start, end), booking_id).await?),
        Request::ReleaseTimeSlot {
            resource_id,
            start,
            end,
            booking_id,
        } => to_json(engine.release_time_slot(resource_id, span(start, end), booking_id).await?),
        Request::CreateBooking {
            resource_id,
            user_id,
            start,
            end,
            guest_count,
            total_price,
            status,
        } => {
            let booking = engine
                .create_booking(NewBooking {
                    resource_id,
                    user_id,
                    span: span(start, end),
                    guest_count,
                    total_price,
                    status: status.unwrap_or(BookingStatus::Pending),
                })
                .await?;
            to_json(booking)
        }
        Request::GetBooking { id } => to_json(engine.get_booking(id).await?),
        Request::UpdateBookingStatus { id, status } => to_json(engine.update_booking_status(id, status).await?),
        Request::CancelBooking { id } => to_json(engine.cancel_booking(id).await?),
        Request::AddBlockedTime {
            resource_id,
            start,
            end,
            status,
            reason,
            recurrence,
        } => {
            let blocked = engine
                .add_blocked_time(
                    resource_id,
                    span(start, end),
                    status.unwrap_or(BlockStatus::Blocked),
                    reason,
                    recurrence,
                )
                .await?;
            to_json(blocked)
        }
        Request::RemoveBlockedTime { id } => {
            engine.remove_blocked_time(id).await?;
            Ok(Value::Bool(true))
        }
        Request::BlockedTimes { resource_id, start, end } => {
            to_json(engine.blocked_times(resource_id, span(start, end)).await?)
        }
        Request::GetDays { resource_id, from, to } => to_json(engine.get_days(resource_id, from, to).await?),
        Request::CreateDay {
            resource_id,
            date,
            patch,
        } => to_json(engine.create_day(resource_id, date, patch).await?),
        Request::UpdateDay {
            id,
            patch,
            expected_version,
        } => to_json(engine.update_day(id, patch, expected_version).await?),
        Request::FreeSlots {
            resource_id,
            date,
            slot_minutes,
        } => to_json(engine.free_slots(resource_id, date, slot_minutes).await?),
        Request::DetectConflicts { resource_id, start, end } => {
            to_json(engine.detect_conflicts(resource_id, span(start, end)).await?)
        }
        Request::ResolveConflict { id, status } => to_json(engine.resolve_conflict(id, status).await?),
        Request::ReconcileDay { resource_id, date } => to_json(engine.reconcile_day(resource_id, date).await?),
    }
}

fn ok_line(result: Value) -> String {
    json!({ "ok": true, "result": result }).to_string()
}

fn error_line(code: &str, message: &str) -> String {
    json!({ "ok": false, "error": { "code": code, "message": message } }).to_string()
}

fn engine_error_line(e: &EngineError) -> String {
    let mut body = json!({ "code": e.code(), "message": e.to_string() });
    if let EngineError::NotAvailable(conflicts) = e
        && let Ok(list) = serde_json::to_value(conflicts) {
            body["conflicts"] = list;
        }
    json!({ "ok": false, "error": body }).to_string()
}

/// Serve one client until it disconnects or fails authentication.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>, password: String) -> std::io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut authenticated = false;

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request line over {MAX_LINE_LEN} bytes, closing connection");
                framed.send(error_line("line_too_long", "request line too long")).await.ok();
                return Ok(());
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                debug!("malformed request: {e}");
                send(&mut framed, error_line("bad_request", &e.to_string())).await?;
                continue;
            }
        };

        if !authenticated {
            match req {
                Request::Auth { password: given } if given == password => {
                    authenticated = true;
                    send(&mut framed, ok_line(Value::String("authenticated".into()))).await?;
                    continue;
                }
                _ => {
                    warn!("rejecting unauthenticated client");
                    metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                    send(&mut framed, error_line("unauthorized", "authenticate first with a valid password")).await?;
                    return Ok(());
                }
            }
        }

        let op = observability::request_label(&req);
        let started = Instant::now();
        let response = match execute(&engine, req).await {
            Ok(result) => {
                metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
                ok_line(result)
            }
            Err(e) => {
                debug!("{op} failed: {e}");
                metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => e.code()).increment(1);
                engine_error_line(&e)
            }
        };
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
        send(&mut framed, response).await?;
    }
    Ok(())
}

async fn send(framed: &mut Framed<TcpStream, LinesCodec>, line: String) -> std::io::Result<()> {
    framed.send(line).await.map_err(|e| match e {
        LinesCodecError::Io(e) => e,
        other => std::io::Error::other(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_requests() {
        let req: Request = serde_json::from_str(
            r#"{"op":"book_time_slot","resource_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","start":0,"end":3600000,"booking_id":"01ARZ3NDEKTSV4RRFFQ69G5FAW"}"#,
        )
        .unwrap();
        assert!(matches!(req, Request::BookTimeSlot { end: 3_600_000, .. }));

        let req: Request =
            serde_json::from_str(r#"{"op":"free_slots","resource_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","date":"2024-06-01"}"#)
                .unwrap();
        match req {
            Request::FreeSlots { date, slot_minutes, .. } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
                assert_eq!(slot_minutes, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn day_patch_tells_null_from_absent() {
        let req: Request = serde_json::from_str(
            r#"{"op":"update_day","id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","patch":{"max_bookings":null},"expected_version":3}"#,
        )
        .unwrap();
        match req {
            Request::UpdateDay { patch, expected_version, .. } => {
                assert_eq!(patch.max_bookings, Some(None));
                assert_eq!(patch.is_working_day, None);
                assert_eq!(expected_version, Some(3));
            }
            other => panic!("unexpected {other:?}"),
        }

        let req: Request = serde_json::from_str(
            r#"{"op":"create_day","resource_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","date":"2024-06-01","patch":{"time_slots":[{"start_time":"10:00","end_time":"11:00","duration_minutes":60,"is_available":false,"max_bookings":1}]}}"#,
        )
        .unwrap();
        match req {
            Request::CreateDay { patch, .. } => {
                assert_eq!(patch.max_bookings, None);
                let slots = patch.time_slots.unwrap();
                assert_eq!(slots[0].current_bookings, 0);
                assert!(slots[0].booking_ids.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_ops_and_bad_fields() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"drop_everything"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"op":"get_booking","id":"not-a-ulid"}"#).is_err());
        assert!(
            serde_json::from_str::<Request>(r#"{"op":"update_booking_status","id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","status":"lost"}"#)
                .is_err()
        );
    }

    #[test]
    fn error_lines_carry_code_and_conflicts() {
        let conflict = Conflict {
            kind: ConflictKind::DayOff,
            severity: Severity::High,
            span: Span::new(0, 10),
            message: "closed".into(),
            source_id: None,
        };
        let line = engine_error_line(&EngineError::NotAvailable(vec![conflict]));
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "not_available");
        assert_eq!(v["error"]["conflicts"][0]["kind"], "day_off");

        let v: Value = serde_json::from_str(&error_line("unauthorized", "no")).unwrap();
        assert_eq!(v["error"]["code"], "unauthorized");
    }
}
