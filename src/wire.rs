//! Line-delimited JSON front end. Each request line is an object tagged by
//! `action`; each reply is `{"ok": bool, "message": str, "data": any}`.
//! A bad line gets an error reply and the connection stays open.

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, ErrorKind, VenueInput};
use crate::limits::MAX_REQUEST_LEN;
use crate::model::{Role, UserPatch};
use crate::observability::{request_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::time::{parse_clock_time, parse_date, weekday_from_index};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    // ── Accounts ─────────────────────────────────────────
    Register {
        account: String,
        password: String,
        name: String,
        #[serde(default)]
        role: Option<Role>,
        #[serde(default)]
        phone: Option<String>,
    },
    Login {
        account: String,
        password: String,
    },
    DeleteAccount {
        account: String,
        password: String,
    },

    // ── Booking ──────────────────────────────────────────
    ListVenues,
    ListSlots {
        venue_id: Ulid,
        /// `YYYY-MM-DD`
        date: String,
    },
    Book {
        account: String,
        slot_id: Ulid,
    },
    Cancel {
        account: String,
        reservation_id: Ulid,
    },
    CheckIn {
        account: String,
        reservation_id: Ulid,
    },
    MyReservations {
        account: String,
    },

    // ── Teacher schedules ────────────────────────────────
    AddSchedule {
        teacher: String,
        venue_id: Ulid,
        /// 0 = Monday … 6 = Sunday
        day_of_week: u8,
        start: String,
        end: String,
    },
    RemoveSchedule {
        teacher: String,
        schedule_id: Ulid,
    },
    ListSchedules {
        teacher: String,
    },

    // ── Board ────────────────────────────────────────────
    AddAnnouncement {
        #[serde(default)]
        account: Option<String>,
        title: String,
        content: String,
        start_date: String,
        end_date: String,
    },
    AddPost {
        account: String,
        title: String,
        content: String,
    },
    ListAnnouncements,
    DeleteAnnouncement {
        announcement_id: Ulid,
    },

    // ── Administration ───────────────────────────────────
    AddVenue {
        venue: VenueInput,
    },
    UpdateVenue {
        venue_id: Ulid,
        venue: VenueInput,
    },
    DeleteVenue {
        venue_id: Ulid,
    },
    ListCourts {
        venue_id: Ulid,
    },
    AddCourt {
        venue_id: Ulid,
        name: String,
    },
    DeleteCourt {
        court_id: Ulid,
    },
    ListUsers,
    UpdateUser {
        account: String,
        patch: UserPatch,
    },
    DeleteUser {
        account: String,
    },
    ListReservations,
    AdminCancel {
        reservation_id: Ulid,
    },
    SetSlotHot {
        slot_id: Ulid,
        is_hot: bool,
    },
    RunMaintenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub message: String,
    pub data: Value,
}

impl Response {
    fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: Value::Null,
        }
    }

    fn from_error(e: &EngineError) -> Self {
        match e {
            EngineError::WalError(_) => Self::failure("internal error, nothing was changed"),
            _ => Self::failure(e.to_string()),
        }
    }
}

fn data<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

async fn handle(engine: &Engine, req: Request) -> Result<(String, Value), EngineError> {
    let reply = match req {
        Request::Register {
            account,
            password,
            name,
            role,
            phone,
        } => {
            let role = role.unwrap_or(Role::Student);
            let user = engine
                .register_user(&account, &password, &name, role, phone.as_deref())
                .await?;
            ("registered".to_string(), data(&user))
        }
        Request::Login { account, password } => {
            let user = engine.login(&account, &password).await?;
            ("logged in".to_string(), data(&user))
        }
        Request::DeleteAccount { account, password } => {
            engine.delete_account(&account, &password).await?;
            ("account deleted".to_string(), Value::Null)
        }

        Request::ListVenues => ("ok".to_string(), data(&engine.list_venues().await)),
        Request::ListSlots { venue_id, date } => {
            let date = parse_date(&date)?;
            let slots = engine.list_available_slots(venue_id, date).await?;
            (format!("{} slots", slots.len()), data(&slots))
        }
        Request::Book { account, slot_id } => {
            let outcome = engine.book(&account, slot_id).await?;
            (outcome.message().to_string(), data(&outcome))
        }
        Request::Cancel { account, reservation_id } => {
            let outcome = engine.cancel(&account, reservation_id).await?;
            (outcome.message().to_string(), data(&outcome))
        }
        Request::CheckIn { account, reservation_id } => {
            engine.check_in(&account, reservation_id).await?;
            ("checked in".to_string(), Value::Null)
        }
        Request::MyReservations { account } => {
            let list = engine.list_my_reservations(&account).await?;
            (format!("{} reservations", list.len()), data(&list))
        }

        Request::AddSchedule {
            teacher,
            venue_id,
            day_of_week,
            start,
            end,
        } => {
            let day = weekday_from_index(day_of_week)?;
            let start = parse_clock_time(&start)?;
            let end = parse_clock_time(&end)?;
            let receipt = engine.add_schedule(&teacher, venue_id, day, start, end).await?;
            (
                format!(
                    "schedule locked until {}: {} slots locked, {} bookings displaced",
                    receipt.expiry_date, receipt.slots_locked, receipt.displaced
                ),
                data(&receipt),
            )
        }
        Request::RemoveSchedule { teacher, schedule_id } => {
            let receipt = engine.remove_schedule(&teacher, schedule_id).await?;
            (
                format!("schedule removed: {} slots released", receipt.slots_released),
                data(&receipt),
            )
        }
        Request::ListSchedules { teacher } => {
            let list = engine.list_schedules(&teacher).await?;
            (format!("{} schedules", list.len()), data(&list))
        }

        Request::AddAnnouncement {
            account,
            title,
            content,
            start_date,
            end_date,
        } => {
            let start_date = parse_date(&start_date)?;
            let end_date = parse_date(&end_date)?;
            let posted = engine
                .add_announcement(account.as_deref(), &title, &content, start_date, end_date)
                .await?;
            ("announcement posted".to_string(), data(&posted))
        }
        Request::AddPost { account, title, content } => {
            let posted = engine.add_post(&account, &title, &content).await?;
            ("post added".to_string(), data(&posted))
        }
        Request::ListAnnouncements => {
            let list = engine.list_announcements().await;
            (format!("{} announcements", list.len()), data(&list))
        }
        Request::DeleteAnnouncement { announcement_id } => {
            engine.delete_announcement(announcement_id).await?;
            ("announcement deleted".to_string(), Value::Null)
        }

        Request::AddVenue { venue } => {
            let venue = engine.add_venue(venue).await?;
            ("venue added".to_string(), data(&venue))
        }
        Request::UpdateVenue { venue_id, venue } => {
            let venue = engine.update_venue(venue_id, venue).await?;
            ("venue updated".to_string(), data(&venue))
        }
        Request::DeleteVenue { venue_id } => {
            engine.delete_venue(venue_id).await?;
            ("venue deleted".to_string(), Value::Null)
        }
        Request::ListCourts { venue_id } => ("ok".to_string(), data(&engine.list_courts(venue_id).await?)),
        Request::AddCourt { venue_id, name } => {
            let court = engine.add_court(venue_id, &name).await?;
            ("court added".to_string(), data(&court))
        }
        Request::DeleteCourt { court_id } => {
            let slots = engine.delete_court(court_id).await?;
            (format!("court deleted with {slots} slots"), Value::Null)
        }
        Request::ListUsers => ("ok".to_string(), data(&engine.list_users().await)),
        Request::UpdateUser { account, patch } => {
            let user = engine.update_user(&account, patch).await?;
            ("user updated".to_string(), data(&user))
        }
        Request::DeleteUser { account } => {
            engine.delete_user(&account).await?;
            ("user deleted".to_string(), Value::Null)
        }
        Request::ListReservations => ("ok".to_string(), data(&engine.list_all_reservations().await)),
        Request::AdminCancel { reservation_id } => {
            let promoted = engine.admin_cancel_reservation(reservation_id).await?;
            ("reservation removed".to_string(), serde_json::json!({ "promoted": promoted }))
        }
        Request::SetSlotHot { slot_id, is_hot } => {
            engine.set_slot_hot(slot_id, is_hot).await?;
            ("slot updated".to_string(), Value::Null)
        }
        Request::RunMaintenance => {
            let summary = engine.run_maintenance().await?;
            (summary.to_string(), data(&summary))
        }
    };
    Ok(reply)
}

/// Run one request against the engine and record its metrics.
pub async fn dispatch(engine: &Engine, req: Request) -> Response {
    let action = request_label(&req);
    let started = Instant::now();
    let result = handle(engine, req).await;
    metrics::histogram!(REQUEST_DURATION_SECONDS, "action" => action).record(started.elapsed().as_secs_f64());

    match result {
        Ok((message, data)) => {
            metrics::counter!(REQUESTS_TOTAL, "action" => action, "status" => "ok").increment(1);
            Response::success(message, data)
        }
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "action" => action, "status" => "error").increment(1);
            if e.kind() == ErrorKind::System {
                error!(action, error = %e, "request failed");
            }
            Response::from_error(&e)
        }
    }
}

/// Turn one raw line into a reply. Malformed JSON or an unknown action is
/// answered, never fatal.
pub async fn handle_line(engine: &Engine, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(req) => dispatch(engine, req).await,
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "action" => "malformed", "status" => "error").increment(1);
            debug!(error = %e, "malformed request");
            Response::failure(format!("malformed request: {e}"))
        }
    }
}

fn encode(resp: &Response) -> String {
    serde_json::to_string(resp)
        .unwrap_or_else(|_| r#"{"ok":false,"message":"internal error","data":null}"#.to_string())
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LEN));

    while let Some(line) = framed.next().await {
        let resp = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request line over {MAX_REQUEST_LEN} bytes dropped");
                Response::failure("request too long")
            }
            Err(e) => return Err(e),
        };
        framed.send(encode(&resp)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use chrono::NaiveDate;
    use serde_json::json;

    fn engine(name: &str) -> Engine {
        let dir = std::env::temp_dir().join("slotbook_test_wire").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        let config = EngineConfig {
            data_dir: dir,
            ..EngineConfig::default()
        };
        let now = NaiveDate::from_ymd_opt(2025, 3, 6).unwrap().and_hms_opt(8, 0, 0).unwrap();
        Engine::new(config, Arc::new(ManualClock::new(now))).unwrap()
    }

    #[test]
    fn parse_tagged_requests() {
        let req: Request = serde_json::from_value(json!({"action": "list_venues"})).unwrap();
        assert_eq!(req, Request::ListVenues);

        let slot = Ulid::new();
        let req: Request = serde_json::from_value(json!({
            "action": "book",
            "account": "s1",
            "slot_id": slot.to_string(),
        }))
        .unwrap();
        assert_eq!(
            req,
            Request::Book {
                account: "s1".into(),
                slot_id: slot
            }
        );

        let req: Request = serde_json::from_value(json!({
            "action": "update_user",
            "account": "s1",
            "patch": {"credit_score": 70},
        }))
        .unwrap();
        let Request::UpdateUser { patch, .. } = req else {
            panic!("wrong variant");
        };
        assert_eq!(patch.credit_score, Some(70));
        assert_eq!(patch.name, None);
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"action":"drop_tables"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"account":"s1"}"#).is_err());
    }

    #[tokio::test]
    async fn malformed_lines_get_error_replies() {
        let engine = engine("malformed");
        let resp = handle_line(&engine, "not json").await;
        assert!(!resp.ok);
        assert!(resp.message.starts_with("malformed request"));
        assert_eq!(resp.data, Value::Null);
    }

    #[tokio::test]
    async fn bad_fields_are_validation_errors() {
        let engine = engine("validation");
        let venue = Ulid::new();
        let resp = handle_line(
            &engine,
            &json!({
                "action": "add_schedule",
                "teacher": "t1",
                "venue_id": venue.to_string(),
                "day_of_week": 9,
                "start": "19:00",
                "end": "21:00",
            })
            .to_string(),
        )
        .await;
        assert!(!resp.ok);
        assert!(resp.message.contains("weekday 9"), "{}", resp.message);

        let resp = handle_line(
            &engine,
            &json!({"action": "list_slots", "venue_id": venue.to_string(), "date": "06/03/2025"}).to_string(),
        )
        .await;
        assert!(!resp.ok);
        assert!(resp.message.contains("invalid date"), "{}", resp.message);
    }

    #[tokio::test]
    async fn register_then_login() {
        let engine = engine("register_login");
        let resp = dispatch(
            &engine,
            Request::Register {
                account: "s1".into(),
                password: "pw".into(),
                name: "Ann".into(),
                role: None,
                phone: None,
            },
        )
        .await;
        assert!(resp.ok, "{}", resp.message);
        assert_eq!(resp.data["role"], "student");
        assert_eq!(resp.data["credit_score"], 100);

        let resp = dispatch(
            &engine,
            Request::Login {
                account: "s1".into(),
                password: "nope".into(),
            },
        )
        .await;
        assert!(!resp.ok);
        assert_eq!(resp.message, "wrong account or password");
    }

    #[tokio::test]
    async fn board_actions() {
        let engine = engine("board");
        engine
            .register_user("s1", "pw", "Ann", Role::Student, None)
            .await
            .unwrap();

        let resp = handle_line(
            &engine,
            &json!({
                "action": "add_announcement",
                "title": "Pool closed",
                "content": "Cleaning",
                "start_date": "2025-03-06",
                "end_date": "2025-03-07",
            })
            .to_string(),
        )
        .await;
        assert!(resp.ok, "{}", resp.message);
        let notice = resp.data["id"].as_str().unwrap().to_string();

        let resp = handle_line(
            &engine,
            &json!({"action": "add_post", "account": "s1", "title": "Partner wanted", "content": "Squash?"}).to_string(),
        )
        .await;
        assert!(resp.ok, "{}", resp.message);
        assert_eq!(resp.data["end_date"], "2026-03-06");

        let resp = dispatch(&engine, Request::ListAnnouncements).await;
        assert_eq!(resp.message, "2 announcements");
        let authors: Vec<&str> = resp.data.as_array().unwrap().iter().filter_map(|a| a["author_name"].as_str()).collect();
        assert!(authors.contains(&"Ann") && authors.contains(&"administrator"));

        let resp = handle_line(
            &engine,
            &json!({"action": "delete_announcement", "announcement_id": notice}).to_string(),
        )
        .await;
        assert!(resp.ok, "{}", resp.message);
        let resp = handle_line(
            &engine,
            &json!({"action": "delete_announcement", "announcement_id": notice}).to_string(),
        )
        .await;
        assert!(!resp.ok);
        assert!(resp.message.starts_with("announcement not found"), "{}", resp.message);
    }
}
