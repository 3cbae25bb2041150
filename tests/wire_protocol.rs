use std::net::SocketAddr;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use slotbook::clock::ManualClock;
use slotbook::config::EngineConfig;
use slotbook::engine::Engine;
use slotbook::wire::{self, Response};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotbook_int_test_{}", Ulid::new()));
    let config = EngineConfig {
        data_dir: dir,
        ..EngineConfig::default()
    };
    // Saturday morning
    let now = NaiveDate::from_ymd_opt(2025, 3, 8).unwrap().and_hms_opt(8, 0, 0).unwrap();
    let engine = Arc::new(Engine::new(config, Arc::new(ManualClock::new(now))).unwrap());

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    (addr, engine)
}

type Client = Framed<TcpStream, LinesCodec>;

async fn connect(addr: SocketAddr) -> Client {
    Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new())
}

async fn send_raw(client: &mut Client, line: &str) -> Response {
    client.send(line.to_string()).await.unwrap();
    let reply = client.next().await.unwrap().unwrap();
    serde_json::from_str(&reply).unwrap()
}

async fn call(client: &mut Client, req: Value) -> Response {
    send_raw(client, &req.to_string()).await
}

async fn register(client: &mut Client, account: &str) {
    let resp = call(
        client,
        json!({"action": "register", "account": account, "password": "pw", "name": account}),
    )
    .await;
    assert!(resp.ok, "{}", resp.message);
}

/// One tennis venue with one court and its generated slots; returns the
/// venue id and the first slot of the day.
async fn seed_venue(client: &mut Client) -> (String, String) {
    let resp = call(
        client,
        json!({"action": "add_venue", "venue": {"name": "Tennis", "kind": "court", "is_outdoor": true}}),
    )
    .await;
    assert!(resp.ok, "{}", resp.message);
    let venue_id = resp.data["id"].as_str().unwrap().to_string();

    let resp = call(client, json!({"action": "add_court", "venue_id": venue_id, "name": "Court 1"})).await;
    assert!(resp.ok, "{}", resp.message);

    let resp = call(client, json!({"action": "run_maintenance"})).await;
    assert!(resp.ok, "{}", resp.message);
    assert_eq!(resp.data["slots_created"], 39);

    let resp = call(client, json!({"action": "list_slots", "venue_id": venue_id, "date": "2025-03-08"})).await;
    assert!(resp.ok, "{}", resp.message);
    let slots = resp.data.as_array().unwrap();
    assert_eq!(slots.len(), 13);
    assert_eq!(slots[0]["start"], "09:00:00");
    let slot_id = slots[0]["slot_id"].as_str().unwrap().to_string();
    (venue_id, slot_id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn book_full_cancel_over_tcp() {
    let (addr, _engine) = start_test_server().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    let (_venue, slot) = seed_venue(&mut alice).await;
    register(&mut alice, "alice").await;
    register(&mut bob, "bob").await;

    let resp = call(&mut alice, json!({"action": "book", "account": "alice", "slot_id": slot})).await;
    assert!(resp.ok, "{}", resp.message);
    assert_eq!(resp.message, "booking confirmed");
    assert_eq!(resp.data["outcome"], "confirmed");
    let reservation = resp.data["reservation_id"].as_str().unwrap().to_string();

    let resp = call(&mut bob, json!({"action": "book", "account": "bob", "slot_id": slot})).await;
    assert!(!resp.ok);
    assert_eq!(resp.message, "slot full");

    let resp = call(&mut alice, json!({"action": "book", "account": "alice", "slot_id": slot})).await;
    assert!(!resp.ok);
    assert_eq!(resp.message, "duplicate booking");

    let resp = call(&mut alice, json!({"action": "my_reservations", "account": "alice"})).await;
    assert!(resp.ok);
    assert_eq!(resp.data[0]["status"], "confirmed");
    assert_eq!(resp.data[0]["court"], "Court 1");

    let resp = call(
        &mut bob,
        json!({"action": "cancel", "account": "bob", "reservation_id": reservation}),
    )
    .await;
    assert!(!resp.ok, "someone else's reservation must not be cancellable");

    let resp = call(
        &mut alice,
        json!({"action": "cancel", "account": "alice", "reservation_id": reservation}),
    )
    .await;
    assert!(resp.ok, "{}", resp.message);
    assert_eq!(resp.data["outcome"], "released");

    let resp = call(&mut bob, json!({"action": "book", "account": "bob", "slot_id": slot})).await;
    assert!(resp.ok, "{}", resp.message);
}

#[tokio::test]
async fn bad_requests_keep_the_connection_open() {
    let (addr, _engine) = start_test_server().await;
    let mut client = connect(addr).await;

    let resp = send_raw(&mut client, "{not json").await;
    assert!(!resp.ok);
    assert!(resp.message.starts_with("malformed request"));

    let resp = call(&mut client, json!({"action": "launch_rockets"})).await;
    assert!(!resp.ok);

    let resp = call(&mut client, json!({"action": "book", "account": "ghost", "slot_id": Ulid::new().to_string()})).await;
    assert!(!resp.ok);
    assert!(resp.message.starts_with("user not found"), "{}", resp.message);

    let resp = call(&mut client, json!({"action": "list_venues"})).await;
    assert!(resp.ok);
    assert_eq!(resp.data, json!([]));
}

#[tokio::test]
async fn outside_window_dates_are_refused() {
    let (addr, _engine) = start_test_server().await;
    let mut client = connect(addr).await;
    let (venue, _) = seed_venue(&mut client).await;

    let resp = call(&mut client, json!({"action": "list_slots", "venue_id": venue, "date": "2025-03-11"})).await;
    assert!(!resp.ok);
    assert!(resp.message.contains("outside the booking window"), "{}", resp.message);
}

#[tokio::test]
async fn teacher_schedule_round_trip() {
    let (addr, engine) = start_test_server().await;
    let mut client = connect(addr).await;
    let (venue, slot) = seed_venue(&mut client).await;

    let resp = call(
        &mut client,
        json!({"action": "register", "account": "coach", "password": "pw", "name": "Coach", "role": "teacher"}),
    )
    .await;
    assert!(resp.ok, "{}", resp.message);

    // Saturday 09:00-10:00
    let resp = call(
        &mut client,
        json!({"action": "add_schedule", "teacher": "coach", "venue_id": venue, "day_of_week": 5, "start": "09:00", "end": "10:00"}),
    )
    .await;
    assert!(resp.ok, "{}", resp.message);
    let schedule = resp.data["schedule_id"].as_str().unwrap().to_string();

    register(&mut client, "alice").await;
    let resp = call(&mut client, json!({"action": "book", "account": "alice", "slot_id": slot})).await;
    assert!(!resp.ok);
    assert_eq!(resp.message, "occupied by instructor schedule");

    let resp = call(&mut client, json!({"action": "list_schedules", "teacher": "coach"})).await;
    assert_eq!(resp.data.as_array().unwrap().len(), 1);
    assert_eq!(resp.data[0]["day_of_week"], 5);

    let resp = call(
        &mut client,
        json!({"action": "remove_schedule", "teacher": "coach", "schedule_id": schedule}),
    )
    .await;
    assert!(resp.ok, "{}", resp.message);

    let resp = call(&mut client, json!({"action": "book", "account": "alice", "slot_id": slot})).await;
    assert!(resp.ok, "{}", resp.message);
    assert!(engine.list_schedules("coach").await.unwrap().is_empty());
}
