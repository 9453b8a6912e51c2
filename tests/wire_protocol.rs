use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use classbook::engine::WorkingHours;
use classbook::tenant::TenantManager;
use classbook::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("classbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, WorkingHours::default(), 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "classbook".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr, school: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(school)
        .user("admin")
        .password("classbook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

async fn room_id(client: &Client, name: &str) -> String {
    rows(client, "SELECT * FROM rooms")
        .await
        .iter()
        .find(|r| r.get("name") == Some(name))
        .and_then(|r| r.get("id"))
        .unwrap()
        .to_string()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn new_school_has_default_catalog() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "northside").await;

    let rooms = rows(&client, "SELECT * FROM rooms").await;
    let names: Vec<_> = rooms.iter().map(|r| r.get("name").unwrap()).collect();
    assert_eq!(names, vec!["Meeting Room A", "SMART Lab 1", "SMART Lab 2"]);

    let settings = rows(&client, "SELECT * FROM settings").await;
    assert_eq!(settings.len(), 3);
    let duration = rows(&client, "SELECT * FROM settings WHERE key = 'session_duration'").await;
    assert_eq!(duration[0].get("value"), Some("40"));

    let slots = rows(&client, "SELECT * FROM slots").await;
    assert_eq!(slots.len(), 13);
    assert_eq!(slots[0].get("label"), Some("08:00 - 08:40"));
    assert_eq!(slots[12].get("start"), Some("16:00"));
}

#[tokio::test]
async fn booking_flow_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "riverside").await;
    let room = room_id(&client, "SMART Lab 1").await;
    let requester = Ulid::new();

    let created = rows(
        &client,
        &format!(
            "INSERT INTO bookings (room_id, requester_id, date, start, equipment) \
             VALUES ('{room}', '{requester}', '2024-05-01', '08:00', 'Projector')"
        ),
    )
    .await;
    assert_eq!(created.len(), 1);
    let booking = created[0].get("id").unwrap().to_string();
    assert_eq!(created[0].get("end"), Some("08:40"));
    assert_eq!(created[0].get("status"), Some("Pending"));

    // Overlap is refused with exclusion_violation.
    let code = sqlstate(
        &client,
        &format!(
            "INSERT INTO bookings (room_id, requester_id, date, start) \
             VALUES ('{room}', '{}', '2024-05-01', '08:20')",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(code, "23P01");

    let touching = rows(
        &client,
        &format!(
            r#"SELECT * FROM availability WHERE room_id = '{room}' AND date = '2024-05-01' AND start = '08:40' AND "end" = '09:20'"#
        ),
    )
    .await;
    assert_eq!(touching[0].get("available"), Some("t"));

    let taken = rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE room_id = '{room}' AND date = '2024-05-01' AND start = '08:20'"
        ),
    )
    .await;
    assert_eq!(taken[0].get("end"), Some("09:00"));
    assert_eq!(taken[0].get("available"), Some("f"));

    // Duration change leaves the stored end alone.
    client
        .batch_execute("INSERT INTO settings (key, value) VALUES ('session_duration', '60')")
        .await
        .unwrap();
    assert_eq!(rows(&client, "SELECT * FROM slots").await.len(), 9);

    client
        .batch_execute(&format!(
            "INSERT INTO status_changes (booking_id, status) VALUES ('{booking}', 'Approved')"
        ))
        .await
        .unwrap();
    let stored = rows(&client, &format!("SELECT * FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(stored[0].get("status"), Some("Approved"));
    assert_eq!(stored[0].get("end"), Some("08:40"));

    client
        .batch_execute(&format!(
            "DELETE FROM bookings WHERE id = '{booking}' AND requester_id = '{requester}'"
        ))
        .await
        .unwrap();
    let mine = rows(
        &client,
        &format!("SELECT * FROM bookings WHERE requester_id = '{requester}'"),
    )
    .await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("status"), Some("Cancelled"));

    let cancelled_final = sqlstate(
        &client,
        &format!("INSERT INTO status_changes (booking_id, status) VALUES ('{booking}', 'Approved')"),
    )
    .await;
    assert_eq!(cancelled_final, "22023");
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "eastside").await;
    let room = room_id(&client, "SMART Lab 2").await;

    assert_eq!(sqlstate(&client, "SELECT * FROM reports").await, "42P01");
    assert_eq!(sqlstate(&client, "BOOK ROOM 1").await, "42601");
    assert_eq!(
        sqlstate(&client, "SELECT * FROM settings WHERE key = 'theme'").await,
        "P0002"
    );
    assert_eq!(
        sqlstate(&client, "INSERT INTO settings (key, value) VALUES ('session_duration', 'abc')")
            .await,
        "22023"
    );
    assert_eq!(
        sqlstate(
            &client,
            &format!(
                "INSERT INTO bookings (room_id, requester_id, date, start) \
                 VALUES ('{room}', '{}', '2024-02-30', '09:00')",
                Ulid::new()
            )
        )
        .await,
        "22023"
    );
    assert_eq!(
        sqlstate(
            &client,
            &format!(
                "INSERT INTO bookings (room_id, requester_id, date, start) \
                 VALUES ('{room}', '{}', '2024-05-01', '18:00')",
                Ulid::new()
            )
        )
        .await,
        "22023"
    );
    assert_eq!(
        sqlstate(
            &client,
            &format!(
                "INSERT INTO status_changes (booking_id, status) VALUES ('{}', 'Approved')",
                Ulid::new()
            )
        )
        .await,
        "P0002"
    );
    assert_eq!(
        sqlstate(
            &client,
            &format!(
                "INSERT INTO rooms (id, name, equipment) VALUES ('{}', 'SMART Lab 2', '')",
                Ulid::new()
            )
        )
        .await,
        "23505"
    );
}

#[tokio::test]
async fn schools_do_not_share_bookings() {
    let (addr, tm) = start_test_server().await;
    let a = connect(addr, "school_a").await;
    let b = connect(addr, "school_b").await;

    let room = room_id(&a, "Meeting Room A").await;
    a.batch_execute(&format!(
        "INSERT INTO bookings (room_id, requester_id, date, start) \
         VALUES ('{room}', '{}', '2024-05-01', '10:00')",
        Ulid::new()
    ))
    .await
    .unwrap();

    assert_eq!(rows(&a, "SELECT * FROM bookings").await.len(), 1);
    assert!(rows(&b, "SELECT * FROM bookings").await.is_empty());
    assert_eq!(tm.len(), 2);
}
