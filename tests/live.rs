//! Tests against a running server.
//!
//! Run with `cargo test -- --ignored` and `DATABASE_URL` pointing at a
//! scratch database.

use std::cell::RefCell;
use std::env;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use pgsession::{ConnState, Connection, Direct, ListenerError, Notification, Opts};

static TABLE_COUNTER: AtomicU32 = AtomicU32::new(0);

fn db_url() -> String {
    let mut db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/postgres".to_string());
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    db_url
}

fn get_conn() -> Connection<Direct<Opts>> {
    Connection::connect(db_url().as_str()).expect("Failed to connect")
}

fn table_name(prefix: &str) -> String {
    format!("{}_{}_{}", prefix, std::process::id(), TABLE_COUNTER.fetch_add(1, Ordering::SeqCst))
}

#[test]
#[ignore = "needs DATABASE_URL"]
fn select_one() {
    let mut conn = get_conn();
    assert_eq!(conn.state(), ConnState::Ready);
    let result = conn.exec("SELECT 1 AS num", 0).unwrap();
    assert_eq!(result.columns(), ["num".to_string()]);
    assert_eq!(result.get(0, 0).unwrap(), Some("1"));
    assert!(conn.server_version() >= 90_000);
    assert_ne!(conn.backend_pid(), 0);
}

#[test]
#[ignore = "needs DATABASE_URL"]
fn session_survives_reset() {
    let mut conn = get_conn();
    conn.set_variable("statement_timeout", "12345").unwrap();
    conn.prepare("plus_one", "SELECT $1::int + 1").unwrap();
    let before = conn.backend_pid();

    conn.reset().unwrap();
    assert_ne!(conn.backend_pid(), before);
    assert_eq!(conn.get_variable("statement_timeout").unwrap(), "12345");
    let shown = conn.exec("SHOW statement_timeout", 0).unwrap();
    assert_eq!(shown.get(0, 0).unwrap(), Some("12345ms"));
    let result = conn.prepared_exec("plus_one", &[Some("41")]).unwrap();
    assert_eq!(result.get(0, 0).unwrap(), Some("42"));
}

#[test]
#[ignore = "needs DATABASE_URL"]
fn reconnects_after_backend_is_killed() {
    let mut conn = get_conn();
    let pid = conn.backend_pid();

    let mut admin = postgres::Client::connect(&db_url(), postgres::NoTls).unwrap();
    admin
        .execute("SELECT pg_terminate_backend($1)", &[&(pid as i32)])
        .unwrap();
    std::thread::sleep(Duration::from_millis(200));

    let result = conn.exec("SELECT 2", 1).unwrap();
    assert_eq!(result.get(0, 0).unwrap(), Some("2"));
    assert_ne!(conn.backend_pid(), pid);
}

#[test]
#[ignore = "needs DATABASE_URL"]
fn notifications_reach_receivers() {
    let mut conn = get_conn();
    let channel = table_name("chan");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    conn.add_receiver(&channel, move |n: &Notification| -> Result<(), ListenerError> {
        sink.borrow_mut().push(n.payload.clone());
        Ok(())
    })
    .unwrap();

    let mut admin = postgres::Client::connect(&db_url(), postgres::NoTls).unwrap();
    admin
        .batch_execute(&format!("NOTIFY {}, 'hello'", channel))
        .unwrap();

    let delivered = conn
        .await_notification_timeout(Duration::from_secs(5))
        .unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(*seen.borrow(), vec!["hello".to_string()]);
}

#[test]
#[ignore = "needs DATABASE_URL"]
fn copy_round_trip() {
    let mut conn = get_conn();
    let table = table_name("copy_test");
    conn.exec(&format!("CREATE TEMP TABLE {} (name TEXT, value INT)", table), 0)
        .unwrap();

    let mut writer = conn.copy_in(&format!("COPY {} FROM STDIN", table)).unwrap();
    writer.write_line("alice\t1").unwrap();
    writer.write_line("bob\t2").unwrap();
    writer.finish().unwrap();

    let reader = conn
        .copy_out(&format!("COPY (SELECT * FROM {} ORDER BY value) TO STDOUT", table))
        .unwrap();
    let lines: Vec<String> = reader.collect::<Result<_, _>>().unwrap();
    assert_eq!(lines, vec!["alice\t1", "bob\t2"]);
    assert_eq!(conn.reactivation_avoidance_count(), 0);
}

#[test]
#[ignore = "needs DATABASE_URL"]
fn cancel_interrupts_running_statement() {
    let mut conn = get_conn();
    let token = conn.cancel_token().unwrap();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        pgsession::CancelToken::cancel(&token)
    });

    let err = conn.exec("SELECT pg_sleep(10)", 0).unwrap_err();
    canceller.join().unwrap().unwrap();
    assert_eq!(err.sqlstate(), Some("57014"));
    assert_eq!(conn.state(), ConnState::Ready);
}

#[test]
#[ignore = "needs DATABASE_URL"]
fn transaction_commits() {
    let mut conn = get_conn();
    let table = table_name("tx_test");
    conn.exec(&format!("CREATE TEMP TABLE {} (id INT)", table), 0)
        .unwrap();

    conn.run_transaction("transaction", |conn, tx| {
        conn.exec(&format!("INSERT INTO {} VALUES (1)", table), 0)?;
        tx.commit(conn)
    })
    .unwrap();

    let count = conn
        .exec(&format!("SELECT count(*) FROM {}", table), 0)
        .unwrap();
    assert_eq!(count.get(0, 0).unwrap(), Some("1"));
}
