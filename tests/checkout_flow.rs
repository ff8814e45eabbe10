use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use rentd::engine::Engine;
use rentd::notify::NotifyHub;
use rentd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("rentd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("reservations.wal"), Arc::new(NotifyHub::new())).unwrap());

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "rentd".to_string(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("rentd")
        .user("checkout")
        .password("rentd");

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
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// SQLSTATE of a failed statement.
async fn error_code(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().expect("server error carries a SQLSTATE").code().to_string()
}

async fn reserve(client: &Client, order: Ulid, product: Ulid, quantity: u32, start: &str, end: &str) {
    client
        .simple_query(&format!(
            "INSERT INTO reservations (id, order_id, product_id, variant_id, quantity, start_date, end_date) \
             VALUES ('{}', '{order}', '{product}', NULL, {quantity}, '{start}', '{end}')",
            Ulid::new()
        ))
        .await
        .unwrap();
}

fn availability_sql(product: Ulid, start: &str, end: &str, quantity: u32) -> String {
    format!(
        "SELECT * FROM availability WHERE product_id = '{product}' \
         AND start_date = '{start}' AND end_date = '{end}' AND quantity = {quantity}"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn checkout_and_cancel_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let product = Ulid::new();
    client
        .simple_query(&format!("INSERT INTO products (id, stock, name) VALUES ('{product}', 3, 'Kayak')"))
        .await
        .unwrap();

    let first = Ulid::new();
    reserve(&client, first, product, 2, "2025-01-01", "2025-01-10").await;
    reserve(&client, Ulid::new(), product, 1, "2025-01-05", "2025-01-15").await;

    let avail = rows(&client, &availability_sql(product, "2025-01-06", "2025-01-08", 1)).await;
    assert_eq!(avail.len(), 1);
    assert_eq!(avail[0].get("available"), Some("f"));
    assert_eq!(avail[0].get("available_quantity"), Some("0"));
    assert!(avail[0].get("message").is_some());

    let blocked = format!(
        "INSERT INTO reservations VALUES ('{}', '{}', '{product}', NULL, 1, '2025-01-06', '2025-01-08')",
        Ulid::new(),
        Ulid::new()
    );
    assert_eq!(error_code(&client, &blocked).await, "40001");

    reserve(&client, Ulid::new(), product, 1, "2025-01-11", "2025-01-15").await;

    client
        .simple_query(&format!("DELETE FROM reservations WHERE order_id = '{first}'"))
        .await
        .unwrap();

    let avail = rows(&client, &availability_sql(product, "2025-01-06", "2025-01-08", 2)).await;
    assert_eq!(avail[0].get("available"), Some("t"));
    assert_eq!(avail[0].get("available_quantity"), Some("2"));

    let history = rows(&client, &format!("SELECT * FROM reservations WHERE order_id = '{first}'")).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].get("status"), Some("cancelled"));
}

#[tokio::test]
async fn multi_row_insert_is_all_or_nothing() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;

    let a = Ulid::new();
    let b = Ulid::new();
    client
        .simple_query(&format!("INSERT INTO products (id, stock) VALUES ('{a}', 2)"))
        .await
        .unwrap();
    client
        .simple_query(&format!("INSERT INTO products (id, stock) VALUES ('{b}', 1)"))
        .await
        .unwrap();

    let order = Ulid::new();
    let sql = format!(
        "INSERT INTO reservations VALUES \
         ('{}', '{order}', '{a}', NULL, 1, '2025-02-01', '2025-02-03'), \
         ('{}', '{order}', '{b}', NULL, 2, '2025-02-01', '2025-02-03')",
        Ulid::new(),
        Ulid::new()
    );
    assert_eq!(error_code(&client, &sql).await, "40001");
    assert!(engine.order_reservations(order).await.is_empty());

    let sql = format!(
        "INSERT INTO reservations VALUES \
         ('{}', '{order}', '{a}', NULL, 1, '2025-02-01', '2025-02-03'), \
         ('{}', '{order}', '{b}', NULL, 1, '2025-02-01', '2025-02-03')",
        Ulid::new(),
        Ulid::new()
    );
    client.simple_query(&sql).await.unwrap();
    assert_eq!(engine.order_reservations(order).await.len(), 2);
}

#[tokio::test]
async fn errors_map_to_sqlstates() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let missing = Ulid::new();
    assert_eq!(
        error_code(&client, &availability_sql(missing, "2025-01-01", "2025-01-02", 1)).await,
        "P0002"
    );

    let product = Ulid::new();
    client
        .simple_query(&format!("INSERT INTO products (id, stock) VALUES ('{product}', 1)"))
        .await
        .unwrap();
    assert_eq!(
        error_code(&client, &availability_sql(product, "2025-01-05", "2025-01-05", 1)).await,
        "22023"
    );
    assert_eq!(
        error_code(&client, "SELECT * FROM nowhere").await,
        "42601"
    );
    assert_eq!(
        error_code(&client, &format!("INSERT INTO products (id, stock) VALUES ('{product}', 1)")).await,
        "23505"
    );

    let second = Ulid::new();
    let third = Ulid::new();
    assert_eq!(
        error_code(
            &client,
            &format!("INSERT INTO products (id, stock) VALUES ('{second}', 1), ('{third}', 2)")
        )
        .await,
        "42601"
    );
    assert_eq!(
        error_code(&client, &availability_sql(third, "2025-01-01", "2025-01-02", 1)).await,
        "P0002"
    );
}

#[tokio::test]
async fn calendar_and_products_listing() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let product = Ulid::new();
    let variant = Ulid::new();
    client
        .simple_query(&format!("INSERT INTO products (id, stock) VALUES ('{product}', 2)"))
        .await
        .unwrap();
    client
        .simple_query(&format!(
            "INSERT INTO variants (id, product_id, stock, name) VALUES ('{variant}', '{product}', 1, 'Large')"
        ))
        .await
        .unwrap();
    reserve(&client, Ulid::new(), product, 1, "2025-03-02", "2025-03-04").await;

    let days = rows(
        &client,
        &format!(
            "SELECT * FROM calendar WHERE product_id = '{product}' \
             AND start_date = '2025-03-01' AND end_date = '2025-03-05'"
        ),
    )
    .await;
    let free: Vec<&str> = days.iter().filter_map(|r| r.get("free")).collect();
    assert_eq!(free, vec!["2", "1", "1", "2"]);

    let listing = rows(&client, "SELECT * FROM products").await;
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[1].get("variant_id"), Some(variant.to_string().as_str()));
    assert_eq!(listing[1].get("name"), Some("Large"));
}

#[tokio::test]
async fn cancel_with_bound_parameter() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;

    let product = Ulid::new();
    client
        .simple_query(&format!("INSERT INTO products (id, stock) VALUES ('{product}', 1)"))
        .await
        .unwrap();
    let order = Ulid::new();
    reserve(&client, order, product, 1, "2025-04-01", "2025-04-03").await;

    let order_str = order.to_string();
    let cancelled = client
        .execute("DELETE FROM reservations WHERE order_id = $1", &[&order_str])
        .await
        .unwrap();
    assert_eq!(cancelled, 1);
    let again = client
        .execute("DELETE FROM reservations WHERE order_id = $1", &[&order_str])
        .await
        .unwrap();
    assert_eq!(again, 0);
    assert!(engine.order_reservations(order).await.iter().all(|r| !r.is_active()));
}
