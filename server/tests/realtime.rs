use futures::{SinkExt, StreamExt};
use huddle::api::{build_router, AppState};
use huddle::config::{Config, RealtimeConfig};
use huddle::model::MembershipRecord;
use huddle::store::{SqliteStore, Store};
use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, JoinHandle<()>, SqliteStore, tempfile::TempDir) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let database = tmp.path().join("huddle.db");
    let store = SqliteStore::open(&database).unwrap();
    for (name, id) in [("Alice", 1), ("Bob", 2)] {
        store
            .upsert_member(MembershipRecord::member("general", name, Some(id)))
            .await
            .unwrap();
        store.upsert_user(id, name).await.unwrap();
    }
    let mut banned = MembershipRecord::member("general", "Eve", Some(5));
    banned.is_banned = true;
    store.upsert_member(banned).await.unwrap();

    let config = Config {
        bind: addr.to_string(),
        database,
        logging_enabled: false,
        realtime: RealtimeConfig {
            handshake_timeout: Duration::from_millis(300),
            ..Default::default()
        },
    };
    let state = AppState::new(config).unwrap();
    let app = build_router(state);
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, store, tmp)
}

async fn open(addr: SocketAddr, room_header: Option<&str>) -> Ws {
    let mut req = format!("ws://{}/ws", addr).into_client_request().unwrap();
    if let Some(room) = room_header {
        req.headers_mut().append("room", room.parse().unwrap());
    }
    let (ws, _) = connect_async(req).await.unwrap();
    ws
}

async fn join(addr: SocketAddr, user: Value) -> Ws {
    let mut ws = open(addr, None).await;
    ws.send(WsMessage::Text(
        json!({"auth": {"room": "general", "user": user}}).to_string(),
    ))
    .await
    .unwrap();
    // own arrival: activeUsers then userOnline
    assert_eq!(next_event(&mut ws).await["event"], "activeUsers");
    assert_eq!(next_event(&mut ws).await["event"], "userOnline");
    ws
}

async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .unwrap();
        if let WsMessage::Text(txt) = msg {
            return serde_json::from_str(&txt).unwrap();
        }
    }
}

async fn wait_for(ws: &mut Ws, event: &str) -> Value {
    loop {
        let v = next_event(ws).await;
        if v["event"] == event {
            return v;
        }
    }
}

async fn emit(ws: &mut Ws, event: &str, data: Value) {
    ws.send(WsMessage::Text(json!({"event": event, "data": data}).to_string()))
        .await
        .unwrap();
}

#[tokio::test]
async fn health_probe() {
    let (addr, server, _store, _tmp) = spawn_server().await;
    let resp = reqwest::get(format!("http://{}/api/health", addr)).await.unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.text().await.unwrap(), "ok");
    server.abort();
}

#[tokio::test]
async fn handshake_rejections() {
    let (addr, server, _store, _tmp) = spawn_server().await;

    let mut ws = open(addr, None).await;
    ws.send(WsMessage::Text(json!({"auth": {"user": {"name": "A"}}}).to_string()))
        .await
        .unwrap();
    let v = next_event(&mut ws).await;
    assert_eq!(v["event"], "connect_error");
    assert_eq!(v["data"]["message"], "Room ID required");

    let mut ws = open(addr, None).await;
    ws.send(WsMessage::Text(json!({"auth": {"room": "general"}}).to_string()))
        .await
        .unwrap();
    assert_eq!(next_event(&mut ws).await["data"]["message"], "User required");

    // silence until the handshake deadline
    let mut ws = open(addr, None).await;
    assert_eq!(next_event(&mut ws).await["event"], "connect_error");
    server.abort();
}

#[tokio::test]
async fn room_from_header() {
    let (addr, server, _store, _tmp) = spawn_server().await;
    let mut ws = open(addr, Some("general")).await;
    ws.send(WsMessage::Text(json!({"auth": {"user": {"user_id": 1, "name": "Alice"}}}).to_string()))
        .await
        .unwrap();
    let v = next_event(&mut ws).await;
    assert_eq!(v["event"], "activeUsers");
    assert_eq!(v["data"][0]["name"], "Alice");
    server.abort();
}

#[tokio::test]
async fn message_flow_between_members() {
    let (addr, server, store, _tmp) = spawn_server().await;
    let mut bob = join(addr, json!({"user_id": 2, "name": "Bob"})).await;
    let mut alice = join(addr, json!({"user_id": "1", "name": "Alice"})).await;

    let v = wait_for(&mut bob, "userOnline").await;
    assert_eq!(v["data"]["userId"], "1");

    emit(&mut alice, "message", json!({"body": "hello bob"})).await;
    let v = wait_for(&mut bob, "message").await;
    assert_eq!(v["data"]["message"], "hello bob");
    assert_eq!(v["data"]["name"], "Alice");
    let id = v["data"]["id"].as_str().unwrap().to_string();

    // no echo: the next frame Alice sees is her roster reply
    emit(&mut alice, "getUsers", Value::Null).await;
    let v = next_event(&mut alice).await;
    assert_eq!(v["event"], "activeUsers");
    assert_eq!(v["data"].as_array().unwrap().len(), 2);

    emit(&mut bob, "addReaction", json!({"message_id": id, "emoji": "👍", "user_name": "Bob"})).await;
    let v = wait_for(&mut alice, "reactionAdded").await;
    assert_eq!(v["data"]["user_name"], "Bob");
    emit(&mut bob, "addReaction", json!({"message_id": id, "emoji": "👍", "user_name": "Bob"})).await;
    wait_for(&mut alice, "reactionAdded").await;

    emit(&mut bob, "markAsRead", json!({"messageIds": [id], "userName": "Bob"})).await;
    let v = wait_for(&mut alice, "messagesRead").await;
    assert_eq!(v["data"]["userId"], 2);

    alice.close(None).await.unwrap();
    let v = wait_for(&mut bob, "userLeft").await;
    assert_eq!(v["data"]["userId"], "1");
    let v = wait_for(&mut bob, "activeUsers").await;
    assert_eq!(v["data"].as_array().unwrap().len(), 1);
    wait_for(&mut bob, "userOffline").await;

    let history = store.list_messages("general", 50).await.unwrap();
    assert_eq!(history.len(), 1);
    server.abort();
}

#[tokio::test]
async fn banned_member_is_refused() {
    let (addr, server, store, _tmp) = spawn_server().await;
    let mut bob = join(addr, json!({"user_id": 2, "name": "Bob"})).await;
    let mut eve = join(addr, json!({"user_id": 5, "name": "Eve"})).await;
    wait_for(&mut bob, "userOnline").await;

    emit(&mut eve, "message", json!({"body": "spam"})).await;
    let v = next_event(&mut eve).await;
    assert_eq!(v["event"], "error");
    assert_eq!(v["data"]["message"], "You are banned from this group");

    emit(&mut bob, "getUsers", Value::Null).await;
    assert_eq!(next_event(&mut bob).await["event"], "activeUsers");
    assert!(store.list_messages("general", 50).await.unwrap().is_empty());
    server.abort();
}

#[tokio::test]
async fn reconnect_keeps_single_roster_entry() {
    let (addr, server, _store, _tmp) = spawn_server().await;
    let mut first = join(addr, json!({"user_id": 1, "name": "Alice"})).await;
    let mut second = join(addr, json!({"user_id": 1, "name": "Alice"})).await;

    emit(&mut second, "getUsers", Value::Null).await;
    let v = wait_for(&mut second, "activeUsers").await;
    assert_eq!(v["data"].as_array().unwrap().len(), 1);

    // the stale socket goes away without announcing a departure
    first.close(None).await.unwrap();
    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;
    emit(&mut second, "getUsers", Value::Null).await;
    let v = next_event(&mut second).await;
    assert_eq!(v["event"], "activeUsers");
    assert_eq!(v["data"].as_array().unwrap().len(), 1);
    server.abort();
}
