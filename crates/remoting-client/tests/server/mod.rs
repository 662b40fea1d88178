//! Scripted TCP server for the integration tests.
//!
//! Speaks the length-prefixed JSON envelope protocol and answers a fixed set
//! of actions:
//!
//! - `Login`: counts handshakes, optionally delays, rejects or issues a key
//! - `Echo`: returns the request payload
//! - `Secure`: like `Echo`, but answers 401 while the expiry budget lasts
//! - `Ping`: `{"time", "serverTime"}`
//! - `Fail`: code 500 with text `boom`
//! - `Slow`: echoes after 300ms
//! - `Garbage`: code 0 with a payload that is not JSON
//! - `Flagged`: `{"flag": <request flag>}`
//! - `Notify`: one-way, counted
//!
//! With `require_login`, every action but `Login` answers 401 until the
//! connection has logged in. Every TCP connection records the actions it
//! received, in order.

#![allow(dead_code)]

use remoting_common::auth::seal_session_key;
use remoting_common::{read_frame, write_frame, Message, MessageCodec};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub require_login: bool,
    pub login_delay: Duration,
    pub reject_login: bool,
    /// Number of `Secure` calls answered with 401
    pub expire_budget: usize,
    /// `(secret, key)`: seal `key` with `secret` into the login response
    pub session_key: Option<(String, Vec<u8>)>,
    pub clock_skew_ms: i64,
}

#[derive(Default)]
struct ServerState {
    options: ServerOptions,
    logins: AtomicUsize,
    connections: AtomicUsize,
    notifications: AtomicUsize,
    expire_budget: AtomicUsize,
    login_args: Mutex<Vec<Value>>,
    actions: Mutex<Vec<Vec<String>>>,
}

pub struct TestServer {
    pub addr: String,
    state: Arc<ServerState>,
    accept_loop: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(options: ServerOptions) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(ServerState {
            expire_budget: AtomicUsize::new(options.expire_budget),
            options,
            ..ServerState::default()
        });

        let accept_state = Arc::clone(&state);
        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = {
                    let mut actions = accept_state.actions.lock().unwrap();
                    actions.push(Vec::new());
                    actions.len() - 1
                };
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&accept_state), index));
            }
        });

        Self {
            addr,
            state,
            accept_loop,
        }
    }

    pub async fn echo() -> Self {
        Self::start(ServerOptions::default()).await
    }

    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> usize {
        self.state.notifications.load(Ordering::SeqCst)
    }

    pub fn login_args(&self) -> Vec<Value> {
        self.state.login_args.lock().unwrap().clone()
    }

    /// Actions received per TCP connection, in accept order.
    pub fn actions(&self) -> Vec<Vec<String>> {
        self.state.actions.lock().unwrap().clone()
    }

    /// Waits until `check` holds, failing the test after two seconds.
    pub async fn wait_for(&self, check: impl Fn(&Self) -> bool) {
        for _ in 0..200 {
            if check(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

/// Routes client logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An address nothing listens on.
pub async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

async fn serve(mut stream: TcpStream, state: Arc<ServerState>, index: usize) {
    let codec = MessageCodec::Json;
    let mut logged_in = false;

    while let Ok(frame) = read_frame(&mut stream).await {
        let Ok(request) = codec.decode(&frame) else {
            break;
        };
        state.actions.lock().unwrap()[index].push(request.action.clone());

        let Some((code, payload)) = handle(&state, &request, &mut logged_in).await else {
            continue;
        };
        if !request.expects_reply() {
            continue;
        }

        let reply = Message::response_to(&request, code, payload);
        let data = codec.encode(&reply).unwrap();
        if write_frame(&mut stream, &data).await.is_err() {
            break;
        }
    }
}

async fn handle(state: &ServerState, request: &Message, logged_in: &mut bool) -> Option<(i32, Vec<u8>)> {
    let options = &state.options;
    let args: Value = serde_json::from_slice(&request.payload).unwrap_or(Value::Null);

    if request.action == "Login" {
        state.logins.fetch_add(1, Ordering::SeqCst);
        state.login_args.lock().unwrap().push(args);
        tokio::time::sleep(options.login_delay).await;

        if options.reject_login {
            return Some((403, b"invalid credentials".to_vec()));
        }
        *logged_in = true;

        let mut response = json!({"token": format!("t-{}", state.logins.load(Ordering::SeqCst))});
        if let Some((secret, key)) = &options.session_key {
            response["key"] = json!(seal_session_key(secret, key).unwrap());
        }
        return Some((0, serde_json::to_vec(&response).unwrap()));
    }

    if options.require_login && !*logged_in {
        return Some((401, b"session expired".to_vec()));
    }

    match request.action.as_str() {
        "Echo" => Some((0, request.payload.clone())),
        "Secure" => {
            let expired = state
                .expire_budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if expired {
                *logged_in = false;
                Some((401, b"session expired".to_vec()))
            } else {
                Some((0, request.payload.clone()))
            }
        }
        "Ping" => {
            let reply = json!({
                "time": args["time"],
                "serverTime": now_ms() + options.clock_skew_ms,
            });
            Some((0, serde_json::to_vec(&reply).unwrap()))
        }
        "Fail" => Some((500, b"boom".to_vec())),
        "Slow" => {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Some((0, request.payload.clone()))
        }
        "Garbage" => Some((0, b"{not json".to_vec())),
        "Flagged" => Some((0, serde_json::to_vec(&json!({"flag": request.flag})).unwrap())),
        "Notify" => {
            state.notifications.fetch_add(1, Ordering::SeqCst);
            None
        }
        _ => Some((404, b"unknown action".to_vec())),
    }
}
