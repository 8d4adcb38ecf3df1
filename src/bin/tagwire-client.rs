//! tagwire-client: concurrent load driver for tagwire-server
//!
//! Each simulated client dials the server, goes online, logs in, fires a
//! batch of echo requests, waits for every reply and then goes offline.
//!
//! tagwire-server answers the online request with its state. Servers that
//! never answer it can be driven with `--no-online-reply`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tagwire::config::init_logging;
use tagwire::messages::{
    Echo, LoginReply, LoginRequest, OfflineRequest, OnlineReply, OnlineRequest, ECHO, LOGIN, ONLINE,
};
use tagwire::{Connection, ConnectionConfig, DispatchTable};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Command-line arguments for the client driver
#[derive(Parser, Debug)]
#[command(name = "tagwire-client")]
#[command(version)]
#[command(about = "Concurrent client driver for tagwire-server", long_about = None)]
struct ClientArgs {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6666")]
    addr: String,

    /// Number of concurrent clients
    #[arg(short = 'n', long, default_value_t = 1)]
    clients: usize,

    /// Echo requests per client
    #[arg(short = 'r', long, default_value_t = 1)]
    requests: usize,

    /// Outbound queue capacity per connection (0 = unbuffered)
    #[arg(short = 'q', long, default_value_t = 0)]
    queue_capacity: usize,

    /// Do not wait for a reply to the online request
    #[arg(long)]
    no_online_reply: bool,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Replies routed from the read task to the driving task.
#[derive(Debug)]
enum Reply {
    Online(OnlineReply),
    Login(LoginReply),
    Echo(Echo),
}

fn build_table(replies: mpsc::UnboundedSender<Reply>) -> tagwire::Result<DispatchTable> {
    let mut table = DispatchTable::new();

    let tx = replies.clone();
    table.register(ONLINE, move |reply: OnlineReply, _ctx| {
        let _ = tx.send(Reply::Online(reply));
        async { Ok(()) }
    })?;

    let tx = replies.clone();
    table.register(LOGIN, move |reply: LoginReply, _ctx| {
        let _ = tx.send(Reply::Login(reply));
        async { Ok(()) }
    })?;

    table.register(ECHO, move |reply: Echo, _ctx| {
        let _ = replies.send(Reply::Echo(reply));
        async { Ok(()) }
    })?;

    Ok(table)
}

async fn next_reply(
    rx: &mut mpsc::UnboundedReceiver<Reply>,
    timeout: Duration,
) -> Result<Reply, Box<dyn std::error::Error + Send + Sync>> {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(reply)) => Ok(reply),
        Ok(None) => Err("connection closed before the reply arrived".into()),
        Err(_) => Err(format!("no reply within {:?}", timeout).into()),
    }
}

async fn run_client(
    index: usize,
    args: Arc<ClientArgs>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let timeout = Duration::from_secs(args.timeout_secs);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = ConnectionConfig {
        queue_capacity: args.queue_capacity,
        ..Default::default()
    };

    let conn = Connection::dial(args.addr.as_str(), Arc::new(build_table(tx)?), config).await?;
    debug!(client = index, peer = %conn.peer(), "connected");

    let result = exchange(index, &conn, &mut rx, &args, timeout).await;

    // The server drops the socket as soon as it reads the offline notice
    if let Err(e) = conn.send(&OfflineRequest {}).await {
        debug!(client = index, error = %e, "offline notice not sent");
    }
    if let Err(e) = conn.close_gracefully().await {
        debug!(client = index, error = %e, "graceful close failed");
        if let Err(e) = conn.close() {
            debug!(client = index, error = %e, "connection already closed");
        }
    }
    conn.closed().await;
    result
}

async fn exchange(
    index: usize,
    conn: &Connection,
    rx: &mut mpsc::UnboundedReceiver<Reply>,
    args: &ClientArgs,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let requests = args.requests;

    conn.send(&OnlineRequest {}).await?;
    if args.no_online_reply {
        info!(client = index, "online");
    } else {
        match next_reply(rx, timeout).await? {
            Reply::Online(reply) => info!(client = index, state = %reply.state, "online"),
            other => return Err(format!("expected online reply, got {:?}", other).into()),
        }
    }

    let login = LoginRequest {
        username: format!("user{}", index),
        password: "test".to_string(),
    };
    conn.send(&login).await?;
    loop {
        match next_reply(rx, timeout).await? {
            Reply::Login(reply) => {
                info!(
                    client = index,
                    role = %reply.player.role_name,
                    level = reply.player.level,
                    "logged in"
                );
                break;
            }
            Reply::Online(reply) if args.no_online_reply => {
                debug!(client = index, state = %reply.state, "online reply ignored");
            }
            other => return Err(format!("expected login reply, got {:?}", other).into()),
        }
    }

    for value in 0..requests {
        conn.send(&Echo { value: value as i64 }).await?;
    }

    let mut pending: BTreeSet<i64> = (0..requests as i64).collect();
    while !pending.is_empty() {
        match next_reply(rx, timeout).await? {
            Reply::Echo(echo) => {
                if !pending.remove(&echo.value) {
                    warn!(client = index, value = echo.value, "unexpected echo value");
                }
            }
            other => return Err(format!("expected echo reply, got {:?}", other).into()),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Arc::new(ClientArgs::parse());
    init_logging(&args.log_level);

    info!(
        addr = %args.addr,
        clients = args.clients,
        requests = args.requests,
        "Starting tagwire client"
    );

    let started = Instant::now();
    let tasks: Vec<_> = (0..args.clients)
        .map(|index| {
            let args = args.clone();
            tokio::spawn(async move { (index, run_client(index, args).await) })
        })
        .collect();

    let mut failed = 0;
    for task in tasks {
        let (index, result) = task.await?;
        if let Err(e) = result {
            warn!(client = index, error = %e, "client failed");
            failed += 1;
        }
    }

    info!(
        clients = args.clients,
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "all clients finished"
    );

    if failed > 0 {
        return Err(format!("{} of {} clients failed", failed, args.clients).into());
    }
    Ok(())
}
