//! tagwire-server: demo server for the echo/online/offline/login protocol
//!
//! Features:
//! - Echo requests are sent straight back
//! - Logins receive a default player
//! - Online requests are counted and answered with the server state (run
//!   tagwire-client with `--no-online-reply` against servers that stay silent)
//! - Offline notices from clients close their connection
//! - Ctrl-C kicks every client with an offline notice, then shuts down

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tagwire::config::{init_logging, Config};
use tagwire::messages::{
    Echo, LoginReply, LoginRequest, OfflineNotice, OnlineReply, OnlineRequest, PlayerData,
    ServerState, ECHO, LOGIN, ONLINE,
};
use tagwire::{Connection, DispatchTable, Endpoint};
use tracing::{info, warn};

/// How long a kicked client gets to receive its offline notice.
const KICK_TIMEOUT: Duration = Duration::from_secs(2);

/// State shared by all handlers.
#[derive(Debug)]
struct Status {
    state: AtomicI32,
    online: AtomicI64,
}

impl Status {
    fn new() -> Self {
        Self {
            state: AtomicI32::new(ServerState::Maintaining.into()),
            online: AtomicI64::new(0),
        }
    }

    fn state(&self) -> ServerState {
        ServerState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(ServerState::Shutdown)
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state.into(), Ordering::Release);
    }
}

fn build_table(status: Arc<Status>) -> tagwire::Result<DispatchTable> {
    let mut table = DispatchTable::new();

    table.register(ECHO, |msg: Echo, ctx| async move {
        info!(peer = %ctx.peer(), value = msg.value, "echo request");
        ctx.reply(&msg).await
    })?;

    table.register(LOGIN, |req: LoginRequest, ctx| async move {
        info!(peer = %ctx.peer(), username = %req.username, "login request");
        let reply = LoginReply {
            player: PlayerData::default(),
            need_create_role: false,
        };
        ctx.reply(&reply).await
    })?;

    table.register(ONLINE, move |_req: OnlineRequest, ctx| {
        let status = status.clone();
        async move {
            let count = status.online.fetch_add(1, Ordering::AcqRel) + 1;
            info!(peer = %ctx.peer(), online = count, "client online");

            // Count the client out again whenever its connection goes away
            let conn = ctx.connection().clone();
            let tracker = status.clone();
            tokio::spawn(async move {
                conn.closed().await;
                let count = tracker.online.fetch_sub(1, Ordering::AcqRel) - 1;
                info!(peer = %conn.peer(), online = count, "client offline");
            });

            let reply = OnlineReply {
                state: status.state(),
                error: String::new(),
            };
            ctx.reply(&reply).await
        }
    })?;

    Ok(table)
}

/// Tell a client the server is going away, then close its connection.
async fn kick(conn: Connection) {
    let notice = OfflineNotice {
        server_state: ServerState::Shutdown,
        error: String::new(),
    };
    let delivered = tokio::time::timeout(KICK_TIMEOUT, async {
        conn.send(&notice).await?;
        conn.close_gracefully().await
    })
    .await;

    match delivered {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(peer = %conn.peer(), error = %e, "kick notice not delivered"),
        Err(_) => {
            warn!(peer = %conn.peer(), "kick notice timed out");
            let _ = conn.close();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_logging(&config.log_level);

    info!(
        listen = %config.listen,
        max_connections = config.endpoint.max_connections,
        queue_capacity = config.endpoint.connection.queue_capacity,
        startup_delay_secs = config.startup_delay.as_secs(),
        "Starting tagwire server"
    );

    let status = Arc::new(Status::new());
    let table = Arc::new(build_table(status.clone())?);
    let endpoint = Endpoint::bind(config.listen.as_str(), table, config.endpoint.clone()).await?;

    let warmup = status.clone();
    let delay = config.startup_delay;
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        warmup.set_state(ServerState::Running);
        info!("server state is running");
    });

    let accept = endpoint.spawn_accept_loop();

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    status.set_state(ServerState::Shutdown);

    let kicks: Vec<_> = endpoint
        .connections()
        .into_iter()
        .map(|conn| tokio::spawn(kick(conn)))
        .collect();
    for task in kicks {
        let _ = task.await;
    }

    endpoint.close().await;
    accept.await??;

    info!("server stopped");
    Ok(())
}
