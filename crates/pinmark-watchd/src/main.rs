use anyhow::{Context, Result};
use clap::Parser;
use pinmark_core::watcher::{GATE_MENU, GATE_PING};
use pinmark_core::{
    BackgroundWatcher, ConfigSync, ContextId, LocalBus, NavigationEvent, Options,
    PinboardClient, SqliteKvStore, TabId, TabStateReconciler, TabTable,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

mod hosts;
mod settings;

#[derive(Parser, Debug)]
#[command(name = "watchd", version, about = "pinmark background watcher")]
struct Cli {
    /// Optional database path (overrides settings)
    #[arg(long)]
    db: Option<PathBuf>,
    /// Listening port on 127.0.0.1 (0 = auto; overrides settings)
    #[arg(long)]
    port: Option<u16>,
    /// Exit automatically after N milliseconds (for CI/testing)
    #[arg(long)]
    exit_after_ms: Option<u64>,
    /// Serve a one-shot health response, then exit
    #[arg(long, default_value_t = false)]
    health_once: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DaemonInfo {
    port: u16,
    started_at: i64,
    pid: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request {
    Health,
    Navigated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        incognito: bool,
    },
    Closed {
        tab_id: TabId,
    },
    Options {
        options: Value,
    },
    Saved {
        url: String,
    },
    Deleted {
        url: String,
    },
}

#[derive(Debug, Clone, Serialize)]
struct Response {
    ok: bool,
    data: Option<Value>,
    error: Option<String>,
}

impl Response {
    fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

struct Daemon {
    tabs: Arc<TabTable>,
    reconciler: Arc<TabStateReconciler>,
    watcher: Arc<BackgroundWatcher>,
    /// Publishes options that arrive over the socket, as their own context.
    socket_sync: ConfigSync,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PINMARK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = settings::load_settings();
    let db_path = cli
        .db
        .clone()
        .or_else(|| settings.storage.db_path.clone())
        .unwrap_or_else(settings::default_db_path);
    let api_url = settings
        .api
        .base_url
        .clone()
        .unwrap_or_else(|| pinmark_core::remote::DEFAULT_API_URL.to_string());
    let port = cli.port.or(settings.watchd.port).unwrap_or(0);

    let kv = Arc::new(
        SqliteKvStore::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?,
    );
    let remote = Arc::new(PinboardClient::with_base_url(&api_url, kv.clone())?);
    let tabs = Arc::new(TabTable::new());
    let reconciler = Arc::new(TabStateReconciler::new(
        remote,
        Arc::new(hosts::StdoutIndicator),
        tabs.clone(),
    ));
    let watcher =
        Arc::new(BackgroundWatcher::new(reconciler.clone(), Arc::new(hosts::LogMenuHost)).await);

    let bus = LocalBus::default();
    let sync = ConfigSync::new(ContextId::new(), bus.clone(), kv.clone()).await?;
    watcher.apply_options(&sync.current()).await?;
    let listener_watcher = watcher.clone();
    let _options_task = sync.start(move |options: Options| {
        let watcher = listener_watcher.clone();
        async move {
            if let Err(e) = watcher.apply_options(&options).await {
                tracing::warn!("cannot apply options: {e}");
            }
        }
    });
    let socket_sync = ConfigSync::new(ContextId::new(), bus, kv.clone()).await?;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let port = listener.local_addr()?.port();
    write_daemon_info(port)?;
    tracing::info!(port, db = %db_path.display(), "watchd listening");

    let daemon = Arc::new(Daemon {
        tabs,
        reconciler,
        watcher,
        socket_sync,
    });

    if cli.health_once {
        if let Ok((mut stream, _addr)) = listener.accept().await {
            let s = serde_json::to_string(&Response::ok(daemon.health().await))?;
            stream.write_all(format!("{s}\n").as_bytes()).await?;
        }
        return Ok(());
    }

    let server = serve(listener, daemon);
    match cli.exit_after_ms {
        Some(ms) => {
            tokio::select! {
                _ = server => {}
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                    tracing::info!("exit-after-ms elapsed");
                }
            }
        }
        None => server.await,
    }
    Ok(())
}

async fn serve(listener: TcpListener, daemon: Arc<Daemon>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let daemon = daemon.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(daemon, stream).await {
                        tracing::warn!("client error: {e}");
                    }
                });
            }
            Err(e) => tracing::warn!("accept error: {e}"),
        }
    }
}

async fn handle_client(daemon: Arc<Daemon>, stream: TcpStream) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let resp = match serde_json::from_str::<Request>(&line) {
            Ok(req) => daemon.handle(req).await,
            Err(e) => Response::err(format!("bad request: {e}")),
        };
        let s = serde_json::to_string(&resp)?;
        writer.write_all(format!("{s}\n").as_bytes()).await?;
        writer.flush().await?;
    }
    tracing::debug!(%peer, "client disconnected");
    Ok(())
}

impl Daemon {
    async fn handle(&self, req: Request) -> Response {
        match req {
            Request::Health => Response::ok(self.health().await),
            Request::Navigated {
                tab_id,
                url,
                incognito,
            } => {
                let event = NavigationEvent {
                    tab_id,
                    url,
                    incognito,
                };
                self.tabs.record(&event);
                let watched = self.watcher.navigated(event);
                Response::ok(json!({ "watched": watched }))
            }
            Request::Closed { tab_id } => {
                self.tabs.close(tab_id);
                Response::ok(json!({ "tabs": self.tabs.len() }))
            }
            Request::Options { options } => {
                let Some(options) = Options::from_value(&options) else {
                    return Response::err("bad options");
                };
                match self.socket_sync.publish(options).await {
                    Ok(changed) => Response::ok(json!({ "changed": changed })),
                    Err(e) => Response::err(e.to_string()),
                }
            }
            Request::Saved { url } => {
                self.reconciler.after_save(&url).await;
                Response::ok(Value::Null)
            }
            Request::Deleted { url } => {
                self.reconciler.after_delete(&url).await;
                Response::ok(Value::Null)
            }
        }
    }

    async fn health(&self) -> Value {
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "now": OffsetDateTime::now_utc().unix_timestamp(),
            "ping": self.watcher.is_active(GATE_PING).await,
            "menu": self.watcher.is_active(GATE_MENU).await,
            "tabs": self.tabs.len(),
        })
    }
}

fn write_daemon_info(port: u16) -> Result<()> {
    let info = DaemonInfo {
        port,
        started_at: OffsetDateTime::now_utc().unix_timestamp(),
        pid: std::process::id(),
    };
    let path = settings::info_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, serde_json::to_vec_pretty(&info)?)?;
    Ok(())
}
