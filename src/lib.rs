//! Export `zpool iostat` statistics as Prometheus gauges
//!
//! A background thread runs `zpool iostat` on a fixed interval, and the scrape endpoint serves the
//! latest values.

#[macro_use]
mod macros;

pub mod iostat;
pub mod poll;
pub mod registry;
pub mod size;

use crate::{
    poll::{Poller, ZpoolCommand},
    registry::MetricRegistry,
};
use anyhow::Context as _;
use crossbeam_channel::{Receiver, TryRecvError};
use serde::Serialize;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tiny_http::{Header, Request, Response, Server};

const ENDPOINT_METRICS: &str = "/metrics";
const ENDPOINT_ROOT: &str = "/";
const HTTP_NOT_FOUND: u32 = 404;
const HTTP_NOT_FOUND_STRING: &str = "Not Found";
/// Latency of observing a shutdown request while idle
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Command-line arguments (also accepted as environment variables)
#[derive(clap::Parser)]
#[clap(version)]
pub struct Args {
    /// Port for the metrics endpoint
    #[clap(long, env, default_value_t = 2112)]
    pub port: u16,
    /// Address to bind the metrics endpoint
    #[clap(long, env, default_value = "0.0.0.0")]
    pub bind_address: IpAddr,
    /// Path for the zpool command
    #[clap(long, env, default_value = "/sbin/zpool")]
    pub zpool_path: PathBuf,
    /// Seconds to wait before rerunning the zpool command
    #[clap(long, env, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    pub parse_seconds: u64,
    /// Namespace (i.e. a prefix) for exported metric names
    #[clap(long, env, default_value_t)]
    pub namespace: String,
    /// Value of the "hostname" label (defaults to the system hostname)
    #[clap(long, env = "HOSTNAME_LABEL")]
    pub hostname: Option<String>,
    /// Print metrics once to stdout, then exit
    #[clap(long)]
    pub oneshot_test_print: bool,
}

impl Args {
    /// Socket address for the metrics endpoint
    #[must_use]
    pub fn listen_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
    /// Registers the initial metrics, then serves HTTP requests until interrupted (SIGINT/SIGTERM)
    ///
    /// # Errors
    /// Returns an error if the initial poll fails, or the server cannot be started
    pub fn serve(self) -> anyhow::Result<()> {
        let listen_address = self.listen_address();
        let Self {
            port: _,
            bind_address: _,
            zpool_path,
            parse_seconds,
            namespace,
            hostname,
            oneshot_test_print,
        } = self;

        let hostname = match hostname {
            Some(hostname) => hostname,
            None => system_hostname()?,
        };
        let registry = Arc::new(MetricRegistry::new(namespace));
        let poller = Poller::new(
            ZpoolCommand::new(zpool_path.clone()),
            hostname,
            Arc::clone(&registry),
        );

        // ensure fail-fast
        poller
            .register_initial()
            .context("failed to create metrics")?;

        if oneshot_test_print {
            print!("{}", registry.render()?);
            return Ok(());
        }

        let index_html = render_index(&IndexContext {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            zpool_path: zpool_path.display().to_string(),
            parse_seconds,
        })?;

        let server = Server::http(listen_address).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!("Listening at http://{listen_address}");

        let shutdown = shutdown_on_signal()?;
        // NOTE: not joined, the thread may be blocked on a hung zpool command
        let _poll_thread = poller
            .spawn(shutdown.clone(), Duration::from_secs(parse_seconds))
            .context("failed to spawn poll thread")?;
        tracing::info!("running zpool command every {parse_seconds} seconds");

        if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
            tracing::debug!("sd_notify ready failed: {err}");
        }

        let app = AppContext {
            registry,
            index_html,
        };
        while let Err(TryRecvError::Empty) = shutdown.try_recv() {
            let Some(request) = server.recv_timeout(RECV_TIMEOUT)? else {
                continue;
            };
            if let Err(err) = app.handle_request(request) {
                tracing::warn!("failed to respond: {err:#}");
            }
        }
        tracing::info!("user requested shutdown...");
        Ok(())
    }
}

fn system_hostname() -> anyhow::Result<String> {
    nix::unistd::gethostname()
        .context("failed to get hostname")?
        .into_string()
        .map_err(|hostname| anyhow::anyhow!("non-UTF8 hostname {hostname:?}"))
}

/// Returns a receiver that disconnects on SIGINT/SIGTERM
fn shutdown_on_signal() -> anyhow::Result<Receiver<()>> {
    let (sender, receiver) = crossbeam_channel::bounded(0);
    let mut sender = Some(sender);
    ctrlc::set_handler(move || {
        // disconnect all receivers
        drop(sender.take());
    })
    .context("failed to set signal handler")?;
    Ok(receiver)
}

/// Renders the metrics text for the provided `zpool iostat` output, without running commands
///
/// # Errors
/// Returns an error if the output fails to parse, or a gauge is rejected
pub fn metrics_for_output(
    iostat_output: &str,
    hostname: &str,
    namespace: &str,
) -> anyhow::Result<String> {
    let registry = MetricRegistry::new(namespace);
    for pool in iostat::parse(iostat_output, hostname)? {
        registry.register(&pool)?;
    }
    registry.render()
}

struct AppContext {
    registry: Arc<MetricRegistry>,
    index_html: String,
}
impl AppContext {
    fn handle_request(&self, request: Request) -> anyhow::Result<()> {
        let response = match request.url() {
            ENDPOINT_METRICS => self.metrics_response()?,
            ENDPOINT_ROOT => Response::from_data(self.index_html.clone().into_bytes())
                .with_header(content_type_header("text/html; charset=utf-8")?),
            _ => Response::from_string(HTTP_NOT_FOUND_STRING).with_status_code(HTTP_NOT_FOUND),
        };
        Ok(request.respond(response)?)
    }
    fn metrics_response(&self) -> anyhow::Result<Response<std::io::Cursor<Vec<u8>>>> {
        let metrics_str = match self.registry.render() {
            Ok(metrics) => metrics,
            Err(err) => format!("# ERROR:\n# {err:#}\n"),
        };
        let content_type = content_type_header(&self.registry.content_type())?;
        Ok(Response::from_data(metrics_str.into_bytes()).with_header(content_type))
    }
}

fn content_type_header(value: &str) -> anyhow::Result<Header> {
    Header::from_bytes("Content-Type", value)
        .map_err(|()| anyhow::anyhow!("invalid content type {value:?}"))
}

const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><title>{name}</title></head>
<body>
<h1>{name} v{version}</h1>
<p>Polling <code>{zpool_path}</code> every {parse_seconds} seconds</p>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>
"#;

#[derive(Serialize)]
struct IndexContext {
    name: &'static str,
    version: &'static str,
    zpool_path: String,
    parse_seconds: u64,
}

fn render_index(context: &IndexContext) -> anyhow::Result<String> {
    let mut templates = tinytemplate::TinyTemplate::new();
    templates
        .add_template("index", INDEX_TEMPLATE)
        .context("index template")?;
    Ok(templates.render("index", context)?)
}
