use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Parser};
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edgeguard::access::AllowList;
use edgeguard::{GatewayConfig, Result, gateway};

const GENERATED_PASSWORD_LEN: usize = 12;

#[derive(Parser)]
#[command(name = "edgeguard")]
#[command(about = "DNS interceptor and transparent proxy for captive-portal hotspots", long_about = None)]
struct Args {
    /// Upstream DNS server (ip:port)
    #[arg(long, default_value = "8.8.8.8:53")]
    forward_dns: SocketAddr,

    /// Comma separated CIDR ranges allowed to use the gateway (empty allows all)
    #[arg(long, default_value = "127.0.0.1/32,127.0.0.2/32")]
    allowed_ips: String,

    /// Require a portal login before traffic is let through
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    captive_portal: bool,

    /// Domain serving the login page
    #[arg(long, default_value = "cnet.portal")]
    portal_domain: String,

    /// Domain serving the management panel
    #[arg(long, default_value = "cnet.panel")]
    panel_domain: String,

    #[arg(long, default_value = "admin")]
    admin_username: String,

    /// Panel password; generated and logged at startup when omitted
    #[arg(long)]
    admin_password: Option<String>,

    /// DNS listen address
    #[arg(long, default_value = "127.0.0.1:53")]
    dns_bind: SocketAddr,

    /// IPv4 address handed out for redirected names
    #[arg(long, default_value = "127.0.0.2")]
    router_ipv4: Ipv4Addr,

    /// IPv6 address handed out for redirected names
    #[arg(long, default_value = "::")]
    router_ipv6: Ipv6Addr,

    /// HTTP listen address
    #[arg(long, default_value = "127.0.0.2:80")]
    http_bind: SocketAddr,

    /// HTTPS listen address
    #[arg(long, default_value = "127.0.0.2:443")]
    https_bind: SocketAddr,

    /// Directory holding ads.txt, nsfw.txt, scam.txt and proxy-list.txt
    #[arg(long, default_value = "data")]
    policy_dir: PathBuf,

    /// Hotspot user to create at startup (repeatable)
    #[arg(long = "user", value_name = "NAME:PASSWORD", value_parser = parse_user)]
    users: Vec<(String, String)>,

    /// Seconds between expired cache sweeps (0 disables the sweep)
    #[arg(long, default_value = "0")]
    sweep_interval: u64,

    /// Log every DNS decision and connection
    #[arg(short, long)]
    verbose: bool,
}

fn parse_user(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once(':') {
        Some((name, password)) if !name.is_empty() && !password.is_empty() => {
            Ok((name.to_string(), password.to_string()))
        }
        _ => Err(format!("expected NAME:PASSWORD, got {value:?}")),
    }
}

impl Args {
    fn into_config(self) -> Result<GatewayConfig> {
        let admin_password = match self.admin_password {
            Some(password) => password,
            None => {
                let password: String = rand::rng()
                    .sample_iter(&Alphanumeric)
                    .take(GENERATED_PASSWORD_LEN)
                    .map(char::from)
                    .collect();
                warn!(username = %self.admin_username, password = %password, "no admin password given, generated one");
                password
            }
        };

        let config = GatewayConfig {
            forward_dns: self.forward_dns,
            allowed_ips: AllowList::parse(&self.allowed_ips)?,
            captive_portal: self.captive_portal,
            portal_domain: self.portal_domain.trim_end_matches('.').to_ascii_lowercase(),
            panel_domain: self.panel_domain.trim_end_matches('.').to_ascii_lowercase(),
            admin_username: self.admin_username,
            admin_password,
            dns_bind: self.dns_bind,
            router_ipv4: self.router_ipv4,
            router_ipv6: self.router_ipv6,
            http_bind: self.http_bind,
            https_bind: self.https_bind,
            policy_dir: self.policy_dir,
            users: self.users,
            sweep_interval: (self.sweep_interval > 0).then(|| Duration::from_secs(self.sweep_interval)),
            ..GatewayConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

async fn serve(config: GatewayConfig) -> Result<()> {
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutting down");
                signal.cancel();
            }
            Err(e) => warn!("cannot listen for Ctrl-C: {e}"),
        }
    });

    gateway::run(config, shutdown).await
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = args.into_config().and_then(|config| {
        let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        rt.block_on(serve(config))
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
