#![forbid(unsafe_code)]

use std::{process::ExitCode, time::Duration};

use argh::FromArgs;
use log::LevelFilter;
use sandprobe_proto::{SandboxConfig, msg::ExecuteReq};
use simple_logger::SimpleLogger;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::{
    execute::ExecutionForm, http_util::Endpoint, page::ExecutionPage, poller::TelemetryPoller,
};

mod chart;
mod execute;
mod form;
mod http_util;
mod multipart;
mod page;
mod poller;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[derive(FromArgs, Debug)]
#[argh(description = "A terminal client for the code execution sandbox.")]
struct ClientConfig {
    #[argh(
        option,
        short = 'a',
        default = "\"127.0.0.1:5000\".to_string()",
        description = "sandbox server address"
    )]
    pub server_addr: String,
    #[argh(
        switch,
        short = 't',
        description = "use TLS to connect to server (https instead of http)"
    )]
    pub tls: bool,
    #[argh(
        switch,
        short = '6',
        description = "prefer IPv6 when resolving server address"
    )]
    pub prefer_ipv6: bool,
    #[argh(subcommand)]
    pub command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    Dashboard(DashboardArgs),
    Execute(ExecuteArgs),
}

#[derive(FromArgs, Debug)]
#[argh(
    subcommand,
    name = "dashboard",
    description = "show live CPU/memory charts and security events"
)]
struct DashboardArgs {
    #[argh(
        option,
        default = "1000",
        description = "polling interval in milliseconds"
    )]
    pub interval_ms: u64,
}

#[derive(FromArgs, Debug)]
#[argh(
    subcommand,
    name = "execute",
    description = "run code in the sandbox and print the result"
)]
struct ExecuteArgs {
    #[argh(
        positional,
        description = "file containing the code, stdin when omitted or `-`"
    )]
    pub file: Option<String>,
    #[argh(
        option,
        default = "SandboxConfig::default().cpu_time_limit",
        description = "CPU time limit in seconds"
    )]
    pub cpu_time_limit: u32,
    #[argh(
        option,
        default = "SandboxConfig::default().memory_limit",
        description = "memory limit in MB"
    )]
    pub memory_limit: u32,
    #[argh(
        option,
        default = "SandboxConfig::default().timeout",
        description = "execution timeout in seconds"
    )]
    pub timeout: u32,
    #[argh(switch, description = "allow network access")]
    pub allow_network: bool,
    #[argh(switch, description = "allow filesystem access")]
    pub allow_filesystem: bool,
    #[argh(switch, description = "run inside a docker container")]
    pub use_docker: bool,
}

impl ExecuteArgs {
    fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            cpu_time_limit: self.cpu_time_limit,
            memory_limit: self.memory_limit,
            timeout: self.timeout,
            allow_network: self.allow_network,
            allow_filesystem: self.allow_filesystem,
            use_docker: self.use_docker,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;

    let cfg: ClientConfig = argh::from_env();
    log::debug!("Client config: {cfg:#?}");

    let endpoint = Endpoint {
        server_addr: cfg.server_addr,
        tls: cfg.tls,
        prefer_ipv6: cfg.prefer_ipv6,
    };

    match cfg.command {
        Command::Dashboard(args) => {
            dashboard(endpoint, Duration::from_millis(args.interval_ms)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Execute(args) => execute(endpoint, args).await,
    }
}

async fn dashboard(endpoint: Endpoint, interval: Duration) -> anyhow::Result<()> {
    let mut poller = TelemetryPoller::try_new(endpoint.clone(), interval)?;
    let shutdown_token = CancellationToken::new();
    tokio::spawn({
        let shutdown_token = shutdown_token.clone();
        async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            shutdown_token.cancel();
        }
    });

    log::info!("polling {} every {}ms", endpoint.url("/api/stats"), interval.as_millis());
    poller
        .run(shutdown_token, |page| {
            print!("{CLEAR_SCREEN}{}", page.render());
        })
        .await;

    Ok(())
}

async fn execute(endpoint: Endpoint, args: ExecuteArgs) -> anyhow::Result<ExitCode> {
    let code = match args.file.as_deref() {
        None | Some("-") => {
            let mut code = String::new();
            tokio::io::stdin().read_to_string(&mut code).await?;
            code
        }
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("unable to read {path}: {e}"))?,
    };

    let req = ExecuteReq {
        code,
        config: args.sandbox_config(),
    };
    let outcome = ExecutionForm::new(endpoint).submit(&req).await;
    if let Err(e) = &outcome {
        log::debug!("execute request failed: {e:?}");
    }

    let mut page = ExecutionPage::new();
    page.show(&outcome);
    print!("{}", page.render());

    Ok(if page.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
