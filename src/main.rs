//! Payguard CLI binary entry point.

use std::sync::Arc;

use clap::Parser;
use payguard::cli::{parse_header, Cli, Commands, ProbeArgs};
use payguard::client::ResilientClient;
use payguard::config::{ResilienceConfig, ResilienceOptions};
use payguard::error::PayguardError;
use payguard::retry::RetryEvent;
use payguard::transport::{HttpRequest, ReqwestTransport};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Probe(args) => handle_probe(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_probe(args: ProbeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ResilienceConfig::from_toml_file(path)?,
        None => ResilienceConfig::from_env()?,
    };
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }

    let method: reqwest::Method = args
        .method
        .to_uppercase()
        .parse()
        .map_err(|_| format!("Invalid HTTP method: '{}'", args.method))?;

    let mut request = HttpRequest::new(method, args.url.clone());
    for raw in &args.headers {
        let (name, value) =
            parse_header(raw).ok_or_else(|| format!("Invalid header '{raw}', expected 'name: value'"))?;
        if !request.set_header(name, value) {
            return Err(format!("Invalid header '{raw}'").into());
        }
    }
    if let Some(body) = args.data {
        request = request.body(body);
    }

    let options = ResilienceOptions::new(config).with_on_retry(Arc::new(|event: &RetryEvent| {
        eprintln!(
            "retry {}/{} in {}ms ({})",
            event.retry_count, event.max_retries, event.delay_ms, event.kind
        );
    }));
    let client = ResilientClient::new(Arc::new(ReqwestTransport::default()), options)?;

    match client.send(request).await {
        Ok(response) => {
            println!("{}", response.status);
            if !response.body.is_empty() {
                println!("{}", response.body);
            }
            if let Some(snapshot) = client.rate_limit_snapshot() {
                eprintln!("rate limit: {}", serde_json::to_string(&snapshot)?);
            }
            Ok(())
        }
        Err(PayguardError::Request(error)) => {
            match &error.diagnostics {
                Some(report) => println!("{}", report.to_json_pretty()?),
                None => println!("{error}"),
            }
            Err(format!("{} ({})", error.code, error.recovery_suggestion().describe()).into())
        }
        Err(other) => Err(other.into()),
    }
}
