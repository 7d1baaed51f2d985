mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use lore_core::{App, AppBuilder, ChatRequest, Citation, IngestionRequest, RagError};
use tokio_util::sync::CancellationToken;

use crate::cli::{ChatArgs, Cli, Command, IngestArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let builder = AppBuilder::load(cli.config.as_deref()).await?;
    tracing::debug!(config = %builder.config_path().display(), "configuration loaded");
    let app = Arc::new(builder.build()?);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        signal.cancel();
    });

    let mut stdout = std::io::stdout().lock();
    match run(cli.command, app, &cancel, &mut stdout).await {
        Err(e) if is_cancelled(&e) => {
            writeln!(stdout, "operation cancelled")?;
            Ok(())
        }
        other => other,
    }
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    e.downcast_ref::<RagError>()
        .is_some_and(RagError::is_cancelled)
}

async fn run<W: Write>(
    command: Command,
    app: Arc<App>,
    cancel: &CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        Command::Ingest(args) => ingest(&app, args, cancel, out).await,
        Command::List => list(&app, cancel, out).await,
        Command::Delete { knowledge_base } => {
            app.catalog.delete(&knowledge_base, cancel).await?;
            writeln!(out, "Deleted knowledge base '{}'", knowledge_base.trim())?;
            Ok(())
        }
        Command::Chat(args) => chat(&app, args, cancel, out).await,
        #[cfg(feature = "gateway")]
        Command::Serve(args) => serve(app, args, cancel).await,
    }
}

async fn ingest<W: Write>(
    app: &App,
    args: IngestArgs,
    cancel: &CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let request = IngestionRequest::new(args.knowledge_base, args.path)
        .with_chunking(args.chunk_size, args.chunk_overlap)
        .with_tags(args.tags);
    let knowledge_base = request.knowledge_base.trim().to_owned();
    let result = app.ingestion.ingest(request, cancel).await?;
    writeln!(
        out,
        "Ingested {} file(s) into '{knowledge_base}': {} chunk(s) created",
        result.files_processed, result.chunks_created
    )?;
    Ok(())
}

async fn list<W: Write>(app: &App, cancel: &CancellationToken, out: &mut W) -> anyhow::Result<()> {
    let knowledge_bases = app.catalog.list(cancel).await?;
    if knowledge_bases.is_empty() {
        writeln!(out, "No knowledge bases found.")?;
        return Ok(());
    }
    writeln!(out, "Knowledge bases:")?;
    for kb in knowledge_bases {
        writeln!(out, " - {} ({} chunks)", kb.id, kb.chunks)?;
    }
    Ok(())
}

async fn chat<W: Write>(
    app: &App,
    args: ChatArgs,
    cancel: &CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let mut request = ChatRequest::new(args.knowledge_bases, args.query);
    request.top_k = args.top_k;
    request.temperature = args.temperature;

    if !args.stream {
        let answer = app.chat.answer(request, cancel).await?;
        writeln!(out, "{}", answer.response.trim())?;
        return write_citations(out, &answer.citations);
    }

    let mut stream = app.chat.answer_stream(request, cancel).await?;
    while let Some(fragment) = stream.next().await {
        out.write_all(fragment?.as_bytes())?;
        out.flush()?;
    }
    writeln!(out)?;
    write_citations(out, stream.citations().unwrap_or_default())
}

fn write_citations<W: Write>(out: &mut W, citations: &[Citation]) -> anyhow::Result<()> {
    if citations.is_empty() {
        return Ok(());
    }
    writeln!(out, "\nSources:")?;
    for (i, c) in citations.iter().enumerate() {
        writeln!(
            out,
            "[{}] {}/{}#{} (score {:.2})",
            i + 1,
            c.knowledge_base,
            c.source,
            c.position,
            c.score
        )?;
    }
    Ok(())
}

#[cfg(feature = "gateway")]
async fn serve(
    app: Arc<App>,
    args: cli::ServeArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let gateway = &app.config.gateway;
    let bind = args.bind.unwrap_or_else(|| gateway.bind.clone());
    let port = args.port.unwrap_or(gateway.port);
    let max_body_size = gateway.max_body_size;
    let token = app
        .config
        .secrets
        .gateway_token
        .as_ref()
        .map(|s| s.expose().to_owned());
    if token.is_none() {
        tracing::warn!("LORE_GATEWAY_TOKEN not set, gateway accepts unauthenticated requests");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let signal = cancel.clone();
    tokio::spawn(async move {
        signal.cancelled().await;
        let _ = shutdown_tx.send(true);
    });

    lore_gateway::GatewayServer::new(&bind, port, app, shutdown_rx)
        .with_auth(token)
        .with_max_body_size(max_body_size)
        .serve()
        .await
        .context("gateway failed")
}
