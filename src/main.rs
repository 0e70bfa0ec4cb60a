//! # Conduit - Extension Host Bridge Demo
//!
//! Wires a command registry and a panel view bridge the way a host would,
//! loads a small built-in extension, and drives a few editor changes.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show the composed panel for the demo extension
//! cargo run
//!
//! # Run a command with JSON arguments
//! cargo run -- --execute demo.sum 1 2 3
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use conduit_core::{CommandEntry, CommandRegistry, Config, ExecuteCommandParams, Unsubscribable};
use conduit_views::lsp_types::{
    Location, Position, Range, TextDocumentItem, TextDocumentPositionParams, Uri,
};
use conduit_views::{
    ClientViews, ClientViewsApi, EditorModel, LocationProviderRegistry, LocationStream, ModelStore,
    PanelComponent, PanelViewData, PanelViewWithComponent, ViewComponentData, ViewRegistry,
};

/// Conduit - host bridge for extension commands and panel views
#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Command to execute once the demo extension is loaded
    #[arg(short, long, value_name = "ID")]
    execute: Option<String>,

    /// Command arguments, parsed as JSON where possible
    #[arg(value_name = "ARGS")]
    args: Vec<String>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

const REFERENCES_PROVIDER: &str = "demo.references";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load(),
    };

    let level = match args.verbose {
        0 => config.logging.level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    tracing::info!("Starting Conduit v{}", env!("CARGO_PKG_VERSION"));

    let commands = CommandRegistry::new();
    let registrations = [
        commands.register_command(CommandEntry::new("demo.echo", |args| async move {
            Ok(Value::Array(args))
        }))?,
        commands.register_command(CommandEntry::new("demo.sum", |args| async move {
            let total: f64 = args.iter().filter_map(Value::as_f64).sum();
            Ok(json!(total))
        }))?,
    ];

    let models = ModelStore::new();
    let locations = LocationProviderRegistry::new();
    let _references = locations.register_provider(REFERENCES_PROVIDER, next_line_reference);
    let view_registry = ViewRegistry::new();

    let views = ClientViews::new(
        Arc::new(view_registry.clone()),
        Arc::new(locations.clone()),
        Arc::new(models.clone()),
    )
    .with_pending_policy(config.views.pending_policy);

    let panel = views.register_panel_view_provider(REFERENCES_PROVIDER);
    panel.update(PanelViewData {
        title: "References".to_string(),
        content: "Usages of the symbol under the cursor".to_string(),
        priority: 10,
        component: Some(PanelComponent {
            location_provider: REFERENCES_PROVIDER.to_string(),
        }),
    });
    models.set_model(demo_model(4, 8)?);

    let view = wait_for_panel(&view_registry, "References").await?;
    println!("[{}] {} (priority {})", view.title, view.content, view.priority);

    let mut results = view.location_provider.subscribe();
    if let Some(Some(found)) = results.next().await {
        for location in found {
            let start = location.range.start;
            println!("  -> {} {}:{}", location.uri.as_str(), start.line, start.character);
        }
    }

    if let Some(command) = args.execute {
        let arguments = args.args.iter().map(String::as_str).map(parse_argument).collect();
        let result = commands
            .execute_command(ExecuteCommandParams::new(command).with_arguments(arguments))
            .await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    panel.unsubscribe();
    for registration in &registrations {
        registration.unsubscribe();
    }

    Ok(())
}

/// Demo location provider: points one line below the cursor.
fn next_line_reference(params: &TextDocumentPositionParams) -> LocationStream {
    let start = Position::new(params.position.line + 1, 0);
    let location = Location::new(params.text_document.uri.clone(), Range::new(start, start));
    stream::once(async move { Ok(Some(vec![location])) }).boxed()
}

fn demo_model(line: u32, character: u32) -> anyhow::Result<EditorModel> {
    let uri: Uri = serde_json::from_value(json!("file:///demo/src/lib.rs"))?;
    let cursor = Position::new(line, character);
    Ok(EditorModel {
        visible_view_components: vec![ViewComponentData {
            item: TextDocumentItem::new(uri, "rust".to_string(), 1, String::new()),
            selections: vec![Range::new(cursor, cursor)],
            is_active: true,
        }],
    })
}

async fn wait_for_panel(
    registry: &ViewRegistry,
    title: &str,
) -> anyhow::Result<PanelViewWithComponent> {
    let mut views = registry.views();
    let wait = async {
        while let Some(list) = views.next().await {
            let ready = list
                .iter()
                .filter_map(|entry| entry.state.view())
                .find(|view| view.title == title)
                .cloned();
            if ready.is_some() {
                return ready;
            }
        }
        None
    };

    tokio::time::timeout(Duration::from_secs(1), wait)
        .await
        .context("Timed out waiting for panel")?
        .context("View registry closed")
}

fn parse_argument(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["conduit"]);
        assert!(args.execute.is_none());
        assert!(args.args.is_empty());
    }

    #[test]
    fn test_args_with_command() {
        let args = Args::parse_from(["conduit", "--execute", "demo.sum", "1", "2"]);
        assert_eq!(args.execute.as_deref(), Some("demo.sum"));
        assert_eq!(args.args, vec!["1", "2"]);
    }

    #[test]
    fn test_parse_argument() {
        assert_eq!(parse_argument("3"), json!(3));
        assert_eq!(parse_argument("{\"a\":1}"), json!({ "a": 1 }));
        assert_eq!(parse_argument("plain"), json!("plain"));
    }

    #[tokio::test]
    async fn test_demo_panel_resolves_locations() {
        let models = ModelStore::new();
        let locations = LocationProviderRegistry::new();
        let _provider = locations.register_provider(REFERENCES_PROVIDER, next_line_reference);
        let registry = ViewRegistry::new();
        let views = ClientViews::new(
            Arc::new(registry.clone()),
            Arc::new(locations.clone()),
            Arc::new(models.clone()),
        );

        let panel = views.register_panel_view_provider(REFERENCES_PROVIDER);
        panel.update(PanelViewData {
            title: "Refs".to_string(),
            content: String::new(),
            priority: 0,
            component: Some(PanelComponent {
                location_provider: REFERENCES_PROVIDER.to_string(),
            }),
        });
        models.set_model(demo_model(2, 0).unwrap());

        let view = wait_for_panel(&registry, "Refs").await.unwrap();
        let found = view.location_provider.subscribe().next().await.flatten().unwrap();
        assert_eq!(found[0].range.start.line, 3);

        panel.unsubscribe();
    }
}
