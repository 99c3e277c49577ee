//! refurb - Disk re-imaging and fan-out copy pipeline
//!
//! This is the main CLI application that drives every disk operation
//! through the ops crate.

mod cli;
mod display;
mod error;
mod events;
mod logging;

use crate::cli::{Cli, Commands};
use crate::display::OutputRenderer;
use crate::error::CliError;
use crate::events::EventHandler;
use clap::Parser;
use refurb_config::Config;
use refurb_events::EventReceiver;
use refurb_ops::{OperationResult, OpsContextBuilder, OpsCtx, RestoreImages};
use refurb_plan::PlanOptions;
use refurb_types::{ColorChoice, OutputFormat, RestoreType};
use std::process;
use tokio::select;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments first to check for JSON mode
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    logging::init_tracing(json_mode, cli.global.debug);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("Application error: {}", e);
            if json_mode {
                let line = serde_json::json!({
                    "type": "Error",
                    "data": {
                        "code": e.code(),
                        "message": e.to_string(),
                        "hint": e.hint(),
                    }
                });
                println!("{line}");
            } else {
                eprintln!("Error: {e}");
            }
            process::exit(1);
        }
    }
}

/// Main application logic; `Ok(false)` means the run finished in `Failed`
async fn run(cli: Cli) -> Result<bool, CliError> {
    info!("Starting refurb v{}", env!("CARGO_PKG_VERSION"));

    // 1. file config (or defaults), 2. environment, 3. CLI flags
    let mut config = Config::load_or_default(&cli.global.config)
        .await
        .map_err(CliError::Config)?;
    config.merge_env().map_err(CliError::Config)?;
    apply_cli_config(&mut config, &cli.global);

    let json = cli.global.json || config.general.default_output == OutputFormat::Json;
    let colors = match config.general.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => console::Term::stderr().features().colors_supported(),
    };

    let (event_sender, event_receiver) = refurb_events::channel();
    let ops_ctx = OpsContextBuilder::new()
        .with_config(config)
        .with_event_sender(event_sender)
        .build();

    let renderer = OutputRenderer::new(json, colors);
    let mut event_handler = EventHandler::new(json, colors, cli.global.debug);

    let result =
        execute_command_with_events(cli.command, ops_ctx, event_receiver, &mut event_handler)
            .await?;
    event_handler.finish();

    renderer.render_result(&result)?;

    let success = result.is_success();
    if success {
        info!("Command completed successfully");
    } else {
        warn!("Command finished with failures");
    }
    Ok(success)
}

/// Execute command with concurrent event handling and Ctrl-C forwarding
async fn execute_command_with_events(
    command: Commands,
    ops_ctx: OpsCtx,
    mut event_receiver: EventReceiver,
    event_handler: &mut EventHandler,
) -> Result<OperationResult, CliError> {
    let cancel = ops_ctx.cancel_handle();
    let mut command_future = Box::pin(execute_command(command, ops_ctx));

    loop {
        select! {
            result = &mut command_future => {
                // Drain any remaining events
                while let Ok(event) = event_receiver.try_recv() {
                    event_handler.handle_event(event);
                }
                return result;
            }

            event = event_receiver.recv() => {
                match event {
                    Some(event) => event_handler.handle_event(event),
                    None => { /* Channel closed: keep waiting for command to finish */ }
                }
            }

            // each further Ctrl-C escalates the signal sent to the running task
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => {
                        warn!("interrupt received, cancelling");
                        cancel.cancel();
                    }
                    Err(e) => warn!("cannot listen for Ctrl-C: {e}"),
                }
            }
        }
    }
}

/// Execute the specified command
async fn execute_command(command: Commands, ctx: OpsCtx) -> Result<OperationResult, CliError> {
    match command {
        Commands::Plan {
            device,
            size,
            kind,
            no_swap,
        } => {
            let size = match (size, device) {
                (Some(size), _) => size,
                (None, Some(device)) => refurb_ops::probe_disk(&device).await?.size,
                (None, None) => {
                    return Err(CliError::InvalidArguments(
                        "either a device or --size is required".to_string(),
                    ))
                }
            };
            let options = PlanOptions {
                swap: !no_swap,
                ..PlanOptions::default()
            };
            Ok(refurb_ops::plan_layout(size, kind, &options)?)
        }

        Commands::Partition { device, kind } => Ok(refurb_ops::partition(&ctx, &device, kind).await?),

        Commands::Restore {
            device,
            image,
            efi_image,
            restore_type,
        } => {
            let text = tokio::fs::read_to_string(&restore_type)
                .await
                .map_err(|e| refurb_errors::Error::io_with_path(&e, &restore_type))?;
            let restore_type = RestoreType::from_json(&text)?;
            let images = RestoreImages {
                root: image,
                efi: efi_image,
            };
            Ok(refurb_ops::restore(&ctx, &device, restore_type, images).await?)
        }

        Commands::Image {
            device,
            partition,
            output,
        } => Ok(refurb_ops::image(&ctx, &device, partition, &output).await?),

        Commands::Wipe { device, mode } => Ok(refurb_ops::wipe(&ctx, &device, mode).await?),

        Commands::Sync {
            source,
            destinations,
        } => Ok(refurb_ops::sync(&ctx, &source, destinations).await?),

        Commands::Fanout {
            source,
            destinations,
        } => Ok(refurb_ops::fanout(&ctx, &source, &destinations).await?),

        Commands::ReadTable { device } => Ok(refurb_ops::read_table(&ctx, &device).await?),
    }
}

/// Apply CLI configuration overrides (highest precedence)
fn apply_cli_config(config: &mut Config, global: &cli::GlobalArgs) {
    if let Some(color) = global.color {
        config.general.color = color;
    }
    if global.json {
        config.general.default_output = OutputFormat::Json;
    }
}
