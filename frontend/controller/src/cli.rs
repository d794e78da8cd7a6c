//! `voice-ctl`: a command-line front-end over [`Controller`].
//!
//! Each invocation performs the same initial sync a UI would on mount, runs
//! one intent, prints the resulting authoritative view and tears down.

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

use crate::channel::TcpChannel;
use crate::config::ControllerConfig;
use crate::controller::{Controller, ControllerView};
use crate::devices::{DeviceType, WindowState};
use crate::error::ChannelError;
use crate::logging;

#[derive(Parser, Debug)]
#[command(name = "voice-ctl", version, about = "Select audio devices and control the Voice engine session")]
pub struct Cli {
    /// Engine address, overrides the config file
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Session poll interval in milliseconds
    #[arg(long, global = true)]
    pub poll_ms: Option<u64>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// List input and output devices
    Devices,
    /// Make a device active; input and output may be given together
    #[command(group(ArgGroup::new("target").required(true).multiple(true).args(["input", "output"])))]
    Select {
        #[arg(long)]
        input: Option<String>,
        #[arg(long)]
        output: Option<String>,
    },
    /// Start the audio session
    Start,
    /// Stop the audio session
    Stop,
    /// Show session state and active devices
    Status,
    /// Minimize or close the engine window
    Window {
        #[arg(value_enum)]
        state: WindowArg,
    },
    /// Keep running and print every change until Ctrl-C
    Watch,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowArg {
    Minimize,
    Close,
}

impl From<WindowArg> for WindowState {
    fn from(arg: WindowArg) -> Self {
        match arg {
            WindowArg::Minimize => WindowState::Minimize,
            WindowArg::Close => WindowState::Close,
        }
    }
}

impl Cli {
    /// Config file values with command-line overrides applied.
    pub fn resolve_config(&self) -> Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::load_from(path),
            None => ControllerConfig::load(),
        }
        .context("Failed to load controller config")?;

        if let Some(backend) = &self.backend {
            config.backend_addr = backend.clone();
        }
        if let Some(poll_ms) = self.poll_ms {
            config.poll_interval_ms = poll_ms;
        }
        config.validate().context("Invalid controller config")?;
        Ok(config)
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    logging::setup_panic_hook();

    let config = cli.resolve_config()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    runtime.block_on(execute(cli.command, config))
}

async fn execute(command: CliCommand, config: ControllerConfig) -> Result<()> {
    info!("Connecting to engine at {}", config.backend_addr);
    let channel = Arc::new(TcpChannel::new(config.backend_addr.clone(), config.request_timeout()));
    let controller = Controller::start(channel, &config)
        .await
        .context("Failed to start controller")?;

    let outcome = dispatch(&controller, command).await;
    controller.teardown().await;
    outcome
}

async fn dispatch(controller: &Controller, command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Devices => {
            let view = controller.view();
            ensure_reachable(&view)?;
            print!("{}", render_devices(&view));
        }
        CliCommand::Select { input, output } => {
            let select_input = async {
                match &input {
                    Some(name) => Some(controller.select(DeviceType::Input, name).await),
                    None => None,
                }
            };
            let select_output = async {
                match &output {
                    Some(name) => Some(controller.select(DeviceType::Output, name).await),
                    None => None,
                }
            };
            let (input_result, output_result) = tokio::join!(select_input, select_output);

            report_selection(DeviceType::Input, input.as_deref(), input_result);
            report_selection(DeviceType::Output, output.as_deref(), output_result);
            print!("{}", render_status(&controller.view()));
        }
        CliCommand::Start => {
            match controller.start_session().await {
                Ok(true) => println!("start sent"),
                Ok(false) => println!("session already running"),
                Err(e) => eprintln!("start failed: {}", e),
            }
            print!("{}", render_status(&controller.view()));
        }
        CliCommand::Stop => {
            match controller.stop_session().await {
                Ok(true) => println!("stop sent"),
                Ok(false) => println!("session already stopped"),
                Err(e) => eprintln!("stop failed: {}", e),
            }
            print!("{}", render_status(&controller.view()));
        }
        CliCommand::Status => {
            let view = controller.view();
            ensure_reachable(&view)?;
            print!("{}", render_status(&view));
        }
        CliCommand::Window { state } => {
            controller
                .manage_window(state.into())
                .await
                .context("manage_window failed")?;
        }
        CliCommand::Watch => watch(controller).await?,
    }
    Ok(())
}

async fn watch(controller: &Controller) -> Result<()> {
    let mut updates = controller.subscribe();
    print!("{}", render_status(&updates.borrow_and_update()));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Ctrl-C received, stopping watch");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                println!("---");
                print!("{}", render_status(&view));
            }
        }
    }
    Ok(())
}

fn ensure_reachable(view: &ControllerView) -> Result<()> {
    if !view.backend_reachable && view.devices.is_empty() {
        anyhow::bail!("engine is not reachable");
    }
    Ok(())
}

fn report_selection(device_type: DeviceType, requested: Option<&str>, result: Option<Result<(), ChannelError>>) {
    if let (Some(name), Some(Err(e))) = (requested, result) {
        eprintln!("{} '{}' not applied: {}", device_type, name, e);
    }
}

pub fn render_devices(view: &ControllerView) -> String {
    let mut out = String::new();
    for device_type in DeviceType::ALL {
        out.push_str(&format!("{}:\n", device_type));
        let mut any = false;
        for device in view.devices.devices_of(device_type) {
            any = true;
            let marker = if device.active { "*" } else { " " };
            let default = if device.default { " (default)" } else { "" };
            out.push_str(&format!("  [{}] {}{}\n", marker, device.name, default));
        }
        if !any {
            out.push_str("  (none)\n");
        }
    }
    out
}

pub fn render_status(view: &ControllerView) -> String {
    let name_of = |device_type: DeviceType| {
        let name = view
            .active(device_type)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| "-".to_string());
        if view.is_pending(device_type) {
            format!("{} (changing)", name)
        } else {
            name
        }
    };

    let mut out = format!("session: {}\n", view.session);
    if !view.backend_reachable {
        out.push_str("engine:  unreachable (showing last known state)\n");
    }
    out.push_str(&format!("input:   {}\n", name_of(DeviceType::Input)));
    out.push_str(&format!("output:  {}\n", name_of(DeviceType::Output)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceDescriptor, DeviceSnapshot, SessionState};
    use clap::CommandFactory;

    fn sample_view() -> ControllerView {
        let devices = Arc::new(DeviceSnapshot::new(vec![
            DeviceDescriptor::new("Mic1", DeviceType::Input).active(true).default_device(true),
            DeviceDescriptor::new("Spk1", DeviceType::Output).default_device(true),
        ]));
        ControllerView {
            input: crate::derive_active(&devices, DeviceType::Input),
            output: None,
            devices,
            session: SessionState::Running,
            backend_reachable: true,
            pending_input: false,
            pending_output: true,
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_select_requires_a_target() {
        assert!(Cli::try_parse_from(["voice-ctl", "select"]).is_err());

        let cli = Cli::try_parse_from(["voice-ctl", "select", "--input", "Mic1", "--output", "Spk1"]).unwrap();
        assert_eq!(
            cli.command,
            CliCommand::Select {
                input: Some("Mic1".to_string()),
                output: Some("Spk1".to_string())
            }
        );
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from(["voice-ctl", "status", "--backend", "10.0.0.5:8080", "--poll-ms", "50"]).unwrap();
        assert_eq!(cli.backend.as_deref(), Some("10.0.0.5:8080"));
        assert_eq!(cli.poll_ms, Some(50));
    }

    #[test]
    fn test_render_devices_marks_active_and_default() {
        let text = render_devices(&sample_view());
        assert!(text.contains("[*] Mic1 (default)"));
        assert!(text.contains("[ ] Spk1 (default)"));
    }

    #[test]
    fn test_render_status_shows_pending_and_missing() {
        let text = render_status(&sample_view());
        assert!(text.contains("session: running"));
        assert!(text.contains("input:   Mic1\n"));
        assert!(text.contains("output:  - (changing)"));
    }
}
