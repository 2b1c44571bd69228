use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use keyscript::config::parse_duration;
use keyscript::editor::open_in_editor;
use keyscript::permissions::{check_input_group, fix_hint, InputAccess};
use keyscript::{
    device, find_keyboards, keymap, start_capture, CaptureEvent, CaptureState, Config,
    DispatchEvent, Notice, NoticeLevel, ScriptStore,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keyscript")]
#[command(about = "Run a Lua script for every key pressed on a dedicated keyboard")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List keyboards that can be captured
    List,

    /// Capture a keyboard and run scripts until interrupted
    Run {
        /// Device node to capture, e.g. /dev/input/event4
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// Timeout for run_command (e.g. "5s", "1500ms")
        #[arg(short, long)]
        timeout: Option<String>,
    },

    /// Open the script for a key, creating it if needed
    Edit {
        /// Raw key code or script name, e.g. KEY_A or a
        key: String,
    },

    /// Write a default configuration file and create the scripts directory
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path)?;
    init_tracing(cli.verbose || config.verbose);

    match cli.command {
        Command::List => list_keyboards(&config),
        Command::Run { device, timeout } => run(config, &config_path, device, timeout).await,
        Command::Edit { key } => edit(&config, &key),
        Command::Init => init(&config_path),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "keyscript=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn list_keyboards(config: &Config) -> Result<()> {
    let keyboards = find_keyboards();
    if keyboards.is_empty() {
        println!("{}", "No keyboards found.".yellow());
        report_permissions();
        return Ok(());
    }

    println!("{}", "Available keyboards:".bold());
    for (index, keyboard) in keyboards.iter().enumerate() {
        let marker = if config.last_device.as_deref() == Some(keyboard.path.as_path()) {
            " (last used)".dimmed().to_string()
        } else {
            String::new()
        };
        println!("  {}. {}{}", index + 1, keyboard, marker);
    }
    Ok(())
}

async fn run(
    mut config: Config,
    config_path: &Path,
    device: Option<PathBuf>,
    timeout: Option<String>,
) -> Result<()> {
    if let Some(timeout) = timeout {
        config.command_timeout = parse_duration(&timeout)?;
    }
    config.validate()?;
    report_permissions();

    let device = select_device(&config, device)?;
    if config.last_device.as_ref() != Some(&device) {
        config.last_device = Some(device.clone());
        if let Err(e) = config.save_to_file(&config_path.to_string_lossy()) {
            warn!(error = %e, "could not remember selected device");
        }
    }

    println!("{} {}", "Capturing".green().bold(), device.display());
    println!(
        "Scripts: {}  (hold {} and press a key to edit its script, Ctrl+C to stop)",
        config.scripts_dir.display(),
        config.edit_modifier
    );

    let (handle, events) = start_capture(&device, &config)?;
    let stop = handle.stop_signal();
    let editor = config.editor.clone();
    let mut consumer =
        tokio::task::spawn_blocking(move || consume_events(events, editor.as_deref()));

    let consumer_done = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            info!("shutdown signal received");
            println!("\n{}", "Stopping...".yellow());
            stop.request();
            false
        }
        finished = &mut consumer => {
            finished?;
            true
        }
    };

    let state = tokio::task::spawn_blocking(move || handle.join()).await??;
    if !consumer_done {
        consumer.await?;
    }

    match state {
        CaptureState::Disconnected => bail!("keyboard disconnected"),
        _ => {
            println!("{}", "Capture stopped.".green());
            Ok(())
        }
    }
}

fn select_device(config: &Config, requested: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = requested {
        return Ok(path);
    }
    if config.auto_select_last {
        if let Some(last) = &config.last_device {
            if device::is_available(last) {
                info!(device = %last.display(), "reusing last device");
                return Ok(last.clone());
            }
        }
    }
    match find_keyboards().into_iter().next() {
        Some(keyboard) => {
            println!("Using {keyboard}");
            Ok(keyboard.path)
        }
        None => bail!("no keyboard found; pass --device or check input permissions"),
    }
}

fn consume_events(events: Receiver<CaptureEvent>, editor: Option<&str>) {
    for event in events {
        match event {
            CaptureEvent::Dispatch(dispatch) => print_dispatch(&dispatch),
            CaptureEvent::EditRequested {
                key_code, path, ..
            } => {
                println!("{} {} -> {}", "edit".cyan(), key_code, path.display());
                if let Err(e) = open_in_editor(&path, editor) {
                    eprintln!("{} {e}", "error:".red().bold());
                }
            }
            CaptureEvent::Notice(notice) => print_notice(&notice),
            CaptureEvent::Disconnected => {
                eprintln!("{}", "Keyboard disconnected.".red().bold());
            }
        }
    }
}

fn print_dispatch(dispatch: &DispatchEvent) {
    let status = if dispatch.success {
        "ok".green()
    } else {
        "failed".red()
    };
    println!(
        "{} {} ({}) {}",
        "key".cyan(),
        dispatch.key_code,
        dispatch.identifier,
        status
    );
    for line in dispatch.output.lines() {
        println!("    {line}");
    }
}

fn print_notice(notice: &Notice) {
    match notice.level {
        NoticeLevel::Info => println!("{}", notice.message),
        NoticeLevel::Warning => println!("{}", notice.message.yellow()),
        NoticeLevel::Error => eprintln!("{}", notice.message.red()),
    }
}

fn report_permissions() {
    match check_input_group() {
        InputAccess::Granted => {}
        InputAccess::MissingGroup { user } => {
            println!(
                "{} user '{}' is not in the input group; devices may not be readable.",
                "warning:".yellow().bold(),
                user
            );
            println!("  Fix with: {} (then log out and back in)", fix_hint(&user));
        }
        InputAccess::Unknown(reason) => warn!(%reason, "could not check input permissions"),
    }
}

fn edit(config: &Config, key: &str) -> Result<()> {
    let identifier = keymap::resolve(key);
    let store = ScriptStore::new(&config.scripts_dir);
    store.ensure_dir()?;
    let script = store.ensure_script(&identifier)?;
    if script.created {
        println!("Created new script: {}", script.path.display());
    }
    open_in_editor(&script.path, config.editor.as_deref())?;
    Ok(())
}

fn init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Configuration already exists at {}", config_path.display());
    } else {
        Config::default().save_to_file(&config_path.to_string_lossy())?;
        println!("Wrote {}", config_path.display());
    }

    let config = Config::load_or_default(config_path)?;
    ScriptStore::new(&config.scripts_dir).ensure_dir()?;
    println!("Scripts directory: {}", config.scripts_dir.display());
    Ok(())
}
