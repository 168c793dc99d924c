use std::io::Write;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use bolo::config::Config;
use bolo::error::LiveError;

#[derive(Parser)]
#[command(
    name = "bolo",
    about = "Talk to a speech model, out loud",
    long_about = "Bolo holds a realtime spoken conversation with a streaming speech model. \
        It captures the microphone, streams 16 kHz PCM frames over a WebSocket, \
        plays the model's 24 kHz replies back to back without gaps, and stops \
        playback the moment you talk over it. Transcripts of both sides are \
        printed as the conversation goes."
)]
struct Cli {
    /// Path to config file
    ///
    /// Defaults to ~/.config/bolo/config.yaml if not specified.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    ///
    /// Sets the log level to debug for the bolo crate, showing session
    /// phases, scheduling decisions and interruptions.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live conversation (foreground)
    ///
    /// Opens the configured input and output devices, connects to the
    /// model and streams in both directions until interrupted with Ctrl+C
    /// or until the server ends the session.
    Live {
        /// Stream a WAV file instead of the microphone
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List available audio devices
    ///
    /// Shows the audio input devices recognized by the system, or the
    /// output devices with --output. Use --pick to interactively select
    /// one and save it to your config file, or --set to write a device
    /// name directly.
    Devices {
        /// Operate on output devices instead of inputs
        #[arg(long)]
        output: bool,

        /// Write the chosen device name to the config file
        #[arg(long, conflicts_with = "pick")]
        set: Option<String>,

        /// Interactively pick a device and save it to the config file
        #[arg(long, conflicts_with = "set")]
        pick: bool,
    },

    /// Create a new configuration file
    ///
    /// Walks through an interactive setup for the voice, the system
    /// instruction, the API key and the audio devices. Writes the result
    /// to the config file.
    Init,

    /// Generate shell completions
    ///
    /// Prints a completion script for the given shell to stdout.
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, elvish, powershell)
        shell: Shell,
    },
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    const fn noun(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }

    const fn config_key(self) -> &'static str {
        match self {
            Self::Input => "device",
            Self::Output => "output_device",
        }
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(Config::default_path)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("bolo=debug,info")
    } else {
        EnvFilter::new("bolo=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), LiveError> {
    match cli.command {
        Command::Live { ref file } => {
            let config = Config::load(&config_path(&cli))?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(bolo::live::run_live(config, file.clone()))
        }
        Command::Devices {
            output,
            ref set,
            pick,
        } => {
            let direction = if output {
                Direction::Output
            } else {
                Direction::Input
            };
            run_devices(&cli, direction, set.as_deref(), pick)
        }
        Command::Init => run_init(&cli),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "bolo", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn list_devices(direction: Direction) -> Result<(Vec<String>, Option<String>), LiveError> {
    match direction {
        Direction::Input => Ok((
            bolo::audio::capture::list_input_devices()?,
            bolo::audio::capture::default_input_device_name(),
        )),
        Direction::Output => Ok((
            bolo::audio::output::list_output_devices()?,
            bolo::audio::output::default_output_device_name(),
        )),
    }
}

fn print_device_list(devices: &[String], default_name: Option<&str>) {
    for (i, name) in devices.iter().enumerate() {
        let marker = if default_name == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("  {}: {name}{marker}", i + 1);
    }
}

fn run_devices(
    cli: &Cli,
    direction: Direction,
    set: Option<&str>,
    pick: bool,
) -> Result<(), LiveError> {
    let noun = direction.noun();

    if let Some(device_name) = set {
        Config::set_audio_device(&config_path(cli), direction.config_key(), device_name)?;
        println!("Set audio {noun} device to: {device_name}");
        return Ok(());
    }

    let (devices, default_name) = list_devices(direction)?;

    if devices.is_empty() {
        println!("No audio {noun} devices found.");
        return Ok(());
    }

    if !pick {
        print_device_list(&devices, default_name.as_deref());
        return Ok(());
    }

    println!("Available audio {noun} devices:");
    print_device_list(&devices, default_name.as_deref());
    println!();

    let input = prompt(&format!("Select device [1-{}]: ", devices.len()))?;
    let choice: usize = input
        .parse()
        .map_err(|_| LiveError::Other("invalid selection: enter a number".to_string()))?;

    if choice < 1 || choice > devices.len() {
        return Err(LiveError::Other(format!(
            "selection out of range: pick 1-{}",
            devices.len()
        )));
    }

    let selected = &devices[choice - 1];
    Config::set_audio_device(&config_path(cli), direction.config_key(), selected)?;
    println!("Set audio {noun} device to: {selected}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Prompt helpers
// ---------------------------------------------------------------------------

fn prompt(msg: &str) -> Result<String, LiveError> {
    print!("{msg}");
    std::io::stdout()
        .flush()
        .map_err(|e| LiveError::Other(format!("failed to flush stdout: {e}")))?;
    let mut buf = String::new();
    std::io::stdin()
        .read_line(&mut buf)
        .map_err(|e| LiveError::Other(format!("failed to read input: {e}")))?;
    Ok(buf.trim().to_string())
}

fn prompt_default(msg: &str, default: &str) -> Result<String, LiveError> {
    let input = prompt(&format!("{msg} [{default}]: "))?;
    if input.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(input)
    }
}

fn prompt_yes_no(msg: &str, default_yes: bool) -> Result<bool, LiveError> {
    let hint = if default_yes { "Y/n" } else { "y/N" };
    let input = prompt(&format!("{msg} [{hint}]: "))?;
    if input.is_empty() {
        return Ok(default_yes);
    }
    match input.to_lowercase().as_str() {
        "y" | "yes" => Ok(true),
        "n" | "no" => Ok(false),
        _ => Ok(default_yes),
    }
}

fn yaml_section<'a>(
    root: &'a mut serde_yaml_ng::Mapping,
    key: &str,
) -> Result<&'a mut serde_yaml_ng::Mapping, LiveError> {
    let k = serde_yaml_ng::Value::String(key.to_string());
    root.entry(k)
        .or_insert_with(|| serde_yaml_ng::Value::Mapping(serde_yaml_ng::Mapping::new()))
        .as_mapping_mut()
        .ok_or_else(|| LiveError::Config(format!("{key} section is not a mapping")))
}

fn pick_device_into(
    root: &mut serde_yaml_ng::Mapping,
    direction: Direction,
) -> Result<(), LiveError> {
    use serde_yaml_ng::Value;

    let noun = direction.noun();
    if !prompt_yes_no(&format!("Pick an audio {noun} device?"), false)? {
        return Ok(());
    }

    let (devices, default_name) = list_devices(direction)?;
    if devices.is_empty() {
        println!("No audio {noun} devices found, skipping.");
        return Ok(());
    }

    println!("Available audio {noun} devices:");
    print_device_list(&devices, default_name.as_deref());
    println!();
    let input = prompt(&format!(
        "Select device [1-{}] (Enter to skip): ",
        devices.len()
    ))?;
    if let Ok(choice) = input.parse::<usize>()
        && choice >= 1
        && choice <= devices.len()
    {
        let audio = yaml_section(root, "audio")?;
        audio.insert(
            Value::String(direction.config_key().to_string()),
            Value::String(devices[choice - 1].clone()),
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// bolo init
// ---------------------------------------------------------------------------

fn run_init(cli: &Cli) -> Result<(), LiveError> {
    use serde_yaml_ng::{Mapping, Value};

    let path = config_path(cli);

    if path.exists() {
        let overwrite = prompt_yes_no(
            &format!("Config file already exists at {}. Overwrite?", path.display()),
            false,
        )?;
        if !overwrite {
            println!("Aborted.");
            return Ok(());
        }
    }

    let mut root = Mapping::new();
    let defaults = Config::default();

    // Voice and persona; only non-defaults are written.
    println!();
    let voice = prompt_default("Voice", &defaults.session.voice)?;
    if voice != defaults.session.voice {
        yaml_section(&mut root, "session")?
            .insert(Value::String("voice".to_string()), Value::String(voice));
    }

    let instruction = prompt("System instruction (Enter for the default): ")?;
    if !instruction.is_empty() {
        yaml_section(&mut root, "session")?.insert(
            Value::String("system_instruction".to_string()),
            Value::String(instruction),
        );
    }

    // API key
    println!();
    let api_key = prompt(&format!(
        "API key (Enter to read ${} at runtime): ",
        defaults.transport.api_key_env
    ))?;
    if !api_key.is_empty() {
        yaml_section(&mut root, "transport")?
            .insert(Value::String("api_key".to_string()), Value::String(api_key));
    }

    // Devices
    println!();
    pick_device_into(&mut root, Direction::Input)?;
    pick_device_into(&mut root, Direction::Output)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            LiveError::Config(format!(
                "failed to create config directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let yaml = serde_yaml_ng::to_string(&Value::Mapping(root))
        .map_err(|e| LiveError::Config(format!("failed to serialize config: {e}")))?;

    std::fs::write(&path, &yaml).map_err(|e| {
        LiveError::Config(format!(
            "failed to write config file {}: {e}",
            path.display()
        ))
    })?;

    println!();
    println!("Config written to {}", path.display());
    println!("Run `bolo live` to start talking.");

    Ok(())
}
