use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use stackplan::config::Config;
use stackplan::{container_app, Context, OutputFormat, VERSION};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Build the container app deployment manifest
#[derive(Parser, Debug)]
#[command(name = "stackplan", version, about, long_about = None)]
struct Args {
    /// JSON file with deployment context values
    #[arg(long)]
    context_file: Option<PathBuf>,

    /// Context override as key=value (repeatable)
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    context: Vec<String>,

    /// Name of the stack
    #[arg(long)]
    stack_name: Option<String>,

    /// Manifest format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Write the manifest to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    /// Store the given stack name, format and context file as defaults
    #[arg(long)]
    save_defaults: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("stackplan {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("stackplan").join("stackplan.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".stackplan").join("stackplan.log");
    }
    PathBuf::from("stackplan.log")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let mut config = Config::load();
    if args.save_defaults {
        config.remember(
            args.stack_name.as_deref(),
            args.format,
            args.context_file.as_deref(),
        );
        config.save()?;
    }

    let stack_name = config.effective_stack_name(args.stack_name.as_deref());
    let format = config.effective_format(args.format);

    let mut context = match config.effective_context_file(args.context_file.as_deref()) {
        Some(path) => Context::load(&path)?,
        None => Context::new(),
    };
    for assignment in &args.context {
        context.apply_override(assignment)?;
    }

    tracing::info!("Building stack '{}' as {:?}", stack_name, format);

    let stack = container_app(&stack_name, &context)
        .with_context(|| format!("Failed to declare stack '{}'", stack_name))?;
    let synthesis = stack
        .synthesize(&context)
        .with_context(|| format!("Failed to build stack '{}'", stack_name))?;

    let rendered = synthesis.manifest.render(format)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write manifest to {}", path.display()))?;
            eprintln!("Wrote {} manifest to {}", format.extension(), path.display());
        }
        None => println!("{}", rendered),
    }

    for warning in &synthesis.warnings {
        eprintln!("warning: {}", warning);
    }
    for (name, output) in &synthesis.plan.outputs {
        match output.value.as_str() {
            Some(value) => eprintln!("output {}: {}", name, value),
            None => eprintln!("output {}: (resolved at deploy time)", name),
        }
    }

    Ok(())
}
