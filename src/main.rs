use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flow_runner::cache::ExecutableLookup;
use flow_runner::config::Config;
use flow_runner::services::TerminalView;
use flow_runner::types::ParameterSource;
use flow_runner::{
    Dispatcher, EnvMap, Executable, ExecutableCache, Ref, RunContext, RunnerRegistry, Services,
    Verb,
};

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Run executables defined in workspace flow files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: nearest flow.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an executable
    Exec {
        /// Verb, e.g. build, run, open
        verb: String,

        /// Executable ID: [ws/][ns:]name
        id: Option<String>,

        /// Arguments passed to the executable (flag=value or positional)
        args: Vec<String>,

        /// Parameter override, KEY=VALUE (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Never prompt or render
        #[arg(long)]
        no_interactive: bool,
    },

    /// List executables in the workspace
    List,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().context("Could not read current directory")?;
            Config::discover(&cwd).with_context(|| {
                format!("Could not find {} in {} or its parents", flow_runner::config::CONFIG_FILE, cwd.display())
            })?
        }
    };
    let config_path = std::fs::canonicalize(&config_path)
        .with_context(|| format!("Could not find config file: {}", config_path.display()))?;
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::load(&config_path)
        .with_context(|| format!("Could not load {}", config_path.display()))?;
    init_tracing(&config.runner.log_level);

    let workspace_path = config.workspace_path(&base_dir);
    let cache = ExecutableCache::load(
        &config.workspace.name,
        &workspace_path,
        config.default_timeout()?,
    )?;
    debug!(count = cache.len(), workspace = %workspace_path.display(), "loaded executables");

    match cli.command {
        Commands::Exec {
            verb,
            id,
            args,
            params,
            no_interactive,
        } => cmd_exec(
            &config,
            &workspace_path,
            cache,
            ExecRequest {
                verb,
                id: id.unwrap_or_default(),
                args,
                params,
                interactive: config.runner.interactive && !no_interactive && io::stdin().is_terminal(),
            },
        ),
        Commands::List => cmd_list(&config, &cache),
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

struct ExecRequest {
    verb: String,
    id: String,
    args: Vec<String>,
    params: Vec<String>,
    interactive: bool,
}

#[tokio::main]
async fn cmd_exec(
    config: &Config,
    workspace_path: &Path,
    cache: ExecutableCache,
    request: ExecRequest,
) -> Result<()> {
    let verb = Verb::new(request.verb);
    verb.validate()?;
    let reference = Ref::new(verb, &request.id);

    let cache = Arc::new(cache);
    let mut ctx = RunContext::new(&config.workspace.name, workspace_path, cache.clone())
        .with_namespace(&config.runner.namespace)
        .with_args(request.args);
    if request.interactive {
        ctx = ctx.with_view(Arc::new(TerminalView::new(true)));
    }

    let executable = cache.get_executable_by_ref(&ctx.expand_ref(&reference))?;
    let mut prompted_env = parse_params(&request.params)?;
    prompt_missing(&executable, &mut prompted_env, request.interactive)?;

    let token = ctx.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    println!("{} {}", "→".blue(), executable.reference().to_string().bold());
    let start = Instant::now();
    let registry = RunnerRegistry::with_builtin_runners(Services::default());
    let result = ctx.finish(registry.run(&ctx, &executable, &prompted_env).await);

    let elapsed = format!("({:.2}s)", start.elapsed().as_secs_f64());
    match result {
        Ok(()) => {
            println!("{} {} {}", "✓".green(), executable.id().green(), elapsed.dimmed());
            Ok(())
        }
        Err(err) => {
            println!("{} {} {}", "✗".red(), executable.id().red(), elapsed.dimmed());
            Err(err.into())
        }
    }
}

fn parse_params(raw: &[String]) -> Result<EnvMap> {
    raw.iter()
        .map(|param| {
            param
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("Invalid parameter '{}', expected KEY=VALUE", param))
        })
        .collect()
}

/// Ask for prompt parameters that were not supplied with --param.
fn prompt_missing(executable: &Executable, prompted_env: &mut EnvMap, interactive: bool) -> Result<()> {
    if !interactive {
        return Ok(());
    }

    let stdin = io::stdin();
    for param in executable.parameters() {
        let ParameterSource::Prompt(question) = param.source() else {
            continue;
        };
        if prompted_env.contains_key(&param.env_key) {
            continue;
        }

        print!("{} {} ", "?".yellow(), question);
        io::stdout().flush()?;
        let mut answer = String::new();
        stdin
            .lock()
            .read_line(&mut answer)
            .with_context(|| format!("Failed to read value for {}", param.env_key))?;
        prompted_env.insert(param.env_key.clone(), answer.trim_end().to_string());
    }
    Ok(())
}

fn cmd_list(config: &Config, cache: &ExecutableCache) -> Result<()> {
    println!("\n{} {}\n", "📦".cyan(), config.workspace.name.bold());

    if cache.is_empty() {
        println!("  {}", "No executables defined".dimmed());
        return Ok(());
    }

    let mut executables: Vec<_> = cache.executables().iter().collect();
    executables.sort_by_key(|exec| exec.reference().to_string());

    for exec in executables {
        println!(
            "  {} {} {}",
            "•".green(),
            exec.verb.to_string().cyan(),
            exec.id()
        );
        println!("    {} {}", "type:".dimmed(), exec.type_name());

        if !exec.description.is_empty() {
            println!("    {} {}", "description:".dimmed(), exec.description);
        }

        if !exec.aliases.is_empty() {
            println!("    {} {}", "aliases:".dimmed(), exec.aliases.join(", "));
        }

        if !exec.tags.is_empty() {
            println!("    {} {}", "tags:".dimmed(), exec.tags.join(", ").magenta());
        }

        if let Some(timeout) = exec.timeout {
            println!(
                "    {} {}",
                "timeout:".dimmed(),
                humantime::format_duration(timeout)
            );
        }

        println!();
    }

    Ok(())
}
