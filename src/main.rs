use cachesafe::{config, output, pipeline};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "cachesafe")]
#[command(about = "Cache-safe static site builds with atomic deploys")]
#[command(long_about = "\
Cache-safe static site builds with atomic deploys

Every stylesheet, script, font and image is renamed to carry a fingerprint of
its content, every reference in pages and stylesheets is rewritten to match,
and each page's <head> is rebuilt in a fixed order. The result is verified and
swapped into the live directory with a single rename; a failed build leaves the
live site untouched.

Site structure:

  site/
  ├── site.toml                    # Build config (optional)
  ├── index.html                   # Pages: root-level *.html with a <head>
  ├── css/  js/  images/           # Required asset directories
  ├── images/landing/ images/main/ # Hero images (index, main)
  ├── images/projects/<slug>/      # Galleries, optional project.json
  ├── partials/  fonts/            # Optional asset directories
  └── CNAME  robots.txt            # Extra files, copied as-is

Output goes to docs/ (staged in .build-temp/, previous site held in
.docs-backup/ during the swap).

Run 'cachesafe gen-config' to generate a documented site.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Project root
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Verbose logging (also enabled by the DEBUG environment variable)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Hash, rewrite, verify and deploy the site (default)
    Build,
    /// Validate the project and show what a build would process
    Check,
    /// Print a stock site.toml with all options documented
    GenConfig,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug || std::env::var_os("DEBUG").is_some());

    if let Err(e) = run(&cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command.as_ref().unwrap_or(&Command::Build) {
        Command::Build => {
            let site_config = config::load_config(&cli.root)?;
            init_thread_pool(&site_config.processing);
            println!("==> Building {}", cli.root.display());
            let summary = pipeline::build(&cli.root, &site_config)?;
            output::print_build_summary(&summary);
        }
        Command::Check => {
            let site_config = config::load_config(&cli.root)?;
            println!("==> Checking {}", cli.root.display());
            let report = pipeline::check(&cli.root, &site_config)?;
            output::print_check_output(&report);
            println!("==> Site is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }
    Ok(())
}

/// Log to stderr. `RUST_LOG` wins over the debug toggle.
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
