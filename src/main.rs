//! CodeShift - code knowledge graph service
//!
//! A command-line tool for parsing code repositories into a code graph,
//! asking questions about them and converting them to another language.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use codeshift::core::config::{Config, LoggingConfig};
use codeshift::core::service::CodeShift;
use codeshift::storage::models::JobState;

/// CodeShift - code knowledge graph service
#[derive(Parser)]
#[command(name = "codeshift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to SQLite database file (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Start {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Register a project if needed and build its code graph
    Parse {
        /// Path to the project root
        #[arg(short, long)]
        path: PathBuf,

        /// Project name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,

        /// Source language of the project
        #[arg(short, long)]
        language: String,

        /// Source framework
        #[arg(short, long)]
        framework: Option<String>,
    },

    /// Ask a question about a parsed project
    Ask {
        /// Project name or ID
        #[arg(short, long)]
        project: String,

        /// The question
        question: String,
    },

    /// Convert a parsed project and wait for the job to finish
    Convert {
        /// Project name or ID
        #[arg(short, long)]
        project: String,

        /// Target language
        #[arg(short, long)]
        target: String,

        /// Target framework
        #[arg(short, long)]
        framework: Option<String>,

        /// Write the output archive here when the job completes
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the state and manifest of a conversion job
    Result {
        /// Job ID
        job: String,
    },

    /// List all projects
    Projects,

    /// List supported languages
    Languages,

    /// List the frameworks of a language
    Frameworks {
        language: String,
    },

    /// Write a configuration file with every default filled in
    InitConfig {
        #[arg(default_value = "codeshift.toml")]
        path: PathBuf,
    },

    /// Show server status
    Status {
        /// Host to connect to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to connect to
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = if verbose {
        "codeshift=debug,tower_http=debug".to_string()
    } else {
        format!("codeshift={},tower_http=info", logging.level)
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if logging.format == "compact" {
        builder.compact().init();
    } else {
        builder.pretty().init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => {
            let mut config = Config::default();
            config.apply_env();
            config
        }
    };
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    init_logging(cli.verbose, &config.logging);

    match cli.command {
        Commands::Start { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            info!(
                "Starting CodeShift server on {}:{}",
                config.server.host, config.server.port
            );
            codeshift::server::run_server(CodeShift::open(config)?).await?;
        }

        Commands::Parse {
            path,
            name,
            language,
            framework,
        } => {
            let project_name = name.unwrap_or_else(|| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unnamed")
                    .to_string()
            });

            let shift = CodeShift::open(config)?;
            let project_id = match shift.resolve_project(&project_name).await {
                Ok(id) => id,
                Err(_) => {
                    shift
                        .register_project(&project_name, &path, &language, framework.as_deref())
                        .await?
                        .id
                }
            };

            info!("Parsing project '{}' at {:?}", project_name, path);
            let outcome = shift.parse_project(project_id).await?;
            print_json(&outcome)?;
        }

        Commands::Ask { project, question } => {
            let shift = CodeShift::open(config)?;
            let project_id = shift.resolve_project(&project).await?;
            let answer = shift.ask_question(project_id, &question).await?;
            println!("{}", answer.answer);
        }

        Commands::Convert {
            project,
            target,
            framework,
            output,
        } => {
            let shift = CodeShift::open(config)?;
            let project_id = shift.resolve_project(&project).await?;
            let job = shift
                .convert_project(project_id, &target, framework.as_deref())
                .await?;
            info!("Conversion job {} started", job.id);

            let job = shift.wait_for_job(&job.id).await?;
            print_json(&shift.get_conversion_result(&job.id).await?.manifest)?;

            if let Some(output) = output {
                if job.state == JobState::Completed {
                    let bytes = shift.download_conversion_output(&job.id).await?;
                    std::fs::write(&output, bytes)?;
                    println!("Output written to {:?}", output);
                } else {
                    anyhow::bail!("job {} ended {}, no output written", job.id, job.state);
                }
            }
        }

        Commands::Result { job } => {
            let shift = CodeShift::open(config)?;
            print_json(&shift.get_conversion_result(&job).await?)?;
        }

        Commands::Projects => {
            let shift = CodeShift::open(config)?;
            let projects = shift.list_projects().await?;

            if projects.is_empty() {
                println!("No projects found.");
            } else {
                println!("Projects:");
                for p in projects {
                    println!(
                        "  - {} (id={}, language={}, status={}, path={})",
                        p.name, p.id, p.source_language, p.status, p.root_path
                    );
                }
            }
        }

        Commands::Languages => {
            let registry = codeshift::LanguageRegistry::new();
            println!("Supported languages:");
            for lang in registry.list_languages() {
                println!(
                    "  - {} (extensions: {}; converts to: {})",
                    lang.language_id(),
                    lang.file_extensions().join(", "),
                    codeshift::core::frameworks::conversion_targets(lang.language_id()).join(", ")
                );
            }
        }

        Commands::Frameworks { language } => {
            let frameworks = codeshift::core::frameworks::frameworks_for(&language);
            if frameworks.is_empty() {
                anyhow::bail!("No framework catalogue for '{}'", language);
            }
            println!("Frameworks for {}:", language);
            for f in frameworks {
                println!("  - {} ({}): {}", f.name, f.label, f.description);
            }
        }

        Commands::InitConfig { path } => {
            // The key belongs in the environment, not on disk
            config.completion.api_key = None;
            config.to_file(&path)?;
            println!("Configuration written to {:?}", path);
        }

        Commands::Status { host, port } => {
            let url = format!("http://{}:{}/api/v1/health", host, port);
            match reqwest::get(&url).await {
                Ok(resp) => {
                    if resp.status().is_success() {
                        println!("Server is running at {}:{}", host, port);
                    } else {
                        println!("Server returned status: {}", resp.status());
                    }
                }
                Err(e) => {
                    println!("Failed to connect to server: {}", e);
                }
            }
        }
    }

    Ok(())
}
