use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use selector_crawler::config::AppConfig;
use selector_crawler::diagnostics::PreviewWindow;
use selector_crawler::logging::init_logging;
use selector_crawler::storage::SqliteStore;
use selector_crawler::{CrawlerService, ExtractionTemplate};

#[derive(Parser)]
#[command(name = "scc-cli")]
#[command(about = "Selector Crawler command line interface")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, help = "Configuration file path")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Crawl(CrawlCommand),

    /// Manage stored templates
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// List stored runs of a template
    Runs {
        #[arg(help = "Template ID")]
        template_id: String,
    },
}

/// Operations that fetch pages
#[derive(Subcommand)]
enum CrawlCommand {
    /// Count and sample the elements a selector matches on a page
    ValidateSelector {
        #[arg(help = "Page URL")]
        url: String,

        #[arg(help = "CSS selector, optionally with ::attr(name)")]
        selector: String,
    },

    /// Run a template file and print a window of its rows
    Preview {
        #[arg(help = "Template file (JSON or YAML)")]
        template: PathBuf,

        #[arg(long, help = "Override the template's target URL")]
        url: Option<String>,

        #[arg(short, long, help = "Number of rows to show")]
        limit: Option<usize>,

        #[arg(long, help = "Result page to show (follows pagination when > 1)")]
        page: Option<usize>,

        #[arg(long, help = "Rows per result page")]
        page_size: Option<usize>,
    },

    /// Explain why a template extracts what it does on a page
    Diagnose {
        #[arg(help = "Page URL")]
        url: String,

        #[arg(help = "Template file (JSON or YAML)")]
        template: PathBuf,

        #[arg(long, help = "Operator note echoed in the report")]
        context: Option<String>,
    },

    /// Trial run of a template on the first page only
    Test {
        #[arg(help = "Page URL")]
        url: String,

        #[arg(help = "Template file (JSON or YAML)")]
        template: PathBuf,
    },

    /// Full crawl of a stored template
    Execute {
        #[arg(help = "Template ID")]
        template_id: String,

        #[arg(long, help = "Print the stored rows after the summary")]
        rows: bool,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Store a template file under its id
    Import {
        #[arg(help = "Template file (JSON or YAML)")]
        file: PathBuf,
    },
    /// List stored templates
    List,
    /// Remove a stored template
    Remove {
        #[arg(help = "Template ID")]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path).await?,
        None => AppConfig::load().await?,
    };
    if cli.verbose {
        config.logging.level = "selector_crawler=debug".to_string();
    }
    init_logging(&config.logging)?;
    info!("Selector Crawler CLI v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(SqliteStore::from_config(&config.storage).await?);

    match cli.command {
        Commands::Templates { action } => manage_templates(&store, action).await,
        Commands::Runs { template_id } => list_runs(&store, &template_id).await,
        Commands::Crawl(command) => {
            let service = CrawlerService::from_config(config, store.clone(), store.clone()).await?;
            let result = run_crawl(&service, &store, command).await;
            if let Some(pool) = service.fetcher().render_pool() {
                pool.shutdown().await;
            }
            result
        }
    }
}

async fn run_crawl(service: &CrawlerService, store: &SqliteStore, command: CrawlCommand) -> Result<()> {
    match command {
        CrawlCommand::ValidateSelector { url, selector } => {
            let result = service.validate_selector(&url, &selector).await?;
            print_json(&result)?;
        }
        CrawlCommand::Preview {
            template,
            url,
            limit,
            page,
            page_size,
        } => {
            let mut template = load_template(&template)?;
            if let Some(url) = url {
                template.target_url = url;
            }
            let window = PreviewWindow::from_params(limit, page, page_size, &service.config().preview);
            let preview = match service.preview_or_diagnose(&template, window).await {
                Ok(preview) => preview,
                Err(failure) => {
                    print_json(&failure.diagnosis)?;
                    return Err(failure.error.into());
                }
            };

            eprintln!(
                "Showing {} of {} row(s) from {} page(s), {} rendering",
                preview.returned, preview.total, preview.pages_fetched, preview.render_mode
            );
            print_json(&preview.rows)?;
        }
        CrawlCommand::Diagnose { url, template, context } => {
            let template = load_template(&template)?;
            let report = service.diagnose(&url, &template, context.as_deref()).await;
            print_json(&report)?;
        }
        CrawlCommand::Test { url, template } => {
            let template = load_template(&template)?;
            let outcome = service.test(&url, &template).await;
            print_json(&outcome)?;
            if !outcome.success {
                anyhow::bail!("Test run extracted no rows");
            }
        }
        CrawlCommand::Execute { template_id, rows } => {
            let summary = service.execute(&template_id).await?;
            print_json(&summary)?;

            if rows {
                let stored = store.load_run(&summary.run_id).await?;
                print_json(&stored.run.rows)?;
            }
        }
    }
    Ok(())
}

async fn manage_templates(store: &SqliteStore, action: TemplateAction) -> Result<()> {
    match action {
        TemplateAction::Import { file } => {
            let template = load_template(&file)?;
            template.validate()?;
            store.put_template(&template).await?;
            println!("Imported template {}", template.display_name());
        }
        TemplateAction::List => {
            println!("{:<24} {:<30} {}", "ID", "Name", "Target URL");
            println!("{}", "-".repeat(80));
            for template in store.list_templates().await? {
                println!(
                    "{:<24} {:<30} {}",
                    template.id.as_deref().unwrap_or("-"),
                    template.name.chars().take(30).collect::<String>(),
                    template.target_url
                );
            }
        }
        TemplateAction::Remove { id } => {
            if store.delete_template(&id).await? {
                println!("Removed template {}", id);
            } else {
                anyhow::bail!("Template not found: {}", id);
            }
        }
    }
    Ok(())
}

async fn list_runs(store: &SqliteStore, template_id: &str) -> Result<()> {
    println!("{:<36} {:<8} {:>8} {:>6} {:<20}", "Run ID", "Mode", "Rows", "Pages", "Saved");
    println!("{}", "-".repeat(82));
    for run in store.list_runs(template_id).await? {
        println!(
            "{:<36} {:<8} {:>8} {:>6} {:<20}",
            run.run_id,
            run.render_mode,
            run.total_count,
            run.pages_fetched,
            run.saved_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn load_template(path: &Path) -> Result<ExtractionTemplate> {
    ExtractionTemplate::from_file(path).with_context(|| format!("Failed to load template {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
