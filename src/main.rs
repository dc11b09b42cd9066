use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use material_tracker::config::AuthConfig;
use material_tracker::query::Choice;
use material_tracker::{
    init_telemetry, to_csv, CompanyId, ConnectivityMonitor, FilterInput, MaterialRequest,
    NewMaterialRequest, PageRequest, Priority, Profile, QueryCoordinator, RequestId,
    RequestStatus, RestStore, Session, SessionHandle, SortColumn, SortDirection, Sorting,
    SystemClock, TrackerConfig, Unit,
};

#[derive(Parser)]
#[command(name = "material-tracker")]
#[command(about = "Track construction material requests for your company")]
#[command(long_about = "Material Tracker lists, creates and moves construction material requests \
                       through their approval workflow. Credentials come from material-tracker.toml, \
                       MATERIAL_TRACKER__* environment variables or a .env file.")]
struct Cli {
    /// Read configuration from this TOML file instead of the working directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show one page of requests
    List {
        #[command(flatten)]
        filters: FilterArgs,
        /// Zero-based page index
        #[arg(long, default_value = "0")]
        page: usize,
        /// Rows per page (clamped to the configured bounds)
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Show a single request
    Show { id: RequestId },
    /// Submit a new request
    Create {
        /// Material name, e.g. "Portland cement"
        #[arg(long)]
        material: String,
        #[arg(long)]
        quantity: f64,
        /// kg, m, pieces, liters, tons, cubic_meters or square_meters
        #[arg(long)]
        unit: Unit,
        /// low, medium, high or urgent
        #[arg(long, default_value = "medium")]
        priority: Priority,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Move a request to a new status (approved, rejected, fulfilled)
    Status { id: RequestId, status: RequestStatus },
    /// Delete a request you submitted
    Delete { id: RequestId },
    /// Export every matching request as CSV
    Export {
        #[command(flatten)]
        filters: FilterArgs,
        /// Write to this file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// Status filter, or "all"
    #[arg(long, default_value = "all")]
    status: Choice<RequestStatus>,
    /// Priority filter, or "all"
    #[arg(long, default_value = "all")]
    priority: Choice<Priority>,
    /// Case-insensitive material name search
    #[arg(long, default_value = "")]
    search: String,
    /// Sort column
    #[arg(long, default_value = "requested_at")]
    sort: SortColumn,
    /// Sort ascending instead of descending
    #[arg(long)]
    asc: bool,
}

impl FilterArgs {
    fn input(&self) -> FilterInput {
        FilterInput {
            status: self.status,
            priority: self.priority,
            search: self.search.clone(),
        }
    }

    fn sorting(&self) -> Sorting {
        let direction = if self.asc {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        };
        Sorting::new(self.sort, direction)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    TrackerConfig::load_env_file()?;
    let config = match &cli.config {
        Some(path) => TrackerConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => TrackerConfig::load()?,
    };
    init_telemetry(&config.observability)?;

    tokio::runtime::Runtime::new()?.block_on(async { run(cli.command, config).await })
}

async fn run(command: Commands, config: TrackerConfig) -> Result<()> {
    let session = Arc::new(SessionHandle::signed_in(session_from(&config.auth)?));
    let store = Arc::new(RestStore::new(&config.store, session.clone())?);
    let coordinator = QueryCoordinator::new(
        store,
        session,
        Arc::new(ConnectivityMonitor::default()),
        Arc::new(SystemClock),
        &config,
    );

    let outcome = dispatch(&coordinator, command, &config).await;
    coordinator.shutdown().await;
    outcome
}

async fn dispatch(
    coordinator: &QueryCoordinator,
    command: Commands,
    config: &TrackerConfig,
) -> Result<()> {
    match command {
        Commands::List {
            filters,
            page,
            page_size,
        } => {
            let page_size = page_size.unwrap_or(config.pagination.default_page_size);
            let result = coordinator
                .list_requests(
                    &filters.input(),
                    PageRequest::new(page, page_size),
                    Some(filters.sorting()),
                )
                .await?;
            for row in &result.rows {
                print_row(row);
            }
            let meta = result.meta;
            println!(
                "Page {} of {} ({} requests)",
                meta.page_index + 1,
                meta.total_pages.max(1),
                meta.total_count
            );
        }
        Commands::Show { id } => {
            let row = coordinator.get_request(id).await?;
            print_row(&row);
            if let Some(notes) = &row.notes {
                println!("  notes: {notes}");
            }
        }
        Commands::Create {
            material,
            quantity,
            unit,
            priority,
            notes,
        } => {
            let mut input = NewMaterialRequest::new(material, quantity, unit, priority);
            if let Some(notes) = notes {
                input = input.with_notes(notes);
            }
            let created = coordinator.create_request(input).await?;
            info!(request.id = %created.id, "Created request");
            println!("Created {}", created.id);
        }
        Commands::Status { id, status } => {
            let updated = coordinator.change_status(id, status).await?;
            println!("{} is now {}", updated.id, updated.status);
        }
        Commands::Delete { id } => {
            coordinator.delete_request(id).await?;
            println!("Deleted {id}");
        }
        Commands::Export { filters, output } => {
            let rows = coordinator
                .export_requests(&filters.input(), Some(filters.sorting()))
                .await?;
            let bytes = to_csv(&rows)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, bytes)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported {} requests to {}", rows.len(), path.display());
                }
                None => print!("{}", String::from_utf8_lossy(&bytes)),
            }
        }
    }
    Ok(())
}

fn session_from(auth: &AuthConfig) -> Result<Session> {
    let (Some(user_id), Some(token)) = (&auth.user_id, &auth.access_token) else {
        bail!("not signed in: set auth.user_id and auth.access_token in material-tracker.toml");
    };
    let company_id = auth
        .company_id
        .as_deref()
        .map(str::parse::<CompanyId>)
        .transpose()
        .context("auth.company_id is not a valid id")?;
    let profile = Profile {
        id: user_id.parse().context("auth.user_id is not a valid id")?,
        full_name: auth.full_name.clone(),
        company_id,
    };
    Ok(Session::new(profile, token.clone()))
}

fn print_row(row: &MaterialRequest) {
    println!(
        "{}  {:<9} {:<7} {} {} {}  by {} on {}",
        row.id,
        row.status.as_str(),
        row.priority.as_str(),
        row.quantity,
        row.unit,
        row.material_name,
        row.requester_display_name(),
        row.requested_at.format("%Y-%m-%d")
    );
}
