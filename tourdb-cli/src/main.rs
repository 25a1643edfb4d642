use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use tourdb::{Catalog, Config, RecordStore};

/// TourDB CLI: query and edit a dashboard JSON store from the command line
#[derive(Parser)]
#[command(name = "tourdb", version, about)]
struct Cli {
    /// Path to the JSON store file (default: from TOURDB_DATA_FILE or config)
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List one page of a resource
    List {
        /// Resource name (e.g. reservations, tour_photos)
        resource: String,
        /// Resource filters (e.g. --filter status=confirmed)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        #[arg(long)]
        page: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
        /// Field to sort on
        #[arg(long)]
        sort: Option<String>,
        /// asc or desc
        #[arg(long)]
        order: Option<String>,
        /// Case-insensitive text search over the resource's search fields
        #[arg(long)]
        search: Option<String>,
    },

    /// Get a single record by ID
    Get {
        resource: String,
        id: String,
    },

    /// Show a resource's statistics
    Stats {
        resource: String,
        /// Resource filters applied before aggregating
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Insert a new record
    Insert {
        resource: String,
        /// Field values (e.g. --field plate="ABC-123")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Merge fields into an existing record
    Update {
        resource: String,
        id: String,
        /// Field values to update (e.g. --field status=cancelled)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a record
    Delete {
        resource: String,
        id: String,
        /// Show what would be deleted without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Show collection counts, served resources and derived view dependencies
    Status,

    /// Dump one collection, or the whole store document
    Export {
        collection: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::from_env()?;
    if let Some(path) = cli.data_file {
        config.data_file = path;
    }

    log::debug!("Opening store at {}", config.data_file.display());
    let store = RecordStore::open(&config.data_file)?;
    let catalog = Catalog::dashboard(&config)?;
    log::debug!("Serving {} resources", catalog.names().len());

    match cli.command {
        Command::List {
            resource,
            filters,
            page,
            limit,
            sort,
            order,
            search,
        } => {
            let mut params: HashMap<String, String> = filters.into_iter().collect();
            let options = [
                ("page", page.map(|p| p.to_string())),
                ("limit", limit.map(|l| l.to_string())),
                ("sort", sort),
                ("order", order),
                ("search", search),
            ];
            for (key, value) in options {
                if let Some(value) = value {
                    params.insert(key.to_string(), value);
                }
            }
            let page = catalog.list(&store, &resource, &params)?;
            print_output(&serde_json::to_value(&page)?, &cli.format)?;
        }

        Command::Get { resource, id } => {
            let record = catalog.get(&store, &resource, &id)?;
            print_output(&record.into_value(), &cli.format)?;
        }

        Command::Stats { resource, filters } => {
            let params: HashMap<String, String> = filters.into_iter().collect();
            let stats = catalog.stats(&store, &resource, &params, chrono::Utc::now())?;
            print_output(&stats, &cli.format)?;
        }

        Command::Insert { resource, fields } => {
            let record = catalog.create(&store, &resource, fields_to_value(&fields))?;
            print_output(&record.into_value(), &cli.format)?;
        }

        Command::Update {
            resource,
            id,
            fields,
        } => {
            let record = catalog.update(&store, &resource, &id, fields_to_value(&fields))?;
            print_output(&record.into_value(), &cli.format)?;
        }

        Command::Delete {
            resource,
            id,
            dry_run,
        } => {
            if dry_run {
                print_output(&delete_preview(&catalog, &store, &resource, &id)?, &cli.format)?;
            } else {
                catalog.remove(&store, &resource, &id)?;
                print_output(&serde_json::json!({ "ok": true, "deleted": id }), &cli.format)?;
            }
        }

        Command::Status => {
            print_output(&catalog.status(&store), &cli.format)?;
        }

        Command::Export { collection } => {
            let value = match collection {
                Some(name) => serde_json::to_value(&*store.get_collection(&name)?)?,
                None => store.export(),
            };
            print_output(&value, &cli.format)?;
        }
    }

    Ok(())
}

/// What `delete` would remove, resolved the same way the real delete is.
fn delete_preview(
    catalog: &Catalog,
    store: &RecordStore,
    resource: &str,
    id: &str,
) -> tourdb::Result<serde_json::Value> {
    let record = catalog.get(store, resource, id)?;
    Ok(serde_json::json!({
        "dry_run": true,
        "would_delete": { "resource": resource, "id": id },
        "record": record,
    }))
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn fields_to_value(fields: &[(String, String)]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        // Numbers, booleans, arrays and objects parse as JSON; anything else is a string
        let json_val = serde_json::from_str(val).unwrap_or(serde_json::Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    serde_json::Value::Object(map)
}
