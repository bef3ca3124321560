use std::sync::Arc;

use colored::Colorize;
use ntab_core::{ReadMode, Services, ShutdownMode, TableDirectory, TableSummary, TableUpdate};
use ntab_ipfs::IpfsClient;
use ntab_store::NameService;
use ntab_table::{Record, RecordDraft, RecordSelector};
use serde::Serialize;

use crate::cli::*;
use crate::config::NtabConfig;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = NtabConfig::load(cli.config.as_deref())?.with_overrides(cli.registry, cli.api);
    tracing::debug!(api = %config.ipfs.api_url, registry = %config.directory.registry_path.display(), "configuration loaded");
    let client = Arc::new(IpfsClient::new(config.ipfs.clone())?);
    let format = cli.format;

    if let Command::Keys = cli.command {
        return cmd_keys(client.as_ref(), format).await;
    }

    let services = Services::new(client.clone(), client);
    let directory = TableDirectory::open(config.directory, services).await?;
    let result = match cli.command {
        Command::List(args) => cmd_list(&directory, args, format).await,
        Command::Show(args) => cmd_show(&directory, args, format).await,
        Command::Create(args) => cmd_create(&directory, args, format).await,
        Command::Update(args) => cmd_update(&directory, args, format).await,
        Command::Append(args) => cmd_append(&directory, args, format).await,
        Command::Remove(args) => cmd_remove(&directory, args, format).await,
        Command::Delete(args) => cmd_delete(&directory, args, format).await,
        Command::Keys => Ok(()),
    };

    let stats = directory.shutdown(ShutdownMode::Drain).await;
    tracing::debug!(?stats, "directory shut down");
    if stats.failed > 0 {
        eprintln!(
            "{} {} background persist(s) failed; changes are stored locally only until the next successful publish",
            "!".yellow().bold(),
            stats.failed
        );
    }
    result
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_mode(refresh: bool) -> ReadMode {
    if refresh {
        ReadMode::Refresh
    } else {
        ReadMode::Cached
    }
}

fn print_summary_line(summary: &TableSummary) {
    let stale = if summary.stale {
        format!(" {}", "(stale)".red())
    } else {
        String::new()
    };
    println!(
        "{}  {}  {} record(s){}",
        summary.id.as_str().dimmed(),
        summary.name.bold(),
        summary.record_count,
        stale
    );
    if !summary.description.is_empty() {
        println!("    {}", summary.description);
    }
}

fn print_record(record: &Record) {
    println!(
        "  {} {}  {}  {} bytes",
        format!("v{}", record.version).yellow(),
        record.hash.cyan(),
        record.file_name,
        record.file_size
    );
    if !record.description.is_empty() {
        println!("      {}", record.description);
    }
}

async fn cmd_keys(names: &dyn NameService, format: OutputFormat) -> anyhow::Result<()> {
    let keys = names.list_keys().await?;
    if format == OutputFormat::Json {
        let pairs: Vec<_> = keys
            .iter()
            .map(|k| serde_json::json!({ "name": k.name, "pointer": k.pointer.as_str() }))
            .collect();
        return print_json(&pairs);
    }
    if keys.is_empty() {
        println!("No keys.");
    }
    for key in keys {
        println!("{}  {}", key.name.bold(), key.pointer.as_str().cyan());
    }
    Ok(())
}

async fn cmd_list(dir: &TableDirectory, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let tables = dir.list(read_mode(args.refresh)).await;
    if format == OutputFormat::Json {
        return print_json(&tables);
    }
    if tables.is_empty() {
        println!("No tables.");
    }
    for summary in &tables {
        print_summary_line(summary);
    }
    Ok(())
}

#[derive(Serialize)]
struct TableView<'a> {
    #[serde(flatten)]
    summary: TableSummary,
    records: &'a [Record],
}

async fn cmd_show(dir: &TableDirectory, args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let table = dir.read(&args.id, read_mode(args.refresh)).await?;
    let summary = dir.summary(&args.id)?;
    if format == OutputFormat::Json {
        return print_json(&TableView {
            summary,
            records: table.records(),
        });
    }
    print_summary_line(&summary);
    match &summary.name_pointer {
        Some(pointer) => println!("  IPNS: {}", pointer.as_str().cyan()),
        None => println!("  IPNS: {}", "(none)".dimmed()),
    }
    if let Some(digest) = &summary.last_published {
        println!("  Published: {}", digest.as_str().cyan());
    }
    println!("  Updated: {}", summary.updated_at.to_rfc3339());
    for record in table.records() {
        print_record(record);
    }
    Ok(())
}

async fn cmd_create(dir: &TableDirectory, args: CreateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let created = dir.create(&args.name, &args.description, args.data).await?;
    let id = created.controller.id().clone();
    if format == OutputFormat::Json {
        return print_json(&dir.summary(id.as_str())?);
    }
    println!("{} Created table {}", "✓".green().bold(), args.name.bold());
    println!("  Id: {}", id.as_str().yellow());
    println!("  Snapshot: {}", created.digest.as_str().cyan());
    if let Some(pointer) = created.controller.name_pointer() {
        println!("  IPNS: {}", pointer.as_str().cyan());
    }
    Ok(())
}

async fn cmd_update(dir: &TableDirectory, args: UpdateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let receipt = dir
        .update(
            &args.id,
            TableUpdate {
                name: args.name,
                description: args.description,
                payload: args.data,
            },
        )
        .await?;
    if format == OutputFormat::Json {
        return print_json(&dir.summary(&args.id)?);
    }
    println!("{} Updated table {}", "✓".green().bold(), args.id.yellow());
    println!("  Snapshot: {}", receipt.digest.as_str().cyan());
    if !receipt.published {
        println!("  {}", "IPNS publish failed; will retry on the next save".yellow());
    }
    Ok(())
}

async fn cmd_append(dir: &TableDirectory, args: AppendArgs, format: OutputFormat) -> anyhow::Result<()> {
    let draft = RecordDraft {
        hash: args.hash,
        magnet_link: args.magnet,
        file_name: args.file_name,
        file_size: args.size,
        description: args.description,
    };
    let record = dir.append(&args.id, draft).await?;
    if format == OutputFormat::Json {
        return print_json(&record);
    }
    println!(
        "{} Appended version {} to {}",
        "✓".green().bold(),
        record.version.to_string().yellow(),
        args.id.yellow()
    );
    Ok(())
}

async fn cmd_remove(dir: &TableDirectory, args: RemoveArgs, format: OutputFormat) -> anyhow::Result<()> {
    let selector = match (args.index, args.hash) {
        (Some(index), _) => RecordSelector::Index(index),
        (None, Some(hash)) => RecordSelector::Hash(hash),
        (None, None) => anyhow::bail!("either --index or --hash is required"),
    };
    let removed = dir.remove(&args.id, &selector).await?;
    if format == OutputFormat::Json {
        return print_json(&removed);
    }
    println!(
        "{} Removed version {} ({}) from {}",
        "✓".green().bold(),
        removed.version.to_string().yellow(),
        removed.hash.cyan(),
        args.id.yellow()
    );
    Ok(())
}

async fn cmd_delete(dir: &TableDirectory, args: DeleteArgs, format: OutputFormat) -> anyhow::Result<()> {
    dir.delete(&args.id).await?;
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "deleted": args.id }));
    }
    println!("{} Deleted table {}", "✓".green().bold(), args.id.yellow());
    Ok(())
}
