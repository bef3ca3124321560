use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ntab",
    about = "ntab -- named, versioned tables on IPFS",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./ntab.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the registry file location
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    /// Override the IPFS RPC API URL
    #[arg(long, global = true)]
    pub api: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List all tables
    List(ListArgs),
    /// Show one table and its records
    Show(ShowArgs),
    /// Create a table
    Create(CreateArgs),
    /// Change a table's name, description or records
    Update(UpdateArgs),
    /// Append a record to a table
    Append(AppendArgs),
    /// Remove a record from a table
    Remove(RemoveArgs),
    /// Forget a table
    Delete(DeleteArgs),
    /// List the naming keys held by the IPFS node
    Keys,
}

#[derive(Args)]
pub struct ListArgs {
    /// Reload every table from IPNS first
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    pub id: String,
    /// Reload the table from IPNS first
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args)]
pub struct CreateArgs {
    pub name: String,
    #[arg(short, long, default_value = "")]
    pub description: String,
    /// Initial records as a JSON array
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Args)]
pub struct UpdateArgs {
    pub id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(short, long)]
    pub description: Option<String>,
    /// Replacement records as a JSON array
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Args)]
pub struct AppendArgs {
    pub id: String,
    /// Content hash of the artifact
    #[arg(long)]
    pub hash: String,
    #[arg(long, default_value = "")]
    pub magnet: String,
    #[arg(long, default_value = "")]
    pub file_name: String,
    #[arg(long, default_value = "0")]
    pub size: i64,
    #[arg(short, long, default_value = "")]
    pub description: String,
}

#[derive(Args)]
#[command(group(ArgGroup::new("selector").required(true).args(["index", "hash"])))]
pub struct RemoveArgs {
    pub id: String,
    /// Zero-based position of the record
    #[arg(long)]
    pub index: Option<usize>,
    /// Remove the first record with this hash
    #[arg(long)]
    pub hash: Option<String>,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn remove_requires_a_selector() {
        assert!(Cli::try_parse_from(["ntab", "remove", "t1"]).is_err());
        assert!(Cli::try_parse_from(["ntab", "remove", "t1", "--index", "0", "--hash", "aa"]).is_err());
        let cli = Cli::try_parse_from(["ntab", "remove", "t1", "--hash", "aa"]).unwrap();
        match cli.command {
            Command::Remove(args) => assert_eq!(args.hash.as_deref(), Some("aa")),
            _ => panic!("expected remove"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ntab", "list", "--refresh", "--format", "json", "--api", "http://ipfs:5001",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.api.as_deref(), Some("http://ipfs:5001"));
        assert!(matches!(cli.command, Command::List(ListArgs { refresh: true })));
    }
}
