use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::debug;

use crate::alter::Alter;
use crate::config::Config;
use crate::database::Database;
use crate::error::ReliteError;
use crate::export::{Export, ExportFormat};
use crate::find::Find;
use crate::import::Import;
use crate::stats::Stats;

#[derive(Parser)]
#[command(
    name = "relite",
    version,
    about = "Relite: SQLite schema inspection and reshaping toolkit"
)]
pub struct Cli {
    /// Path to the configuration file (defaults to the OS user config location)
    #[arg(long = "config-file", global = true, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Export database schema and data as SQL text, JSON, or CSV
    Export {
        /// Database file to export
        db: PathBuf,

        /// Output file (stdout when omitted); the extension implies the format
        outfile: Option<PathBuf>,

        /// Output format: sql, json, or csv (default: by extension, else sql)
        #[arg(long, short = 'f')]
        format: Option<String>,

        /// Export a single table only (required for csv)
        #[arg(long, short = 't')]
        table: Option<String>,

        /// Overwrite an existing output file instead of creating a unique name
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },

    /// Import rows from a JSON or CSV file, creating tables when missing
    Import {
        /// Input file (.json or .csv)
        infile: PathBuf,

        /// Target database file, created when missing
        db: PathBuf,

        /// Target table (default: JSON object keys, or the CSV file stem)
        #[arg(long, short = 't')]
        table: Option<String>,

        /// Treat the first CSV row as data rather than a header
        #[arg(long = "no-header", default_value_t = false)]
        no_header: bool,
    },

    /// Search schema definitions, printing matching CREATE statements
    Parse {
        /// Database file to search
        db: PathBuf,

        /// Search query, e.g. 'amount table:invoice* -trigger:*audit*'
        filter: Option<String>,

        /// Write matches to a file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Case-sensitive matching
        #[arg(long, default_value_t = false)]
        case: bool,

        /// Maximum number of matches
        #[arg(long, short = 'l')]
        limit: Option<u64>,

        /// Number of initial matches to skip
        #[arg(long, requires = "limit")]
        offset: Option<u64>,

        /// Find matches in reverse order
        #[arg(long, default_value_t = false)]
        reverse: bool,

        /// Overwrite an existing output file instead of creating a unique name
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },

    /// Search data rows across tables
    Search {
        /// Database file to search
        db: PathBuf,

        /// Search query; table:/view: keywords narrow the searched relations
        filter: String,

        /// Write matches to a file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Output format: sql, json, or csv (default: by extension, else sql)
        #[arg(long, short = 'f')]
        format: Option<String>,

        /// Case-sensitive matching
        #[arg(long, default_value_t = false)]
        case: bool,

        /// Maximum number of matching rows
        #[arg(long, short = 'l')]
        limit: Option<u64>,

        /// Overwrite an existing output file instead of creating a unique name
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },

    /// Report object counts, row counts, sizes, and PRAGMA values
    Stats {
        /// Database file to report on
        db: PathBuf,
    },

    /// Reshape a table, emulating ALTER TABLE operations SQLite lacks
    Alter {
        #[command(subcommand)]
        op: AlterCommand,
    },
}

#[derive(Subcommand)]
pub enum AlterCommand {
    /// Rename a table; dependent indexes, triggers, and views follow
    #[command(name = "rename-table")]
    RenameTable {
        db: PathBuf,
        table: String,
        new_name: String,

        /// Print the statements without executing them
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Rename a column; dependent objects are rewritten
    #[command(name = "rename-column")]
    RenameColumn {
        db: PathBuf,
        table: String,
        column: String,
        new_name: String,

        /// Print the statements without executing them
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Add a column from a SQL fragment, e.g. 'age INTEGER DEFAULT 0'
    #[command(name = "add-column")]
    AddColumn {
        db: PathBuf,
        table: String,
        definition: String,

        /// Print the statements without executing them
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Drop a column, rebuilding the table and its dependents
    #[command(name = "drop-column")]
    DropColumn {
        db: PathBuf,
        table: String,
        column: String,

        /// Print the statements without executing them
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Rebuild a table with its columns in the given order
    #[command(name = "reorder-columns")]
    ReorderColumns {
        db: PathBuf,
        table: String,

        /// All column names in their new order
        #[arg(required = true, num_args = 1..)]
        columns: Vec<String>,

        /// Print the statements without executing them
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

impl Cli {
    pub fn handle_command_line() -> Result<(), ReliteError> {
        let args = Cli::parse();
        let config = Config::init(args.config_file.as_deref());
        init_logging(config);
        debug!(
            "Command-line args: {:?}",
            std::env::args_os().collect::<Vec<_>>()
        );

        match args.command {
            Command::Export {
                db,
                outfile,
                format,
                table,
                overwrite,
            } => Export::run(
                &db,
                outfile.as_deref(),
                parse_format(format.as_deref())?,
                table.as_deref(),
                overwrite,
            ),
            Command::Import {
                infile,
                db,
                table,
                no_header,
            } => Import::run(&infile, &db, table.as_deref(), no_header),
            Command::Parse {
                db,
                filter,
                output,
                case,
                limit,
                offset,
                reverse,
                overwrite,
            } => Find::schema(
                &db,
                filter.as_deref(),
                output.as_deref(),
                case,
                limit,
                offset,
                reverse,
                overwrite,
            ),
            Command::Search {
                db,
                filter,
                output,
                format,
                case,
                limit,
                overwrite,
            } => Find::data(
                &db,
                &filter,
                output.as_deref(),
                parse_format(format.as_deref())?,
                case,
                limit,
                overwrite,
            ),
            Command::Stats { db } => Stats::run(&db),
            Command::Alter { op } => Self::handle_alter(op),
        }
    }

    fn handle_alter(op: AlterCommand) -> Result<(), ReliteError> {
        match op {
            AlterCommand::RenameTable {
                db,
                table,
                new_name,
                dry_run,
            } => {
                let db = Database::open(&db)?;
                let script = Alter::rename_table(&db, &table, &new_name, dry_run)?;
                report_alter(&script, dry_run, &[]);
                Ok(())
            }
            AlterCommand::RenameColumn {
                db,
                table,
                column,
                new_name,
                dry_run,
            } => {
                let db = Database::open(&db)?;
                let script = Alter::rename_column(&db, &table, &column, &new_name, dry_run)?;
                report_alter(&script, dry_run, &[]);
                Ok(())
            }
            AlterCommand::AddColumn {
                db,
                table,
                definition,
                dry_run,
            } => {
                let db = Database::open(&db)?;
                let script = Alter::add_column(&db, &table, &definition, dry_run)?;
                report_alter(&script, dry_run, &[]);
                Ok(())
            }
            AlterCommand::DropColumn {
                db,
                table,
                column,
                dry_run,
            } => {
                let db = Database::open(&db)?;
                let (script, dropped) = Alter::drop_column(&db, &table, &column, dry_run)?;
                report_alter(&script, dry_run, &dropped);
                Ok(())
            }
            AlterCommand::ReorderColumns {
                db,
                table,
                columns,
                dry_run,
            } => {
                let db = Database::open(&db)?;
                let script = Alter::reorder_columns(&db, &table, &columns, dry_run)?;
                report_alter(&script, dry_run, &[]);
                Ok(())
            }
        }
    }
}

fn parse_format(format: Option<&str>) -> Result<Option<ExportFormat>, ReliteError> {
    format.map(str::parse).transpose()
}

fn report_alter(
    script: &[String],
    dry_run: bool,
    dropped: &[(crate::ddl::ObjectCategory, String)],
) {
    if dry_run {
        for statement in script {
            println!("{};", statement);
        }
        return;
    }
    println!("Executed {}.", crate::utils::Utils::plural("statement", script.len()));
    for (category, name) in dropped {
        println!("Dropped dependent {}: {}", category, name);
    }
}

fn init_logging(config: &Config) {
    let spec = format!("relite={}", config.logging.relite);
    match flexi_logger::Logger::try_with_env_or_str(&spec) {
        Ok(logger) => match logger.start() {
            // The handle flushes on drop; leak it so logging lives as long
            // as the process.
            Ok(handle) => std::mem::forget(handle),
            Err(e) => eprintln!("Failed to start logging: {}", e),
        },
        Err(e) => eprintln!("Failed to configure logging: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_parsing_requires_command() {
        let result = Cli::try_parse_from(["relite"]);
        assert!(result.is_err(), "Should require a subcommand");
    }

    #[test]
    fn test_cli_parsing_export() {
        let cli = Cli::try_parse_from([
            "relite", "export", "app.db", "out.json", "--table", "users", "--overwrite",
        ])
        .unwrap();
        match cli.command {
            Command::Export {
                db,
                outfile,
                table,
                overwrite,
                ..
            } => {
                assert_eq!(db, PathBuf::from("app.db"));
                assert_eq!(outfile, Some(PathBuf::from("out.json")));
                assert_eq!(table.as_deref(), Some("users"));
                assert!(overwrite);
            }
            _ => panic!("expected export command"),
        }
    }

    #[test]
    fn test_cli_parsing_global_config_file() {
        let cli =
            Cli::try_parse_from(["relite", "stats", "app.db", "--config-file", "my.toml"])
                .unwrap();
        assert_eq!(cli.config_file, Some(PathBuf::from("my.toml")));
        assert!(matches!(cli.command, Command::Stats { .. }));
    }

    #[test]
    fn test_cli_parsing_parse_offset_requires_limit() {
        let result =
            Cli::try_parse_from(["relite", "parse", "app.db", "query", "--offset", "5"]);
        assert!(result.is_err(), "offset without limit must be rejected");

        let result = Cli::try_parse_from([
            "relite", "parse", "app.db", "query", "--offset", "5", "--limit", "10",
        ]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_cli_parsing_alter_subcommands() {
        let cli = Cli::try_parse_from([
            "relite",
            "alter",
            "rename-column",
            "app.db",
            "users",
            "name",
            "full_name",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Command::Alter {
                op:
                    AlterCommand::RenameColumn {
                        table,
                        column,
                        new_name,
                        dry_run,
                        ..
                    },
            } => {
                assert_eq!(table, "users");
                assert_eq!(column, "name");
                assert_eq!(new_name, "full_name");
                assert!(dry_run);
            }
            _ => panic!("expected alter rename-column"),
        }

        let cli = Cli::try_parse_from([
            "relite",
            "alter",
            "reorder-columns",
            "app.db",
            "users",
            "b",
            "a",
        ])
        .unwrap();
        match cli.command {
            Command::Alter {
                op: AlterCommand::ReorderColumns { columns, .. },
            } => assert_eq!(columns, vec!["b".to_string(), "a".to_string()]),
            _ => panic!("expected alter reorder-columns"),
        }
    }

    #[test]
    fn test_cli_parsing_rejects_unknown() {
        assert!(Cli::try_parse_from(["relite", "nonexistent"]).is_err());
        assert!(Cli::try_parse_from(["relite", "stats", "a.db", "--bogus"]).is_err());
    }
}
