//! Command line argument parsing for the xmldex CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// xmldex - inspect value indexes and document metadata of an XML store
#[derive(Parser, Debug, Clone)]
#[command(name = "xmldex")]
#[command(about = "Inspect QName value indexes and document metadata")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct XmldexArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl XmldexArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Decode a document metadata blob
    #[command(name = "inspect-metadata")]
    InspectMetadata(InspectMetadataArgs),

    /// List the keys of a value index
    #[command(name = "dump-index")]
    DumpIndex(DumpIndexArgs),

    /// Look up nodes by qname and value
    #[command(name = "lookup")]
    Lookup(LookupArgs),
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable format
    Human,
    /// JSON format
    Json,
}

/// Arguments for decoding a metadata file
#[derive(Parser, Debug, Clone)]
pub struct InspectMetadataArgs {
    /// Path to the metadata file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Arguments for dumping an index
#[derive(Parser, Debug, Clone)]
pub struct DumpIndexArgs {
    /// Directory holding the index
    #[arg(value_name = "INDEX_DIR")]
    pub index_dir: PathBuf,

    /// Name of the index file inside the directory
    #[arg(long, default_value = "values.dbx")]
    pub name: String,

    /// Only list keys of this collection
    #[arg(long)]
    pub collection: Option<u16>,
}

/// Arguments for a value lookup
#[derive(Parser, Debug, Clone)]
pub struct LookupArgs {
    /// Directory holding the index
    #[arg(value_name = "INDEX_DIR")]
    pub index_dir: PathBuf,

    /// Name of the index file inside the directory
    #[arg(long, default_value = "values.dbx")]
    pub name: String,

    /// Collection id to scan
    #[arg(short, long)]
    pub collection: u16,

    /// Element or attribute name, `{namespace}local` or `local`
    #[arg(long)]
    pub qname: String,

    /// Atomic type of the comparison value, e.g. `xs:integer`
    #[arg(short = 't', long = "type", default_value = "xs:string")]
    pub value_type: String,

    /// Comparison value
    #[arg(long)]
    pub value: String,

    /// Comparison operator (eq, ne, lt, le, gt, ge)
    #[arg(short, long, default_value = "eq")]
    pub relation: String,

    /// Compare strings case-insensitively
    #[arg(long)]
    pub ignore_case: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_lookup_command() {
        let args = XmldexArgs::try_parse_from([
            "xmldex",
            "lookup",
            "/path/to/db",
            "--collection",
            "3",
            "--qname",
            "a",
            "--type",
            "xs:integer",
            "--value",
            "1",
            "--relation",
            "ge",
        ])
        .unwrap();

        if let Command::Lookup(lookup_args) = args.command {
            assert_eq!(lookup_args.index_dir, PathBuf::from("/path/to/db"));
            assert_eq!(lookup_args.collection, 3);
            assert_eq!(lookup_args.qname, "a");
            assert_eq!(lookup_args.value_type, "xs:integer");
            assert_eq!(lookup_args.value, "1");
            assert_eq!(lookup_args.relation, "ge");
            assert_eq!(lookup_args.name, "values.dbx");
        } else {
            panic!("Expected Lookup command");
        }
    }

    #[test]
    fn test_dump_index_command() {
        let args = XmldexArgs::try_parse_from([
            "xmldex",
            "-f",
            "json",
            "dump-index",
            "/path/to/db",
            "--name",
            "other.dbx",
        ])
        .unwrap();

        assert_eq!(args.output_format, OutputFormat::Json);
        if let Command::DumpIndex(dump_args) = args.command {
            assert_eq!(dump_args.name, "other.dbx");
            assert_eq!(dump_args.collection, None);
        } else {
            panic!("Expected DumpIndex command");
        }
    }

    #[test]
    fn test_verbosity() {
        let args = XmldexArgs::try_parse_from(["xmldex", "-q", "inspect-metadata", "meta-1.bin"]).unwrap();
        assert_eq!(args.verbosity(), 0);

        let args = XmldexArgs::try_parse_from(["xmldex", "inspect-metadata", "meta-1.bin"]).unwrap();
        assert_eq!(args.verbosity(), 1);

        let args = XmldexArgs::try_parse_from(["xmldex", "-vvv", "inspect-metadata", "meta-1.bin"]).unwrap();
        assert_eq!(args.verbosity(), 3);
    }

    #[test]
    fn test_lookup_requires_value() {
        let result = XmldexArgs::try_parse_from([
            "xmldex",
            "lookup",
            "/path/to/db",
            "--collection",
            "1",
            "--qname",
            "a",
        ]);
        assert!(result.is_err());
    }
}
