//! Output formatting for the xmldex CLI.

use serde::Serialize;

use crate::cli::args::{OutputFormat, XmldexArgs};
use crate::dom::NodeId;
use crate::error::Result;
use crate::index::IndexEntry;
use crate::metadata::{DocumentMetadata, DocumentType, LockToken};

/// A command result that can be printed for humans or as JSON.
pub trait Report: Serialize {
    fn print_human(&self);
}

/// Decoded document metadata.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataReport {
    pub file: String,
    pub mime_type: String,
    pub created: i64,
    pub created_at: Option<String>,
    pub last_modified: i64,
    pub last_modified_at: Option<String>,
    pub page_count: i32,
    pub user_lock: i32,
    pub doc_type: Option<DocumentType>,
    pub lock_token: Option<LockToken>,
}

impl MetadataReport {
    pub fn new(file: String, metadata: &DocumentMetadata) -> Self {
        MetadataReport {
            file,
            mime_type: metadata.mime_type().to_string(),
            created: metadata.created(),
            created_at: metadata.created_at().map(|t| t.to_rfc3339()),
            last_modified: metadata.last_modified(),
            last_modified_at: metadata.last_modified_at().map(|t| t.to_rfc3339()),
            page_count: metadata.page_count(),
            user_lock: metadata.user_lock(),
            doc_type: metadata.doc_type().cloned(),
            lock_token: metadata.lock_token().cloned(),
        }
    }
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

impl Report for MetadataReport {
    fn print_human(&self) {
        println!("Metadata: {}", self.file);
        println!("  mime type:     {}", self.mime_type);
        println!(
            "  created:       {} ({})",
            self.created,
            or_dash(self.created_at.as_deref())
        );
        println!(
            "  last modified: {} ({})",
            self.last_modified,
            or_dash(self.last_modified_at.as_deref())
        );
        println!("  page count:    {}", self.page_count);
        println!("  user lock:     {}", self.user_lock);

        match &self.doc_type {
            Some(doc_type) => println!(
                "  doctype:       name={} public={} system={}",
                or_dash(doc_type.name.as_deref()),
                or_dash(doc_type.public_id.as_deref()),
                or_dash(doc_type.system_id.as_deref())
            ),
            None => println!("  doctype:       -"),
        }

        match &self.lock_token {
            Some(token) => {
                println!("  lock token:");
                println!("    type:    {:?}", token.lock_type);
                println!("    scope:   {:?}", token.scope);
                println!("    depth:   {}", token.depth);
                println!("    timeout: {}", token.timeout);
                println!("    owner:   {}", or_dash(token.owner.as_deref()));
                println!(
                    "    token:   {}",
                    token.token_uri().as_deref().unwrap_or("-")
                );
            }
            None => println!("  lock token:    -"),
        }
    }
}

/// One key of a dumped index.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRow {
    pub collection: u16,
    pub qname: Option<String>,
    pub value_type: String,
    pub value: String,
    pub documents: usize,
    pub nodes: usize,
}

impl From<&IndexEntry> for EntryRow {
    fn from(entry: &IndexEntry) -> Self {
        EntryRow {
            collection: entry.collection_id,
            qname: entry.qname.as_ref().map(|q| q.to_string()),
            value_type: entry.value.atomic_type().to_string(),
            value: entry.value.to_string(),
            documents: entry.postings.documents().count(),
            nodes: entry.postings.len(),
        }
    }
}

/// Listing of an index file.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDump {
    pub file: String,
    pub key_count: usize,
    pub entries: Vec<EntryRow>,
}

impl Report for IndexDump {
    fn print_human(&self) {
        println!("Index: {} ({} keys)", self.file, self.entries.len());
        if self.key_count != self.entries.len() {
            println!("  {} keys in the file, filtered", self.key_count);
        }
        for row in &self.entries {
            println!(
                "  [{}] {} {}({}) -> {} nodes in {} documents",
                row.collection,
                row.qname.as_deref().unwrap_or("?"),
                row.value_type,
                row.value,
                row.nodes,
                row.documents
            );
        }
    }
}

/// Nodes matched by a lookup.
#[derive(Debug, Clone, Serialize)]
pub struct LookupResult {
    pub collection: u16,
    pub qname: String,
    pub relation: String,
    pub value: String,
    pub value_type: String,
    pub nodes: Vec<NodeId>,
}

impl Report for LookupResult {
    fn print_human(&self) {
        println!(
            "{} {} {}({}) in collection {}: {} nodes",
            self.qname,
            self.relation,
            self.value_type,
            self.value,
            self.collection,
            self.nodes.len()
        );
        for node in &self.nodes {
            println!("  {node}");
        }
    }
}

/// Print `result` in the format selected on the command line.
pub fn output_result<T: Report>(result: &T, args: &XmldexArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            result.print_human();
            Ok(())
        }
        OutputFormat::Json => output_json(result, args),
    }
}

fn output_json<T: Serialize>(result: &T, args: &XmldexArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}
