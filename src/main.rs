//! FMJT CLI
//!
//! Thin wrappers around the fmjt-core store, transforms, and search.
//!
//! # Usage
//!
//! ```bash
//! # Build a store from a text table on stdin ("rows cols" first line)
//! fmjt create -o data.fmjt < table.txt
//!
//! # Inspect it
//! fmjt info data.fmjt
//! fmjt dump data.fmjt
//!
//! # Transform it
//! fmjt normalize data.fmjt
//! fmjt filter -i data.fmjt -o subset.fmjt --rows 3,5,9 --keep-rows
//!
//! # Query it
//! fmjt nearest -i data.fmjt --query "0.1,0.2,0.3" --metric cosine -k 10
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fmjt_core::{
    concatenate, filter, group_reduce, search, text, Axis, MatrixStore, Metric, Reducer,
    SearchOptions,
};

#[derive(Parser)]
#[command(name = "fmjt")]
#[command(about = "Memory-mapped matrix store tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a store from a text table (stdin unless -i is given)
    Create {
        /// Output store path
        #[arg(short, long)]
        output: PathBuf,

        /// Input text table; first line is "<rows> <cols>"
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print a store as a tab-separated table
    Dump { file: PathBuf },

    /// Print store dimensions
    Info { file: PathBuf },

    /// Multiply every cell by -1, in place
    Negate { file: PathBuf },

    /// Scale every row to unit Euclidean norm, in place
    Normalize { file: PathBuf },

    /// Copy a store, removing (or keeping) rows and columns by id
    Filter {
        /// Source store
        #[arg(short, long)]
        input: PathBuf,

        /// Destination store
        #[arg(short, long)]
        output: PathBuf,

        /// Comma-separated row ids
        #[arg(long)]
        rows: Option<String>,

        /// Path to newline-separated row ids
        #[arg(long)]
        rows_path: Option<PathBuf>,

        /// Keep the selected rows instead of removing them
        #[arg(long)]
        keep_rows: bool,

        /// Comma-separated column ids
        #[arg(long)]
        cols: Option<String>,

        /// Path to newline-separated column ids
        #[arg(long)]
        cols_path: Option<PathBuf>,

        /// Keep the selected columns instead of removing them
        #[arg(long)]
        keep_cols: bool,
    },

    /// Concatenate stores along one axis
    Combine {
        /// Destination store
        #[arg(short, long)]
        output: PathBuf,

        /// Concatenate columns instead of rows
        #[arg(long)]
        by_col: bool,

        /// Source stores, in order
        inputs: Vec<PathBuf>,
    },

    /// Reduce groups of rows to single rows
    Group {
        /// Source store
        #[arg(short, long)]
        input: PathBuf,

        /// Destination store
        #[arg(short, long)]
        output: PathBuf,

        /// Path to group file: one comma-separated list of row ids per line
        #[arg(long)]
        groups: PathBuf,

        /// Reducer: min, max, mean, or median
        #[arg(long, default_value = "median", value_parser = parse_reducer)]
        op: Reducer,
    },

    /// Rank rows against a query vector
    Nearest {
        /// Store to search
        #[arg(short, long)]
        input: PathBuf,

        /// Query vector, comma-separated floats
        #[arg(short, long)]
        query: String,

        /// Scoring metric: l2 or cosine
        #[arg(long, default_value = "l2", value_parser = parse_metric)]
        metric: Metric,

        /// Number of results
        #[arg(short = 'k', long, default_value = "10")]
        k: usize,

        /// Results to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Worker partitions (0 = available cores)
        #[arg(long, default_value = "0")]
        parallelism: usize,

        /// Skip rows identical to the query
        #[arg(long)]
        exclude_exact: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Create { output, input } => {
            let store = match input {
                Some(path) => {
                    let reader = BufReader::new(
                        File::open(&path).with_context(|| format!("open {}", path.display()))?,
                    );
                    text::parse_table(reader, &output)?
                }
                None => text::parse_table(std::io::stdin().lock(), &output)?,
            };
            tracing::info!(
                "created {}x{} store at {}",
                store.rows(),
                store.cols(),
                output.display()
            );
            store.close()?;
        }

        Commands::Dump { file } => {
            let store = MatrixStore::open(&file)?;
            let mut out = BufWriter::new(std::io::stdout().lock());
            text::dump_table(&store, &mut out)?;
            out.flush()?;
        }

        Commands::Info { file } => {
            let store = MatrixStore::open(&file)?;
            println!("Rows: {}", store.rows());
            println!("Cols: {}", store.cols());
        }

        Commands::Negate { file } => {
            let mut store = MatrixStore::open(&file)?;
            store.negate();
            store.close()?;
        }

        Commands::Normalize { file } => {
            let mut store = MatrixStore::open(&file)?;
            store.normalize_rows();
            store.close()?;
        }

        Commands::Filter {
            input,
            output,
            rows,
            rows_path,
            keep_rows,
            cols,
            cols_path,
            keep_cols,
        } => {
            let row_ids = gather_ids(rows.as_deref(), rows_path.as_deref())?;
            let col_ids = gather_ids(cols.as_deref(), cols_path.as_deref())?;
            let src = MatrixStore::open(&input)?;
            let dst = filter(&src, &output, &row_ids, keep_rows, &col_ids, keep_cols)?;
            dst.close()?;
        }

        Commands::Combine {
            output,
            by_col,
            inputs,
        } => {
            let sources: Vec<MatrixStore> = inputs
                .iter()
                .map(MatrixStore::open)
                .collect::<fmjt_core::Result<_>>()?;
            let refs: Vec<&MatrixStore> = sources.iter().collect();
            let axis = if by_col { Axis::Columns } else { Axis::Rows };
            let dst = concatenate(&output, &refs, axis)?;
            dst.close()?;
        }

        Commands::Group {
            input,
            output,
            groups,
            op,
        } => {
            let group_lists = read_groups(&groups)?;
            let src = MatrixStore::open(&input)?;
            let dst = group_reduce(&src, &output, &group_lists, op)?;
            dst.close()?;
        }

        Commands::Nearest {
            input,
            query,
            metric,
            k,
            offset,
            parallelism,
            exclude_exact,
        } => {
            let query = parse_vector(&query)?;
            let store = MatrixStore::open(&input)?;

            let mut opts = SearchOptions::new(metric);
            opts.offset = offset;
            opts.limit = k;
            opts.parallelism = parallelism;
            opts.exclude_exact = exclude_exact;
            let results = search(&store, &query, &opts)?;

            for result in results {
                println!(
                    "position: {}\tid: {}\tscore: {:.6}",
                    result.position, result.id, result.score
                );
            }
        }
    }

    Ok(())
}

fn parse_reducer(s: &str) -> Result<Reducer, String> {
    s.parse()
}

fn parse_metric(s: &str) -> Result<Metric, String> {
    s.parse()
}

fn parse_vector(s: &str) -> anyhow::Result<Vec<f32>> {
    s.split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .with_context(|| format!("bad query component {v:?}"))
        })
        .collect()
}

/// Merge ids from an inline comma-separated list and a newline-separated
/// file; empty entries are skipped.
fn gather_ids(list: Option<&str>, path: Option<&std::path::Path>) -> anyhow::Result<Vec<u32>> {
    let mut ids = Vec::new();

    let mut add = |part: &str| -> anyhow::Result<()> {
        let part = part.trim();
        if !part.is_empty() {
            ids.push(
                part.parse::<u32>()
                    .with_context(|| format!("bad id {part:?}"))?,
            );
        }
        Ok(())
    };

    if let Some(list) = list {
        for part in list.split(',') {
            add(part)?;
        }
    }
    if let Some(path) = path {
        let reader =
            BufReader::new(File::open(path).with_context(|| format!("open {}", path.display()))?);
        for line in reader.lines() {
            add(&line?)?;
        }
    }

    Ok(ids)
}

/// Parse a group file: one comma-separated list of row ids per line.
fn read_groups(path: &std::path::Path) -> anyhow::Result<Vec<Vec<u32>>> {
    let reader =
        BufReader::new(File::open(path).with_context(|| format!("open {}", path.display()))?);
    let mut groups = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let mut group = Vec::new();
        for part in line.split(',') {
            let part = part.trim();
            if !part.is_empty() {
                group.push(
                    part.parse::<u32>()
                        .with_context(|| format!("bad id {part:?}"))?,
                );
            }
        }
        if !group.is_empty() {
            groups.push(group);
        }
    }
    Ok(groups)
}
