use clap::Parser;
use docqa_context::text::{DEFAULT_SEPARATORS, RecursiveTextSplitter, TextChunk};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::process;

/// A CLI tool to split text files into overlapping chunks, printed as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Source label recorded with every chunk.
    #[arg(short, long, default_value = "stdin")]
    source: String,

    /// Target chunk size in characters.
    #[arg(short = 'c', long, default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared between consecutive chunks.
    #[arg(short = 'o', long, default_value_t = 200)]
    chunk_overlap: usize,

    /// Comma-separated literal separators, most significant first.
    /// Defaults to paragraph, line and space separators.
    #[arg(short, long, value_delimiter = ',')]
    separators: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ChunkOutput<'a> {
    source: &'a str,
    #[serde(flatten)]
    chunk: &'a TextChunk,
    length: usize,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let content = if let Some(input_path) = &args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let separators: Vec<String> = match args.separators {
        Some(list) => list.into_iter().map(|s| unescape(&s)).collect(),
        None => DEFAULT_SEPARATORS.iter().map(|&s| s.to_string()).collect(),
    };
    let separator_refs: Vec<&str> = separators.iter().map(String::as_str).collect();

    let splitter = RecursiveTextSplitter::new(args.chunk_size, args.chunk_overlap)?
        .with_separators(&separator_refs)?;
    let chunks = splitter.split_text(&content);

    let output: Vec<ChunkOutput> = chunks
        .iter()
        .map(|chunk| ChunkOutput {
            source: &args.source,
            chunk,
            length: chunk.chunk_text.chars().count(),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

// Lets shells pass "\n" and "\t" without quoting tricks.
fn unescape(separator: &str) -> String {
    separator.replace("\\n", "\n").replace("\\t", "\t")
}
