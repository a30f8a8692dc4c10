use std::path::PathBuf;

use clap::Parser;
use thai_tokenizer::{build_vocab, Error, SegmenterKind, VocabConfig};

fn main() {
    if let Err(err) = run() {
        eprintln!("vocabulary build failed: {}", err);
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Build a word-level vocabulary from Thai text", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "PATH", help = "Vocabulary build config (TOML or JSON)")]
    config: Option<PathBuf>,

    #[arg(short, long = "input", value_name = "PATH", help = "Text file to count, one sentence per line")]
    inputs: Vec<PathBuf>,

    #[arg(short, long, value_name = "PATH", help = "Where to write the vocabulary JSON")]
    output: Option<PathBuf>,

    #[arg(long, value_name = "ENGINE", help = "Segmentation engine: newmm or syllable")]
    engine: Option<SegmenterKind>,

    #[arg(
        long,
        value_name = "PATH",
        required_unless_present = "config",
        help = "Segmentation dictionary, one word per line"
    )]
    dictionary: Option<PathBuf>,

    #[arg(long, help = "Keep only the N most frequent tokens")]
    vocab_size: Option<usize>,

    #[arg(long, help = "Keep tokens seen at least this many times")]
    min_frequency: Option<u64>,

    #[arg(long = "special-token", value_name = "TOKEN", help = "Special token, in id order")]
    special_tokens: Vec<String>,

    #[arg(long, value_name = "PATH", help = "Write a manifest describing the build")]
    manifest: Option<PathBuf>,

    #[arg(long, help = "Disable the progress bar")]
    no_progress: bool,
}

fn run() -> Result<(), Error> {
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => VocabConfig::from_path(path)?,
        None => {
            let output = args
                .output
                .clone()
                .ok_or(Error::InvalidConfig("--output is required without --config"))?;
            VocabConfig::new(Vec::new(), output)
        }
    };
    apply_args(&mut config, args);

    let trainer = build_vocab(&config)?;
    let size = trainer.vocab().map_or(0, |vocab| vocab.len());
    println!("vocab size: {}", size);
    println!("vocabulary written to {}", config.output.display());
    if let Some(manifest) = config.manifest.as_ref() {
        println!("manifest written to {}", manifest.display());
    }
    Ok(())
}

/// Command-line values take precedence over the config file.
fn apply_args(config: &mut VocabConfig, args: Args) {
    if !args.inputs.is_empty() {
        config.inputs = args.inputs;
    }
    if let Some(output) = args.output {
        config.output = output;
    }
    if let Some(engine) = args.engine {
        config.engine = engine;
    }
    if args.dictionary.is_some() {
        config.dictionary = args.dictionary;
    }
    if args.vocab_size.is_some() {
        config.vocab_size = args.vocab_size;
    }
    if args.min_frequency.is_some() {
        config.min_frequency = args.min_frequency;
    }
    if !args.special_tokens.is_empty() {
        config.special_tokens = args.special_tokens;
    }
    if args.manifest.is_some() {
        config.manifest = args.manifest;
    }
    if args.no_progress {
        config.progress = false;
    }
}
