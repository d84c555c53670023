//! `bang` — command-line front end for the scanning engine.

use bang::meta_dir::MetaDirectory;
use bang::parsers::builtin_factories;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bang", about = "Recursive binary-analysis scanning engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan an input file into a fresh meta root.
    Scan {
        input: PathBuf,
        #[arg(long, default_value_t = num_cpus::get())]
        workers: usize,
    },
    /// Print the recorded info for one meta directory.
    Show {
        meta_root: PathBuf,
        md_path: String,
    },
    /// List every meta directory under a meta root.
    Ls { meta_root: PathBuf },
}

fn main() -> bang::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Scan { input, workers } => {
            let meta_root = std::env::current_dir()?.join(format!(
                "{}-meta",
                input.file_name().unwrap_or_default().to_string_lossy()
            ));
            std::fs::create_dir_all(&meta_root)?;
            let input_in_root = meta_root.join(input.file_name().unwrap_or_default());
            std::fs::copy(&input, &input_in_root)?;
            let root = bang::scan(
                &meta_root,
                input.file_name().unwrap_or_default().as_ref(),
                builtin_factories(),
                workers,
            )?;
            println!("scanned into {}", meta_root.display());
            println!("root md: {}", root.md_path());
        }
        Command::Show { meta_root, md_path } => {
            let md = MetaDirectory::from_md_path(Arc::new(meta_root), md_path);
            let _guard = md.open(false)?;
            println!("labels: {:?}", md.labels());
            println!("extracted: {:?}", md.extracted_files());
        }
        Command::Ls { meta_root } => {
            for entry in walk_meta_root(&meta_root) {
                println!("{}", entry.display());
            }
        }
    }
    Ok(())
}

fn walk_meta_root(root: &PathBuf) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(read_dir) = std::fs::read_dir(root) {
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.extend(walk_meta_root(&path));
            } else {
                out.push(path);
            }
        }
    }
    out
}
