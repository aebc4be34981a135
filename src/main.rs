use std::io::{BufRead, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use colored::*;
use humansize::{BINARY, format_size};
use indicatif::{ProgressBar, ProgressStyle};

use rextract::{RangeStream, open_archive};

/// Inspect and extract remote archives without downloading them whole.
#[derive(Parser, Debug)]
#[command(name = "rextract", version, about)]
struct Args {
    /// URL of the archive (the server must support HTTP range requests)
    url: String,

    /// Password for encrypted archives
    #[arg(short, long)]
    password: Option<String>,

    /// Directory to extract into
    #[arg(short, long, default_value = "extracted")]
    output: PathBuf,

    /// List members and exit without extracting
    #[arg(short, long)]
    list: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    yes: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Probing archive...");

    let stream = RangeStream::open(&args.url)?;
    let metrics = stream.metrics();
    let mut engine = open_archive(stream.clone(), args.password.as_deref())?;

    let members = engine.members()?.to_vec();
    let total_size: u64 = members.iter().map(|m| m.size).sum();
    spinner.finish_and_clear();

    println!(
        "{} {} archive, {} member(s), {} ({} compressed)",
        "Found:".green().bold(),
        engine.format().name(),
        members.len(),
        format_size(total_size, BINARY),
        format_size(stream.len(), BINARY),
    );
    println!();

    for member in &members {
        println!(
            "  {:>10}  {}",
            format_size(member.size, BINARY),
            member.path.display()
        );
    }
    println!();

    if args.list {
        return Ok(());
    }

    if !args.yes && !confirm(&format!("Extract to {}? [y/N] ", args.output.display()))? {
        println!("Aborted.");
        return Ok(());
    }

    std::fs::create_dir_all(&args.output)?;

    let bar = ProgressBar::new(total_size);
    bar.set_style(
        ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
        )?
        .progress_chars("=>-"),
    );

    let mut extracted = 0usize;
    let mut skipped = 0usize;
    for member in &members {
        let dest = match safe_destination(&args.output, &member.path) {
            Some(dest) => dest,
            None => {
                bar.suspend(|| {
                    eprintln!(
                        "{} skipping member with unsafe path: {}",
                        "Warning:".yellow().bold(),
                        member.path.display()
                    );
                });
                skipped += 1;
                continue;
            }
        };

        bar.set_message(member.path.display().to_string());
        engine.extract(&member.path, &dest, Some(&mut |n| bar.inc(n)))?;
        extracted += 1;
    }
    bar.finish_and_clear();

    println!(
        "{} {} member(s) to {}{}",
        "Extracted:".green().bold(),
        extracted,
        args.output.display(),
        if skipped > 0 {
            format!(" ({skipped} skipped)")
        } else {
            String::new()
        }
    );
    println!(
        "Transferred {} in {} range request(s)",
        format_size(metrics.total_bytes(), BINARY),
        metrics.request_count(),
    );

    Ok(())
}

fn confirm(prompt: &str) -> std::io::Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Resolve a member path under the output directory, rejecting absolute
/// paths and `..` components so a hostile archive cannot escape it.
fn safe_destination(output: &Path, member: &Path) -> Option<PathBuf> {
    let mut dest = output.to_path_buf();
    let mut any = false;

    for component in member.components() {
        match component {
            Component::Normal(part) => {
                dest.push(part);
                any = true;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }

    any.then_some(dest)
}
