//! Thin command-line front end over the download engine

use std::env;
use std::path::PathBuf;

use tracing::info;

use video_batch_engine::core::models::{BatchEvent, MediaFormat, TaskState};
use video_batch_engine::core::scheduler::BatchRequest;
use video_batch_engine::utils::format::{format_duration, format_size};
use video_batch_engine::{bootstrap, init};

#[tokio::main]
async fn main() {
    let _ = init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let exit_code = match args[1].as_str() {
        "probe" => run_probe(&args[2..]).await,
        "download" => run_download(&args[2..]).await,
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            1
        }
    };
    std::process::exit(exit_code);
}

fn print_usage() {
    eprintln!("Usage: video-batch-engine <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  probe <url>...                  fetch metadata for each URL");
    eprintln!("  download [options] <url>...     download a batch");
    eprintln!();
    eprintln!("Download options:");
    eprintln!("  -f, --format <name>       mp4-2160p | mp4-1080p | mp4-720p | mp3");
    eprintln!("  -d, --dest <dir>          destination directory");
    eprintln!("  -c, --concurrency <n>     parallel downloads, 1 to 5");
    eprintln!("  -i, --input <file>        read URLs from a file, one per line");
}

async fn run_probe(args: &[String]) -> i32 {
    if args.is_empty() {
        eprintln!("Usage: video-batch-engine probe <url>...");
        return 1;
    }

    let (_, engine) = bootstrap();
    let urls: Vec<String> = args.to_vec();
    let mut failures = 0;

    for (url, outcome) in urls.iter().zip(engine.probe(&urls).await) {
        match outcome {
            Ok(meta) => {
                println!("{}", meta.title);
                println!("  platform: {}", meta.platform);
                if let Some(secs) = meta.duration_seconds {
                    println!("  duration: {}", format_duration(secs));
                }
                if let Some(bytes) = meta.filesize_bytes {
                    println!("  size: {}", format_size(bytes));
                }
                if meta.is_playlist {
                    match meta.entry_count {
                        Some(n) => println!("  playlist with {} entries", n),
                        None => println!("  playlist"),
                    }
                }
            }
            Err(error) => {
                eprintln!("{}: {}", url, error);
                failures += 1;
            }
        }
    }

    if failures == 0 {
        0
    } else {
        1
    }
}

async fn run_download(args: &[String]) -> i32 {
    let (config, engine) = bootstrap();

    let mut format = config.download.default_format;
    let mut destination = PathBuf::from(&config.download.destination);
    let mut concurrency = config.download.concurrency;
    let mut input_file: Option<PathBuf> = None;
    let mut urls: Vec<String> = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-f" | "--format" => {
                let Some(value) = iter.next() else {
                    eprintln!("--format needs a value");
                    return 1;
                };
                match MediaFormat::parse(value) {
                    Some(parsed) => format = parsed,
                    None => {
                        eprintln!("Unknown format: {value}");
                        return 1;
                    }
                }
            }
            "-d" | "--dest" => {
                let Some(value) = iter.next() else {
                    eprintln!("--dest needs a value");
                    return 1;
                };
                destination = PathBuf::from(value);
            }
            "-c" | "--concurrency" => {
                let Some(value) = iter.next() else {
                    eprintln!("--concurrency needs a value");
                    return 1;
                };
                match value.parse::<usize>() {
                    Ok(parsed) => concurrency = parsed,
                    Err(_) => {
                        eprintln!("--concurrency needs a number, got: {value}");
                        return 1;
                    }
                }
            }
            "-i" | "--input" => {
                let Some(value) = iter.next() else {
                    eprintln!("--input needs a value");
                    return 1;
                };
                input_file = Some(PathBuf::from(value));
            }
            other => urls.push(other.to_string()),
        }
    }

    if let Some(path) = input_file {
        match std::fs::read_to_string(&path) {
            Ok(content) => urls.extend(content.lines().map(|line| line.to_string())),
            Err(error) => {
                eprintln!("Cannot read {}: {}", path.display(), error);
                return 1;
            }
        }
    }

    if urls.is_empty() {
        eprintln!(
            "Usage: video-batch-engine download [-f format] [-d dir] [-c n] [-i file] <url>..."
        );
        return 1;
    }

    info!(
        "Downloading {} URL(s) as {} into {}",
        urls.len(),
        format,
        destination.display()
    );

    let request = BatchRequest::new(urls, destination.clone())
        .with_default_format(format)
        .with_concurrency(concurrency);

    let mut session = match engine.submit_batch(request).await {
        Ok(session) => session,
        Err(error) => {
            eprintln!("Error: {error}");
            return 1;
        }
    };

    // remember where this batch went for the next run
    let mut config = config;
    config.remember_destination(&destination);
    if let Err(error) = config.save() {
        tracing::warn!("Could not persist destination: {}", error);
    }

    for rejection in session.rejections() {
        eprintln!("Skipped line {}: {}", rejection.index + 1, rejection.reason);
    }
    println!(
        "Queued {} task(s) into {}",
        session.accepted_tasks().len(),
        destination.display()
    );

    let cancel = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; stopping the batch");
            cancel.cancel();
        }
    });

    let mut batch_failed = 0;
    while let Some(event) = session.next_event().await {
        if let BatchEvent::BatchComplete { failed_count, .. } = &event {
            batch_failed = *failed_count;
        }
        render_event(&event);
    }

    if batch_failed == 0 {
        0
    } else {
        1
    }
}

fn render_event(event: &BatchEvent) {
    match event {
        BatchEvent::Task(progress) => {
            let short_id = progress.task_id.get(..8).unwrap_or(&progress.task_id);
            match (&progress.new_state, progress.numeric_progress) {
                (TaskState::Downloading, Some(pct)) => println!("[{short_id}] {pct:5.1}%"),
                (state, _) => match &progress.message {
                    Some(message) => println!("[{short_id}] {state} ({message})"),
                    None => println!("[{short_id}] {state}"),
                },
            }
        }
        BatchEvent::BatchComplete {
            done_count,
            failed_count,
        } => {
            println!("Batch complete: {done_count} done, {failed_count} failed");
        }
    }
}
