/*!
 * Graceful VFS - Stress Runner
 *
 * Opens more files at once than a default process limit allows:
 * - Writes every file through a write stream
 * - Reads every file back through a read stream
 * - Reports how often the retry queue had to step in
 */

use futures::future::join_all;
use std::error::Error;
use tracing::{info, warn};

use graceful_vfs::core::limits::{DEFAULT_STRESS_FILE_COUNT, DEFAULT_STRESS_STORAGE_PATH};
use graceful_vfs::{
    init_tracing, GracefulFs, LocalFS, ReadStreamOptions, RetryQueue, WriteStreamOptions,
};

const STORAGE_PATH_ENV: &str = "GRACEFUL_STORAGE_PATH";
const FILE_COUNT_ENV: &str = "GRACEFUL_FILE_COUNT";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let storage_path = std::env::var(STORAGE_PATH_ENV)
        .unwrap_or_else(|_| DEFAULT_STRESS_STORAGE_PATH.to_string());
    let file_count = match std::env::var(FILE_COUNT_ENV) {
        Ok(raw) => raw
            .parse::<usize>()
            .map_err(|e| format!("invalid {}={:?}: {}", FILE_COUNT_ENV, raw, e))?,
        Err(_) => DEFAULT_STRESS_FILE_COUNT,
    };

    info!(storage_path = %storage_path, file_count, "Graceful VFS stress run starting");
    std::fs::create_dir_all(&storage_path)?;

    let fs = GracefulFs::new(LocalFS::new(&storage_path));

    info!("Writing files through write streams...");
    let writes = (0..file_count).map(|i| {
        let mut stream = fs.create_write_stream(file_name(i), WriteStreamOptions::default());
        let written = stream.write(contents(i));
        async move {
            written?;
            stream.finished().await
        }
    });
    let write_failures = join_all(writes)
        .await
        .into_iter()
        .filter(Result::is_err)
        .count();
    info!(failures = write_failures, stats = ?RetryQueue::global().stats(), "Write phase complete");

    info!("Reading files back through read streams...");
    let reads = (0..file_count).map(|i| {
        let stream = fs.create_read_stream(file_name(i), ReadStreamOptions::default());
        async move { (i, stream.collect().await) }
    });
    let mut read_failures = 0;
    for (i, result) in join_all(reads).await {
        match result {
            Ok(data) if data == contents(i).as_bytes() => {}
            Ok(_) => {
                warn!(file = %file_name(i), "Contents do not match what was written");
                read_failures += 1;
            }
            Err(e) => {
                warn!(file = %file_name(i), error = %e, "Read stream failed");
                read_failures += 1;
            }
        }
    }

    let stats = RetryQueue::global().stats();
    info!(
        failures = read_failures,
        deferred = stats.deferred_total,
        replayed = stats.replayed_total,
        peak_depth = stats.peak_depth,
        "Read phase complete"
    );

    if let Err(e) = std::fs::remove_dir_all(&storage_path) {
        warn!(error = %e, "Could not remove stress directory");
    }

    if write_failures + read_failures > 0 {
        return Err(format!(
            "{} writes and {} reads failed",
            write_failures, read_failures
        )
        .into());
    }

    info!("Stress run complete");
    Ok(())
}

fn file_name(i: usize) -> String {
    format!("file-{}.txt", i)
}

fn contents(i: usize) -> String {
    format!("content of file {}\n", i)
}
