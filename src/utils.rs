use std::io::{self, BufRead};
use std::path::Path;
use std::thread;

use anyhow::Result;
use log::{debug, error, info};
use tokio::fs;
use tokio::sync::mpsc;

/// Creates `path` and its parents if missing.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e.into());
        }
        info!("Created directory at: {:?}", path);
    }
    Ok(())
}

/// Formats bytes as space separated hex, for log lines.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reads `reader` line by line on its own thread and forwards each line.
///
/// A blocking read cannot be cancelled, so the thread is detached rather
/// than joined; it ends at EOF, on a read error, or once the receiver is gone
/// and the next line arrives.
pub fn spawn_line_reader<R>(reader: R) -> io::Result<mpsc::UnboundedReceiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("line-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
            debug!("Line reader stopped.");
        })?;
    Ok(rx)
}
