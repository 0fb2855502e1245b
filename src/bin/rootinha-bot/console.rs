use std::io::{BufRead, Write};

use anyhow::Result;
use futures::StreamExt;
use rootinha::{ActionResponse, ChatEvent, Router};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

pub const CONSOLE_CHANNEL: &str = "console";

pub fn format_response(response: &ActionResponse) -> String {
    format!(
        "[{}] ({}) {}",
        response.channel(),
        response.parent_id(),
        response.text()
    )
}

/// Reads stdin on its own OS thread. A blocked read there never holds up
/// runtime shutdown.
fn stdin_lines(buffer: usize) -> ReceiverStream<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(buffer);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}

/// Treats each stdin line as a chat message on the console channel.
///
/// Up to `max_in_flight` messages are handled concurrently; responses are
/// printed as they complete.
pub async fn run(router: &Router, max_in_flight: usize) -> Result<()> {
    let lines = stdin_lines(max_in_flight.max(1));

    lines
        .for_each_concurrent(max_in_flight, |line| async move {
            let text = match line {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to read from stdin");
                    return;
                }
            };
            if text.trim().is_empty() {
                return;
            }

            let event = ChatEvent::new(CONSOLE_CHANNEL, text);
            match router.route(&event).await {
                Some(response) => {
                    let mut stdout = std::io::stdout().lock();
                    if let Err(err) = writeln!(stdout, "{}", format_response(&response)) {
                        warn!(error = %err, "failed to write response");
                    }
                }
                None => debug!(text = %event.text, "no trigger matched"),
            }
        })
        .await;

    Ok(())
}
