use std::io::{stdout, Write};
use std::path::Path;

use aisfeed::stats::{TrafficSnapshot, TrafficStats};
use anyhow::{Context, Result};
use chrono::Utc;

use crate::output::Format;

pub fn show(input: &Path, format: &Format) -> Result<()> {
    let stats = TrafficStats::new();
    stats
        .load_from(input)
        .with_context(|| format!("loading statistics from {input:?}"))?;
    let snapshot = stats.snapshot(Utc::now());

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &snapshot).context("serializing to json")
        }
        Format::Text => stdout()
            .write_all(render_text(&snapshot).as_bytes())
            .context("writing to stdout"),
    }
}

fn render_text(snapshot: &TrafficSnapshot) -> String {
    let mut text = format!("Statistics as of {}\n", snapshot.time.to_rfc3339());
    text.push_str("Window       Buckets     Messages            Bytes\n");
    for window in &snapshot.windows {
        let messages: u64 = window.messages.iter().sum();
        let bytes: u64 = window.bytes.iter().sum();
        text.push_str(&format!(
            "{:<10} {:>9} {:>12} {:>16}\n",
            window.resolution.to_string(),
            window.messages.len(),
            messages,
            bytes
        ));
    }
    text
}
