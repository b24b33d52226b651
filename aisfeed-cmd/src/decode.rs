use std::fs::File;
use std::io::{stdin, stdout, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aisfeed::network::{spawn_feed, FeedOpts, PersistentClient};
use aisfeed::nmea::{spawn_pipeline, Message, Pipeline, ReassemblerOpts};
use aisfeed::stats::{Summary, TrafficStats};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use crossbeam::channel::{after, never, select};
use tracing::{info, warn};

use crate::output::{write_message, write_report, Report};
use crate::DecodeArgs;

pub struct TcpOpts {
    pub host: String,
    pub port: String,
    pub timeout: Duration,
    pub retry_min: u64,
    pub retry_max: u64,
    pub count: Option<usize>,
    pub duration: Option<u64>,
}

/// Receives decoded messages, printing them or collecting a summary, and records traffic.
struct Sink {
    args: DecodeArgs,
    stats: Arc<TrafficStats>,
    summary: Summary,
    count: usize,
}

impl Sink {
    fn new(args: &DecodeArgs) -> Self {
        let stats = Arc::new(TrafficStats::new());
        if let Some(path) = &args.stats {
            if path.exists() {
                match stats.load_from(path) {
                    Ok(()) => info!("loaded statistics from {path:?}"),
                    Err(err) => warn!("ignoring statistics in {path:?}: {err}"),
                }
            }
        }
        Sink {
            args: args.clone(),
            stats,
            summary: Summary::default(),
            count: 0,
        }
    }

    fn pipeline(&self, source: &str) -> Pipeline {
        Pipeline::new(source).with_opts(
            ReassemblerOpts::builder()
                .verify_checksum(self.args.verify_checksum)
                .build(),
        )
    }

    fn handle<W: Write>(&mut self, w: W, message: &Message) -> Result<()> {
        self.count += 1;
        self.summary.add(message);
        if self.args.summary {
            return Ok(());
        }
        write_message(w, message, &self.args.format)
    }

    fn finish(mut self, source: &str, pipeline: &Pipeline) -> Result<()> {
        self.summary.set_rejected(pipeline.reassembler().rejected());
        info!(
            messages = self.count,
            rejected = self.summary.total_rejected(),
            "finished {source}"
        );
        if self.args.summary {
            let report = Report {
                source,
                bytes: pipeline.bytes_received(),
                sentences: pipeline.sentences_received(),
                summary: &self.summary,
            };
            write_report(stdout(), &report, &self.args.format)?;
        }
        if let Some(path) = &self.args.stats {
            self.stats
                .save_to(path)
                .with_context(|| format!("saving statistics to {path:?}"))?;
            info!("saved statistics to {path:?}");
        }
        Ok(())
    }
}

pub fn decode_file(input: &Path, args: &DecodeArgs) -> Result<()> {
    let mut sink = Sink::new(args);
    let source = input.to_string_lossy().to_string();
    let reader: Box<dyn Read + Send> = if input.as_os_str() == "-" {
        Box::new(stdin())
    } else {
        Box::new(File::open(input).with_context(|| format!("opening {input:?}"))?)
    };

    let (messages, handle) = spawn_pipeline(reader, sink.pipeline(&source), 1024);
    let mut out = stdout().lock();
    for message in messages {
        sink.stats.record_message(Utc::now());
        sink.handle(&mut out, &message)?;
    }
    drop(out);

    let pipeline = handle
        .join()
        .map_err(|_| anyhow!("pipeline thread panicked"))?;
    sink.stats
        .record_bytes(pipeline.bytes_received(), Utc::now());
    sink.finish(&source, &pipeline)
}

pub fn decode_tcp(opts: &TcpOpts, args: &DecodeArgs) -> Result<()> {
    let mut sink = Sink::new(args);
    let source = format!("{}:{}", opts.host, opts.port);

    let client = PersistentClient::new().with_timeout(opts.timeout);
    let feed_opts = FeedOpts::builder()
        .host(opts.host.clone())
        .port(opts.port.clone())
        .retry_min(Duration::from_secs(opts.retry_min))
        .retry_max(Duration::from_secs(opts.retry_max))
        .build();
    let feed = spawn_feed(
        client,
        feed_opts,
        sink.pipeline(&source),
        Some(sink.stats.clone()),
    )
    .context("starting feed")?;

    let deadline = opts
        .duration
        .map_or_else(never, |secs| after(Duration::from_secs(secs)));
    let mut out = stdout().lock();
    loop {
        if opts.count.is_some_and(|count| sink.count >= count) {
            break;
        }
        select! {
            recv(feed.messages()) -> msg => match msg {
                Ok(message) => sink.handle(&mut out, &message)?,
                Err(_) => break,
            },
            recv(deadline) -> _ => break,
        }
    }
    drop(out);

    let pipeline = feed.stop().ok_or_else(|| anyhow!("feed thread panicked"))?;
    sink.finish(&source, &pipeline)
}
