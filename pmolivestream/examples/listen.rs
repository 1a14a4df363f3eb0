//! Example: listen to a live stream from the terminal
//!
//! Run with: cargo run -p pmolivestream --example listen -- http://radio.example.com:8000/live
//! Options:
//!   --secure       behave as if embedded in an HTTPS page (enables the proxy)
//!   --out FILE     write the raw stream to FILE (discarded otherwise)
//!
//! Commands (one per line on stdin):
//!   p  play/pause     m  mute/unmute     + / -  volume
//!   r  retry          u URL  change stream      q  quit

use pmoconfig::get_config;
use pmolivestream::{
    HttpMediaElement, LiveStreamConfigExt, MediaElement, NullSink, SessionServices,
    StreamRequest, StreamSession, WriterSink,
};
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = get_config();

    // RUST_LOG wins over the configured level
    let level = config.get_log_min_level()?.to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if config.get_log_enable_console()? {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut args = env::args().skip(1);
    let mut url = None;
    let mut secure = false;
    let mut out = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--secure" => secure = true,
            "--out" => out = args.next(),
            _ => url = Some(arg),
        }
    }
    let url = url.ok_or("usage: listen [--secure] [--out FILE] STREAM_URL")?;

    let settings = config.livestream_settings()?;
    let services = SessionServices::http(&settings)?;
    let client = settings.http_client()?;

    let media: Box<dyn MediaElement> = match out {
        Some(path) => {
            let file = tokio::fs::File::create(&path).await?;
            Box::new(HttpMediaElement::with_client(
                client,
                WriterSink::new(file),
                settings.stall_timeout,
            ))
        }
        None => Box::new(HttpMediaElement::with_client(
            client,
            NullSink::new(),
            settings.stall_timeout,
        )),
    };

    let session = StreamSession::start(
        media,
        StreamRequest::new(url).secure(secure),
        services,
        settings,
    );

    // print every snapshot change
    let mut updates = session.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let s = updates.borrow_and_update().clone();
            println!(
                "[{:?}/{}] {} | {} ({} listeners) | vol {:.2}{}",
                s.playback_state,
                s.health.label(),
                s.status_text,
                s.metadata.song_title,
                s.metadata.listener_count.as_deref().unwrap_or("?"),
                s.volume,
                if s.muted { " muted" } else { "" },
            );
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let result = match line.split_once(' ') {
            Some(("u", next)) => {
                session.change_stream(StreamRequest::new(next.trim()).secure(secure))
            }
            _ => match line {
                "p" => session.toggle_play_pause(),
                "m" => session.toggle_mute(),
                "+" => session.set_volume(session.snapshot().volume + 0.1),
                "-" => session.set_volume(session.snapshot().volume - 0.1),
                "r" => session.retry_now(),
                "q" => break,
                "" => Ok(()),
                other => {
                    println!("unknown command: {}", other);
                    Ok(())
                }
            },
        };
        result?;
    }

    session.shutdown().await?;
    Ok(())
}
