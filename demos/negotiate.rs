//! Negotiate a receive-only session against a stream URL
//!
//! Creates a recv-only offer with webrtc-rs, finds whatever signaling the
//! remote speaks, and prints every event as JSON.
//!
//! Usage:
//!   cargo run --example negotiate -- <stream_url> [config.json]
//!
//! Examples:
//!   # MediaMTX WHEP endpoint (direct mode)
//!   cargo run --example negotiate -- http://localhost:8889/mystream/whep
//!
//!   # Unknown service, discovery mode
//!   RUST_LOG=debug cargo run --example negotiate -- https://live.example.com:8443/248/cam_02

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use webrtc_negotiator::{
    EventCallback, NegotiationEvent, NegotiationState, Negotiator, NegotiatorConfig, WebRtcEngine,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <stream_url> [config.json]", args[0]);
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  {} http://localhost:8889/mystream/whep", args[0]);
        eprintln!("  {} https://live.example.com:8443/248/cam_02 negotiator.json", args[0]);
        std::process::exit(1);
    }

    let stream_url = &args[1];
    let config = match args.get(2) {
        Some(path) => NegotiatorConfig::from_json_file(path)?,
        None => NegotiatorConfig::default(),
    };

    println!("========================================");
    println!("  WebRTC Negotiator");
    println!("========================================");
    println!();
    println!("Stream URL:    {}", stream_url);
    println!("Strategies:    {}", config.enabled_strategies().count());
    println!("ICE servers:   {}", config.ice_servers.len());
    println!();

    let engine = WebRtcEngine::new(config.ice_servers.clone())?;

    let on_event: EventCallback = Arc::new(|event: NegotiationEvent| {
        match serde_json::to_string(&event) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("[WARN] unprintable event: {}", e),
        }
    });

    let negotiator = Negotiator::new(engine, on_event, config)?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, shutting down...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    negotiator.begin(stream_url)?;
    println!("Negotiating... Press Ctrl+C to stop.");
    println!();

    let mut last = NegotiationState::Idle;
    while running.load(Ordering::SeqCst) {
        let state = negotiator.state();
        if state != last {
            println!("[STATE] {}", state);
            last = state;
        }
        if state == NegotiationState::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    negotiator.dispose();
    // let the release (peer close + resource DELETE) finish
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!();
    println!("Done.");
    Ok(())
}
