use clap::Parser;
use log::{debug, info, warn};
use rand::Rng;
use serde_json::json;
use server::admission::AdmissionManager;
use server::handle::DeferralHandle;
use server::scheduler::TokioScheduler;
use shared::{DeferralEvent, DEFAULT_PATIENCE_SECS, KEEPALIVE_INTERVAL_MS};
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, then runs one simulated connection attempt
/// through a configurable set of admission gates.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Number of simulated admission gates
        #[clap(short, long, default_value = "3")]
        gates: usize,
        /// Probability that a gate refuses the client (0.0 - 1.0)
        #[clap(short, long, default_value = "0.0")]
        refusal_chance: f64,
        /// Have the first gate present an interactive card
        #[clap(short, long)]
        card: bool,
        /// Keep-alive period in milliseconds
        #[clap(short, long, default_value_t = KEEPALIVE_INTERVAL_MS)]
        keepalive_ms: u64,
        /// Give up on the evaluation after this many seconds
        #[clap(short, long, default_value_t = DEFAULT_PATIENCE_SECS)]
        patience: u64,
    }

    env_logger::init();
    let args = Args::parse();

    let mut admission = AdmissionManager::new(16, Duration::from_secs(args.patience));
    let mut conn = admission
        .begin("127.0.0.1:30120".parse()?)
        .ok_or("admission roster full")?;
    let deferral = conn.deferral.clone();

    deferral.start_timer(&TokioScheduler, Duration::from_millis(args.keepalive_ms));

    // Notify the gates: each registers synchronously (so the evaluation can
    // not resolve under them), then does its actual work in the background.
    for i in 0..args.gates {
        let name = format!("gate-{}", i + 1);
        deferral.register(&name, "simulated admission gate");

        let handle = deferral.handle();
        let refusal_chance = args.refusal_chance;
        let with_card = args.card && i == 0;
        tokio::spawn(async move {
            run_gate(handle, name, refusal_chance, with_card).await;
        });
    }
    deferral.mark_events_run();
    deferral.evaluate();

    // Drive the outcome side the way a handshake layer would: forward pings
    // and progress to the wire, answer cards, stop on the terminal event.
    loop {
        tokio::select! {
            event = conn.events.recv() => match event {
                Some(DeferralEvent::KeepAlive) => {
                    debug!("keep-alive ping toward the connecting client");
                }
                Some(DeferralEvent::Progress { message }) => {
                    info!("please wait: {}", message);
                }
                Some(DeferralEvent::Card { payload }) => {
                    info!("card shown to the connecting client: {}", payload);
                    // Simulate the player pressing the accept button.
                    let answer = json!({ "accepted": true }).to_string();
                    admission.route_card_response(conn.client_id, &answer);
                }
                Some(DeferralEvent::Resolved) => {
                    let handover = deferral.handover();
                    info!(
                        "client {} admitted, handover: {}",
                        conn.client_id,
                        serde_json::to_string(&handover)?
                    );
                    break;
                }
                Some(DeferralEvent::Rejected { message }) => {
                    warn!("client {} refused: {}", conn.client_id, message);
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, abandoning the evaluation");
                break;
            }
        }
    }

    for gate in deferral.gate_states() {
        debug!(
            "gate '{}' ({}): done={} rejected={}",
            gate.gate, gate.description, gate.done, gate.rejected
        );
    }

    admission.finish(conn.client_id);
    Ok(())
}

/// One simulated gate: think for a while, publish progress and handover data,
/// optionally present a card, then decide.
async fn run_gate(handle: DeferralHandle, name: String, refusal_chance: f64, with_card: bool) {
    handle.update(&name, &format!("{} is checking your record", name));

    let think_ms = { rand::thread_rng().gen_range(300..=1500) };
    tokio::time::sleep(Duration::from_millis(think_ms)).await;

    handle.set_handover(&name, &json!({ "check_duration_ms": think_ms }).to_string());

    if with_card {
        let card = json!({
            "type": "AdaptiveCard",
            "version": "1.0",
            "body": [{ "type": "TextBlock", "text": "Accept the server rules to continue" }]
        })
        .to_string();

        // The answer decides the gate, whenever it arrives.
        let decider = handle.clone();
        let gate = name.clone();
        handle.present_card(
            &card,
            Some(Box::new(move |answer: &str| {
                debug!("{} received card answer: {}", gate, answer);
                decider.complete(&gate);
            })),
        );
        return;
    }

    let refused = { rand::thread_rng().gen_bool(refusal_chance.clamp(0.0, 1.0)) };
    if refused {
        handle.reject(&name, &format!("refused by {}", name));
    } else {
        handle.complete(&name);
    }
}
