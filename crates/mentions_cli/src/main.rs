//! CLI smoke probe.
//!
//! # Responsibility
//! - Wire `mentions_core` against an in-memory store and a scripted roster.
//! - Print every mention outcome and delivery so crate linkage can be checked
//!   by eye.
//!
//! Usage: `mentions_cli [settings.json]`. Set `MENTIONS_LOG_DIR` to an
//! absolute path to also write log files.

use mentions_core::{
    core_version, default_log_level, init_logging, load_config, Identity, MentionCoordinator,
    PreferenceChange, RecordingSink, SessionRoster, SinkRegistry,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const SCRIPT: &[(&str, &str)] = &[
    ("Alex", "morning @steve, seen @An?"),
    ("Alex", "@Anna can you check the farm"),
    ("Steve", "@alex on my way"),
    ("Alex", "@Steve again"),
    ("Ann", "@Nobody here? !anna"),
];

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mentions_cli error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    if let Ok(dir) = std::env::var("MENTIONS_LOG_DIR") {
        init_logging(default_log_level(), dir)?;
    }
    let mut config = match std::env::args().nth(1) {
        Some(path) => load_config(path)?,
        None => Default::default(),
    };
    config.storage.path = None;

    let people: Vec<Identity> = ["Alex", "Steve", "Ann", "Anna"]
        .into_iter()
        .map(Identity::generate)
        .collect();
    let roster = Arc::new(SessionRoster::from_identities(people.clone()));
    let sink = Arc::new(RecordingSink::new());
    let mut sinks = SinkRegistry::new();
    sinks.register_fallback(sink.clone());

    let coordinator = MentionCoordinator::open(config, roster, sinks)?;
    println!("mentions_core version={}", core_version());

    for person in &people {
        coordinator.on_join(person.id)?;
    }
    let ann = id_of(&people, "Ann")?;
    let steve = id_of(&people, "Steve")?;
    coordinator.submit_preference_change(ann, PreferenceChange::Ignore(steve))?;
    let warmed = coordinator.pump_blocking(Duration::from_secs(2));
    for change in &warmed.changes {
        println!(
            "change request={} action={} ok={}",
            change.request_id,
            change.change.label(),
            change.result.is_ok()
        );
    }

    for (sender_name, text) in SCRIPT {
        let sender = id_of(&people, sender_name)?;
        let report = coordinator.on_message(sender, text);
        println!("{sender_name}> {}", report.rendered_text);
        for mention in &report.mentions {
            println!("  {:<8} {:?}", mention.token, mention.outcome);
        }
    }

    let pumped = coordinator.pump_blocking(Duration::from_secs(2));
    for deferred in &pumped.dispatches {
        println!("deferred target={} {:?}", deferred.target, deferred.outcome);
    }
    for delivery in sink.deliveries() {
        println!(
            "delivered to={} channel={} from={} sound={}",
            delivery.payload.target_name,
            delivery.channel.as_db_str(),
            delivery.payload.sender_name,
            delivery.payload.sound.key
        );
    }
    println!("stats {:?}", coordinator.dispatch_stats());
    Ok(())
}

fn id_of(people: &[Identity], name: &str) -> Result<mentions_core::IdentityId, String> {
    people
        .iter()
        .find(|person| person.display_name == name)
        .map(|person| person.id)
        .ok_or_else(|| format!("no scripted identity named `{name}`"))
}
