use std::sync::Arc;
use std::time::Duration;

use appvisor::{
    ApplicationInstance, BufferingPolicy, Config, ConfigurationKey, ConfigurationPropagator,
    EventBus, PlaybackTimerEntry, SuspendPolicy, TaskOrigin,
};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let mut cfg = Config::default();
    cfg.suspend = SuspendPolicy::DropScriptTasks;

    let instance = ApplicationInstance::new("demo", cfg);

    // A domain bus adapted into a script event.
    let ticks = EventBus::<u64>::new();
    instance
        .adapter()
        .adapt_event(&ticks, "ticked", |n| serde_json::json!({ "tick": n }));
    instance.adapter().start_or_resume();
    instance
        .adapter()
        .add_event_listener("ticked", |payload| println!("script saw {payload}"))?;

    for n in 0..3 {
        ticks.notify(n);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Suspension withholds script delivery; internal work keeps running.
    instance.suspend();
    ticks.notify(99); // missed while paused
    instance
        .schedule(TaskOrigin::Internal, || println!("bookkeeping still runs"))
        .await?;
    instance.resume();

    // Configuration propagation: most recently pushed owner wins.
    let propagator = Arc::new(ConfigurationPropagator::new());
    propagator.changes().subscribe(
        |change| println!("configuration changed: {change:?}"),
        BufferingPolicy::Unbounded,
    );
    propagator.push("demo", ConfigurationKey::ApplicationName, "Demo TV");
    propagator.push("other", ConfigurationKey::ApplicationName, "Other TV");
    propagator.remove_application("other");

    // A playback entry stopped before its timer fires.
    let mut entry = PlaybackTimerEntry::new("queue-1", Duration::from_secs(30));
    entry.fill_request_fields(Some("demo-user".into()));
    entry.done_playing().subscribe(
        |()| println!("done playing"),
        BufferingPolicy::Unbounded,
    );
    entry.play();
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("played for {:?}", entry.played_for());
    entry.stop();

    tokio::time::sleep(Duration::from_millis(100)).await;
    instance.terminate();
    println!("instance terminated");

    Ok(())
}
