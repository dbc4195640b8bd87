use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;

use tbdeck_core::fake::FakeControlPlane;
use tbdeck_core::model::Model;

const DEMO_LOGDIRS: [&str; 3] = ["<notebook_dir>/runs", "/data/experiments/resnet", "/tmp/lr-sweep"];

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// An in-memory server seeded with a few instances
pub fn demo_control_plane() -> Arc<FakeControlPlane> {
    let fake = Arc::new(FakeControlPlane::new());
    for (i, logdir) in DEMO_LOGDIRS.iter().enumerate() {
        // The last one has never reloaded
        let reload_time = (i + 1 < DEMO_LOGDIRS.len()).then(epoch_secs);
        fake.insert(Model::new((i + 1).to_string(), *logdir, reload_time));
    }
    fake
}

/// Keep the demo server alive: instances reload every tick, and one started
/// "elsewhere" comes and goes so polls have something to reconcile
pub fn spawn_activity(fake: Arc<FakeControlPlane>, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.tick().await;
        let mut tick_counter: u64 = 0;
        loop {
            ticker.tick().await;
            tick_counter += 1;
            fake.reload_all(epoch_secs());
            if tick_counter % 3 == 0 {
                if !fake.kill("external") {
                    fake.insert(Model::new("external", "/shared/team-logs", Some(epoch_secs())));
                }
            }
        }
    })
}
