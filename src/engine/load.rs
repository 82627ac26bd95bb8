use crate::engine::ammo::Sequencer;
use crate::engine::shot::ShotExecutor;
use crate::model::{LoadSummary, SessionEvent};
use anyhow::Result;
use rand::RngCore;
use std::time::Instant;
use tokio::sync::mpsc;

/// Fire `shot_count` shots one after another.
///
/// Shots never overlap: each one finishes (cooldown plus tool exit) before the
/// next pick is drawn, so the order and spacing depend only on the seed and
/// the cooldown.
pub async fn run_load<R: RngCore>(
    sequencer: &mut Sequencer<R>,
    executor: &ShotExecutor,
    shot_count: usize,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<LoadSummary> {
    let start = Instant::now();
    let mut shots = Vec::with_capacity(shot_count);

    for (i, pick) in sequencer.by_ref().take(shot_count).enumerate() {
        let record = executor.fire(i + 1, pick).await?;
        let _ = event_tx.send(SessionEvent::ShotFired {
            number: record.number,
            index: record.index,
            target: record.target.clone(),
            exit_code: record.exit_code,
        });
        shots.push(record);
    }

    let elapsed = start.elapsed();
    let _ = event_tx.send(SessionEvent::LoadCompleted {
        shots: shots.len(),
        elapsed,
    });
    Ok(LoadSummary { shots, elapsed })
}
