use std::time::Duration;

use delivery_engine::queue::{Job, JobProducer, QueueError};
use log::*;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::config::SchedulerConfig;

/// Starts the periodic jobs: payment reconciliation and the unpaid-order sweep. Do not await the returned
/// JoinHandles, as they run until the task queue shuts down.
pub fn start_scheduler(producer: JobProducer, config: SchedulerConfig) -> Vec<JoinHandle<()>> {
    vec![
        start_periodic_job("payment reconciliation", config.payment_poll_interval, producer.clone(), || {
            Job::CheckPendingPayments {}
        }),
        start_periodic_job("unpaid order sweep", config.auto_cancel_interval, producer, || {
            Job::AutoCancelUnpaidOrders {}
        }),
    ]
}

/// Enqueues `job()` every `period`, starting straight away. The work itself runs in the task queue, so a slow run
/// never delays the next tick.
pub fn start_periodic_job(
    name: &'static str,
    period: Duration,
    producer: JobProducer,
    job: fn() -> Job,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("🕰️ {name} worker started. Running every {}s", period.as_secs_f32());
        loop {
            timer.tick().await;
            match producer.enqueue(job()) {
                Ok(id) => trace!("🕰️ Queued {name} as job {id}"),
                Err(QueueError::Closed) => {
                    info!("🕰️ The task queue has shut down. Stopping the {name} worker");
                    break;
                },
            }
        }
    })
}
