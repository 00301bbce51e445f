//! One complete beacon invocation: inhibit guard, then the schedule.

use tracing::warn;

use beacon_core::clock::Clock;
use beacon_core::error::Result;
use beacon_core::store::ConfigStore;
use beacon_core::types::{InhibitDecision, ScheduleEntry, StationConfig};
use beacon_link::TransmitterLink;

use crate::engine::{EngineOptions, RunReport, ScheduleEngine};
use crate::inhibit;

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The device inhibit held and the grace period is not yet used up.
    Inhibited(InhibitDecision),
    Completed(RunReport),
}

/// Run the beacon once over `link`.
///
/// The link is released before this returns on every path. An inhibit
/// skip is a normal outcome, not an error.
pub async fn run_beacon(
    link: &mut TransmitterLink,
    config: &mut StationConfig,
    store: &mut dyn ConfigStore,
    schedule: &[ScheduleEntry],
    clock: &dyn Clock,
    options: EngineOptions,
) -> Result<RunOutcome> {
    let decision = match guard(link, config, store).await {
        Ok(decision) => decision,
        Err(e) => {
            if let Err(close_err) = link.shutdown().await {
                warn!(error = %close_err, "release after failed inhibit check also failed");
            }
            return Err(e);
        }
    };
    if !decision.proceed {
        link.close().await?;
        return Ok(RunOutcome::Inhibited(decision));
    }

    let report = ScheduleEngine::new(schedule, config, clock)
        .with_options(options)
        .run(link)
        .await?;
    Ok(RunOutcome::Completed(report))
}

async fn guard(
    link: &mut TransmitterLink,
    config: &mut StationConfig,
    store: &mut dyn ConfigStore,
) -> Result<InhibitDecision> {
    link.flush_input().await?;
    inhibit::check(link, config, store).await
}
