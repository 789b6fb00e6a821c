//! Start and poll helpers shared by the two asynchronous stages.

use crate::job::Stage;
use crate::services::{AsyncJobService, ExternalJobStatus, ServiceError};

use super::types::{PollOutcome, StageContext, StageOutput, StageStart};

pub(super) async fn start(
    service: &dyn AsyncJobService,
    stage: Stage,
    ctx: &StageContext<'_>,
) -> Result<StageStart, ServiceError> {
    let input_key = ctx.input_key(stage)?;
    let job_name = stage.external_job_name(&ctx.job.job_id, ctx.job.attempt);
    let handle = service.start_job(input_key, &job_name).await?;
    Ok(StageStart::Submitted { handle })
}

pub(super) async fn poll(
    service: &dyn AsyncJobService,
    handle: &str,
) -> Result<PollOutcome, ServiceError> {
    let job = service.get_job(handle).await?;
    match job.status {
        ExternalJobStatus::Running => Ok(PollOutcome::Running),
        ExternalJobStatus::Succeeded => match job.output_location {
            Some(location) => Ok(PollOutcome::Succeeded(StageOutput::Location(location))),
            None => Err(ServiceError::Permanent(format!(
                "{} job {} succeeded without an output location",
                service.name(),
                handle
            ))),
        },
        ExternalJobStatus::Failed => Ok(PollOutcome::Failed(
            job.failure_reason
                .unwrap_or_else(|| format!("{} job {} failed", service.name(), handle)),
        )),
    }
}
