//! services/bot/src/chat/job_task.rs
//!
//! This module contains the background worker that runs conversion jobs.
//!
//! Tickets arrive over a channel, each job runs on its own task (bounded by a
//! semaphore) and its outcome is sent back to the engine as a `JobCompletion`.

use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::staging::Staging;
use crate::chat::state::AppState;
use pdfbot_core::domain::{ChatId, JobId, JobOutput, JobRequest, TransformKind};
use pdfbot_core::ports::{ConversionService, GatewayError, GatewayResult};

/// A submitted job, tagged with the session that asked for it.
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub chat_id: ChatId,
    pub session_id: Uuid,
    pub request: JobRequest,
}

/// The outcome of a job, routed back to its session.
#[derive(Debug)]
pub struct JobCompletion {
    pub chat_id: ChatId,
    pub session_id: Uuid,
    pub job_id: JobId,
    pub result: GatewayResult<JobOutput>,
}

/// Receives tickets until shutdown and runs at most `max_concurrent` jobs at a time.
pub async fn run_worker(
    app_state: Arc<AppState>,
    mut tickets: mpsc::Receiver<JobTicket>,
    completions: mpsc::Sender<JobCompletion>,
    max_concurrent: usize,
    shutdown: CancellationToken,
) {
    info!("Job worker started ({} concurrent jobs).", max_concurrent);
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));

    loop {
        let ticket = tokio::select! {
            _ = shutdown.cancelled() => break,
            ticket = tickets.recv() => match ticket {
                Some(ticket) => ticket,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let app_state = app_state.clone();
        let completions = completions.clone();
        tokio::spawn(async move {
            let JobTicket {
                chat_id,
                session_id,
                request,
            } = ticket;

            info!("Job {} ({}) started for chat {}.", request.job_id, request.kind, chat_id);
            let result = run_job(app_state.gateway.as_ref(), &app_state.staging, &request).await;
            drop(permit);
            match &result {
                Ok(_) => info!("Job {} finished.", request.job_id),
                Err(e) => error!("Job {} failed [{}]: {}", request.job_id, e.kind(), e),
            }

            let completion = JobCompletion {
                chat_id,
                session_id,
                job_id: request.job_id,
                result,
            };
            if completions.send(completion).await.is_err() {
                warn!("Completion for chat {} dropped: engine is shutting down.", chat_id);
            }
        });
    }

    info!("Job worker stopped.");
}

/// Runs one job against the gateway and turns the result file into a `JobOutput`.
///
/// Image-to-PDF converts every image on its own and merges the PDFs when there
/// are two or more; archive results are expanded into their files.
pub async fn run_job(
    gateway: &dyn ConversionService,
    staging: &Staging,
    request: &JobRequest,
) -> GatewayResult<JobOutput> {
    if request.inputs.is_empty() {
        return Err(GatewayError::Invariant(format!(
            "job {} has no inputs",
            request.job_id
        )));
    }
    let job_id = &request.job_id;
    let inputs: Vec<PathBuf> = request
        .inputs
        .iter()
        .map(|name| staging.input_path(job_id, name))
        .collect();

    let result = match request.kind {
        TransformKind::ImageToPdf => images_to_pdf(gateway, staging, job_id, &inputs).await?,
        kind => {
            let out = staging.output_dir(job_id, "output").await?;
            gateway.run(kind, &inputs, &request.params, &out).await?
        }
    };

    expand(staging, job_id, result).await
}

async fn images_to_pdf(
    gateway: &dyn ConversionService,
    staging: &Staging,
    job_id: &JobId,
    images: &[PathBuf],
) -> GatewayResult<PathBuf> {
    let conversions = images.iter().enumerate().map(|(index, image)| async move {
        let out = staging
            .output_dir(job_id, &format!("converted-{:03}", index + 1))
            .await?;
        gateway
            .run(
                TransformKind::ImageToPdf,
                std::slice::from_ref(image),
                &Default::default(),
                &out,
            )
            .await
    });
    // try_join_all keeps the input order.
    let mut pdfs = try_join_all(conversions).await?;

    if pdfs.len() == 1 {
        return pdfs
            .pop()
            .ok_or_else(|| GatewayError::Invariant("lost the converted image".into()));
    }
    let out = staging.output_dir(job_id, "merged").await?;
    gateway.merge(&pdfs, &out).await
}

async fn expand(staging: &Staging, job_id: &JobId, result: PathBuf) -> GatewayResult<JobOutput> {
    if !is_archive(&result) {
        return Ok(JobOutput::Single(result));
    }
    let dest = staging.output_dir(job_id, "unzipped").await?;
    let mut files = Staging::expand(result, dest.clone()).await?;
    match files.len() {
        0 => Err(GatewayError::MissingOutput(dest)),
        1 => Ok(JobOutput::Single(files.remove(0))),
        _ => Ok(JobOutput::Batch(files)),
    }
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}
