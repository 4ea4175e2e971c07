use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{
    BulkSendProgress, CertificateDispatch, CertificateRecipient, DispatchRecipient, Registration,
};
use crate::services::api_client::ApiError;
use crate::services::certificate_render::{
    CertificateRenderer, RenderError, certificate_file_stem,
};

/// Dispatch-side API seam so the send paths can run against the real client
/// or a recording fake.
#[allow(async_fn_in_trait)]
pub trait CertificateApi {
    async fn eligible_registrations(&self, event_id: &str) -> Result<Vec<Registration>, ApiError>;
    async fn dispatch_certificates(&self, payload: &CertificateDispatch) -> Result<(), ApiError>;
}

#[derive(Debug, Error)]
pub enum SendError {
    /// The leader's artifact is load-bearing: without it the send aborts
    /// before any team member is attempted.
    #[error("Failed to render leader certificate for {name}: {source}")]
    LeaderRender { name: String, source: RenderError },

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug)]
pub enum BulkSendEvent {
    Started {
        total: usize,
    },
    Progress {
        progress: BulkSendProgress,
    },
    Finished {
        progress: BulkSendProgress,
        dispatched: usize,
        skipped: usize,
    },
}

/// Certificates are only generated for attended registrations. The check-in
/// flag lives at the registration level, so team-member attendance never
/// enters into it.
pub fn eligible_only(registrations: Vec<Registration>) -> Vec<Registration> {
    registrations
        .into_iter()
        .filter(|registration| registration.session_checked_in)
        .collect()
}

/// Leader plus every team member for team registrations, leader alone
/// otherwise. The leader is always first.
pub fn expand_recipients(registration: &Registration) -> Vec<CertificateRecipient> {
    let mut recipients = vec![CertificateRecipient::leader_of(registration)];
    if registration.is_team_registration {
        recipients.extend(
            registration
                .team_members
                .iter()
                .map(|member| CertificateRecipient::member_of(registration, member)),
        );
    }
    recipients
}

/// Render one certificate and save it locally as a PDF. Failures are logged
/// and reported as `None`; this path never propagates an error to the caller.
pub fn download_certificate<R: CertificateRenderer>(
    renderer: &mut R,
    recipient: &CertificateRecipient,
    output_dir: &Path,
) -> Option<PathBuf> {
    let artifact = match renderer.render(recipient) {
        Ok(artifact) => artifact,
        Err(err) => {
            error!("Certificate render failed for {}: {}", recipient.name, err);
            return None;
        }
    };

    let pdf = match artifact.to_pdf() {
        Ok(pdf) => pdf,
        Err(err) => {
            error!("Certificate encode failed for {}: {}", recipient.name, err);
            return None;
        }
    };

    if let Err(err) = fs::create_dir_all(output_dir) {
        error!(
            "Failed to create output dir {}: {}",
            output_dir.display(),
            err
        );
        return None;
    }

    let path = output_dir.join(format!(
        "{}.pdf",
        certificate_file_stem(&recipient.name, &recipient.event_name)
    ));
    match fs::write(&path, pdf) {
        Ok(()) => {
            info!("Saved certificate to {}", path.display());
            Some(path)
        }
        Err(err) => {
            error!("Failed to write {}: {}", path.display(), err);
            None
        }
    }
}

/// Send every certificate for one registration in a single dispatch request.
/// Artifacts are generated strictly sequentially: the renderer slot is
/// exclusive, so a later recipient never starts until the previous render has
/// returned. Member failures are skipped best-effort; a leader failure aborts
/// the whole send before any member is attempted and before any submission.
pub async fn send_registration_certificates<A, R>(
    api: &A,
    renderer: &mut R,
    registration: &Registration,
) -> Result<usize, SendError>
where
    A: CertificateApi,
    R: CertificateRenderer,
{
    let recipients = expand_recipients(registration);
    let mut entries = Vec::with_capacity(recipients.len());

    for (index, recipient) in recipients.iter().enumerate() {
        match render_dispatch_recipient(renderer, recipient) {
            Ok(entry) => entries.push(entry),
            Err(err) if index == 0 => {
                return Err(SendError::LeaderRender {
                    name: recipient.name.clone(),
                    source: err,
                });
            }
            Err(err) => {
                warn!(
                    "Skipping certificate for team member {} ({}): {}",
                    recipient.name, registration.id, err
                );
            }
        }
    }

    let count = entries.len();
    let payload = CertificateDispatch {
        event_id: registration.event_id.clone(),
        event_title: registration.event_title.clone(),
        recipients: entries,
    };
    api.dispatch_certificates(&payload).await?;
    info!(
        "Dispatched {} certificate(s) for registration {}",
        count, registration.id
    );
    Ok(count)
}

/// Bulk send over all registrations, strictly sequential. Every registration
/// advances `sent` exactly once, generation and dispatch failures included;
/// the loop always runs to completion. A fixed delay paces consecutive
/// registrations so the dispatch endpoint is not hammered.
pub async fn send_all_certificates<A, R>(
    api: &A,
    renderer: &mut R,
    registrations: &[Registration],
    batch_item_delay_ms: u64,
    events: &Sender<BulkSendEvent>,
) -> BulkSendProgress
where
    A: CertificateApi,
    R: CertificateRenderer,
{
    let total = registrations.len();
    let mut progress = BulkSendProgress { sent: 0, total };
    let mut dispatched = 0usize;
    let mut skipped = 0usize;

    let _ = events.send(BulkSendEvent::Started { total });

    for (index, registration) in registrations.iter().enumerate() {
        match dispatch_best_effort(api, renderer, registration).await {
            Ok(count) if count > 0 => {
                debug!(
                    "Registration {}: dispatched {} certificate(s)",
                    registration.id, count
                );
                dispatched += 1;
            }
            Ok(_) => {
                warn!(
                    "Registration {}: no certificates generated, dispatch skipped",
                    registration.id
                );
                skipped += 1;
            }
            Err(err) => {
                warn!("Registration {}: dispatch failed: {}", registration.id, err);
                skipped += 1;
            }
        }

        progress.sent += 1;
        let _ = events.send(BulkSendEvent::Progress { progress });

        if index + 1 < total && batch_item_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(batch_item_delay_ms)).await;
        }
    }

    info!(
        "Bulk send finished: {}/{} registrations, {} dispatched, {} skipped",
        progress.sent, total, dispatched, skipped
    );
    let _ = events.send(BulkSendEvent::Finished {
        progress,
        dispatched,
        skipped,
    });
    progress
}

/// Best-effort per-recipient generation for the bulk path: log and skip a
/// failed recipient (leader included), submit whatever succeeded.
async fn dispatch_best_effort<A, R>(
    api: &A,
    renderer: &mut R,
    registration: &Registration,
) -> Result<usize, ApiError>
where
    A: CertificateApi,
    R: CertificateRenderer,
{
    let recipients = expand_recipients(registration);
    let mut entries = Vec::with_capacity(recipients.len());

    for recipient in &recipients {
        match render_dispatch_recipient(renderer, recipient) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                warn!(
                    "Skipping certificate for {} ({}): {}",
                    recipient.name, registration.id, err
                );
            }
        }
    }

    if entries.is_empty() {
        return Ok(0);
    }

    let count = entries.len();
    let payload = CertificateDispatch {
        event_id: registration.event_id.clone(),
        event_title: registration.event_title.clone(),
        recipients: entries,
    };
    api.dispatch_certificates(&payload).await?;
    Ok(count)
}

fn render_dispatch_recipient<R: CertificateRenderer>(
    renderer: &mut R,
    recipient: &CertificateRecipient,
) -> Result<DispatchRecipient, RenderError> {
    let artifact = renderer.render(recipient)?;
    let certificate_image = artifact.to_data_url()?;
    Ok(DispatchRecipient {
        name: recipient.name.clone(),
        email: recipient.email.clone(),
        college: recipient.college.clone(),
        certificate_image,
    })
}
