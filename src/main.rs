mod models;
mod services;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use models::CertificateRecipient;
use services::api_client::ApiClient;
use services::certificate_flow::{self, BulkSendEvent, CertificateApi};
use services::certificate_render::CertificateTemplate;
use services::config_loader::{RevilConfig, load_revil_config};
use services::payment_flow::{self, VerifyEvent};

#[derive(Parser, Debug)]
#[command(name = "revil-ops")]
#[command(version, about = "Operator console for the ReVil 2026 event platform")]
struct Args {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a workshop payment after the hosted-checkout redirect
    Verify {
        /// The full callback URL the checkout redirected to
        callback_url: String,
    },
    /// Render one certificate and save it locally as a PDF
    Download {
        #[arg(long)]
        name: String,
        #[arg(long)]
        college: String,
        #[arg(long)]
        event_name: String,
    },
    /// Generate and email certificates for a single registration
    Send {
        #[arg(long)]
        event_id: String,
        #[arg(long)]
        registration_id: String,
    },
    /// Generate and email certificates for every eligible registration
    SendAll {
        #[arg(long)]
        event_id: String,
    },
}

fn init_tracing() -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true);

    let _ = fs::create_dir_all("logs");
    let file_appender = tracing_appender::rolling::daily("logs", "revil-ops.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_target(true);

    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(err) = init_result {
        eprintln!("tracing init failed: {err}");
        return None;
    }

    Some(file_guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_tracing();
    let args = Args::parse();

    let config = load_revil_config(&args.config).map_err(|message| anyhow::anyhow!(message))?;

    match args.command {
        Command::Verify { callback_url } => verify(&config, &callback_url).await,
        Command::Download {
            name,
            college,
            event_name,
        } => download(&config, name, college, event_name),
        Command::Send {
            event_id,
            registration_id,
        } => send(&config, &event_id, &registration_id).await,
        Command::SendAll { event_id } => send_all(&config, &event_id).await,
    }
}

async fn verify(config: &RevilConfig, callback_url: &str) -> Result<()> {
    let (tx, rx) = mpsc::channel::<VerifyEvent>();
    let printer = thread::spawn(move || {
        for event in rx {
            match event {
                VerifyEvent::Checked { attempt, status } => {
                    info!("Status check {}: {:?}", attempt, status);
                }
                VerifyEvent::Settled { notice, .. } => info!("{notice}"),
                VerifyEvent::RedirectScheduled { target, after_ms } => {
                    info!("Redirect to {} scheduled in {}ms", target.path(), after_ms);
                }
            }
        }
    });

    let outcome = match payment_flow::order_id_from_callback(callback_url) {
        Some(order_id) => {
            let api = ApiClient::new(&config.api.base_url, &config.api.token)?;
            info!("Verifying payment for order {}", order_id);
            payment_flow::run_verification(&api, &order_id, &config.payment, &tx).await
        }
        None => payment_flow::reject_invalid_callback(&config.payment, &tx),
    };

    drop(tx);
    let _ = printer.join();

    // Hold the terminal notice on screen, then fire the single redirect.
    tokio::time::sleep(Duration::from_millis(config.payment.redirect_delay_ms)).await;
    info!("Redirecting to {}", outcome.redirect().path());
    Ok(())
}

fn download(
    config: &RevilConfig,
    name: String,
    college: String,
    event_name: String,
) -> Result<()> {
    let mut template = CertificateTemplate::load(Path::new(&config.certificates.assets_dir))?;
    let recipient = CertificateRecipient {
        name,
        college,
        event_name,
        email: None,
    };

    match certificate_flow::download_certificate(
        &mut template,
        &recipient,
        Path::new(&config.certificates.output_dir),
    ) {
        Some(path) => {
            info!("Certificate ready: {}", path.display());
            Ok(())
        }
        None => bail!("Certificate generation failed, see logs"),
    }
}

async fn send(config: &RevilConfig, event_id: &str, registration_id: &str) -> Result<()> {
    let api = ApiClient::new(&config.api.base_url, &config.api.token)?;
    let mut template = CertificateTemplate::load(Path::new(&config.certificates.assets_dir))?;

    let registrations = api.eligible_registrations(event_id).await?;
    let Some(registration) = registrations
        .iter()
        .find(|registration| registration.id == registration_id)
    else {
        bail!(
            "Registration {} not found or not checked in for event {}",
            registration_id,
            event_id
        );
    };

    let count =
        certificate_flow::send_registration_certificates(&api, &mut template, registration).await?;
    info!(
        "Sent {} certificate(s) for registration {}",
        count, registration_id
    );
    Ok(())
}

async fn send_all(config: &RevilConfig, event_id: &str) -> Result<()> {
    let api = ApiClient::new(&config.api.base_url, &config.api.token)?;
    let mut template = CertificateTemplate::load(Path::new(&config.certificates.assets_dir))?;

    let registrations = api.eligible_registrations(event_id).await?;
    if registrations.is_empty() {
        info!("No eligible registrations for event {}", event_id);
        return Ok(());
    }

    let (tx, rx) = mpsc::channel::<BulkSendEvent>();
    let printer = thread::spawn(move || {
        for event in rx {
            match event {
                BulkSendEvent::Started { total } => {
                    info!("Bulk send started: {} registration(s)", total);
                }
                BulkSendEvent::Progress { progress } => {
                    info!("Sent {}/{}", progress.sent, progress.total);
                }
                BulkSendEvent::Finished {
                    progress,
                    dispatched,
                    skipped,
                } => {
                    info!(
                        "Bulk send complete: {}/{} processed, {} dispatched, {} skipped",
                        progress.sent, progress.total, dispatched, skipped
                    );
                }
            }
        }
    });

    certificate_flow::send_all_certificates(
        &api,
        &mut template,
        &registrations,
        config.certificates.batch_item_delay_ms,
        &tx,
    )
    .await;

    drop(tx);
    let _ = printer.join();
    Ok(())
}
