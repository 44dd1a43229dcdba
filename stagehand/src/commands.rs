//! Subcommand flows. Each returns whether the phase succeeded.

use crate::render;
use crate::TimelineInput;
use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use stagehand_core::directory::load_vcf;
use stagehand_core::export::{export_plan, Exporter};
use stagehand_core::{CharacterDirectory, ProviderBindings, SessionContext};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn load_directory(input: &TimelineInput) -> Result<CharacterDirectory> {
    let mut directory = CharacterDirectory::load(&input.characters)
        .with_context(|| format!("failed to load characters from {}", input.characters.display()))?;
    if let Some(path) = &input.contacts {
        let contacts = load_vcf(path)
            .with_context(|| format!("failed to load contacts from {}", path.display()))?;
        let seeded = directory.seed_phones(&contacts);
        println!(
            "Contacts: {} entries, {} phone number(s) filled in",
            contacts.len(),
            seeded
        );
    }
    println!("Characters: {}", directory.len());
    Ok(directory)
}

fn locate(session: &SessionContext) -> Result<ProviderBindings> {
    session
        .locator()
        .locate()
        .context("device did not respond while locating providers")
}

// ============================================
// doctor / fix
// ============================================

pub fn doctor(session: &SessionContext) -> Result<bool> {
    let diagnostics = session.diagnostics();
    let device = diagnostics.inspect();
    let readiness = diagnostics.classify(&device);
    render::device(&device);
    render::readiness(&readiness);

    let bindings = locate(session)?;
    render::bindings(&bindings);
    if bindings.is_empty() {
        println!("\nNo provider is usable; nothing can be injected.");
    }

    Ok(readiness.is_ready && !bindings.is_empty())
}

pub fn fix(session: &SessionContext) -> Result<bool> {
    let diagnostics = session.diagnostics();
    let before = diagnostics.inspect();
    render::readiness(&diagnostics.classify(&before));

    // Unbound kinds fall back to the stock database paths
    let bindings = match session.locator().locate() {
        Ok(bindings) => Some(bindings),
        Err(e) => {
            tracing::warn!(error = %e, "provider discovery failed before remediation");
            None
        }
    };

    let outcome = session
        .remediator()
        .remediate(&before, bindings.as_ref(), &diagnostics);
    render::remediation(&outcome.report);

    let after = diagnostics.classify(&outcome.device);
    render::readiness(&after);
    Ok(after.is_ready)
}

// ============================================
// plan
// ============================================

pub fn plan(session: &SessionContext, input: &TimelineInput, out: Option<&Path>) -> Result<bool> {
    let directory = load_directory(input)?;
    let timeline = session.compiler().compile(&directory, Utc::now());
    render::timeline(&timeline);

    let mut rng = match session.config.injection.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let exporter = Exporter::new(&directory, &session.config.injection, session.offset);
    let dir = out.unwrap_or(session.paths.exports.as_path());
    let stem = format!("plan-{}", session.stamp());
    let paths = export_plan(dir, &stem, &timeline, &exporter, &mut rng)
        .with_context(|| format!("failed to export plan to {}", dir.display()))?;

    println!("\nExported:");
    println!("  events: {}", paths.events.display());
    println!("  calls:  {}", paths.calls.display());
    println!("  sms:    {}", paths.messages.display());
    Ok(true)
}

// ============================================
// inject / verify
// ============================================

pub fn inject(
    session: &SessionContext,
    input: &TimelineInput,
    force: bool,
    verify_after: bool,
) -> Result<bool> {
    let directory = load_directory(input)?;

    let diagnostics = session.diagnostics();
    let readiness = diagnostics.classify(&diagnostics.inspect());
    if !readiness.is_ready {
        render::readiness(&readiness);
        if !force {
            println!("\nRefusing to inject; run `stagehand fix` or pass --force.");
            return Ok(false);
        }
        tracing::warn!(issues = readiness.issues.len(), "injecting despite blocking issues");
    }

    let bindings = locate(session)?;
    render::bindings(&bindings);
    if bindings.is_empty() {
        println!("\nNo provider is usable; nothing can be injected.");
        return Ok(false);
    }

    let timeline = session.compiler().compile(&directory, Utc::now());
    println!();
    render::timeline(&timeline);

    let ledger = session.open_ledger().context("failed to open ledger")?;
    let run_id = ledger
        .insert_run(session.id, session.link.serial(), Utc::now())
        .context("failed to record run")?;

    // Ctrl+C stops after the current record; the run is still closed below
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nStopping after the current record...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let pb = ProgressBar::new(timeline.events.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid progress template")
            .progress_chars("#>-"),
    );
    let batch = session
        .injector(&directory)
        .with_running_flag(running)
        .inject_with_progress(&timeline.events, &bindings, |done, _, result| {
            if let Err(e) = ledger.record_result(run_id, result) {
                tracing::warn!(seq = result.seq, error = %e, "failed to record injection result");
            }
            pb.set_position(done as u64);
            pb.set_message(format!("{} #{}", result.kind, result.seq));
        });
    pb.finish_and_clear();

    ledger
        .finish_run(run_id, &batch, Utc::now())
        .context("failed to record injection results")?;
    render::batch(&batch);
    println!("  ledger run:        {}", run_id);
    if batch.permission_denied > 0 {
        println!(
            "\n{} write(s) were refused for lack of permission; try `stagehand fix`.",
            batch.permission_denied
        );
    }

    if batch.interrupted {
        println!(
            "\nInterrupted; {} of {} events were attempted.",
            batch.total(),
            timeline.events.len()
        );
        return Ok(false);
    }

    let mut ok = batch.failed == 0;
    if verify_after {
        let report = session.verifier().verify(&bindings, &batch.results);
        ledger
            .record_verification(run_id, &report)
            .context("failed to record verification")?;
        let path = report
            .save_json(&session.paths.reports, &session.report_file_name())
            .context("failed to save verification report")?;
        println!("\n{}", report.render_text());
        println!("Report: {}", path.display());
        ok &= report.success;
    }
    Ok(ok)
}

pub fn verify(session: &SessionContext, run: Option<i64>, json: bool) -> Result<bool> {
    let ledger = session.open_ledger().context("failed to open ledger")?;
    let record = match run {
        Some(id) => Some(
            ledger
                .get_run(id)?
                .with_context(|| format!("no ledger run with id {}", id))?,
        ),
        None => ledger.get_latest_run()?,
    };
    let injected = match &record {
        Some(r) => ledger.get_run_results(r.id)?,
        None => Vec::new(),
    };

    let bindings = locate(session)?;
    let report = session.verifier().verify(&bindings, &injected);
    if let Some(r) = &record {
        ledger
            .record_verification(r.id, &report)
            .context("failed to record verification")?;
    }
    let path = report
        .save_json(&session.paths.reports, &session.report_file_name())
        .context("failed to save verification report")?;

    if json {
        println!("{}", report.to_json()?);
    } else {
        match &record {
            Some(r) => println!("Ledger run {} ({} records)", r.id, injected.len()),
            None => println!("No ledger run; checking device state only"),
        }
        println!("{}", report.render_text());
        println!("Report: {}", path.display());
    }
    Ok(report.success)
}

// ============================================
// runs
// ============================================

pub fn runs(session: &SessionContext, limit: usize) -> Result<bool> {
    let ledger = session.open_ledger().context("failed to open ledger")?;
    render::runs(&ledger.list_runs(limit)?);
    Ok(true)
}
