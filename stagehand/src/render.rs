//! Terminal summaries for each phase.

use stagehand_core::diagnostics::Probe;
use stagehand_core::format::{format_rate, format_relative_time};
use stagehand_core::{
    Device, InjectionBatch, ProviderBindings, Readiness, RecordKind, RemediationReport, RunRecord,
    Timeline,
};

fn facet<T>(label: &str, probe: &Probe<T>, describe: impl Fn(&T) -> String) {
    match probe {
        Probe::Known(value) => println!("  {:<13} {}", label, describe(value)),
        Probe::Unknown(reason) => println!("  {:<13} unknown ({})", label, reason),
    }
}

pub fn device(device: &Device) {
    println!(
        "Device: {}",
        device.serial.as_deref().unwrap_or("(default adb target)")
    );
    facet("identity", &device.identity, |i| {
        format!(
            "{} {} ({}), Android {} / API {}",
            i.manufacturer,
            i.model,
            i.device,
            i.android_version,
            i.sdk.map(|s| s.to_string()).unwrap_or_else(|| "?".to_string())
        )
    });
    facet("resources", &device.system, |s| {
        format!(
            "{} MB RAM, {} cores",
            s.total_ram_mb
                .map(|m| m.to_string())
                .unwrap_or_else(|| "?".to_string()),
            s.cpu_cores
        )
    });
    facet("security", &device.security, |s| {
        format!(
            "usb debugging {}, developer options {}, SELinux {}, encrypted {}",
            on_off(s.usb_debugging),
            on_off(s.developer_options),
            s.selinux,
            on_off(s.encrypted)
        )
    });
    facet("storage", &device.storage, |s| {
        format!("{} MB free of {} MB", s.free_mb, s.total_mb)
    });
    facet("connection", &device.connectivity, |c| {
        format!("{} (usb {} / {})", c.state, c.usb_config, c.usb_state)
    });
    facet("permissions", &device.permissions, |p| {
        format!("{} granted", p.len())
    });
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

pub fn readiness(readiness: &Readiness) {
    if readiness.is_ready {
        println!("\nReady for injection");
    } else {
        println!("\nNot ready for injection");
    }
    for issue in &readiness.issues {
        println!("  issue:   {}", issue);
    }
    for warning in &readiness.warnings {
        println!("  warning: {}", warning);
    }
    for recommendation in &readiness.recommendations {
        println!("  -> {}", recommendation);
    }
}

pub fn bindings(bindings: &ProviderBindings) {
    println!("\nProviders:");
    for binding in bindings.iter() {
        println!(
            "  {:<9} {} [{:?}{}]",
            binding.kind.to_string(),
            binding.uri,
            binding.vendor,
            binding
                .path
                .as_deref()
                .map(|p| format!(", {}", p))
                .unwrap_or_default()
        );
    }
    for kind in bindings.unbound_kinds() {
        println!("  {:<9} no provider available", kind.to_string());
    }
}

pub fn remediation(report: &RemediationReport) {
    println!("\nRemediation:");
    for fix in &report.fixes_applied {
        println!("  [ok  ] {}", fix);
    }
    for fix in &report.failed_fixes {
        println!("  [FAIL] {}", fix);
    }
    for warning in &report.warnings {
        println!("  ! {}", warning);
    }
    for file in &report.backup_files {
        println!("  backup: {}", file.display());
    }
    if report.needs_restart {
        println!("  Some fixes take effect after the device restarts its adb session.");
    }
}

pub fn timeline(timeline: &Timeline) {
    println!(
        "Timeline: {} events ({} SMS, {} MMS, {} calls)",
        timeline.events.len(),
        timeline.count(RecordKind::Sms),
        timeline.count(RecordKind::Mms),
        timeline.count(RecordKind::Call)
    );
    if timeline.group_count() > 0 {
        println!("  group messages: {}", timeline.group_count());
    }
    for warning in &timeline.warnings {
        println!("  warning: {}", warning);
    }
}

pub fn batch(batch: &InjectionBatch) {
    println!("\nInjection:");
    println!("  total:             {}", batch.total());
    println!("  successful:        {}", batch.successful);
    println!("  verified:          {}", batch.verified);
    println!("  failed:            {}", batch.failed);
    println!("  permission denied: {}", batch.permission_denied);
    if batch.interrupted {
        println!("  interrupted:       stopped before the last event");
    }
    println!(
        "  verification rate: {}",
        format_rate(batch.verification_rate())
    );
    for kind in RecordKind::ALL {
        let count = batch.count(kind);
        if count > 0 {
            println!("  {:<9} {}", kind.to_string(), count);
        }
    }
}

pub fn runs(runs: &[RunRecord]) {
    if runs.is_empty() {
        println!("No inject runs recorded.");
        return;
    }
    println!(
        "{:>4}  {:<10} {:<16} {:>5} {:>5} {:>5} {:>6}  verify",
        "id", "started", "device", "total", "ok", "fail", "denied"
    );
    for run in runs {
        let verification = match (run.finished_at, run.verification_success) {
            (None, _) => "unfinished",
            (Some(_), None) if run.interrupted => "interrupted",
            (Some(_), Some(true)) => "passed",
            (Some(_), Some(false)) => "FAILED",
            (Some(_), None) => "-",
        };
        println!(
            "{:>4}  {:<10} {:<16} {:>5} {:>5} {:>5} {:>6}  {}",
            run.id,
            format_relative_time(run.started_at),
            run.device_serial.as_deref().unwrap_or("-"),
            run.total,
            run.successful,
            run.failed,
            run.permission_denied,
            verification
        );
    }
}
