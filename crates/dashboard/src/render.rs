//! Plain-text rendering of a [`RenderModel`] for terminals.

use std::fmt::Write;

use jobdash_core::JobKind;

use crate::view_model::{HealthView, JobRow, JobsView, RenderModel};

pub fn render_text(model: &RenderModel) -> String {
    let mut out = String::new();
    render_health(&mut out, &model.health);

    let filter = model.status_filter.map(|s| s.as_str()).unwrap_or("all");
    let _ = writeln!(out, "\nJobs (filter: {filter})");
    render_jobs(&mut out, &model.jobs);

    let form = &model.form;
    let _ = writeln!(out, "\nNew job");
    let _ = writeln!(out, "  type: {}", form.job_type);
    let _ = writeln!(out, "  data: {}", form.job_data);
    if form.submitting {
        let _ = writeln!(out, "  submitting...");
    }
    if let Some(err) = &form.error {
        let _ = writeln!(out, "  error: {err}");
    }
    if let Some(id) = &form.last_created {
        let _ = writeln!(out, "  created job {id}");
    }
    let kinds: Vec<&str> = JobKind::SELECTABLE.iter().map(JobKind::as_str).collect();
    let _ = writeln!(out, "  types: {}", kinds.join(", "));
    out
}

fn render_health(out: &mut String, health: &HealthView) {
    let status = match (&health.status, health.is_loading) {
        (_, true) => "checking...".to_string(),
        (Some(status), false) if health.healthy => status.clone(),
        (Some(status), false) => format!("{status} (unhealthy)"),
        (None, false) => "unreachable".to_string(),
    };
    let _ = write!(out, "Service: {status}");
    if health.is_stale {
        let _ = write!(out, " [stale]");
    }
    let _ = writeln!(out);
}

fn render_jobs(out: &mut String, jobs: &JobsView) {
    if jobs.is_loading {
        let _ = writeln!(out, "  loading...");
        return;
    }
    if let Some(warning) = &jobs.stale_warning {
        let _ = writeln!(out, "  warning: {warning}");
    }
    if let Some(err) = &jobs.error {
        let _ = writeln!(out, "  error: {err}");
        return;
    }
    if jobs.is_empty {
        let _ = writeln!(out, "  no jobs");
        return;
    }

    let _ = writeln!(out, "  {} job(s)", jobs.count);
    for row in &jobs.rows {
        render_row(out, row);
    }
}

fn render_row(out: &mut String, row: &JobRow) {
    let _ = writeln!(
        out,
        "  #{} {:<10} {:<22} created {}",
        row.id,
        row.status.as_str(),
        row.kind,
        row.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "      data: {}", row.data);
    if let Some(result) = &row.result {
        let _ = writeln!(out, "      result: {result}");
    }
    if let Some(err) = &row.error {
        let _ = writeln!(out, "      error: {err}");
    }
}
