use super::{colorize_state, json_pretty, maybe_spinner, spin_fail, spin_ok, EXIT_SUCCESS};
use devstack_core::{Engine, ReconcileReport};

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let pb = maybe_spinner(json, "reconciling services...");
    let report = match engine.reconcile() {
        Ok(r) => r,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "reconcile failed");
            }
            return Err(e.to_string());
        }
    };
    if let Some(pb) = &pb {
        spin_ok(pb, &summary_line(&report));
    }

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(EXIT_SUCCESS)
}

fn summary_line(report: &ReconcileReport) -> String {
    format!(
        "reconciled {} service(s): {} real, {} mock ({} ms)",
        report.services.len(),
        report.real,
        report.mock,
        report.duration_ms
    )
}

pub fn print_report(report: &ReconcileReport) {
    println!("project: {}", report.project);
    println!("{:<24} {:<14} {:<14} {:<6} DETAIL", "SERVICE", "STATE", "REVISION", "MODE");
    for outcome in &report.services {
        let revision = outcome
            .revision
            .as_ref()
            .map_or_else(|| "-".to_owned(), |r| r.short().to_owned());
        let mode = outcome.rendering.as_ref().map_or("-", |r| r.label());
        let state = outcome.state.to_string();
        println!(
            "{:<24} {:<14} {:<14} {:<6} {}",
            outcome.service,
            pad_colored(&state, 14),
            revision,
            pad_colored(mode, 6),
            outcome.detail.as_deref().unwrap_or("")
        );
    }
    println!("manifest: {}", report.manifest_path.display());
    if report.interrupted {
        println!("pass interrupted: unprocessed services were rendered from prior state");
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
}

/// Pad before colouring so escape codes do not skew column widths.
pub fn pad_colored(text: &str, width: usize) -> String {
    let colored = colorize_state(text);
    let pad = width.saturating_sub(text.chars().count());
    format!("{colored}{}", " ".repeat(pad))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_colored_keeps_visible_width() {
        let padded = pad_colored("unknown", 10);
        assert_eq!(padded, "unknown   ");
    }

    #[test]
    fn pad_colored_never_truncates() {
        assert_eq!(pad_colored("toolongvalue", 4), "toolongvalue");
    }
}
