use super::{json_pretty, reconcile::pad_colored, EXIT_SUCCESS};
use devstack_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let report = engine.status().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("project: {}", report.project);
    let engine_state = if report.engine_available {
        "available"
    } else {
        "unavailable"
    };
    println!("engine:  {} ({engine_state})", report.engine);
    if !report.manifest_present {
        println!("no manifest yet; run `devstack reconcile`");
    }
    println!(
        "{:<24} {:<14} {:<14} {:<6} CONTAINER",
        "SERVICE", "STATE", "REVISION", "MODE"
    );
    println!(
        "{:<24} {:<14} {:<14} {:<6} {}",
        engine.registry().datastore().name,
        "-",
        "-",
        "-",
        pad_colored(&report.datastore.to_string(), 0)
    );
    for svc in &report.services {
        let state = svc
            .state
            .map_or_else(|| "unknown".to_owned(), |s| s.to_string());
        let revision = svc
            .revision
            .as_ref()
            .map_or_else(|| "-".to_owned(), |r| r.short().to_owned());
        println!(
            "{:<24} {:<14} {:<14} {:<6} {}",
            svc.service,
            pad_colored(&state, 14),
            revision,
            pad_colored(svc.rendering.label(), 6),
            pad_colored(&svc.container.to_string(), 0)
        );
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(EXIT_SUCCESS)
}
