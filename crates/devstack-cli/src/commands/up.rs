use super::{json_pretty, maybe_spinner, reconcile::print_report, spin_fail, spin_ok, EXIT_SUCCESS};
use devstack_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let pb = maybe_spinner(json, "reconciling and starting the stack...");
    let report = match engine.up() {
        Ok(r) => r,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "failed to start the stack");
            }
            return Err(e.to_string());
        }
    };
    if let Some(pb) = &pb {
        if report.applied {
            spin_ok(pb, "stack started");
        } else {
            spin_fail(pb, "stack not started");
        }
    }

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
        if report.applied {
            println!(
                "stack started: {} real, {} mock",
                report.real, report.mock
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
