use super::{json_pretty, maybe_spinner, spin_fail, spin_ok, EXIT_SUCCESS};
use devstack_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let pb = maybe_spinner(json, "stopping the stack...");
    if let Err(e) = engine.down() {
        if let Some(pb) = &pb {
            spin_fail(pb, "failed to stop the stack");
        }
        return Err(e.to_string());
    }
    if let Some(pb) = &pb {
        spin_ok(pb, "stack stopped");
    }
    if json {
        let payload = serde_json::json!({
            "project": engine.registry().project(),
            "stopped": true,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
