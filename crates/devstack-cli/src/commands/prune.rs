use super::{json_pretty, EXIT_SUCCESS};
use devstack_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let removed = engine.prune().map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({ "removed": removed });
        println!("{}", json_pretty(&payload)?);
    } else if removed.is_empty() {
        println!("nothing to prune");
    } else {
        for name in &removed {
            println!("pruned state for '{name}'");
        }
    }
    Ok(EXIT_SUCCESS)
}
