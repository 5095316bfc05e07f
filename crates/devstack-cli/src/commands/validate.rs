use super::{json_pretty, EXIT_SUCCESS};
use devstack_schema::Registry;
use std::path::Path;

pub fn run(registry: &Registry, path: &Path, json: bool) -> Result<u8, String> {
    if json {
        let payload = serde_json::json!({
            "valid": true,
            "registry": path,
            "project": registry.project(),
            "network": registry.network(),
            "datastore": registry.datastore().name,
            "startup_order": registry.startup_order(),
            "services": registry.services(),
            "settings": registry.settings(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "registry {} is valid: project '{}', {} service(s)",
            path.display(),
            registry.project(),
            registry.services().len()
        );
        let order: Vec<&str> = registry.startup_order().iter().map(|n| n.as_str()).collect();
        println!(
            "startup order: {} -> {}",
            registry.datastore().name,
            order.join(" -> ")
        );
    }
    Ok(EXIT_SUCCESS)
}
