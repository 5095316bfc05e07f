use super::{json_pretty, EXIT_SUCCESS};
use devstack_core::Engine;

pub fn run(engine: &Engine, print: bool, json: bool) -> Result<u8, String> {
    let manifest = engine.generate_from_state().map_err(|e| e.to_string())?;
    let path = engine.layout().compose_file();

    if print {
        let yaml = manifest
            .to_yaml()
            .map_err(|e| format!("failed to render manifest: {e}"))?;
        print!("{yaml}");
    } else if json {
        let renderings: serde_json::Map<String, serde_json::Value> = manifest
            .app_services()
            .map(|s| (s.name.to_string(), serde_json::json!(s.rendering)))
            .collect();
        let payload = serde_json::json!({
            "manifest_path": path,
            "real": manifest.real_count(),
            "mock": manifest.mock_count(),
            "failsafe_build": manifest.needs_failsafe_build(),
            "services": renderings,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "wrote {} ({} real, {} mock)",
            path.display(),
            manifest.real_count(),
            manifest.mock_count()
        );
        if manifest.needs_failsafe_build() {
            println!("mocks without a mock_image build the failsafe image from _failsafe/");
        }
    }
    Ok(EXIT_SUCCESS)
}
