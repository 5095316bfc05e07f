use std::path::Path;

/// Line printed by the failsafe container; also the marker that identifies a
/// placeholder build file committed to a service repository.
pub const FAILSAFE_MARKER: &str = "FAILSAFE MODE";

/// Build file for the built-in failsafe image. Compose builds it from
/// `./_failsafe` with `SERVICE_NAME` as a build argument.
pub const FAILSAFE_DOCKERFILE: &str = r#"FROM alpine:3.19
ARG SERVICE_NAME=unknown
ENV SERVICE_NAME=${SERVICE_NAME}
CMD ["sh", "-c", "echo \"FAILSAFE MODE: ${SERVICE_NAME} is running as a mock\"; while true; do sleep 3600; done"]
"#;

/// Whether the build file at `path` is a failsafe placeholder rather than a
/// real service build. A missing or unreadable file is not a placeholder.
pub fn is_failsafe_dockerfile(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|content| content.contains(FAILSAFE_MARKER))
        .unwrap_or(false)
}
