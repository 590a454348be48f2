use crate::build_info::build_info;

/// Registers a panic hook that logs panics using the `tracing` crate
pub fn register_panic_logger() {
    std::panic::set_hook(Box::new(|panic| match panic.location() {
        Some(loc) => {
            tracing::error!(
                message = %panic,
                panic.file = loc.file(),
                panic.line = loc.line(),
                panic.column = loc.column(),
            );
        }
        None => tracing::error!(message = %panic),
    }));
}

pub fn report_build_info() {
    let build = build_info();

    tracing::info!(
        build_profile = build.build_profile,
        repo_version = build.repo_version,
        target = build.build_target,
        version = build.version,
        "csi-s3 starting up"
    );
}
