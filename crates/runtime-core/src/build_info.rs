//! Optional build metadata surfaced on `/health/live` (spec §6 "Build
//! info"). Resolved at compile time via `option_env!`, falling back to
//! `"unknown"` when the build script did not inject them — no extra crate
//! needed since the spec only requires *optional* metadata.

pub fn git_commit() -> &'static str {
    option_env!("GIT_COMMIT").unwrap_or("unknown")
}

pub fn build_time() -> &'static str {
    option_env!("BUILD_TIME").unwrap_or("unknown")
}

pub fn runtime_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_unknown_when_unset() {
        assert!(!git_commit().is_empty());
        assert!(!build_time().is_empty());
    }
}
