use fieldpack_core::AppVersion;

/// First updater release that speaks the manifest-driven protocol.
pub const MIN_PROTOCOL_VERSION: &str = "2.0.0";

/// Classifies a request as legacy when its updater version token is absent,
/// unparsable, or below the first protocol-aware release. Accepts both a
/// bare version and the `AppUpdater/<major.minor.patch>` marker shape.
pub fn is_legacy_client(version_token: Option<&str>) -> bool {
    let Some(token) = version_token else {
        return true;
    };
    let raw = token.trim();
    let raw = raw.strip_prefix("AppUpdater/").unwrap_or(raw);

    let Ok(version) = AppVersion::parse(raw) else {
        return true;
    };
    match MIN_PROTOCOL_VERSION.parse::<AppVersion>() {
        Ok(floor) => version.cmp_precedence(&floor) == std::cmp::Ordering::Less,
        Err(_) => true,
    }
}
