use crate::telemetry::{Envelope, REMOTE_DEPENDENCY_DATA};
use crate::url_obfuscator::{obfuscate_path, obfuscate_url};

/// Dependency type marker identifying internal authentication-proxy
/// traffic automatically collected by the backend.
pub const AAD_DEPENDENCY_MARKER: &str = "InProc | Microsoft.AAD";

/// Drops successful internal-auth dependency noise.
///
/// An envelope is dropped iff its base data reports success AND its
/// type string contains the auth-proxy marker; every other combination
/// is kept, including failed auth calls, which stay visible.
pub fn drop_aad_noise(envelope: &mut Envelope) -> bool {
    let base = &envelope.base;
    let is_noise = base.success == Some(true)
        && base
            .type_name
            .as_deref()
            .map_or(false, |t| t.contains(AAD_DEPENDENCY_MARKER));
    !is_noise
}

/// Obfuscates dependency call URLs before export.
///
/// Always keeps the envelope; for remote-dependency data it rewrites
/// `name` to the obfuscated path and `data` to the obfuscated URL so
/// API keys never reach the backend.
pub fn obfuscate_dependency_urls(envelope: &mut Envelope) -> bool {
    if envelope.base_type == REMOTE_DEPENDENCY_DATA {
        let data = envelope.base.data.clone();
        envelope.base.name = obfuscate_path(data.as_deref());
        envelope.base.data = obfuscate_url(data.as_deref());
    }
    true
}
